use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

/// Tracks one wizard step from request arrival to response.
#[derive(Debug)]
pub struct StepTimer {
    step: String,
    asset_id: Option<String>,
    category: Option<String>,
    prompt: Option<String>,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

fn preview(value: &str) -> String {
    let flattened = value.replace('\n', " ");
    if flattened.chars().count() > 300 {
        flattened.chars().take(300).collect()
    } else {
        flattened
    }
}

impl StepTimer {
    pub fn new(step: &str) -> Self {
        StepTimer {
            step: step.to_string(),
            asset_id: None,
            category: None,
            prompt: None,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        }
    }

    pub fn with_asset(mut self, asset_id: &str, category: &str) -> Self {
        self.asset_id = Some(asset_id.to_string());
        self.category = Some(category.to_string());
        self
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = Some(preview(prompt));
        self
    }

    pub fn log_received(&self) {
        info!(
            target: "studio.timing",
            "event=step_received step={} asset_id={:?} category={:?} received_at={} prompt={:?}",
            self.step,
            self.asset_id,
            self.category,
            self.started_at.to_rfc3339(),
            self.prompt
        );
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: "studio.timing",
            "event=step_completed step={} asset_id={:?} started_at={} completed_at={} duration_s={:.3} status={} detail={}",
            self.step,
            self.asset_id,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        if !self.completed {
            self.mark_status("aborted", None);
            self.log_completed();
        }
    }
}

pub fn start_step_timer(timer: StepTimer) -> StepTimer {
    timer.log_received();
    timer
}

pub fn complete_step_timer(timer: &mut StepTimer, status: &str, detail: Option<String>) {
    timer.mark_status(status, detail);
    timer.log_completed();
}

pub async fn log_api_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: "studio.timing",
        "event=api_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: "studio.timing",
        "event=api_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status,
        metadata_text
    );

    result
}
