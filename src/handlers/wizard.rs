use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use pulldown_cmark::{html, Event, Options, Parser};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assets::UploadedAsset;
use crate::handlers::ApiError;
use crate::llm::media::{detect_mime_type, file_extension, mime_for_extension, MediaCategory};
use crate::llm::GenerationError;
use crate::state::AppState;
use crate::utils::timing::{complete_step_timer, start_step_timer, StepTimer};

pub const UNSUPPORTED_VIEW_MESSAGE: &str = "不支援的檔案格式";

/// Which of the four preview widgets the page shows for an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DisplayView {
    Text { label: String, content: String },
    Image { label: String, url: String },
    Video { label: String, url: String },
    Audio { label: String, url: String },
    Unsupported { label: String, message: String },
}

#[derive(Debug, Serialize)]
pub struct UploadReply {
    pub asset: UploadedAsset,
    pub view: DisplayView,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EditRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct PresentationRequest {
    #[serde(default)]
    pub edited_text: String,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct GenerationReply {
    pub ok: bool,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl GenerationReply {
    fn from_result(result: &Result<String, GenerationError>) -> Self {
        match result {
            Ok(text) => GenerationReply {
                ok: true,
                text: text.clone(),
                kind: None,
                html: None,
            },
            Err(err) => GenerationReply {
                ok: false,
                text: err.to_string(),
                kind: Some(err.kind()),
                html: None,
            },
        }
    }
}

fn asset_url(asset: &UploadedAsset) -> String {
    format!("/api/assets/{}", asset.id)
}

pub async fn display_view(asset: &UploadedAsset) -> anyhow::Result<DisplayView> {
    let view = match asset.category {
        MediaCategory::Text => {
            let bytes = tokio::fs::read(&asset.path).await?;
            DisplayView::Text {
                label: "上傳的文字檔案內容".to_string(),
                content: String::from_utf8_lossy(&bytes).into_owned(),
            }
        }
        MediaCategory::Image => DisplayView::Image {
            label: "上傳的圖片".to_string(),
            url: asset_url(asset),
        },
        MediaCategory::Video => DisplayView::Video {
            label: "上傳的影片".to_string(),
            url: asset_url(asset),
        },
        MediaCategory::Audio => DisplayView::Audio {
            label: "上傳的音訊".to_string(),
            url: asset_url(asset),
        },
        MediaCategory::Unsupported => DisplayView::Unsupported {
            label: "顯示內容".to_string(),
            message: UNSUPPORTED_VIEW_MESSAGE.to_string(),
        },
    };
    Ok(view)
}

pub fn compose_presentation_prompt(presentation_prompt: &str, edited_text: &str) -> String {
    format!("{presentation_prompt}，內容: {edited_text}。")
}

/// Markdown to HTML. Raw HTML from the model is shown as text.
pub fn render_markdown(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH)
        .map(|event| match event {
            Event::Html(raw) => Event::Text(raw),
            other => other,
        });
    let mut output = String::new();
    html::push_html(&mut output, parser);
    output
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadReply>, ApiError> {
    let mut timer = start_step_timer(StepTimer::new("upload"));
    let mut file: Option<(String, Bytes)> = None;
    let mut replaces: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await?;
                file = Some((filename, bytes));
            }
            "replaces" => {
                replaces = Some(field.text().await?);
            }
            _ => {}
        }
    }

    let Some((filename, bytes)) = file else {
        complete_step_timer(&mut timer, "error", Some("missing file field".to_string()));
        return Err(ApiError::BadRequest("請先上傳檔案。".to_string()));
    };

    let asset = state.assets.save(&filename, &bytes).await?;

    // The replaced upload goes only once the new one is safely stored.
    if let Some(previous) = replaces.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        state.assets.discard(previous).await;
    }
    let view = display_view(&asset).await?;
    complete_step_timer(
        &mut timer,
        "success",
        Some(format!("asset_id={} category={}", asset.id, asset.category)),
    );
    Ok(Json(UploadReply { asset, view }))
}

pub async fn asset_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let asset = state
        .assets
        .get(&id)
        .ok_or_else(|| ApiError::AssetNotFound(id.clone()))?;
    let bytes = tokio::fs::read(&asset.path)
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;
    let content_type = detect_mime_type(&bytes)
        .or_else(|| {
            file_extension(&asset.filename)
                .as_deref()
                .and_then(mime_for_extension)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Json<GenerationReply> {
    let asset = request
        .asset_id
        .as_deref()
        .and_then(|id| state.assets.get(id.trim()));

    let mut timer = StepTimer::new("generate").with_prompt(&request.prompt);
    if let Some(asset) = &asset {
        timer = timer.with_asset(&asset.id, asset.category.label());
    }
    let mut timer = start_step_timer(timer);

    let cancel = state.shutdown.child_token();
    let result = state
        .generator
        .generate(asset.as_ref(), &request.prompt, &cancel)
        .await;

    match &result {
        Ok(text) => {
            let detail = format!("chars={}", text.chars().count());
            complete_step_timer(&mut timer, "success", Some(detail));
        }
        Err(err) => {
            info!("Generation ended without text: {}", err);
            complete_step_timer(&mut timer, "error", Some(err.kind().to_string()));
        }
    }
    Json(GenerationReply::from_result(&result))
}

/// Step 3 copies the model reply into the editor untouched.
pub async fn edit(Json(request): Json<EditRequest>) -> Json<EditRequest> {
    Json(request)
}

pub async fn presentation(
    State(state): State<AppState>,
    Json(request): Json<PresentationRequest>,
) -> Json<GenerationReply> {
    let prompt = compose_presentation_prompt(&request.prompt, &request.edited_text);
    let mut timer = start_step_timer(StepTimer::new("presentation").with_prompt(&prompt));

    let result = state.generator.complete_text(&prompt).await;
    let mut reply = GenerationReply::from_result(&result);
    match &result {
        Ok(markdown) => {
            reply.html = Some(render_markdown(markdown));
            complete_step_timer(&mut timer, "success", None);
        }
        Err(err) => complete_step_timer(&mut timer, "error", Some(err.kind().to_string())),
    }
    Json(reply)
}
