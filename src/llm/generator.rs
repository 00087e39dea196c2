use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::ImageFormat;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assets::UploadedAsset;
use crate::config::{Config, PollPolicy};
use crate::llm::error::GenerationError;
use crate::llm::gemini::{FileState, GenerativeApi, Part, RemoteFile};
use crate::llm::media::{file_extension, gemini_mime_for, MediaCategory};

pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "（Gemini 沒有回傳任何文字內容）";

/// Turns an uploaded asset plus a prompt into model text, choosing the
/// request shape from the asset's category.
pub struct MediaGenerator {
    api: Arc<dyn GenerativeApi>,
    request_timeout: Duration,
    media_timeout: Duration,
    poll: PollPolicy,
}

impl MediaGenerator {
    pub fn new(api: Arc<dyn GenerativeApi>, config: &Config) -> Self {
        MediaGenerator {
            api,
            request_timeout: config.gemini_request_timeout,
            media_timeout: config.gemini_media_timeout,
            poll: config.poll.clone(),
        }
    }

    pub async fn generate(
        &self,
        asset: Option<&UploadedAsset>,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        let Some(asset) = asset else {
            return Err(GenerationError::MissingAsset);
        };
        if prompt.trim().is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        match asset.category {
            MediaCategory::Image => self.generate_from_image(asset, prompt).await,
            MediaCategory::Text => self.generate_from_text(asset, prompt).await,
            MediaCategory::Video | MediaCategory::Audio => {
                self.generate_from_remote_file(asset, prompt, cancel).await
            }
            MediaCategory::Unsupported => Err(GenerationError::UnsupportedFormat {
                extension: file_extension(&asset.filename),
            }),
        }
    }

    fn ensure_credential(&self) -> Result<(), GenerationError> {
        if self.api.has_credential() {
            Ok(())
        } else {
            Err(GenerationError::CredentialMissing)
        }
    }

    /// Prompt-only request, used for the presentation step.
    pub async fn complete_text(&self, prompt: &str) -> Result<String, GenerationError> {
        self.ensure_credential()?;
        let text = self
            .api
            .generate_content(vec![Part::Text(prompt.to_string())], self.request_timeout)
            .await?;
        Ok(text_or_placeholder(text))
    }

    async fn generate_from_image(
        &self,
        asset: &UploadedAsset,
        prompt: &str,
    ) -> Result<String, GenerationError> {
        self.ensure_credential()?;
        let bytes = tokio::fs::read(&asset.path).await?;
        let (mime_type, data) = tokio::task::spawn_blocking(move || prepare_inline_image(bytes))
            .await
            .map_err(GenerationError::transport)??;

        let parts = vec![
            Part::InlineData { mime_type, data },
            Part::Text(prompt.to_string()),
        ];
        let text = self.api.generate_content(parts, self.request_timeout).await?;
        Ok(text_or_placeholder(text))
    }

    async fn generate_from_text(
        &self,
        asset: &UploadedAsset,
        prompt: &str,
    ) -> Result<String, GenerationError> {
        self.ensure_credential()?;
        let content = tokio::fs::read_to_string(&asset.path).await?;
        let parts = vec![Part::Text(content), Part::Text(prompt.to_string())];
        let text = self.api.generate_content(parts, self.request_timeout).await?;
        Ok(text_or_placeholder(text))
    }

    async fn generate_from_remote_file(
        &self,
        asset: &UploadedAsset,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        self.ensure_credential()?;
        let bytes = tokio::fs::read(&asset.path).await?;
        let mime_type = gemini_mime_for(&asset.filename, asset.category, &bytes);
        info!(
            "Uploading {} to Gemini ({} bytes, {})",
            asset.filename,
            bytes.len(),
            mime_type
        );
        let uploaded = self
            .api
            .upload_file(&asset.filename, &mime_type, bytes, self.media_timeout)
            .await?;
        info!("Completed upload: {} ({})", uploaded.uri, uploaded.name);

        let name = uploaded.name.clone();
        let outcome = self
            .generate_with_remote_file(uploaded, asset.category, &mime_type, prompt, cancel)
            .await;

        // Cleanup never changes what the caller sees.
        if let Err(err) = self.api.delete_file(&name).await {
            warn!("Failed to delete Gemini file {}: {}", name, err);
        }

        outcome
    }

    async fn generate_with_remote_file(
        &self,
        uploaded: RemoteFile,
        category: MediaCategory,
        mime_type: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        let file = self.wait_until_processed(uploaded, cancel).await?;
        if file.state == FileState::Failed {
            warn!("Gemini could not process {}", file.name);
            return Err(GenerationError::RemoteProcessingFailed {
                category,
                state: file.state.as_str().to_string(),
            });
        }
        if file.uri.trim().is_empty() {
            return Err(GenerationError::transport(format!(
                "Gemini file {} has no URI",
                file.name
            )));
        }

        let parts = vec![
            Part::FileData {
                mime_type: file.mime_type.clone().or_else(|| Some(mime_type.to_string())),
                file_uri: file.uri,
            },
            Part::Text(prompt.to_string()),
        ];
        let text = self.api.generate_content(parts, self.media_timeout).await?;
        Ok(text_or_placeholder(text))
    }

    /// Re-fetches the file every poll interval while it is `PROCESSING`.
    async fn wait_until_processed(
        &self,
        file: RemoteFile,
        cancel: &CancellationToken,
    ) -> Result<RemoteFile, GenerationError> {
        let started = Instant::now();
        let name = file.name.clone();
        let mut latest = file;
        let mut attempts: u32 = 0;

        while latest.state == FileState::Processing {
            if let Some(max_attempts) = self.poll.max_attempts {
                if attempts >= max_attempts {
                    warn!("Giving up on {} after {} checks", name, attempts);
                    return Err(GenerationError::PollAbandoned { attempts });
                }
            }
            if let Some(deadline) = self.poll.deadline {
                if started.elapsed() >= deadline {
                    warn!("Giving up on {} after {:?}", name, started.elapsed());
                    return Err(GenerationError::PollAbandoned { attempts });
                }
            }

            info!("Gemini is still processing {} (check {})", name, attempts + 1);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stopped waiting for {}: cancelled", name);
                    return Err(GenerationError::Cancelled);
                }
                _ = tokio::time::sleep(self.poll.interval) => {}
            }
            attempts += 1;
            latest = self.api.get_file(&name).await?;
        }

        info!(
            "Gemini file {} left processing with state {} after {} checks",
            name,
            latest.state.as_str(),
            attempts
        );
        Ok(latest)
    }
}

fn text_or_placeholder(text: Option<String>) -> String {
    text.unwrap_or_else(|| EMPTY_RESPONSE_PLACEHOLDER.to_string())
}

/// Decodes the upload as a still image. Formats Gemini accepts inline are sent
/// untouched; anything else is re-encoded as PNG.
fn prepare_inline_image(bytes: Vec<u8>) -> Result<(String, Vec<u8>), GenerationError> {
    let format = image::guess_format(&bytes)?;
    let decoded = image::load_from_memory_with_format(&bytes, format)?;
    let mime_type = match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        ImageFormat::WebP => "image/webp",
        _ => {
            let mut encoded = Cursor::new(Vec::new());
            decoded.write_to(&mut encoded, ImageFormat::Png)?;
            return Ok(("image/png".to_string(), encoded.into_inner()));
        }
    };
    Ok((mime_type.to_string(), bytes))
}
