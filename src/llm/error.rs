use crate::llm::media::MediaCategory;

/// Everything a generation request can end in besides text. The `Display`
/// strings are what the page shows to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("請先上傳檔案。")]
    MissingAsset,
    #[error("請輸入提示詞。")]
    EmptyPrompt,
    #[error("不支援的檔案格式，無法傳送至 Gemini API")]
    UnsupportedFormat { extension: Option<String> },
    #[error("未設定 GOOGLE_API_KEY，無法呼叫 Gemini API。")]
    CredentialMissing,
    #[error("{}: {state}", failure_prefix(.category))]
    RemoteProcessingFailed {
        category: MediaCategory,
        state: String,
    },
    #[error("等待 Gemini 處理檔案逾時 ({attempts} 次檢查後放棄)")]
    PollAbandoned { attempts: u32 },
    #[error("請求已取消")]
    Cancelled,
    #[error("呼叫 Gemini API 時發生錯誤：{detail}")]
    Transport { detail: String },
}

fn failure_prefix(category: &MediaCategory) -> &'static str {
    match category {
        MediaCategory::Audio => "音檔上傳失敗",
        _ => "影片上傳失敗",
    }
}

impl GenerationError {
    pub fn transport(detail: impl std::fmt::Display) -> Self {
        GenerationError::Transport {
            detail: detail.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::MissingAsset => "missing_asset",
            GenerationError::EmptyPrompt => "empty_prompt",
            GenerationError::UnsupportedFormat { .. } => "unsupported_format",
            GenerationError::CredentialMissing => "credential_missing",
            GenerationError::RemoteProcessingFailed { .. } => "remote_processing_failed",
            GenerationError::PollAbandoned { .. } => "poll_abandoned",
            GenerationError::Cancelled => "cancelled",
            GenerationError::Transport { .. } => "transport_error",
        }
    }
}

impl From<std::io::Error> for GenerationError {
    fn from(err: std::io::Error) -> Self {
        GenerationError::transport(err)
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::transport(err)
    }
}

impl From<image::ImageError> for GenerationError {
    fn from(err: image::ImageError) -> Self {
        GenerationError::transport(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_user_facing_messages() {
        assert_eq!(GenerationError::EmptyPrompt.to_string(), "請輸入提示詞。");
        assert_eq!(
            GenerationError::UnsupportedFormat { extension: None }.to_string(),
            "不支援的檔案格式，無法傳送至 Gemini API"
        );
        assert_eq!(
            GenerationError::transport("connection reset").to_string(),
            "呼叫 Gemini API 時發生錯誤：connection reset"
        );
    }

    #[test]
    fn processing_failure_names_the_state_and_media() {
        let video = GenerationError::RemoteProcessingFailed {
            category: MediaCategory::Video,
            state: "FAILED".to_string(),
        };
        let audio = GenerationError::RemoteProcessingFailed {
            category: MediaCategory::Audio,
            state: "FAILED".to_string(),
        };
        assert_eq!(video.to_string(), "影片上傳失敗: FAILED");
        assert_eq!(audio.to_string(), "音檔上傳失敗: FAILED");
        assert_eq!(audio.kind(), "remote_processing_failed");
    }
}
