use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
    Text,
    Unsupported,
}

impl MediaCategory {
    pub fn label(self) -> &'static str {
        match self {
            MediaCategory::Image => "image",
            MediaCategory::Video => "video",
            MediaCategory::Audio => "audio",
            MediaCategory::Text => "text",
            MediaCategory::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg"];
pub const TEXT_EXTENSIONS: &[&str] = &["txt"];

/// Lower-cased text after the last '.', or `None` when the name has no dot.
pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_lowercase())
}

pub fn classify(filename: &str) -> MediaCategory {
    let Some(extension) = file_extension(filename) else {
        return MediaCategory::Unsupported;
    };
    let extension = extension.as_str();
    if IMAGE_EXTENSIONS.contains(&extension) {
        MediaCategory::Image
    } else if VIDEO_EXTENSIONS.contains(&extension) {
        MediaCategory::Video
    } else if AUDIO_EXTENSIONS.contains(&extension) {
        MediaCategory::Audio
    } else if TEXT_EXTENSIONS.contains(&extension) {
        MediaCategory::Text
    } else {
        MediaCategory::Unsupported
    }
}

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "txt" => "text/plain; charset=utf-8",
        _ => return None,
    };
    Some(mime)
}

pub fn normalize_gemini_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" => "image/jpeg".to_string(),
        "audio/mpeg" => "audio/mp3".to_string(),
        "audio/x-wav" | "audio/vnd.wave" => "audio/wav".to_string(),
        "video/quicktime" => "video/mov".to_string(),
        "video/x-msvideo" => "video/avi".to_string(),
        "video/x-ms-wmv" => "video/wmv".to_string(),
        _ => lowered,
    }
}

/// MIME type sent to Gemini for an uploaded asset. Content sniffing wins when
/// it agrees with the category; the filename extension is the fallback.
pub fn gemini_mime_for(filename: &str, category: MediaCategory, bytes: &[u8]) -> String {
    let family = match category {
        MediaCategory::Image => Some("image/"),
        MediaCategory::Video => Some("video/"),
        MediaCategory::Audio => Some("audio/"),
        MediaCategory::Text | MediaCategory::Unsupported => None,
    };

    if let (Some(family), Some(detected)) = (family, detect_mime_type(bytes)) {
        if detected.starts_with(family) {
            return normalize_gemini_mime_type(&detected);
        }
    }

    file_extension(filename)
        .as_deref()
        .and_then(mime_for_extension)
        .map(normalize_gemini_mime_type)
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
