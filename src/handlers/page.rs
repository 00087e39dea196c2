use askama::Template;
use axum::extract::State;
use axum::response::Html;

use crate::handlers::ApiError;
use crate::llm::media::{AUDIO_EXTENSIONS, IMAGE_EXTENSIONS, TEXT_EXTENSIONS, VIDEO_EXTENSIONS};
use crate::state::AppState;

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate<'a> {
    pub has_api_key: bool,
    pub accept: String,
    pub default_prompt: &'a str,
    pub default_presentation_prompt: &'a str,
}

fn accept_attribute() -> String {
    [IMAGE_EXTENSIONS, VIDEO_EXTENSIONS, AUDIO_EXTENSIONS, TEXT_EXTENSIONS]
        .concat()
        .iter()
        .map(|extension| format!(".{extension}"))
        .collect::<Vec<_>>()
        .join(",")
}

impl<'a> IndexTemplate<'a> {
    pub fn new(
        default_prompt: &'a str,
        default_presentation_prompt: &'a str,
        has_api_key: bool,
    ) -> Self {
        IndexTemplate {
            has_api_key,
            accept: accept_attribute(),
            default_prompt,
            default_presentation_prompt,
        }
    }
}

pub async fn index(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let page = IndexTemplate::new(
        &state.config.default_prompt,
        &state.config.default_presentation_prompt,
        state.config.has_api_key(),
    )
    .render()
    .map_err(|err| ApiError::Internal(anyhow::anyhow!("failed to render page: {err}")))?;
    Ok(Html(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_are_escaped_into_attributes() {
        let page = IndexTemplate::new("say \"hi\" <b>", "outline & more", true)
            .render()
            .unwrap();
        assert!(page.contains(r#"value="say &quot;hi&quot; &lt;b&gt;""#));
        assert!(page.contains(r#"value="outline &amp; more""#));
        assert!(!page.contains("{{"));
        assert!(!page.contains("尚未設定 GOOGLE_API_KEY"));
    }

    #[test]
    fn missing_credential_shows_the_banner() {
        let page = IndexTemplate::new("p", "q", false).render().unwrap();
        assert!(page.contains("尚未設定 GOOGLE_API_KEY"));
    }

    #[test]
    fn accept_list_covers_every_supported_suffix() {
        let accept = accept_attribute();
        for extension in [".jpg", ".gif", ".mkv", ".ogg", ".txt"] {
            assert!(accept.contains(extension), "{accept}");
        }
    }
}
