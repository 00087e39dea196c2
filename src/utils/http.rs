use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

/// Per-request timeouts are set by the caller; only connection setup is bounded here.
pub fn build_http_client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .user_agent(concat!("multimodal-studio/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
