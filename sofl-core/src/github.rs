use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::error::{LauncherError, Result};

pub const USER_AGENT: &str = concat!("SOFL/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: Option<String>,
    pub size: Option<u64>,
    pub download_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitHubRelease {
    pub name: Option<String>,
    pub tag_name: Option<String>,
    pub published_at: Option<String>,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

impl GitHubRelease {
    /// First asset whose name ends with `suffix`.
    pub fn asset_with_suffix(&self, suffix: &str) -> Option<&GitHubAsset> {
        self.assets.iter().find(|a| a.name.ends_with(suffix))
    }
}

pub fn parse_releases(text: &str) -> serde_json::Result<Vec<GitHubRelease>> {
    serde_json::from_str(text)
}

/// GET a GitHub releases listing.
pub async fn fetch_releases(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<Vec<GitHubRelease>> {
    info!("GitHub fetch: {}", url);
    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github.v3+json")
        .timeout(timeout)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(LauncherError::HttpStatus { status: status.as_u16(), url: url.to_string() });
    }
    let text = resp.text().await?;
    parse_releases(&text).map_err(|e| LauncherError::InvalidResponse(format!("releases JSON: {e}")))
}
