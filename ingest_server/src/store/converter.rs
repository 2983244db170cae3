//! Remote binary-coverage converter.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;

use super::{ConversionRequest, ConversionResult, CoverageConverter};

/// Uploads the binary to `{base_url}/convert` with the request fields as
/// query parameters and reads back a JSON [`ConversionResult`].
#[derive(Clone)]
pub struct HttpCoverageConverter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCoverageConverter {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CoverageConverter for HttpCoverageConverter {
    async fn convert(
        &self,
        request: &ConversionRequest,
        file: &Path,
    ) -> anyhow::Result<ConversionResult> {
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?;

        let resp = self
            .client
            .post(format!("{}/convert", self.base_url))
            .query(request)
            .header("Content-Type", "application/octet-stream")
            .header("User-Agent", "cicd-ingest")
            .body(bytes)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("coverage conversion of {} failed: {status} {text}", request.file_name);
        }

        let result = resp.json::<ConversionResult>().await?;
        Ok(result)
    }
}
