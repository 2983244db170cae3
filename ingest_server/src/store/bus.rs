//! Event bus adapters.

use async_trait::async_trait;
use bytes::Bytes;

use super::EventBus;

/// Publishes by POSTing the raw payload to `{base_url}/topics/{topic}`.
#[derive(Clone)]
pub struct HttpEventBus {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventBus {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, topic)
    }
}

#[async_trait]
impl EventBus for HttpEventBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.topic_url(topic))
            .header("Content-Type", "application/json")
            .header("User-Agent", "cicd-ingest")
            .body(payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("publish to {topic} failed: {status} {text}");
        }
        Ok(())
    }
}

/// Logs each message instead of sending it. Used when no bus is configured.
#[derive(Clone, Default)]
pub struct TracingEventBus;

#[async_trait]
impl EventBus for TracingEventBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()> {
        tracing::info!(
            topic,
            payload = %String::from_utf8_lossy(&payload),
            "Event bus disabled, message logged only"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_url_trims_trailing_slash() {
        let bus = HttpEventBus::new("http://bus.internal:8080/");
        assert_eq!(
            bus.topic_url("jenkins-log-triage"),
            "http://bus.internal:8080/topics/jenkins-log-triage"
        );
    }

    #[tokio::test]
    async fn test_tracing_bus_accepts_everything() {
        let bus = TracingEventBus;
        bus.publish("t", Bytes::from_static(b"{}")).await.unwrap();
    }
}
