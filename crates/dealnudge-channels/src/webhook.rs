//! Webhook sender. Hands each notification to an HTTP endpoint (an email
//! service, a queue ingest, ...) as JSON.

use async_trait::async_trait;
use dealnudge_core::config::WebhookSenderConfig;
use dealnudge_core::{DealNudgeError, NotificationSender, Result};
use std::time::Duration;

pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
}

impl WebhookSender {
    pub fn new(config: &WebhookSenderConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(DealNudgeError::Config("sender.webhook.url is required".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DealNudgeError::Channel(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, to: &str, template: &str, params: &serde_json::Value) -> Result<()> {
        let mut req = self.client.post(&self.url).json(&serde_json::json!({
            "to": to,
            "template": template,
            "params": params,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DealNudgeError::Channel(format!("Webhook send failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!("📤 Webhook accepted '{template}' for {to}");
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(DealNudgeError::Channel(format!(
                "Webhook error {status}: {}",
                body.chars().take(200).collect::<String>()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering with `status_line`; returns the request it saw.
    async fn serve_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/notify", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length: ").map(str::to_string))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= split + 4 + length {
                        break;
                    }
                }
            }
            let response = format!("{status_line}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok");
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (url, handle)
    }

    fn config(url: &str) -> WebhookSenderConfig {
        let mut config = WebhookSenderConfig {
            url: url.into(),
            ..Default::default()
        };
        config.headers.insert("x-api-key".into(), "secret".into());
        config
    }

    #[test]
    fn test_requires_url() {
        assert!(WebhookSender::new(&WebhookSenderConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_posts_json_with_headers() {
        let (url, server) = serve_once("HTTP/1.1 202 Accepted").await;
        let sender = WebhookSender::new(&config(&url)).unwrap();
        sender
            .send("b@x.io", "buyer-weekly-digest", &serde_json::json!({ "first_name": "Bo" }))
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /notify"));
        assert!(request.to_ascii_lowercase().contains("x-api-key: secret"));
        assert!(request.contains("\"template\":\"buyer-weekly-digest\""));
        assert!(request.contains("\"to\":\"b@x.io\""));
    }

    #[tokio::test]
    async fn test_error_status_is_a_channel_error() {
        let (url, _server) = serve_once("HTTP/1.1 503 Service Unavailable").await;
        let sender = WebhookSender::new(&config(&url)).unwrap();
        let err = sender
            .send("b@x.io", "buyer-weekly-digest", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DealNudgeError::Channel(_)));
        assert!(err.to_string().contains("503"));
    }
}
