//! Outbound proposal notifications
//!
//! When an existing proposal is replaced, its new state is POSTed once to a
//! configured endpoint. There is no retry; the outcome is only diagnostic.

use crate::config::NotifyConfig;
use crate::error::AppError;
use crate::proposal::Proposal;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, info, warn};

/// Diagnostic result of one notification attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationReport {
    /// The endpoint answered; any status counts as delivered
    Delivered { status: u16, body: String },
    /// Notifications are disabled
    Skipped,
    /// The endpoint could not be reached
    Failed(String),
}

impl NotificationReport {
    /// One-line summary for the `x-notification-status` response header
    pub fn summary(&self) -> String {
        match self {
            NotificationReport::Delivered { status, .. } => format!("delivered {}", status),
            NotificationReport::Skipped => "skipped".to_string(),
            NotificationReport::Failed(reason) => {
                let reason: String = reason
                    .chars()
                    .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { ' ' })
                    .collect();
                format!("failed: {}", reason)
            }
        }
    }
}

/// Receives the new state of a replaced proposal
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Returns `NotificationFailed` when the endpoint cannot be reached.
    async fn notify(&self, proposal: &Proposal) -> Result<NotificationReport, AppError>;
}

/// Notification sink that POSTs the proposal JSON over HTTP
pub struct HttpNotifier {
    client: Client,
    url: url::Url,
    enabled: bool,
}

impl HttpNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            enabled: config.enabled,
        })
    }
}

#[async_trait]
impl NotificationSink for HttpNotifier {
    async fn notify(&self, proposal: &Proposal) -> Result<NotificationReport, AppError> {
        if !self.enabled {
            info!("Notifications disabled; skipping update for proposal [{}]", proposal.id);
            return Ok(NotificationReport::Skipped);
        }

        let body = proposal.to_json_bytes()?;
        debug!("POST {} for proposal [{}]", self.url, proposal.id);

        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::NotificationFailed(format!("request to {} timed out", self.url))
                } else {
                    AppError::NotificationFailed(format!("request to {} failed: {}", self.url, e))
                }
            })?;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    "Failed reading notification response body for proposal [{}]: {}",
                    proposal.id, e
                );
                String::new()
            }
        };

        if status.is_success() {
            info!("Notification for proposal [{}] delivered: {}", proposal.id, status);
        } else {
            warn!("Notification for proposal [{}] answered {}", proposal.id, status);
        }
        debug!("Notification response body: {}", body);

        Ok(NotificationReport::Delivered {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
pub mod testing {
    //! Test doubles for the notification sink

    use super::*;
    use std::sync::Mutex;

    /// Records every notified proposal; optionally fails every call
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<Proposal>>,
        pub fail: bool,
    }

    impl RecordingSink {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn sent(&self) -> Vec<Proposal> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, proposal: &Proposal) -> Result<NotificationReport, AppError> {
            self.sent.lock().unwrap().push(proposal.clone());
            if self.fail {
                return Err(AppError::NotificationFailed("connection refused".to_string()));
            }
            Ok(NotificationReport::Delivered {
                status: 200,
                body: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Router};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    type Captured = Arc<Mutex<Vec<(Option<String>, String)>>>;

    fn sample() -> Proposal {
        Proposal {
            id: "P1".to_string(),
            payer_tax_id: "12345678900".to_string(),
            payer_accepted: true,
            beneficiary_accepted: true,
            paid: false,
        }
    }

    fn config_for(url: &str, timeout: Duration) -> NotifyConfig {
        NotifyConfig {
            enabled: true,
            url: url::Url::parse(url).unwrap(),
            timeout,
        }
    }

    /// Serve a capturing endpoint on an ephemeral port
    async fn spawn_endpoint(delay: Duration) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let app = Router::new().route(
            "/atualizar",
            post(move |headers: HeaderMap, body: String| {
                let sink = sink.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    let content_type = headers
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    sink.lock().unwrap().push((content_type, body));
                    "ok"
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/atualizar", addr), captured)
    }

    #[tokio::test]
    async fn test_posts_proposal_json() {
        let (url, captured) = spawn_endpoint(Duration::ZERO).await;
        let notifier = HttpNotifier::new(&config_for(&url, Duration::from_secs(5))).unwrap();

        let report = notifier.notify(&sample()).await.unwrap();

        assert_eq!(
            report,
            NotificationReport::Delivered {
                status: 200,
                body: "ok".to_string()
            }
        );
        let captured = captured.lock().unwrap().clone();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0.as_deref(), Some("application/json"));
        let sent: Proposal = serde_json::from_str(&captured[0].1).unwrap();
        assert_eq!(sent, sample());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("http://{}/atualizar", addr);
        let notifier = HttpNotifier::new(&config_for(&url, Duration::from_secs(2))).unwrap();

        let result = notifier.notify(&sample()).await;
        assert!(matches!(result, Err(AppError::NotificationFailed(_))));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let (url, _captured) = spawn_endpoint(Duration::from_secs(3)).await;
        let notifier = HttpNotifier::new(&config_for(&url, Duration::from_millis(200))).unwrap();

        match notifier.notify(&sample()).await {
            Err(AppError::NotificationFailed(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_response_body_still_counts_as_delivered() {
        // promises more body than it sends, then hangs up
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 64\r\n\r\npartial")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let url = format!("http://{}/atualizar", addr);
        let notifier = HttpNotifier::new(&config_for(&url, Duration::from_secs(2))).unwrap();

        let report = notifier.notify(&sample()).await.unwrap();
        assert_eq!(
            report,
            NotificationReport::Delivered {
                status: 200,
                body: String::new()
            }
        );
    }

    #[test]
    fn test_disabled_notifier_skips() {
        let mut config = config_for("http://127.0.0.1:9/atualizar", Duration::from_secs(1));
        config.enabled = false;
        let notifier = HttpNotifier::new(&config).unwrap();

        let report = tokio_test::block_on(notifier.notify(&sample())).unwrap();
        assert_eq!(report, NotificationReport::Skipped);
    }

    #[test]
    fn test_summary_is_header_safe() {
        let report = NotificationReport::Failed("line one\nline two".to_string());
        assert_eq!(report.summary(), "failed: line one line two");
        assert_eq!(NotificationReport::Skipped.summary(), "skipped");
    }
}
