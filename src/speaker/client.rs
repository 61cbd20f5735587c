//! Producer side: hand a notification to the coordinator, or speak it
//! directly when no coordinator is running.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::api::{SimpleResponse, SpeakRequest};
use super::queue::{NotificationSource, Priority};
use super::speech::CommandSpeaker;
use crate::config::CoordinatorConfig;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("coordinator unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("coordinator returned HTTP {0}")]
    Http(StatusCode),
    #[error("coordinator rejected notification: {0}")]
    Rejected(String),
}

/// How a notification was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Accepted by the coordinator's queue.
    Queued,
    /// Coordinator unavailable or refused the entry; speech command started
    /// directly. `coordinator_up` is the result of the availability probe.
    Fallback { reason: String, coordinator_up: bool },
    /// Not spoken at all.
    Failed { reason: String, coordinator_up: bool },
}

impl NotifyOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fallback { .. } => "fallback",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Queued => None,
            Self::Fallback { reason, .. } | Self::Failed { reason, .. } => Some(reason.as_str()),
        }
    }

    /// Whether the coordinator answered the availability probe.
    pub fn coordinator_up(&self) -> bool {
        match self {
            Self::Queued => true,
            Self::Fallback { coordinator_up, .. } | Self::Failed { coordinator_up, .. } => {
                *coordinator_up
            }
        }
    }
}

pub struct NotificationClient {
    client: Client,
    base_url: String,
    fallback: CommandSpeaker,
}

impl NotificationClient {
    pub fn new(config: &CoordinatorConfig, fallback: CommandSpeaker) -> Self {
        Self::with_base_url(config, config.base_url(), fallback)
    }

    pub fn with_base_url(
        config: &CoordinatorConfig,
        base_url: impl Into<String>,
        fallback: CommandSpeaker,
    ) -> Self {
        // Short timeouts: hooks must never hold up the host tool.
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            fallback,
        }
    }

    /// Quick availability check against `GET /status`.
    pub async fn probe(&self) -> bool {
        match self.client.get(format!("{}/status", self.base_url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Coordinator probe failed: {e}");
                false
            }
        }
    }

    async fn enqueue(&self, request: &SpeakRequest) -> Result<(), ClientError> {
        let resp = self
            .client
            .post(format!("{}/speak", self.base_url))
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ClientError::Http(resp.status()));
        }

        let body: SimpleResponse = resp.json().await?;
        if body.is_queued() {
            Ok(())
        } else {
            Err(ClientError::Rejected(
                body.error.unwrap_or_else(|| body.status.clone()),
            ))
        }
    }

    /// Returns whether the notification was accepted (queued or handed to
    /// the direct fallback). Never fails.
    pub async fn notify(&self, message: &str, priority: Priority, source: NotificationSource) -> bool {
        self.send(message, priority, source, serde_json::Value::Null)
            .await
            .accepted()
    }

    /// Like `notify`, reporting which path was taken.
    pub async fn send(
        &self,
        message: &str,
        priority: Priority,
        source: NotificationSource,
        metadata: serde_json::Value,
    ) -> NotifyOutcome {
        let message = message.trim();
        if message.is_empty() {
            return NotifyOutcome::Failed {
                reason: "empty message".into(),
                coordinator_up: false,
            };
        }

        let coordinator_up = self.probe().await;
        let reason = if coordinator_up {
            let request = SpeakRequest {
                message: message.to_string(),
                priority,
                source,
                metadata,
            };
            match self.enqueue(&request).await {
                Ok(()) => {
                    debug!("Queued [{priority}] notification with coordinator");
                    return NotifyOutcome::Queued;
                }
                Err(e) => e.to_string(),
            }
        } else {
            "coordinator unreachable".to_string()
        };

        info!("{reason}; speaking directly");
        match self.fallback.spawn_detached(message) {
            Ok(()) => NotifyOutcome::Fallback {
                reason,
                coordinator_up,
            },
            Err(e) => {
                warn!("Direct speech failed: {e}");
                NotifyOutcome::Failed {
                    reason: e.to_string(),
                    coordinator_up,
                }
            }
        }
    }
}
