// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Outbound notifications — an external collaborator, strictly
//! best-effort.  A webhook failure is logged and swallowed; nothing in
//! the hub ever blocks or fails because Slack is down.

use async_trait::async_trait;
use tracing::{debug, warn};

/// Best-effort notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a human-readable notification.  Must not fail the caller:
    /// implementations log and swallow their own errors.
    async fn notify(&self, text: &str);
}

/// No-op sink used when `SLACK_WEBHOOK_URL` is unset.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _text: &str) {}
}

/// Slack incoming-webhook sink.
pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        // Short timeout: a dead webhook must not hold up end_session.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            webhook_url: webhook_url.into(),
            client,
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, text: &str) {
        let result = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!("Slack notification delivered");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Slack webhook rejected notification");
            }
            Err(e) => {
                warn!("Slack webhook unreachable: {e}");
            }
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_notifier_swallows_everything() {
        NullNotifier.notify("nothing happens").await;
    }

    #[tokio::test]
    async fn slack_notifier_survives_unreachable_webhook() {
        // Nothing listens on this port; the call must not panic or hang.
        let n = SlackNotifier::new("http://127.0.0.1:1/hooks/dead");
        n.notify("session ended").await;
    }
}
