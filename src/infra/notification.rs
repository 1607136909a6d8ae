//! Notification sinks: the Slack/Sentry external collaborators, narrowed to
//! the trait the core actually drives.
//!
//! Grounded on `alerter`'s alerting cadence (`AlertConfig::min_alert_interval`,
//! `alerter::Alerter::update`'s `last_alert` gate) generalized into a
//! reusable sink behind a trait, so the chain watcher doesn't hardcode Slack.

use {chrono::Utc, reqwest::Client, std::time::Duration};

/// A sink for operator-facing error notifications (Slack webhook, Sentry,
/// or any future channel). The chain watcher calls this on persistent RPC
/// failure, watchdog expiry, and registry write failure; the registry's
/// `lastNotifiedError` cursor is this trait's rate-limit bookkeeping made
/// durable.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ErrorNotifier: Send + Sync {
    async fn notify(&self, network: &str, message: &str);
}

/// Sends nothing. Selected by `--silent`.
pub struct NullNotifier;

#[async_trait::async_trait]
impl ErrorNotifier for NullNotifier {
    async fn notify(&self, _network: &str, _message: &str) {}
}

/// Posts to a Slack incoming webhook, rate-limited so the same chain doesn't
/// spam the channel: at most one notification per `min_interval`, tracked by
/// the caller via the registry's `last_notified_error` cursor (this struct is
/// stateless and trusts its caller for the gate, matching how `alerter`
/// leaves the cadence decision to `Alerter::update` rather than embedding it
/// in `ZeroExApi`/`OrderBookApi`).
pub struct SlackNotifier {
    webhook: url::Url,
    client: Client,
}

impl SlackNotifier {
    pub fn new(webhook: url::Url, client: Client) -> Self {
        Self { webhook, client }
    }
}

#[derive(serde::Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}

#[async_trait::async_trait]
impl ErrorNotifier for SlackNotifier {
    async fn notify(&self, network: &str, message: &str) {
        let text = format!("[watch-tower/{network}] {message}");
        let result = self
            .client
            .post(self.webhook.clone())
            .json(&SlackPayload { text: &text })
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(status = %response.status(), "slack webhook rejected notification")
            }
            Err(err) => tracing::warn!(?err, "failed to reach slack webhook"),
            Ok(_) => {}
        }
    }
}

/// Whether enough time has passed since `last_notified_error` to notify
/// again without spamming the sink. `min_interval` mirrors `alerter`'s
/// `min_alert_interval` flag.
pub fn should_notify(last_notified_error: Option<chrono::DateTime<Utc>>, min_interval: Duration) -> bool {
    match last_notified_error {
        None => true,
        Some(last) => {
            let elapsed = Utc::now().signed_duration_since(last);
            elapsed.to_std().map(|d| d >= min_interval).unwrap_or(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifies_when_never_notified() {
        assert!(should_notify(None, Duration::from_secs(60)));
    }

    #[test]
    fn does_not_notify_within_the_window() {
        assert!(!should_notify(Some(Utc::now()), Duration::from_secs(60)));
    }

    #[test]
    fn notifies_again_once_the_window_elapses() {
        let last = Utc::now() - chrono::Duration::seconds(120);
        assert!(should_notify(Some(last), Duration::from_secs(60)));
    }
}
