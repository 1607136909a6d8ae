//! Background hot-reload of the filter policy document from an external URL.
//!
//! Grounded on `autopilot::periodic_db_cleanup`'s periodic-background-task
//! idiom (a `tokio::time::interval` loop spawned once at startup) plus a
//! jittered cadence. An earlier design keyed reloads off
//! `block.number % (FILTER_FREQUENCY_SECS / blocksPerFilterFrequency)`, which
//! drifts across chains with different block times; this loader sleeps on a
//! genuine wall-clock interval instead.

use {
    crate::domain::filter_policy::FilterPolicy,
    rand::Rng,
    reqwest::Client,
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

/// Hard-coded by the source as one hour; kept as the default here too.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(3600);

/// Fetches `url` once, returning the last-good policy unchanged on any
/// failure (network error or malformed JSON). Errors are logged, never
/// propagated: "The policy loader catches and logs its own errors."
async fn fetch(client: &Client, url: &url::Url, last_good: &FilterPolicy) -> FilterPolicy {
    let response = match client.get(url.clone()).send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(?err, %url, "filter policy reload failed, keeping last good policy");
            return last_good.clone();
        }
    };
    match response.error_for_status() {
        Ok(response) => match response.json::<FilterPolicy>().await {
            Ok(policy) => policy,
            Err(err) => {
                tracing::warn!(?err, %url, "filter policy document was malformed, keeping last good policy");
                last_good.clone()
            }
        },
        Err(err) => {
            tracing::warn!(?err, %url, "filter policy reload failed, keeping last good policy");
            last_good.clone()
        }
    }
}

/// Spawns the reload loop, publishing successive policies on `watch`. The
/// first fetch happens immediately so the watcher never runs a whole
/// interval on the hardcoded `FilterPolicy::default()`.
pub fn spawn(client: Client, url: url::Url, interval: Duration) -> watch::Receiver<Arc<FilterPolicy>> {
    let (tx, rx) = watch::channel(Arc::new(FilterPolicy::default()));
    tokio::spawn(async move {
        loop {
            let current = (**tx.borrow()).clone();
            let next = fetch(&client, &url, &current).await;
            let _ = tx.send(Arc::new(next));

            // Jitter the interval by up to 10% so that, in a multi-chain
            // deployment, every chain's reload task doesn't hammer the same
            // URL in lockstep.
            let jitter = rand::thread_rng().gen_range(0.0..0.1);
            let sleep_for = interval.mul_f64(1.0 + jitter);
            tokio::time::sleep(sleep_for).await;
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_keeps_last_good_policy_on_transport_error() {
        let client = Client::new();
        let url: url::Url = "http://127.0.0.1:1/unreachable".parse().unwrap();
        let last_good = FilterPolicy {
            default_action: crate::domain::filter_policy::Action::Drop,
            ..Default::default()
        };
        let fetched = fetch(&client, &url, &last_good).await;
        assert_eq!(fetched.default_action, last_good.default_action);
    }
}
