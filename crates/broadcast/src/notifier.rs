//! Receipt-notification fanout. Whenever a verification lands in storage its
//! key is queued; this worker drains the queue and POSTs the raw object to
//! every configured notification URL, signed under our chain key. Delivery
//! is at-most-once: the entry is dropped whatever the outcome.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use dragonnet_keys::ChainKeys;
use dragonnet_storage::ObjectStore;
use dragonnet_tasks::ShutdownGuard;
use tracing::*;

use crate::functions::BroadcastFunctions;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct NotificationWorker {
    own_id: String,
    functions: Arc<BroadcastFunctions>,
    store: Arc<dyn ObjectStore>,
    keys: Arc<ChainKeys>,
    /// Targets keyed by `"all"` or `"l2"`..`"l5"`.
    urls: BTreeMap<String, Vec<String>>,
    http: reqwest::Client,
}

impl NotificationWorker {
    pub fn new(
        own_id: String,
        functions: Arc<BroadcastFunctions>,
        store: Arc<dyn ObjectStore>,
        keys: Arc<ChainKeys>,
        urls: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            own_id,
            functions,
            store,
            keys,
            urls,
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client construction is infallible"),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownGuard) -> anyhow::Result<()> {
        info!("starting verification notification worker");
        let interval = tokio::time::interval(POLL_INTERVAL);
        tokio::pin!(interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.wait_for_shutdown() => {
                    info!("notification worker shutting down");
                    return Ok(());
                }
            }

            while let Some(storage_key) = self.functions.pop_notification() {
                self.notify(&storage_key).await;
            }
        }
    }

    async fn notify(&self, storage_key: &str) {
        let bytes = match self.store.get(storage_key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%storage_key, err = %e, "queued notification object unreadable");
                return;
            }
        };
        let signature = self.keys.sign_bytes(&bytes);

        let mut targets: Vec<&String> = self
            .urls
            .get("all")
            .map(|urls| urls.iter().collect())
            .unwrap_or_default();
        if let Some(level) = level_from_storage_location(storage_key) {
            if let Some(urls) = self.urls.get(&format!("l{level}")) {
                targets.extend(urls.iter());
            }
        }

        for url in targets {
            let result = self
                .http
                .post(url)
                .header("dragonchainId", &self.own_id)
                .header("signature", &signature)
                .body(bytes.clone())
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%url, %storage_key, "notification delivered");
                }
                Ok(resp) => {
                    warn!(%url, %storage_key, status = %resp.status(), "notification rejected");
                }
                Err(e) => {
                    warn!(%url, %storage_key, err = %e, "notification delivery failed");
                }
            }
        }
    }
}

/// Extract the verification level from a storage key shaped like
/// `BLOCK/<l1-block-id>-l<level>-<chain-id>`.
pub fn level_from_storage_location(storage_key: &str) -> Option<u8> {
    let mut remainder = storage_key;
    while let Some(idx) = remainder.find("-l") {
        let tail = &remainder[idx + 2..];
        let mut chars = tail.chars();
        if let (Some(digit), Some('-')) = (chars.next(), chars.next()) {
            if digit.is_ascii_digit() {
                return Some(digit as u8 - b'0');
            }
        }
        remainder = &remainder[idx + 2..];
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parses_from_verification_keys() {
        assert_eq!(level_from_storage_location("BLOCK/123-l3-chainid"), Some(3));
        assert_eq!(level_from_storage_location("BLOCK/1-2-3-l2-a-b"), Some(2));
    }

    #[test]
    fn level_is_none_for_other_keys() {
        assert_eq!(level_from_storage_location("BLOCK/something-apples-x"), None);
        assert_eq!(level_from_storage_location("TRANSACTION/123"), None);
    }
}
