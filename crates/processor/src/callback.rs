//! Transaction callbacks: a URL registered at submission is POSTed the full
//! transaction once it finalizes into a block, then forgotten.

use std::{sync::Arc, time::Duration};

use dragonnet_coord::CoordStore;
use dragonnet_state::{dto, Transaction};
use tracing::*;

pub const CALLBACK_KEY: &str = "dc:tx:callback";

pub struct CallbackRegistry {
    coord: Arc<CoordStore>,
    http: reqwest::Client,
}

impl CallbackRegistry {
    pub fn new(coord: Arc<CoordStore>) -> Self {
        Self {
            coord,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client construction is infallible"),
        }
    }

    pub fn register(&self, txn_id: &str, callback_url: &str) {
        self.coord.hset(CALLBACK_KEY, txn_id, callback_url);
    }

    /// Fire-and-forget delivery; failures are logged and the registration is
    /// dropped either way.
    pub async fn fire_if_exists(&self, key: &str, txn: &Transaction) {
        let Some(url) = self.coord.hget(CALLBACK_KEY, key) else {
            return;
        };
        debug!(%key, %url, "firing transaction callback");

        let result = self
            .http
            .post(&url)
            .json(&dto::export_versioned(txn))
            .send()
            .await;
        if let Err(e) = result {
            warn!(%key, %url, err = %e, "transaction callback failed");
        }
        self.coord.hdel(CALLBACK_KEY, key);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn firing_removes_the_registration() {
        let coord = Arc::new(CoordStore::new());
        let callbacks = CallbackRegistry::new(coord.clone());
        callbacks.register("txn-1", "http://127.0.0.1:1/hook");

        let txn = Transaction::admit(
            "ledger".to_string(),
            json!({}),
            String::new(),
            None,
            "chain".to_string(),
        );
        callbacks.fire_if_exists("txn-1", &txn).await;
        assert_eq!(coord.hget(CALLBACK_KEY, "txn-1"), None);

        // Unregistered keys are a no-op.
        callbacks.fire_if_exists("txn-2", &txn).await;
    }
}
