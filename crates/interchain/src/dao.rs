//! Persistence for interchain clients under `INTERCHAINS/<blockchain>/<name>`
//! plus the default-network selection the L5 anchor engine loads at startup.

use std::sync::Arc;

use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_storage::{get_json_object, put_object_as_json, ObjectStore};
use serde_json::{json, Value};

use crate::{bnb::BinanceClient, btc::BitcoinClient, eth::EthereumClient, InterchainClient};

pub const DEFAULT_KEY: &str = "INTERCHAINS/default";

pub fn interchain_key(blockchain: &str, name: &str) -> String {
    format!("INTERCHAINS/{blockchain}/{name}")
}

pub struct InterchainDao {
    store: Arc<dyn ObjectStore>,
}

impl InterchainDao {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn save_interchain_client(&self, client: &dyn InterchainClient) -> DcResult<()> {
        put_object_as_json(
            self.store.as_ref(),
            &interchain_key(client.blockchain(), client.name()),
            &client.export_as_at_rest(),
        )
    }

    pub fn does_interchain_exist(&self, blockchain: &str, name: &str) -> DcResult<bool> {
        self.store.exists(&interchain_key(blockchain, name))
    }

    pub fn get_interchain_client(
        &self,
        blockchain: &str,
        name: &str,
    ) -> DcResult<Arc<dyn InterchainClient>> {
        let doc = get_json_object(self.store.as_ref(), &interchain_key(blockchain, name))?;
        from_at_rest(blockchain, &doc)
    }

    pub fn delete_interchain_client(&self, blockchain: &str, name: &str) -> DcResult<()> {
        self.store.delete(&interchain_key(blockchain, name))
    }

    pub fn list_interchain_clients(
        &self,
        blockchain: &str,
    ) -> DcResult<Vec<Arc<dyn InterchainClient>>> {
        let prefix = format!("INTERCHAINS/{blockchain}/");
        let mut clients = Vec::new();
        for key in self.store.list(&prefix)? {
            let doc = get_json_object(self.store.as_ref(), &key)?;
            clients.push(from_at_rest(blockchain, &doc)?);
        }
        Ok(clients)
    }

    /// Select the network the L5 anchor engine publishes to.
    pub fn set_default_interchain_client(&self, blockchain: &str, name: &str) -> DcResult<()> {
        if !self.does_interchain_exist(blockchain, name)? {
            return Err(DragonNetError::not_found(format!(
                "interchain {blockchain}/{name}"
            )));
        }
        put_object_as_json(
            self.store.as_ref(),
            DEFAULT_KEY,
            &json!({
                "version": "1",
                "blockchain": blockchain,
                "name": name,
            }),
        )
    }

    pub fn get_default_interchain_client(&self) -> DcResult<Arc<dyn InterchainClient>> {
        let doc = get_json_object(self.store.as_ref(), DEFAULT_KEY)?;
        let blockchain = doc
            .get("blockchain")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DragonNetError::Validation("default interchain document malformed".to_string())
            })?;
        let name = doc.get("name").and_then(Value::as_str).ok_or_else(|| {
            DragonNetError::Validation("default interchain document malformed".to_string())
        })?;
        self.get_interchain_client(blockchain, name)
    }
}

fn from_at_rest(blockchain: &str, doc: &Value) -> DcResult<Arc<dyn InterchainClient>> {
    match blockchain {
        "bitcoin" => Ok(Arc::new(BitcoinClient::new_from_at_rest(doc)?)),
        "ethereum" => Ok(Arc::new(EthereumClient::new_from_at_rest(doc)?)),
        "binance" => Ok(Arc::new(BinanceClient::new_from_at_rest(doc)?)),
        other => Err(DragonNetError::bad_request(format!(
            "unsupported blockchain {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use dragonnet_storage::MemoryStore;

    use super::*;

    const KEY: &str = "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=";

    fn dao() -> InterchainDao {
        InterchainDao::new(Arc::new(MemoryStore::new()))
    }

    fn eth_client(name: &str) -> EthereumClient {
        EthereumClient::new(
            name.to_string(),
            "ETH_MAINNET".to_string(),
            "http://localhost:8545".to_string(),
            1,
            KEY,
        )
        .unwrap()
    }

    #[test]
    fn save_load_round_trip_by_blockchain_and_name() {
        let dao = dao();
        dao.save_interchain_client(&eth_client("primary")).unwrap();

        let loaded = dao.get_interchain_client("ethereum", "primary").unwrap();
        assert_eq!(loaded.name(), "primary");
        assert_eq!(loaded.get_network_string(), "ETH_MAINNET");
        assert!(dao.does_interchain_exist("ethereum", "primary").unwrap());
        assert!(!dao.does_interchain_exist("bitcoin", "primary").unwrap());
    }

    #[test]
    fn default_selection_requires_an_existing_client() {
        let dao = dao();
        assert!(dao
            .set_default_interchain_client("ethereum", "primary")
            .is_err());

        dao.save_interchain_client(&eth_client("primary")).unwrap();
        dao.set_default_interchain_client("ethereum", "primary")
            .unwrap();
        let default = dao.get_default_interchain_client().unwrap();
        assert_eq!(default.blockchain(), "ethereum");
        assert_eq!(default.name(), "primary");
    }
}
