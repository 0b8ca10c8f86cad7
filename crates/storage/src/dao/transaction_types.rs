//! Registered transaction types under `TRANSACTION_TYPES/`. L1 admission
//! rejects transactions whose type is unknown; types bound to a contract
//! route an invocation request when their transactions finalize.

use std::sync::Arc;

use dragonnet_common::errors::{DcResult, DragonNetError};
use dragonnet_state::dto;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object_store::{get_json_object, put_object_as_json, ObjectStore};

pub fn transaction_type_key(txn_type: &str) -> String {
    format!("TRANSACTION_TYPES/{txn_type}")
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionTypeModel {
    pub txn_type: String,
    #[serde(default)]
    pub custom_indexes: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
}

pub struct TransactionTypeDao {
    store: Arc<dyn ObjectStore>,
}

impl TransactionTypeDao {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn register(&self, model: &TransactionTypeModel) -> DcResult<()> {
        let key = transaction_type_key(&model.txn_type);
        if self.store.exists(&key)? {
            return Err(DragonNetError::TransactionTypeConflict(
                model.txn_type.clone(),
            ));
        }
        put_object_as_json(self.store.as_ref(), &key, &dto::export_versioned(model))
    }

    pub fn get(&self, txn_type: &str) -> DcResult<TransactionTypeModel> {
        let doc = get_json_object(self.store.as_ref(), &transaction_type_key(txn_type))
            .map_err(|_| DragonNetError::InvalidTransactionType(txn_type.to_string()))?;
        dto::import_versioned(doc)
    }

    pub fn delete(&self, txn_type: &str) -> DcResult<()> {
        self.store.delete(&transaction_type_key(txn_type))
    }

    pub fn list(&self) -> DcResult<Vec<TransactionTypeModel>> {
        let mut models = Vec::new();
        for key in self.store.list("TRANSACTION_TYPES/")? {
            let doc = get_json_object(self.store.as_ref(), &key)?;
            models.push(dto::import_versioned(doc)?);
        }
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn dao() -> TransactionTypeDao {
        TransactionTypeDao::new(Arc::new(MemoryStore::new()))
    }

    fn model(name: &str) -> TransactionTypeModel {
        TransactionTypeModel {
            txn_type: name.to_string(),
            custom_indexes: Value::Null,
            contract_id: None,
        }
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let dao = dao();
        dao.register(&model("payment")).unwrap();
        assert!(matches!(
            dao.register(&model("payment")),
            Err(DragonNetError::TransactionTypeConflict(_))
        ));
    }

    #[test]
    fn unknown_type_maps_to_invalid_transaction_type() {
        let dao = dao();
        assert!(matches!(
            dao.get("ghost"),
            Err(DragonNetError::InvalidTransactionType(_))
        ));
    }
}
