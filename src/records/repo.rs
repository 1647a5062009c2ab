use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::kv::{records_key, KvError, KvStore};

/// One bill in a user's ledger, stored as a JSON list element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tips: String,
    pub amount: f64,
    pub date: String,
}

/// The per-user list of records, in insertion order.
pub struct Ledger<'a> {
    kv: &'a dyn KvStore,
    key: String,
}

impl<'a> Ledger<'a> {
    pub fn of(kv: &'a dyn KvStore, username: &str) -> Self {
        Self {
            kv,
            key: records_key(username),
        }
    }

    pub async fn append(&self, record: &Record) -> Result<(), ApiError> {
        let raw = serde_json::to_string(record)?;
        self.kv.rpush(&self.key, &raw).await?;
        Ok(())
    }

    /// Stored elements as `(raw, parsed)` pairs.
    pub async fn entries(&self) -> Result<Vec<(String, Record)>, ApiError> {
        let raw = self.kv.lrange_all(&self.key).await?;
        raw.into_iter()
            .map(|r| -> Result<(String, Record), ApiError> {
                let rec = serde_json::from_str(&r)?;
                Ok((r, rec))
            })
            .collect()
    }

    pub async fn records(&self) -> Result<Vec<Record>, ApiError> {
        Ok(self.entries().await?.into_iter().map(|(_, r)| r).collect())
    }

    /// Removes the first stored element byte-equal to `raw`.
    pub async fn remove_raw(&self, raw: &str) -> Result<bool, KvError> {
        self.kv.lrem_first(&self.key, raw).await
    }
}
