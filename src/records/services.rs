use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    dto::AddRecordRequest,
    repo::{Ledger, Record},
};
use crate::{auth::Identity, error::ApiError, kv::KvStore};

/// Random, so no per-user counter has to be kept.
pub fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn required(field: &'static str, value: String) -> Result<String, ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{field} is required")));
    }
    Ok(value)
}

pub async fn append(
    kv: &dyn KvStore,
    identity: &Identity,
    req: AddRecordRequest,
) -> Result<Record, ApiError> {
    if !req.amount.is_finite() {
        return Err(ApiError::Validation("amount must be a finite number".into()));
    }
    let record = Record {
        id: new_record_id(),
        kind: required("type", req.kind)?,
        tips: required("tips", req.tips)?,
        amount: req.amount,
        date: required("date", req.date)?,
    };
    Ledger::of(kv, identity.username()).append(&record).await?;
    info!(username = identity.username(), id = %record.id, "record added");
    Ok(record)
}

pub async fn list(kv: &dyn KvStore, identity: &Identity) -> Result<Vec<Record>, ApiError> {
    Ledger::of(kv, identity.username()).records().await
}

/// Removes the record with `id`.
///
/// Scans the whole list to find it, then removes that exact stored element.
/// O(n) in the ledger length; there is no id index. If a concurrent request
/// removed it between the scan and the removal, this reports `NotFound`.
pub async fn delete_by_id(kv: &dyn KvStore, identity: &Identity, id: &str) -> Result<(), ApiError> {
    let ledger = Ledger::of(kv, identity.username());
    let entries = ledger.entries().await?;
    debug!(username = identity.username(), scanned = entries.len(), "ledger scan");

    let Some((raw, _)) = entries.into_iter().find(|(_, r)| r.id == id) else {
        warn!(username = identity.username(), id, "record not found");
        return Err(ApiError::NotFound);
    };
    if !ledger.remove_raw(&raw).await? {
        warn!(username = identity.username(), id, "record vanished before removal");
        return Err(ApiError::NotFound);
    }
    info!(username = identity.username(), id, "record deleted");
    Ok(())
}
