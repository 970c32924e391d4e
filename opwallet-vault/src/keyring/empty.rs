//! Placeholder keyring
//!
//! Occupies the slot of a vault entry that could not be restored, keeping
//! keyring indexes aligned. It reports no accounts and refuses every
//! secret-dependent operation. When it replaces a failed entry, the raw
//! entry is kept and written back unchanged, so a restore failure never
//! destroys the persisted keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

#[derive(Default, Serialize, Deserialize)]
struct EmptyKeyringData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EmptyKeyring {
    reason: Option<String>,
    preserved: Option<Value>,
}

impl EmptyKeyring {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            preserved: None,
        }
    }

    /// Stand-in for an entry that failed to restore.
    pub fn for_failed_entry(reason: impl Into<String>, raw_entry: Value) -> Self {
        Self {
            reason: Some(reason.into()),
            preserved: Some(raw_entry),
        }
    }

    pub fn restore(data: &Value) -> Self {
        let data = EmptyKeyringData::deserialize(data).unwrap_or_default();
        Self {
            reason: data.reason,
            preserved: None,
        }
    }

    pub fn serialize(&self) -> Result<Value> {
        Ok(serde_json::to_value(EmptyKeyringData {
            reason: self.reason.clone(),
        })?)
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// The raw vault entry this keyring stands in for
    pub fn preserved_entry(&self) -> Option<&Value> {
        self.preserved.as_ref()
    }
}
