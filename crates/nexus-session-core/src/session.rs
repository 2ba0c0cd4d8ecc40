use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::Principal;
use crate::storage::{KeyValueStorage, StorageError};

pub const SESSION_KEY_PREFIX: &str = "nexus.session.";

/// Snapshot of one tab's signed-in principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub tab_id: String,
    #[serde(default)]
    pub principal: Option<Principal>,
    pub last_active: DateTime<Utc>,
}

impl SessionRecord {
    /// A record for `principal` stamped with the current time.
    pub fn new(tab_id: &str, principal: Option<Principal>) -> Self {
        Self {
            tab_id: tab_id.to_string(),
            principal,
            last_active: Utc::now(),
        }
    }
}

/// Tab-local session snapshots, one key per tab id. Last write wins.
#[derive(Clone)]
pub struct SessionStore {
    storage: Rc<dyn KeyValueStorage>,
}

impl SessionStore {
    pub fn new(storage: Rc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    pub fn key_for(tab_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}{tab_id}")
    }

    pub fn write(
        &self,
        tab_id: &str,
        principal: Option<Principal>,
    ) -> Result<SessionRecord, StorageError> {
        let record = SessionRecord::new(tab_id, principal);
        let serialized = serde_json::to_string(&record).map_err(|error| StorageError::Encode {
            message: error.to_string(),
        })?;
        self.storage.set_item(&Self::key_for(tab_id), &serialized)?;
        Ok(record)
    }

    /// Reads the record for `tab_id`. A snapshot that no longer decodes is
    /// treated as absent.
    pub fn read(&self, tab_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        let Some(raw) = self.storage.get_item(&Self::key_for(tab_id))? else {
            return Ok(None);
        };
        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(error) => {
                tracing::warn!(
                    target: "nexus.storage",
                    tab_id = %tab_id,
                    error = %error,
                    "discarding undecodable session snapshot",
                );
                Ok(None)
            }
        }
    }

    pub fn clear(&self, tab_id: &str) -> Result<(), StorageError> {
        self.storage.remove_item(&Self::key_for(tab_id))
    }
}
