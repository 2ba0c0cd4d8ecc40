use std::fmt;

use uuid::Uuid;

use crate::storage::KeyValueStorage;

pub const TAB_ID_KEY: &str = "nexus.tab_id";

/// Identifier of one browser tab, stable for the tab's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabIdentity {
    tab_id: String,
}

impl TabIdentity {
    pub fn as_str(&self) -> &str {
        &self.tab_id
    }
}

impl fmt::Display for TabIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tab_id)
    }
}

/// Returns this tab's identifier, allocating and persisting one on first use.
///
/// Identifiers are 122-bit random UUIDs rendered without hyphens. Storage
/// failures never surface: the tab falls back to an identifier that lives
/// only as long as the returned value.
pub fn allocate_tab_identity(storage: &dyn KeyValueStorage) -> TabIdentity {
    match storage.get_item(TAB_ID_KEY) {
        Ok(Some(existing)) if !existing.trim().is_empty() => {
            return TabIdentity {
                tab_id: existing.trim().to_string(),
            };
        }
        Ok(_) => {}
        Err(error) => {
            tracing::warn!(
                target: "nexus.storage",
                error = %error,
                "tab storage unreadable; allocating ephemeral tab id",
            );
        }
    }

    let tab_id = Uuid::new_v4().simple().to_string();
    if let Err(error) = storage.set_item(TAB_ID_KEY, &tab_id) {
        tracing::warn!(
            target: "nexus.storage",
            tab_id = %tab_id,
            error = %error,
            "failed to persist tab id; it will not survive a reload",
        );
    }
    TabIdentity { tab_id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;

    #[test]
    fn allocates_once_per_tab_storage() {
        let storage = MemoryStorage::new();
        let first = allocate_tab_identity(&storage);
        let second = allocate_tab_identity(&storage);
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 32);
        assert_eq!(
            storage.get_item(TAB_ID_KEY).expect("readable").as_deref(),
            Some(first.as_str())
        );
    }

    #[test]
    fn separate_tabs_get_distinct_ids() {
        let left = allocate_tab_identity(&MemoryStorage::new());
        let right = allocate_tab_identity(&MemoryStorage::new());
        assert_ne!(left, right);
    }

    #[test]
    fn unavailable_storage_still_yields_an_id() {
        let storage = MemoryStorage::new();
        storage.set_available(false);
        let tab = allocate_tab_identity(&storage);
        assert!(!tab.as_str().is_empty());
    }
}
