pub mod memory;
pub mod sqlite;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::app::Result;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Named JSON blobs, each read and rewritten in full.
pub trait BlobStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// Read a JSON array blob. A missing blob is an empty list.
///
/// A corrupt blob is copied to `<key>.corrupt` and then treated as empty.
/// `None` means the stored records could not be read, and callers must not
/// overwrite the blob until a later load succeeds. Failures are logged,
/// never returned.
pub fn load_records<S, T>(store: &S, key: &str) -> Option<Vec<T>>
where
    S: BlobStore + ?Sized,
    T: DeserializeOwned,
{
    match store.load(key) {
        Ok(Some(json)) => match serde_json::from_str(&json) {
            Ok(records) => Some(records),
            Err(e) => {
                let backup = format!("{}.corrupt", key);
                if let Err(save_err) = store.save(&backup, &json) {
                    tracing::error!(
                        "Corrupt {} blob kept in place, backup failed: {}",
                        key,
                        save_err
                    );
                    return None;
                }
                tracing::error!(
                    "Discarding corrupt {} blob (copied to {}): {}",
                    key,
                    backup,
                    e
                );
                Some(Vec::new())
            }
        },
        Ok(None) => Some(Vec::new()),
        Err(e) => {
            tracing::error!("Failed to read {}: {}", key, e);
            None
        }
    }
}

/// Rewrite a JSON array blob in full. Returns false (after logging) when
/// the write did not happen.
pub fn save_records<S, T>(store: &S, key: &str, records: &[T]) -> bool
where
    S: BlobStore + ?Sized,
    T: Serialize,
{
    let json = match serde_json::to_string(records) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize {}: {}", key, e);
            return false;
        }
    };

    match store.save(key, &json) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Failed to write {}: {}", key, e);
            false
        }
    }
}
