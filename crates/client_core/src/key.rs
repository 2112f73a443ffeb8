use shared::domain::{SelectedFile, StorageKey};
use uuid::Uuid;

/// Fresh, collision-resistant object key. The original file name is never
/// reused; only its extension survives so the stored object keeps a usable
/// suffix.
pub fn storage_key(file: &SelectedFile) -> StorageKey {
    let token = Uuid::new_v4().simple().to_string();
    match file.extension() {
        Some(ext) => StorageKey(format!("{token}.{ext}")),
        None => StorageKey(token),
    }
}
