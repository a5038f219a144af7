use std::path::{Component, Path};

use crate::TransferError;

/// Checks a selected file against local constraints before any work starts.
pub fn validate_file(file_name: &str, size: u64, max_file_size: u64) -> Result<(), TransferError> {
    if file_name.trim().is_empty() {
        return Err(TransferError::InvalidFile("file name is empty".into()));
    }
    if size > max_file_size {
        return Err(TransferError::InvalidFile(format!(
            "{file_name} is {size} bytes, limit is {max_file_size} bytes"
        )));
    }
    Ok(())
}

/// Validates that a storage key (session id, content hash) is usable as a
/// single path component.
///
/// Rejects:
/// - Empty keys
/// - Absolute paths and Windows prefixes
/// - Parent or current directory references
/// - Keys spanning more than one component
pub fn validate_storage_key(key: &str) -> Result<(), TransferError> {
    if key.is_empty() {
        return Err(TransferError::InvalidKey("empty key".into()));
    }

    let mut components = Path::new(key).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == key => Ok(()),
        (Some(Component::ParentDir | Component::CurDir), _) => Err(TransferError::InvalidKey(
            format!("directory reference not allowed: {key}"),
        )),
        (Some(Component::RootDir | Component::Prefix(_)), _) => Err(TransferError::InvalidKey(
            format!("absolute path not allowed: {key}"),
        )),
        _ => Err(TransferError::InvalidKey(format!(
            "key must be a single path component: {key}"
        ))),
    }
}
