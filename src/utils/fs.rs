use crate::error::{Result, UpdaterError};
use std::path::Path;

pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => UpdaterError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => UpdaterError::from(e),
        })?;
    }
    Ok(())
}
