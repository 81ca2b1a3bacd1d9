// error.rs - Loader errors.
//
// Problems with a single plugin never surface here; they are recorded on
// that plugin's `DiscoveredPlugin`. Only a plugin root that cannot be
// scanned at all is an error.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to scan plugin directory {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
}
