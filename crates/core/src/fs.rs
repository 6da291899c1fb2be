//! Filesystem utilities

use std::fs;
use std::path::Path;

use log::info;

/// Create a directory and all missing parents, logging when something was created
pub fn create_dir_all(path: &str) -> std::io::Result<()> {
    let path = Path::new(path);
    if !path.exists() {
        fs::create_dir_all(path)?;
        info!("Created directory: {}", path.display());
    }
    Ok(())
}
