use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Exclusive claim on a mapping store for the length of one run.
///
/// Backed by a `<store>.lock` file created with `create_new`, so a second
/// run fails fast instead of interleaving writes. The file is removed on drop.
/// A crashed run leaves the file behind; it must be removed by hand.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn acquire(store_path: &Path) -> Result<Self> {
        Self::acquire_with(store_path, write_holder)
    }

    fn acquire_with<F>(store_path: &Path, write: F) -> Result<Self>
    where
        F: FnOnce(&mut File) -> std::io::Result<()>,
    {
        let path = lock_path(store_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                if let Err(e) = write(&mut file) {
                    // Nobody owns the file yet, so nobody else would remove it.
                    let _ = fs::remove_file(&path);
                    return Err(Error::Io(e));
                }
                log::debug!("Acquired store lock {}", path.display());
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown holder".to_string());
                Err(Error::StoreLocked {
                    path: store_path.to_path_buf(),
                    lock_path: path,
                    holder,
                })
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_holder(file: &mut File) -> std::io::Result<()> {
    writeln!(
        file,
        "pid={} started={}",
        std::process::id(),
        chrono::Utc::now().to_rfc3339()
    )
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Could not remove store lock {}: {e}", self.path.display());
        }
    }
}

pub fn lock_path(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    store_path.with_file_name(name)
}
