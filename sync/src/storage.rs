//! Host blob-store boundary. The sync pipeline only ever creates, reads and
//! overwrites whole blobs, so the seam is three operations wide.

use anyhow::Result;
use std::fs;
use std::path::Path;

pub trait Storage {
    fn exists(&self, path: &Path) -> bool;
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    /// Create or overwrite, creating parent directories as needed.
    fn write(&self, path: &Path, data: &[u8]) -> Result<()>;
}

pub struct FsStorage;

impl Storage for FsStorage {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod mem {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;

    /// In-memory store for orchestrator tests.
    #[derive(Default)]
    pub struct MemStorage {
        files: RefCell<HashMap<PathBuf, Vec<u8>>>,
    }

    impl MemStorage {
        pub fn insert(&self, path: &Path, data: &[u8]) {
            self.files
                .borrow_mut()
                .insert(path.to_path_buf(), data.to_vec());
        }

        pub fn remove(&self, path: &Path) {
            self.files.borrow_mut().remove(path);
        }
    }

    impl Storage for MemStorage {
        fn exists(&self, path: &Path) -> bool {
            self.files.borrow().contains_key(path)
        }

        fn read(&self, path: &Path) -> Result<Vec<u8>> {
            self.files
                .borrow()
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no blob at {}", path.display()))
        }

        fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
            self.insert(path, data);
            Ok(())
        }
    }
}
