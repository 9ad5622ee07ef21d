//! [`ConfigStore`] backends for the simulated controller.

use std::path::PathBuf;

use rig_protocol::{ConfigStore, StoreError};

/// Keeps the saved blob in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    blob: Option<Vec<u8>>,
}

impl MemoryStore {
    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }
}

impl ConfigStore for MemoryStore {
    fn save(&mut self, blob: &[u8]) -> Result<(), StoreError> {
        self.blob = Some(blob.to_vec());
        Ok(())
    }

    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        let blob = self.blob.as_ref().ok_or(StoreError::Empty)?;
        let dest = buf.get_mut(..blob.len()).ok_or(StoreError::TooLarge)?;
        dest.copy_from_slice(blob);
        Ok(blob.len())
    }
}

/// Keeps the saved blob in a file, replaced on every save
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for FileStore {
    fn save(&mut self, blob: &[u8]) -> Result<(), StoreError> {
        std::fs::write(&self.path, blob).map_err(|e| {
            log::error!("cannot write {}: {}", self.path.display(), e);
            StoreError::Io
        })
    }

    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        let blob = match std::fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::Empty),
            Err(e) => {
                log::error!("cannot read {}: {}", self.path.display(), e);
                return Err(StoreError::Io);
            }
        };
        let dest = buf.get_mut(..blob.len()).ok_or(StoreError::TooLarge)?;
        dest.copy_from_slice(&blob);
        Ok(blob.len())
    }
}
