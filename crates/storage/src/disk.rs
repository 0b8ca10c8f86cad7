//! Local-disk backend. Object keys map directly onto paths under the
//! configured root; writes go through a temp file and rename so a crashed
//! write never leaves a half-object at a readable key.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use dragonnet_common::errors::{DcResult, DragonNetError};

use crate::object_store::ObjectStore;

pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> DcResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| DragonNetError::storage(format!("creating storage root: {e}")))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .and_then(|p| p.to_str())
            .map(|s| s.replace('\\', "/"))
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect_keys(&path, out)?;
            } else if let Some(key) = self.key_for(&path) {
                out.push(key);
            }
        }
        Ok(())
    }
}

impl ObjectStore for DiskStore {
    fn get(&self, key: &str) -> DcResult<Vec<u8>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DragonNetError::not_found(key.to_string()))
            }
            Err(e) => Err(DragonNetError::storage(format!("reading {key}: {e}"))),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> DcResult<()> {
        let path = self.path_for(key);
        let parent = path
            .parent()
            .ok_or_else(|| DragonNetError::storage(format!("key {key} has no parent dir")))?;
        fs::create_dir_all(parent)
            .map_err(|e| DragonNetError::storage(format!("creating dirs for {key}: {e}")))?;

        let tmp = path.with_extension("tmp-write");
        fs::write(&tmp, value)
            .map_err(|e| DragonNetError::storage(format!("writing {key}: {e}")))?;
        fs::rename(&tmp, &path)
            .map_err(|e| DragonNetError::storage(format!("committing {key}: {e}")))
    }

    fn delete(&self, key: &str) -> DcResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DragonNetError::storage(format!("deleting {key}: {e}"))),
        }
    }

    fn list(&self, prefix: &str) -> DcResult<Vec<String>> {
        let mut keys = Vec::new();
        if self.root.exists() {
            self.collect_keys(&self.root.clone(), &mut keys)
                .map_err(|e| DragonNetError::storage(format!("listing {prefix}: {e}")))?;
        }
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn delete_prefix(&self, prefix: &str) -> DcResult<()> {
        for key in self.list(prefix)? {
            self.delete(&key)?;
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> DcResult<bool> {
        Ok(self.path_for(key).is_file())
    }
}
