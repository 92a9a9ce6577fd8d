//! File-backed [`PersistedCache`]: one file per key under a directory.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::platform::PersistedCache;

/// Cache storing each key as a file in `dir`.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Cache rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the cache files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> Option<PathBuf> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\', '\0']);
        valid.then(|| self.dir.join(key))
    }
}

impl PersistedCache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.key_path(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Some(value.trim_end_matches('\n').to_owned()),
            Err(e) => {
                debug!(key, error = %e, "cache miss");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let path = self.key_path(key).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid cache key '{key}'"))
        })?;
        fs::create_dir_all(&self.dir)?;
        // Write beside the target, then rename over it.
        let mut staged = NamedTempFile::new_in(&self.dir)?;
        staged.write_all(value.as_bytes())?;
        staged.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = FileCache::new(dir.path().join("kv"));
        assert_eq!(cache.get("slot1_cpld_ver"), None);

        cache.set("slot1_cpld_ver", "00010203")?;
        assert_eq!(cache.get("slot1_cpld_ver").as_deref(), Some("00010203"));

        cache.set("slot1_cpld_ver", "00010204")?;
        assert_eq!(cache.get("slot1_cpld_ver").as_deref(), Some("00010204"));
        Ok(())
    }

    #[test]
    fn test_rejects_path_like_keys() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = FileCache::new(dir.path());
        for key in ["", "..", "../escape", "a/b"] {
            assert_eq!(
                cache.set(key, "x").map_err(|e| e.kind()),
                Err(io::ErrorKind::InvalidInput)
            );
            assert_eq!(cache.get(key), None);
        }
        Ok(())
    }

    #[test]
    fn test_trailing_newline_is_dropped() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("bmc_ver"), "fby35-v2024.1\n")?;
        let cache = FileCache::new(dir.path());
        assert_eq!(cache.get("bmc_ver").as_deref(), Some("fby35-v2024.1"));
        Ok(())
    }
}
