//! Library-wide configuration.
//!
//! `pagedb` is an embedded library, not a server: there is no
//! `rustydb.toml` to parse. Callers construct a [`Config`] in-process,
//! via [`Config::default`] and the builder-style setters, and pass it to
//! [`crate::Database::create`]/[`crate::Database::open`].

use std::path::{Path, PathBuf};

use crate::storage::block::TARGET_BLOCK_SIZE;

/// Tunables for one [`crate::Database`] handle.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) data_dir: PathBuf,
    pub(crate) target_block_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            target_block_size: TARGET_BLOCK_SIZE,
        }
    }
}

impl Config {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn with_data_dir<P: AsRef<Path>>(mut self, data_dir: P) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    /// Target size, in bytes, of newly written blocks (2-8 MiB per the
    /// checkpoint engine's design; only the floor is currently enforced).
    pub fn with_target_block_size(mut self, bytes: u64) -> Self {
        self.target_block_size = bytes;
        self
    }

    pub fn target_block_size(&self) -> u64 {
        self.target_block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_relative_data_dir() {
        let cfg = Config::default();
        assert_eq!(cfg.data_dir(), Path::new("./data"));
    }

    #[test]
    fn builder_setters_chain() {
        let cfg = Config::default()
            .with_data_dir("/tmp/x")
            .with_target_block_size(1024);
        assert_eq!(cfg.data_dir(), Path::new("/tmp/x"));
        assert_eq!(cfg.target_block_size(), 1024);
    }
}
