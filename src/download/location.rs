//! Location index: resource name → local file path.

use std::path::{Path, PathBuf};

use dashmap::DashMap;

/// Where each downloaded resource lives on local storage
#[derive(Debug, Default)]
pub struct LocationIndex {
    paths: DashMap<String, PathBuf>,
}

impl LocationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.paths.insert(name.into(), path.into());
    }

    pub fn get(&self, name: &str) -> Option<PathBuf> {
        self.paths.get(name).map(|p| p.value().clone())
    }

    /// Path for `name` only if the file is still present
    pub async fn resolve(&self, name: &str) -> Option<PathBuf> {
        let path = self.get(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => {
                self.paths.remove(name);
                None
            }
        }
    }

    pub fn remove(&self, name: &str) -> Option<PathBuf> {
        self.paths.remove(name).map(|(_, p)| p)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.paths.contains_key(name)
    }

    /// Names whose files sit under `dir`
    pub fn names_under(&self, dir: &Path) -> Vec<String> {
        self.paths
            .iter()
            .filter(|e| e.value().starts_with(dir))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn clear(&self) {
        self.paths.clear();
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
