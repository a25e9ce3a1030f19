//! Virtual filesystem implementations

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::scripting::VirtualFilesystem;

/// Files held in memory; directories exist implicitly
#[derive(Debug, Clone, Default)]
pub struct MemoryFilesystem {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        path: impl Into<String>,
        contents: impl Into<Vec<u8>>,
    ) {
        self.files.insert(normalize(&path.into()), contents.into());
    }

    /// Builder form of [`MemoryFilesystem::insert`]
    pub fn with_file(
        mut self,
        path: impl Into<String>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        self.insert(path, contents);
        self
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").trim_matches('/').to_string()
}

impl VirtualFilesystem for MemoryFilesystem {
    fn load(
        &self,
        path: &str,
    ) -> io::Result<Vec<u8>> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn file_exists(
        &self,
        path: &str,
    ) -> bool {
        let path = normalize(path);
        self.files.contains_key(&path) || self.is_directory(&path)
    }

    fn is_directory(
        &self,
        path: &str,
    ) -> bool {
        let path = normalize(path);
        if path.is_empty() {
            return true;
        }
        let prefix = format!("{}/", path);
        self.files.keys().any(|k| k.starts_with(&prefix))
    }
}

/// Files under a directory on disk
#[derive(Debug, Clone)]
pub struct DiskFilesystem {
    root: PathBuf,
}

impl DiskFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path below the root; `..` and absolute paths never escape it
    fn resolve(
        &self,
        path: &str,
    ) -> Option<PathBuf> {
        let relative = Path::new(path);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(resolved)
    }
}

impl VirtualFilesystem for DiskFilesystem {
    fn load(
        &self,
        path: &str,
    ) -> io::Result<Vec<u8>> {
        let resolved = self.resolve(path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::PermissionDenied, format!("{} leaves the data directory", path))
        })?;
        fs::read(resolved)
    }

    fn file_exists(
        &self,
        path: &str,
    ) -> bool {
        self.resolve(path).is_some_and(|p| p.exists())
    }

    fn is_directory(
        &self,
        path: &str,
    ) -> bool {
        self.resolve(path).is_some_and(|p| p.is_dir())
    }
}
