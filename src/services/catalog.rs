use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::models::directory::{DirectoryDescriptor, DirectoryFilter};

/// Read-only source of target directories.
pub trait DirectoryCatalog: Send + Sync {
    /// Directories matching the filter, highest priority first.
    fn list_directories(&self, filter: &DirectoryFilter) -> Vec<DirectoryDescriptor>;

    fn get(&self, directory_id: &str) -> Option<DirectoryDescriptor>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accepts both the wrapped `{"directories": [...]}` export and a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Wrapped { directories: Vec<DirectoryDescriptor> },
    Bare(Vec<DirectoryDescriptor>),
}

/// Catalog held in memory, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    directories: Vec<DirectoryDescriptor>,
    index: HashMap<String, usize>,
}

impl StaticCatalog {
    pub fn new(directories: Vec<DirectoryDescriptor>) -> Self {
        let mut unique: Vec<DirectoryDescriptor> = Vec::with_capacity(directories.len());
        let mut seen = HashSet::new();
        for directory in directories {
            if !seen.insert(directory.id.clone()) {
                warn!(directory_id = %directory.id, "Duplicate directory id in catalog, keeping first");
                continue;
            }
            unique.push(directory);
        }

        unique.sort_by(|a, b| {
            b.effective_priority()
                .cmp(&a.effective_priority())
                .then_with(|| a.id.cmp(&b.id))
        });

        let index = unique
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();

        Self {
            directories: unique,
            index,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let directories = match file {
            CatalogFile::Wrapped { directories } => directories,
            CatalogFile::Bare(directories) => directories,
        };
        Ok(Self::new(directories))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_json_str(&json)?;
        info!(
            path = %path.display(),
            directories = catalog.len(),
            "Loaded directory catalog"
        );
        Ok(catalog)
    }
}

impl DirectoryCatalog for StaticCatalog {
    fn list_directories(&self, filter: &DirectoryFilter) -> Vec<DirectoryDescriptor> {
        let matching = self.directories.iter().filter(|d| filter.matches(d)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    fn get(&self, directory_id: &str) -> Option<DirectoryDescriptor> {
        self.index
            .get(directory_id)
            .map(|&i| self.directories[i].clone())
    }

    fn len(&self) -> usize {
        self.directories.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}
