use serde::Serialize;
use std::{fs, io, path::Path};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("Failed to read labels directory {path}: {source}")]
    ReadDir { path: String, source: io::Error },
    #[error("Label directory name is not valid UTF-8: {0}")]
    NonUtf8Name(String),
    #[error("No class subdirectories found in {0}")]
    Empty(String),
}

/// Class names index-aligned with the model's output vector.
///
/// The order is a sorted snapshot of the training directory's immediate
/// subdirectories, which is the order the classes were assigned indices in
/// during training.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    /// Builds the table from `dir`. Files are ignored; only directories count
    /// as classes. A missing or empty directory is an error.
    pub fn from_dir(dir: &Path) -> Result<Self, LabelError> {
        let read_dir_error = |source: io::Error| LabelError::ReadDir {
            path: dir.display().to_string(),
            source,
        };

        let mut labels = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_dir_error)? {
            let entry = entry.map_err(read_dir_error)?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry
                .file_name()
                .into_string()
                .map_err(|name| LabelError::NonUtf8Name(name.to_string_lossy().into_owned()))?;
            labels.push(name);
        }

        if labels.is_empty() {
            return Err(LabelError::Empty(dir.display().to_string()));
        }

        labels.sort();
        tracing::info!("Loaded {} class labels from {}", labels.len(), dir.display());

        Ok(Self { labels })
    }

    /// Wraps labels that are already in model output order.
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }
}
