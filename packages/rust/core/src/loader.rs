//! Document sources for the pipeline's source node.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, instrument};

use docflow_shared::{Document, DocflowError, Result};

/// Extensions picked up by [`DirectoryLoader`].
const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// Produces the document collection for a run.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<Document>>;
}

/// Loads every `.txt` / `.md` file directly inside a directory.
///
/// Files are sorted by name; the file stem becomes the document id, so two
/// files sharing a stem (`notes.txt`, `notes.md`) are rejected.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    dir: PathBuf,
}

impl DirectoryLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DocumentLoader for DirectoryLoader {
    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    async fn load(&self) -> Result<Vec<Document>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| DocflowError::io(&self.dir, e))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DocflowError::io(&self.dir, e))?
        {
            let path = entry.path();
            let is_text = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if is_text && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        let mut ids = HashSet::new();
        for path in paths {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| DocflowError::io(&path, e))?;
            let id = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !ids.insert(id.clone()) {
                return Err(DocflowError::validation(format!(
                    "document id `{id}` is used by more than one file in {}",
                    self.dir.display()
                )));
            }
            documents.push(Document::new(id, content));
        }

        debug!(count = documents.len(), "documents loaded");
        Ok(documents)
    }
}
