use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use crate::host::Document;

/// The documents the host currently has open, plus the active one.
#[derive(Debug, Default)]
pub struct Workspace {
    pub documents: BTreeMap<PathBuf, Document>,
    pub active: Option<PathBuf>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a document; a reopened file may carry a new encoding.
    pub fn open(&mut self, document: Document) {
        self.documents.insert(document.path.clone(), document);
    }

    pub fn close(&mut self, path: &Path) -> Option<Document> {
        if self.active.as_deref() == Some(path) {
            self.active = None;
        }
        self.documents.remove(path)
    }

    pub fn active_document(&self) -> Option<&Document> {
        self.active.as_ref().and_then(|path| self.documents.get(path))
    }

    /// All open documents, the active one last.
    pub fn in_check_order(&self) -> Vec<Document> {
        let active = self.active.as_deref();
        let mut ordered: Vec<Document> = self.documents
            .values()
            .filter(|doc| Some(doc.path.as_path()) != active)
            .cloned()
            .collect();
        if let Some(doc) = self.active_document() {
            ordered.push(doc.clone());
        }
        ordered
    }
}
