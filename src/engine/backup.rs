//! Prior-state snapshots used to roll back optimistic local writes.
//!
//! A local store pushes the document's current state right before mutating it
//! and pops it again when the engine asks it to revert. Snapshots form a stack
//! per document so several in-flight writes unwind in reverse order.

use std::collections::HashMap;

use crate::engine::plugin::DocData;

#[derive(Clone, Debug, PartialEq)]
pub enum Backup {
    Existing(DocData),
    /// The document did not exist; restoring it means deleting it.
    Absent,
}

impl From<Option<DocData>> for Backup {
    fn from(snapshot: Option<DocData>) -> Self {
        match snapshot {
            Some(data) => Backup::Existing(data),
            None => Backup::Absent,
        }
    }
}

/// Last-in-first-out snapshots of one document. Popping an empty stack is a no-op.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackupStack {
    entries: Vec<Backup>,
}

impl BackupStack {
    pub fn push(&mut self, backup: Backup) {
        self.entries.push(backup);
    }

    pub fn pop(&mut self) -> Option<Backup> {
        self.entries.pop()
    }

    pub fn peek(&self) -> Option<&Backup> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Backup stacks keyed by `(collection_path, doc_id)`.
#[derive(Debug, Default)]
pub struct BackupRegistry {
    stacks: HashMap<(String, String), BackupStack>,
}

impl BackupRegistry {
    pub fn push(&mut self, collection_path: &str, doc_id: &str, backup: Backup) {
        self.stacks
            .entry((collection_path.to_string(), doc_id.to_string()))
            .or_default()
            .push(backup);
    }

    pub fn pop(&mut self, collection_path: &str, doc_id: &str) -> Option<Backup> {
        let key = (collection_path.to_string(), doc_id.to_string());
        let stack = self.stacks.get_mut(&key)?;
        let backup = stack.pop();
        if stack.is_empty() {
            self.stacks.remove(&key);
        }
        backup
    }

    pub fn depth(&self, collection_path: &str, doc_id: &str) -> usize {
        self.stacks
            .get(&(collection_path.to_string(), doc_id.to_string()))
            .map_or(0, BackupStack::len)
    }

    pub fn clear_collection(&mut self, collection_path: &str) {
        self.stacks.retain(|(path, _), _| path != collection_path);
    }
}
