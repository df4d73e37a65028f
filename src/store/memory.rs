//! In-memory mail store.
//!
//! Used by the test-suite and by callers that already hold their mail in
//! memory. Sorting and filtering can be switched off to exercise the
//! degraded paths of the pipelines.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::error::{Result, TriageError};
use crate::model::mail::{FolderId, ItemId, MailItem};

use super::{Folder, ItemQuery, Listing, MailStore};

#[derive(Debug, Clone)]
struct FolderNode {
    name: String,
    children: Vec<FolderId>,
    items: Vec<MailItem>,
    /// Reading this folder's items fails.
    broken: bool,
}

/// Folder tree held in memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    folders: Vec<FolderNode>,
    directory: HashMap<String, String>,
    categories: BTreeSet<String>,
    /// Category staged per item and not yet saved.
    staged: HashMap<ItemId, String>,
    /// Category persisted per item.
    persisted: BTreeMap<String, String>,
    /// Number of `save` calls per item.
    save_counts: HashMap<ItemId, usize>,
    supports_sort: bool,
    supports_filter: bool,
}

impl MemoryStore {
    /// New store with a single root folder.
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            folders: vec![FolderNode {
                name: root_name.into(),
                children: Vec::new(),
                items: Vec::new(),
                broken: false,
            }],
            directory: HashMap::new(),
            categories: BTreeSet::new(),
            staged: HashMap::new(),
            persisted: BTreeMap::new(),
            save_counts: HashMap::new(),
            supports_sort: true,
            supports_filter: true,
        }
    }

    /// Id of the root folder.
    pub fn root_id(&self) -> FolderId {
        0
    }

    /// Add a child folder and return its id.
    pub fn add_folder(&mut self, parent: FolderId, name: impl Into<String>) -> FolderId {
        let id = self.folders.len();
        self.folders.push(FolderNode {
            name: name.into(),
            children: Vec::new(),
            items: Vec::new(),
            broken: false,
        });
        self.folders[parent].children.push(id);
        id
    }

    /// Add an item to a folder. Its `id` is rewritten to point at the folder;
    /// the key is the insertion index.
    pub fn add_item(&mut self, folder: FolderId, mut item: MailItem) -> ItemId {
        let key = format!("{folder}:{}", self.folders[folder].items.len());
        item.id = ItemId { folder, key };
        let id = item.id.clone();
        self.folders[folder].items.push(item);
        id
    }

    /// Make item listing of a folder fail.
    pub fn break_folder(&mut self, folder: FolderId) {
        self.folders[folder].broken = true;
    }

    /// Register a directory entry.
    pub fn add_directory_entry(&mut self, raw: impl Into<String>, smtp: impl Into<String>) {
        self.directory.insert(raw.into().to_lowercase(), smtp.into());
    }

    /// Pretend the backend cannot sort by received time.
    pub fn without_sort(mut self) -> Self {
        self.supports_sort = false;
        self
    }

    /// Pretend the backend cannot restrict to unread items.
    pub fn without_filter(mut self) -> Self {
        self.supports_filter = false;
        self
    }

    /// Persisted category of an item.
    pub fn category_of(&self, item: &ItemId) -> Option<&str> {
        self.persisted.get(&item.to_string()).map(String::as_str)
    }

    /// How many times an item was saved.
    pub fn save_count(&self, item: &ItemId) -> usize {
        self.save_counts.get(item).copied().unwrap_or(0)
    }

    /// Categories registered through `ensure_category`.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(String::as_str)
    }

    fn node(&self, id: FolderId) -> Result<&FolderNode> {
        self.folders
            .get(id)
            .ok_or_else(|| TriageError::Store(format!("unknown folder {id}")))
    }

    fn folder(&self, id: FolderId) -> Result<Folder> {
        Ok(Folder {
            id,
            name: self.node(id)?.name.clone(),
        })
    }
}

impl MailStore for MemoryStore {
    fn root(&self) -> Result<Folder> {
        self.folder(self.root_id())
    }

    fn subfolders(&self, folder: &Folder) -> Result<Vec<Folder>> {
        self.node(folder.id)?
            .children
            .iter()
            .map(|&id| self.folder(id))
            .collect()
    }

    fn items(&self, folder: &Folder, query: ItemQuery) -> Result<Listing<'_>> {
        let node = self.node(folder.id)?;
        if node.broken {
            return Err(TriageError::Store(format!(
                "folder '{}' is not accessible",
                node.name
            )));
        }

        let mut items: Vec<&MailItem> = node.items.iter().collect();

        let sorted = query.newest_first && self.supports_sort;
        if sorted {
            // Undated items sort last, like they would on a real backend
            items.sort_by(|a, b| b.received.cmp(&a.received));
        }

        let unread_filtered = query.unread_only && self.supports_filter;
        if unread_filtered {
            items.retain(|i| i.read_state.is_unread());
        }

        let with_body = query.with_body;
        debug!(folder = %node.name, count = items.len(), sorted, unread_filtered, "Listing items");

        Ok(Listing {
            sorted,
            unread_filtered,
            len_hint: Some(items.len()),
            items: Box::new(items.into_iter().map(move |item| {
                let mut item = item.clone();
                if !with_body {
                    item.body = None;
                }
                Ok(item)
            })),
        })
    }

    fn resolve_directory_address(&self, raw: &str) -> Result<Option<String>> {
        Ok(self.directory.get(&raw.to_lowercase()).cloned())
    }

    fn ensure_category(&mut self, name: &str) -> Result<()> {
        self.categories.insert(name.to_string());
        Ok(())
    }

    fn set_category(&mut self, item: &ItemId, category: &str) -> Result<()> {
        self.node(item.folder)?;
        self.staged.insert(item.clone(), category.to_string());
        Ok(())
    }

    fn save(&mut self, item: &ItemId) -> Result<()> {
        *self.save_counts.entry(item.clone()).or_default() += 1;
        if let Some(category) = self.staged.remove(item) {
            self.persisted.insert(item.to_string(), category);
        }
        Ok(())
    }
}
