//! Mail store collaborator.
//!
//! A store is a folder tree of items. The extractor only reads from it; the
//! inference pass also stages and persists category tags. Stores are used
//! from a single thread: running two passes against one store at the same
//! time is the caller's problem to prevent.

pub mod mbox;
pub mod memory;

use crate::error::Result;
use crate::model::mail::{FolderId, ItemId, MailItem};

/// A folder handle plus its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
}

/// What the caller would like the store to do with a folder's items.
///
/// Both flags are requests. A store that cannot honour one says so in the
/// returned [`Listing`] instead of failing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemQuery {
    /// Newest first by received time.
    pub newest_first: bool,
    /// Only unread items.
    pub unread_only: bool,
    /// Decode bodies (extraction needs them, scoring does not).
    pub with_body: bool,
}

/// Items of one folder. Each element is either an item or the reason that
/// item could not be read.
pub struct Listing<'a> {
    /// Items really are newest first.
    pub sorted: bool,
    /// Items really are unread only.
    pub unread_filtered: bool,
    /// Total number of items the listing will yield, when known.
    pub len_hint: Option<usize>,
    pub items: Box<dyn Iterator<Item = Result<MailItem>> + 'a>,
}

/// Folder-tree-shaped mail store.
pub trait MailStore {
    /// Top folder of the tree (the inbox).
    fn root(&self) -> Result<Folder>;

    /// Direct children of `folder`, in store order.
    fn subfolders(&self, folder: &Folder) -> Result<Vec<Folder>>;

    /// Items directly inside `folder`.
    fn items(&self, folder: &Folder, query: ItemQuery) -> Result<Listing<'_>>;

    /// Map an internal-directory sender address to its primary SMTP address.
    ///
    /// `Ok(None)` means the directory does not know the entry.
    fn resolve_directory_address(&self, raw: &str) -> Result<Option<String>>;

    /// Make sure a category with this name exists.
    fn ensure_category(&mut self, name: &str) -> Result<()>;

    /// Stage a category on an item. Nothing is persisted until [`MailStore::save`].
    fn set_category(&mut self, item: &ItemId, category: &str) -> Result<()>;

    /// Persist staged changes of one item.
    fn save(&mut self, item: &ItemId) -> Result<()>;
}
