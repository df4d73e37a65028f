//! MBOX folder tree on disk.
//!
//! Layout follows the Thunderbird convention: every folder is an MBOX file,
//! and the subfolders of `Inbox` live as files inside `Inbox.sbd/`. The
//! mailbox path may be a single folder file or a directory. A directory that
//! holds an `Inbox` file is opened at that inbox; any other directory is an
//! item-less root whose children are the files in it.
//!
//! Category tags never touch the MBOX files. They are kept in a JSON sidecar
//! next to each folder file (`Inbox.tags.json`), keyed by item key. The key
//! is the Message-ID; a Message-ID seen again in the same folder gets its
//! byte offset appended (`id#offset`) so the two copies never share a tag.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, TriageError};
use crate::model::mail::{FolderId, ItemId, MailItem};
use crate::parser::mbox::MboxReader;
use crate::parser::message::parse_item;

use super::{Folder, ItemQuery, Listing, MailStore};

const SUBFOLDER_SUFFIX: &str = ".sbd";
const SIDECAR_SUFFIX: &str = ".tags.json";
/// Sidecar of a directory root, which has no folder file of its own.
const ROOT_SIDECAR: &str = ".mailtriage.tags.json";

/// Files in a mail directory that are never folders.
const IGNORED_SUFFIXES: [&str; 3] = [".msf", ".dat", ".json"];

#[derive(Debug, Clone)]
struct FolderNode {
    name: String,
    /// Folder file; `None` for a directory root.
    file: Option<PathBuf>,
    children: Vec<FolderId>,
}

/// Persisted tags of one folder file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagSidecar {
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl TagSidecar {
    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| TriageError::io(path, e))?;
        serde_json::from_str(&data)
            .map_err(|e| TriageError::Store(format!("corrupt tag file '{}': {e}", path.display())))
    }

    fn store(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| TriageError::Store(format!("cannot encode tags: {e}")))?;
        std::fs::write(path, data).map_err(|e| TriageError::io(path, e))
    }
}

/// A tree of MBOX folder files.
#[derive(Debug)]
pub struct MboxTreeStore {
    folders: Vec<FolderNode>,
    root_sidecar: PathBuf,
    directory: HashMap<String, String>,
    staged: HashMap<ItemId, String>,
}

impl MboxTreeStore {
    /// Open a mailbox: a folder file or a directory of folder files.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TriageError::MailboxNotFound(path.to_path_buf()));
        }
        let inbox = find_inbox(path);
        let path = inbox.as_deref().unwrap_or(path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let (root, root_sidecar) = if path.is_dir() {
            let node = FolderNode {
                name,
                file: None,
                children: Vec::new(),
            };
            (node, path.join(ROOT_SIDECAR))
        } else {
            let node = FolderNode {
                name,
                file: Some(path.to_path_buf()),
                children: Vec::new(),
            };
            (node, sidecar_path(path))
        };

        let mut store = Self {
            folders: vec![root],
            root_sidecar,
            directory: HashMap::new(),
            staged: HashMap::new(),
        };
        store.discover(path);
        info!(
            path = %path.display(),
            folders = store.folders.len(),
            "Mailbox opened"
        );
        Ok(store)
    }

    /// Register internal-directory aliases (raw address → SMTP address).
    pub fn with_directory(mut self, entries: &BTreeMap<String, String>) -> Self {
        self.directory.extend(
            entries
                .iter()
                .map(|(raw, smtp)| (raw.trim().to_lowercase(), smtp.trim().to_string())),
        );
        self
    }

    /// Number of folders in the tree, root included.
    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    /// Persisted category of an item, if any.
    pub fn category_of(&self, item: &ItemId) -> Result<Option<String>> {
        let file = self.folder_file(item.folder)?;
        Ok(TagSidecar::load(&sidecar_path(file))?.tags.get(&item.key).cloned())
    }

    /// Categories created through `ensure_category`.
    pub fn categories(&self) -> Result<BTreeSet<String>> {
        Ok(TagSidecar::load(&self.root_sidecar)?.categories)
    }

    /// Walk the `.sbd` hierarchy below the root with an explicit stack.
    fn discover(&mut self, root_path: &Path) {
        let first_dir = if root_path.is_dir() {
            root_path.to_path_buf()
        } else {
            subfolder_dir(root_path)
        };
        let mut stack: Vec<(FolderId, PathBuf)> = vec![(0, first_dir)];

        while let Some((parent, dir)) = stack.pop() {
            if !dir.is_dir() {
                continue;
            }
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Could not list folder directory");
                    continue;
                }
            };
            let mut files: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_folder_file(p))
                .collect();
            files.sort();

            for file in files {
                let id = self.folders.len();
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                debug!(folder = %name, parent, "Found folder");
                stack.push((id, subfolder_dir(&file)));
                self.folders.push(FolderNode {
                    name,
                    file: Some(file),
                    children: Vec::new(),
                });
                self.folders[parent].children.push(id);
            }
        }
    }

    fn node(&self, id: FolderId) -> Result<&FolderNode> {
        self.folders
            .get(id)
            .ok_or_else(|| TriageError::Store(format!("unknown folder {id}")))
    }

    fn folder_file(&self, id: FolderId) -> Result<&Path> {
        let node = self.node(id)?;
        node.file
            .as_deref()
            .ok_or_else(|| TriageError::Store(format!("folder '{}' holds no items", node.name)))
    }

    fn folder(&self, id: FolderId) -> Result<Folder> {
        Ok(Folder {
            id,
            name: self.node(id)?.name.clone(),
        })
    }
}

impl MailStore for MboxTreeStore {
    fn root(&self) -> Result<Folder> {
        self.folder(0)
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
        let Some(file) = node.file.as_deref() else {
            return Ok(Listing {
                sorted: true,
                unread_filtered: true,
                len_hint: Some(0),
                items: Box::new(std::iter::empty()),
            });
        };

        let reader = MboxReader::open(file)?;
        let mut items: Vec<Result<MailItem>> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        reader.for_each_message(&mut |offset, raw| {
            let parsed = parse_item(raw, folder.id, offset, query.with_body).map(|mut item| {
                // A repeated Message-ID must not share tags with the first copy
                if !seen.insert(item.id.key.clone()) {
                    item.id.key = format!("{}#{offset}", item.id.key);
                }
                item
            });
            items.push(parsed);
            true
        })?;

        if query.unread_only {
            items.retain(|r| match r {
                Ok(item) => item.read_state.is_unread(),
                Err(_) => true,
            });
        }
        if query.newest_first {
            // Unreadable and undated items go last
            items.sort_by(|a, b| {
                let ka = a.as_ref().ok().and_then(|i| i.received);
                let kb = b.as_ref().ok().and_then(|i| i.received);
                kb.cmp(&ka)
            });
        }
        debug!(folder = %node.name, count = items.len(), "Listing items");

        Ok(Listing {
            sorted: query.newest_first,
            unread_filtered: query.unread_only,
            len_hint: Some(items.len()),
            items: Box::new(items.into_iter()),
        })
    }

    fn resolve_directory_address(&self, raw: &str) -> Result<Option<String>> {
        Ok(self.directory.get(&raw.trim().to_lowercase()).cloned())
    }

    fn ensure_category(&mut self, name: &str) -> Result<()> {
        let mut sidecar = TagSidecar::load(&self.root_sidecar)?;
        if sidecar.categories.insert(name.to_string()) {
            info!(category = name, "Created category");
            sidecar.store(&self.root_sidecar)?;
        }
        Ok(())
    }

    fn set_category(&mut self, item: &ItemId, category: &str) -> Result<()> {
        self.folder_file(item.folder)?;
        self.staged.insert(item.clone(), category.to_string());
        Ok(())
    }

    fn save(&mut self, item: &ItemId) -> Result<()> {
        let Some(category) = self.staged.remove(item) else {
            return Ok(());
        };
        let path = sidecar_path(self.folder_file(item.folder)?);
        let mut sidecar = TagSidecar::load(&path)?;
        sidecar.tags.insert(item.key.clone(), category);
        sidecar.store(&path)
    }
}

/// The `Inbox` folder file directly inside a directory, if there is one.
fn find_inbox(path: &Path) -> Option<PathBuf> {
    if !path.is_dir() {
        return None;
    }
    std::fs::read_dir(path)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .find(|p| {
            p.is_file()
                && p.file_name()
                    .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case("inbox"))
        })
}

/// `Inbox` → `Inbox.sbd`
fn subfolder_dir(file: &Path) -> PathBuf {
    append_suffix(file, SUBFOLDER_SUFFIX)
}

/// `Inbox` → `Inbox.tags.json`
fn sidecar_path(file: &Path) -> PathBuf {
    append_suffix(file, SIDECAR_SUFFIX)
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn is_folder_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    !name.starts_with('.') && !IGNORED_SUFFIXES.iter().any(|s| name.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, date: &str, subject: &str, status: &str) -> String {
        format!(
            "From sender@corp.example {date}\n\
Message-ID: <{id}@corp.example>\n\
Date: {date}\n\
From: Sender <sender@corp.example>\n\
To: me@corp.example\n\
Subject: {subject}\n\
X-Mozilla-Status: {status}\n\
\n\
body of {id}\n\
\n"
        )
    }

    fn mailbox() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let inbox = format!(
            "{}{}",
            message("old", "Mon, 06 Jan 2025 10:00:00 +0000", "Old", "0001"),
            message("new", "Mon, 03 Mar 2025 10:00:00 +0000", "New", "0000"),
        );
        std::fs::write(dir.path().join("Inbox"), inbox).unwrap();
        std::fs::write(dir.path().join("Inbox.msf"), "index").unwrap();
        std::fs::create_dir(dir.path().join("Inbox.sbd")).unwrap();
        std::fs::write(
            dir.path().join("Inbox.sbd").join("Projects"),
            message("p1", "Tue, 04 Mar 2025 10:00:00 +0000", "Plan", "0003"),
        )
        .unwrap();
        std::fs::write(dir.path().join("Sent"), "").unwrap();
        dir
    }

    #[test]
    fn test_directory_opens_at_inbox() {
        let dir = mailbox();
        let store = MboxTreeStore::open(dir.path()).unwrap();
        // Inbox and Inbox.sbd/Projects; Sent is outside the inbox tree
        assert_eq!(store.folder_count(), 2);

        let root = store.root().unwrap();
        assert_eq!(root.name, "Inbox");
        let children = store.subfolders(&root).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "Projects");
    }

    #[test]
    fn test_directory_without_inbox_is_itemless_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Archive"),
            message("a1", "Mon, 06 Jan 2025 10:00:00 +0000", "Old", "0001"),
        )
        .unwrap();
        std::fs::write(dir.path().join("Sent"), "").unwrap();
        std::fs::write(dir.path().join("Sent.msf"), "").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();

        let store = MboxTreeStore::open(dir.path()).unwrap();
        let root = store.root().unwrap();
        let names: Vec<_> = store
            .subfolders(&root)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, ["Archive", "Sent"]);

        assert_eq!(
            store.items(&root, ItemQuery::default()).unwrap().items.count(),
            0
        );

        let mut store = store;
        store.ensure_category("review").unwrap();
        assert!(dir.path().join(ROOT_SIDECAR).exists());
        assert_eq!(MboxTreeStore::open(dir.path()).unwrap().folder_count(), 3);
    }

    #[test]
    fn test_file_root_lists_sorted_and_filtered() {
        let dir = mailbox();
        let store = MboxTreeStore::open(dir.path().join("Inbox")).unwrap();
        let root = store.root().unwrap();
        assert_eq!(root.name, "Inbox");
        assert_eq!(store.subfolders(&root).unwrap().len(), 1);

        let sorted = store
            .items(
                &root,
                ItemQuery {
                    newest_first: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(sorted.sorted);
        let keys: Vec<_> = sorted.items.map(|i| i.unwrap().id.key).collect();
        assert_eq!(keys, ["new@corp.example", "old@corp.example"]);

        let unread = store
            .items(
                &root,
                ItemQuery {
                    unread_only: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let keys: Vec<_> = unread.items.map(|i| i.unwrap().id.key).collect();
        assert_eq!(keys, ["new@corp.example"]);
    }

    #[test]
    fn test_tags_persist_in_sidecar() {
        let dir = mailbox();
        let mut store = MboxTreeStore::open(dir.path().join("Inbox")).unwrap();
        store.ensure_category("urgent").unwrap();
        store.ensure_category("urgent").unwrap();

        let item = ItemId {
            folder: 0,
            key: "new@corp.example".into(),
        };
        store.set_category(&item, "urgent").unwrap();
        assert_eq!(store.category_of(&item).unwrap(), None);
        store.save(&item).unwrap();
        assert_eq!(store.category_of(&item).unwrap().as_deref(), Some("urgent"));

        let reopened = MboxTreeStore::open(dir.path().join("Inbox")).unwrap();
        assert_eq!(
            reopened.category_of(&item).unwrap().as_deref(),
            Some("urgent")
        );
        assert_eq!(reopened.categories().unwrap().len(), 1);

        // Sidecars are not mistaken for folders
        assert_eq!(MboxTreeStore::open(dir.path()).unwrap().folder_count(), 2);
    }

    #[test]
    fn test_repeated_message_id_gets_its_own_key() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = format!(
            "{}{}",
            message("dup", "Mon, 03 Mar 2025 10:00:00 +0000", "Budget", "0000"),
            message("dup", "Mon, 03 Mar 2025 11:00:00 +0000", "Newsletter", "0000"),
        );
        std::fs::write(dir.path().join("Inbox"), inbox).unwrap();

        let mut store = MboxTreeStore::open(dir.path()).unwrap();
        let root = store.root().unwrap();
        let items: Vec<MailItem> = store
            .items(&root, ItemQuery::default())
            .unwrap()
            .items
            .map(|i| i.unwrap())
            .collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id.key, "dup@corp.example");
        assert!(items[1].id.key.starts_with("dup@corp.example#"));
        assert_ne!(items[0].id, items[1].id);

        store.set_category(&items[0].id, "urgent").unwrap();
        store.save(&items[0].id).unwrap();
        assert_eq!(
            store.category_of(&items[0].id).unwrap().as_deref(),
            Some("urgent")
        );
        assert_eq!(store.category_of(&items[1].id).unwrap(), None);

        // Keys are stable across reopening
        let reopened = MboxTreeStore::open(dir.path()).unwrap();
        let keys: Vec<String> = reopened
            .items(&root, ItemQuery::default())
            .unwrap()
            .items
            .map(|i| i.unwrap().id.key)
            .collect();
        assert_eq!(keys, [items[0].id.key.clone(), items[1].id.key.clone()]);
    }

    #[test]
    fn test_directory_lookup() {
        let dir = mailbox();
        let mut aliases = BTreeMap::new();
        aliases.insert("/O=Corp/CN=jdoe".to_string(), "jdoe@corp.example".to_string());
        let store = MboxTreeStore::open(dir.path()).unwrap().with_directory(&aliases);
        assert_eq!(
            store.resolve_directory_address("/o=corp/cn=jdoe").unwrap(),
            Some("jdoe@corp.example".to_string())
        );
        assert_eq!(store.resolve_directory_address("/o=corp/cn=x").unwrap(), None);
    }

    #[test]
    fn test_missing_mailbox() {
        let err = MboxTreeStore::open("/no/such/mailbox").unwrap_err();
        assert!(matches!(err, TriageError::MailboxNotFound(_)));
    }
}
