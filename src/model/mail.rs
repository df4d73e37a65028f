//! Raw mail items as the store hands them out.

use chrono::{DateTime, Utc};

use super::address::Recipient;

/// Handle of a folder inside a store. Only meaningful to the store that issued it.
pub type FolderId = usize;

/// Stable reference to one item, used to stage and persist category tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ItemId {
    /// Folder the item lives in.
    pub folder: FolderId,
    /// Store-specific key (Message-ID, offset, insertion index…).
    pub key: String,
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.folder, self.key)
    }
}

/// What kind of object an item is. Only [`ItemKind::Mail`] is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ItemKind {
    /// A regular message.
    Mail,
    /// A meeting request or response.
    Meeting,
    /// A delivery, read or non-delivery report.
    Report,
    /// Anything else (tasks, contacts, notes…).
    Other,
}

/// Whether the owner has opened the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReadState {
    #[serde(rename = "Leído")]
    Read,
    #[serde(rename = "No Leído")]
    Unread,
}

impl ReadState {
    pub fn from_unread(unread: bool) -> Self {
        if unread {
            Self::Unread
        } else {
            Self::Read
        }
    }

    pub fn is_unread(self) -> bool {
        self == Self::Unread
    }
}

/// Snapshot of one item's properties.
///
/// Fields a store could not read are `None`; the extractor decides whether
/// a missing property makes the item unusable.
#[derive(Debug, Clone)]
pub struct MailItem {
    /// Reference used for tagging.
    pub id: ItemId,

    /// Item class.
    pub kind: ItemKind,

    /// Time the item was delivered.
    pub received: Option<DateTime<Utc>>,

    /// Subject line, decoded.
    pub subject: Option<String>,

    /// Plain-text body. Only filled when the query asked for bodies.
    pub body: Option<String>,

    /// Sender display name.
    pub sender_name: Option<String>,

    /// Raw sender address. May be an internal-directory form such as
    /// `/o=Org/ou=Admin/cn=Recipients/cn=jdoe`.
    pub sender_address: Option<String>,

    /// Every recipient, in header order (To, then Cc, then Bcc).
    pub recipients: Vec<Recipient>,

    /// Read state.
    pub read_state: ReadState,

    /// Value of the transport "last verb executed" property, if set.
    pub last_verb: Option<i64>,
}

impl MailItem {
    /// Minimal mail item with no properties filled in.
    pub fn new(id: ItemId) -> Self {
        Self {
            id,
            kind: ItemKind::Mail,
            received: None,
            subject: None,
            body: None,
            sender_name: None,
            sender_address: None,
            recipients: Vec::new(),
            read_state: ReadState::Read,
            last_verb: None,
        }
    }

    pub fn is_mail(&self) -> bool {
        self.kind == ItemKind::Mail
    }

    /// Received time, or a malformed-item error naming the missing property.
    pub fn received_or_err(&self) -> crate::error::Result<DateTime<Utc>> {
        self.received.ok_or_else(|| {
            crate::error::TriageError::malformed(self.id.to_string(), "missing received time")
        })
    }
}
