//! Feature extraction shared by dataset extraction and live scoring.
//!
//! Both passes go through [`sender_of`], [`scan_recipients`] and
//! [`clean_text`], and the model only ever sees a [`FeatureRow`]. A
//! `FeatureRow` built from a stored [`MailRecord`] and one built straight
//! from the same [`MailItem`] are identical.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::model::address::{domain_of, Identity, RecipientRole};
use crate::model::mail::MailItem;
use crate::model::record::MailRecord;
use crate::store::MailStore;

/// Sender id recorded when neither address nor name can be read.
pub const UNKNOWN_SENDER: &str = "unknown";

/// Model input columns, in the order the pipeline consumes them.
pub const FEATURE_COLUMNS: [&str; 5] = [
    "Asunto",
    "Dominio",
    "Estoy_En_To",
    "Estoy_En_CC",
    "Total_Destinatarios",
];

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"http\S+").expect("valid regex"))
}

fn disallowed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[^a-zA-Z0-9áéíóúÁÉÍÓÚñÑüÜ.,:;?!\s@_-]").expect("valid regex")
    })
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Normalize free text for the dataset.
///
/// URLs become the token `URL`, everything outside letters (including
/// Spanish accents), digits and basic punctuation is dropped, and whitespace
/// runs collapse to one space. The result never contains `\n`, `\r`, `\t`
/// or `|`.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = url_re().replace_all(text, "URL");
    let text = disallowed_re().replace_all(&text, "");
    whitespace_re().replace_all(&text, " ").trim().to_string()
}

/// First `max_chars` characters of `text`, untrimmed.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Resolved sender of an item.
#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    /// Lowercase address, or lowercase display name as fallback.
    pub id: String,
    /// Domain of `id`, or the internal sentinel.
    pub domain: String,
    /// Display name as shown by the store.
    pub display_name: String,
}

/// Resolve the sender identity of an item.
///
/// Internal-directory addresses (`/o=…`) are looked up in the store's
/// directory; when the lookup fails or finds nothing the lowercased display
/// name is used instead.
pub fn sender_of<S: MailStore + ?Sized>(store: &S, item: &MailItem, internal_domain: &str) -> Sender {
    let name = item.sender_name.clone().unwrap_or_default();
    let name_id = || {
        if name.trim().is_empty() {
            UNKNOWN_SENDER.to_string()
        } else {
            name.trim().to_lowercase()
        }
    };

    let id = match item.sender_address.as_deref().map(str::trim) {
        Some(addr) if addr.to_lowercase().contains("/o=") => {
            match store.resolve_directory_address(addr) {
                Ok(Some(smtp)) if !smtp.trim().is_empty() => smtp.trim().to_lowercase(),
                Ok(_) => name_id(),
                Err(e) => {
                    debug!(item = %item.id, error = %e, "Directory lookup failed, using display name");
                    name_id()
                }
            }
        }
        Some(addr) if !addr.is_empty() => addr.to_lowercase(),
        _ => name_id(),
    };

    let domain = domain_of(&id, internal_domain);
    Sender {
        id,
        domain,
        display_name: name,
    }
}

/// Where the owner appears among an item's recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Audience {
    pub in_to: bool,
    pub in_cc: bool,
    /// True total, independent of the scan cap.
    pub total: u32,
}

/// Look for the owner among the first `cap` recipients.
pub fn scan_recipients(item: &MailItem, identity: &Identity, cap: usize) -> Audience {
    let mut audience = Audience {
        total: u32::try_from(item.recipients.len()).unwrap_or(u32::MAX),
        ..Default::default()
    };
    for recipient in item.recipients.iter().take(cap) {
        if !identity.matches(recipient) {
            continue;
        }
        match recipient.role {
            RecipientRole::To => audience.in_to = true,
            RecipientRole::Cc => audience.in_cc = true,
            _ => {}
        }
    }
    audience
}

/// Exactly the columns the model reads.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub subject: String,
    pub sender_domain: String,
    pub is_primary_recipient: bool,
    pub is_copied_recipient: bool,
    pub recipient_count: u32,
}

impl FeatureRow {
    /// Build the model input for a live item.
    pub fn from_item<S: MailStore + ?Sized>(
        store: &S,
        item: &MailItem,
        identity: &Identity,
        internal_domain: &str,
        scan_cap: usize,
    ) -> Self {
        let sender = sender_of(store, item, internal_domain);
        let audience = scan_recipients(item, identity, scan_cap);
        Self {
            subject: clean_text(item.subject.as_deref().unwrap_or("")),
            sender_domain: sender.domain,
            is_primary_recipient: audience.in_to,
            is_copied_recipient: audience.in_cc,
            recipient_count: audience.total,
        }
    }

    /// Numeric columns in scaler order: recipient count, To flag, Cc flag.
    pub fn numeric(&self) -> [f64; 3] {
        [
            f64::from(self.recipient_count),
            f64::from(u8::from(self.is_primary_recipient)),
            f64::from(u8::from(self.is_copied_recipient)),
        ]
    }
}

impl From<&MailRecord> for FeatureRow {
    fn from(record: &MailRecord) -> Self {
        Self {
            subject: record.subject.clone(),
            sender_domain: record.sender_domain.clone(),
            is_primary_recipient: record.is_primary_recipient,
            is_copied_recipient: record.is_copied_recipient,
            recipient_count: record.recipient_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::address::Recipient;
    use crate::model::mail::ItemId;
    use crate::store::memory::MemoryStore;

    fn item() -> MailItem {
        MailItem::new(ItemId {
            folder: 0,
            key: "k".into(),
        })
    }

    #[test]
    fn test_clean_text_strips_delimiters() {
        let raw = "Line one\r\nline\ttwo | three\n\n";
        let cleaned = clean_text(raw);
        assert_eq!(cleaned, "Line one line two three");
        for bad in ['\n', '\r', '\t', '|'] {
            assert!(!cleaned.contains(bad));
        }
    }

    #[test]
    fn test_clean_text_tokenizes_urls_and_keeps_accents() {
        let cleaned = clean_text("Revisión: https://intranet.example/x?y=1 ¡ya! 🚀 año");
        assert_eq!(cleaned, "Revisión: URL ya! año");
    }

    #[test]
    fn test_clean_text_adversarial_inputs() {
        let inputs = [
            "|||",
            "\u{2028}|\u{0b}\u{0c}",
            "a|b\tc\rd\ne",
            "http://x|y",
            "   ",
            "\u{85}next line",
        ];
        for raw in inputs {
            let cleaned = clean_text(raw);
            assert!(
                !cleaned.contains(['\n', '\r', '\t', '|']),
                "unsafe output {cleaned:?} for {raw:?}"
            );
        }
    }

    #[test]
    fn test_truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("ñandú", 3), "ñan");
        assert_eq!(truncate_chars("short", 50), "short");
    }

    #[test]
    fn test_truncate_keeps_fixed_length() {
        let cut = truncate_chars("ab cd ef", 3);
        assert_eq!(cut, "ab ");
        assert_eq!(cut.chars().count(), 3);
    }

    #[test]
    fn test_sender_plain_address() {
        let store = MemoryStore::new("Inbox");
        let mut it = item();
        it.sender_name = Some("Boss".into());
        it.sender_address = Some("Boss@Sub.Example.com".into());
        let sender = sender_of(&store, &it, "internal");
        assert_eq!(sender.id, "boss@sub.example.com");
        assert_eq!(sender.domain, "sub.example.com");
    }

    #[test]
    fn test_sender_directory_resolved() {
        let mut store = MemoryStore::new("Inbox");
        store.add_directory_entry("/o=Corp/cn=jdoe", "JDoe@corp.example");
        let mut it = item();
        it.sender_name = Some("John Doe".into());
        it.sender_address = Some("/O=Corp/cn=jdoe".into());
        let sender = sender_of(&store, &it, "internal");
        assert_eq!(sender.id, "jdoe@corp.example");
        assert_eq!(sender.domain, "corp.example");
    }

    #[test]
    fn test_sender_directory_miss_falls_back_to_name() {
        let store = MemoryStore::new("Inbox");
        let mut it = item();
        it.sender_name = Some("John Doe".into());
        it.sender_address = Some("/o=Corp/cn=jdoe".into());
        let sender = sender_of(&store, &it, "internal");
        assert_eq!(sender.id, "john doe");
        assert_eq!(sender.domain, "internal");
    }

    #[test]
    fn test_sender_unknown() {
        let store = MemoryStore::new("Inbox");
        let sender = sender_of(&store, &item(), "internal");
        assert_eq!(sender.id, UNKNOWN_SENDER);
        assert_eq!(sender.domain, "internal");
    }

    #[test]
    fn test_recipient_total_ignores_scan_cap() {
        let me = Identity::new("me@corp.example", "Me");
        let mut it = item();
        for i in 0..60 {
            it.recipients.push(Recipient::new(
                format!("user{i}@corp.example"),
                format!("User {i}"),
                RecipientRole::To,
            ));
        }
        // Beyond the cap: not seen by the role scan
        it.recipients[55] = Recipient::new("me@corp.example", "Me", RecipientRole::To);

        let audience = scan_recipients(&it, &me, 50);
        assert_eq!(audience.total, 60);
        assert!(!audience.in_to);

        it.recipients[10] = Recipient::new("me@corp.example", "Me", RecipientRole::Cc);
        let audience = scan_recipients(&it, &me, 50);
        assert!(audience.in_cc);
        assert!(!audience.in_to);
    }

    #[test]
    fn test_unreadable_recipient_does_not_match() {
        let me = Identity::new("me@corp.example", "Me Myself");
        let mut it = item();
        it.recipients.push(Recipient {
            address: None,
            name: None,
            role: RecipientRole::To,
        });
        let audience = scan_recipients(&it, &me, 50);
        assert_eq!(audience.total, 1);
        assert!(!audience.in_to);
    }
}
