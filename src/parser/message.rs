//! Raw RFC 5322 message → [`MailItem`].
//!
//! Structured fields come from `mail-parser`. Mailbox bookkeeping headers
//! (`Status`, `X-Status`, `X-Mozilla-Status`) are read straight from the
//! header block.

use chrono::{DateTime, Utc};
use mail_parser::{Address, MessageParser, MimeHeaders};

use crate::error::{Result, TriageError};
use crate::model::address::{Recipient, RecipientRole};
use crate::model::mail::{FolderId, ItemId, ItemKind, MailItem, ReadState};

use super::mbox::strip_envelope;

/// `X-Mozilla-Status` bit: message has been read.
pub const MOZ_READ: u32 = 0x0001;
/// `X-Mozilla-Status` bit: message has been replied to.
pub const MOZ_REPLIED: u32 = 0x0002;
/// `X-Mozilla-Status` bit: message has been forwarded.
pub const MOZ_FORWARDED: u32 = 0x1000;

/// Transport "last verb" codes.
pub const VERB_REPLY: i64 = 102;
pub const VERB_FORWARD: i64 = 104;

/// Build an item from one raw message of `folder`.
///
/// `offset` is the message position in its folder file and becomes the key
/// when the message has no Message-ID.
pub fn parse_item(raw: &[u8], folder: FolderId, offset: u64, with_body: bool) -> Result<MailItem> {
    let bytes = strip_envelope(raw);
    let msg = MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| TriageError::malformed(format!("{folder}/@{offset}"), "unparseable message"))?;

    let key = msg
        .message_id()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("@{offset}"));
    let mut item = MailItem::new(ItemId { folder, key });

    item.kind = kind_of(&msg);
    item.received = msg
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0));
    item.subject = msg.subject().map(str::to_string);

    if let Some(from) = msg.from().and_then(Address::first) {
        item.sender_name = from.name().map(str::to_string);
        item.sender_address = from.address().map(str::to_string);
    }

    for (list, role) in [
        (msg.to(), RecipientRole::To),
        (msg.cc(), RecipientRole::Cc),
        (msg.bcc(), RecipientRole::Bcc),
    ] {
        if let Some(list) = list {
            item.recipients.extend(list.iter().map(|a| {
                Recipient::new(
                    a.address().unwrap_or_default(),
                    a.name().unwrap_or_default(),
                    role,
                )
            }));
        }
    }

    let headers = header_block(bytes);
    let status = MailboxStatus::from_headers(headers);
    item.read_state = ReadState::from_unread(!status.read);
    item.last_verb = status.last_verb();

    if with_body {
        item.body = msg.body_text(0).map(|b| b.into_owned());
    }
    Ok(item)
}

fn kind_of(msg: &mail_parser::Message<'_>) -> ItemKind {
    let Some(ct) = msg.content_type() else {
        return ItemKind::Mail;
    };
    let main = ct.ctype().to_ascii_lowercase();
    let sub = ct.subtype().unwrap_or_default().to_ascii_lowercase();
    match (main.as_str(), sub.as_str()) {
        ("multipart", "report") => ItemKind::Report,
        ("text", "calendar") => ItemKind::Meeting,
        _ => ItemKind::Mail,
    }
}

/// Read and answered state as recorded by the mail client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    pub read: bool,
    pub replied: bool,
    pub forwarded: bool,
}

impl MailboxStatus {
    /// `X-Mozilla-Status` wins when present, otherwise `Status`/`X-Status`.
    pub fn from_headers(headers: &[u8]) -> Self {
        let mut status = Self::default();
        if let Some(moz) =
            raw_header(headers, "X-Mozilla-Status").and_then(|v| u32::from_str_radix(&v, 16).ok())
        {
            status.read = moz & MOZ_READ != 0;
            status.replied = moz & MOZ_REPLIED != 0;
            status.forwarded = moz & MOZ_FORWARDED != 0;
            return status;
        }
        if let Some(s) = raw_header(headers, "Status") {
            status.read = s.contains('R');
        }
        if let Some(x) = raw_header(headers, "X-Status") {
            status.replied = x.contains('A');
        }
        status
    }

    pub fn last_verb(self) -> Option<i64> {
        if self.replied {
            Some(VERB_REPLY)
        } else if self.forwarded {
            Some(VERB_FORWARD)
        } else {
            None
        }
    }
}

/// Header section of a message (up to the first blank line).
fn header_block(bytes: &[u8]) -> &[u8] {
    let mut start = 0;
    while start < bytes.len() {
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |p| start + p + 1);
        let line = &bytes[start..end];
        if line.iter().all(|&b| b == b'\r' || b == b'\n') {
            return &bytes[..start];
        }
        start = end;
    }
    bytes
}

/// Unfolded, trimmed value of the first header called `name`.
pub fn raw_header(headers: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(headers);
    let mut value: Option<String> = None;
    for line in text.lines() {
        if let Some(v) = value.as_mut() {
            if line.starts_with([' ', '\t']) {
                v.push(' ');
                v.push_str(line.trim());
                continue;
            }
            break;
        }
        if let Some((key, rest)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case(name) {
                value = Some(rest.trim().to_string());
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = b"From boss@corp.example Mon Mar  3 09:00:00 2025\r\n\
Message-ID: <abc@corp.example>\r\n\
Date: Mon, 03 Mar 2025 09:00:00 +0000\r\n\
From: \"The Boss\" <boss@corp.example>\r\n\
To: Me <me@corp.example>, other@corp.example\r\n\
Cc: \"Team\" <team@corp.example>\r\n\
Subject: URGENT: approve budget\r\n\
X-Mozilla-Status: 0003\r\n\
\r\n\
Please approve.\r\n";

    #[test]
    fn test_parse_item_fields() {
        let item = parse_item(MESSAGE, 2, 0, true).unwrap();
        assert_eq!(item.id.key, "abc@corp.example");
        assert_eq!(item.id.folder, 2);
        assert_eq!(item.kind, ItemKind::Mail);
        assert_eq!(item.subject.as_deref(), Some("URGENT: approve budget"));
        assert_eq!(item.sender_name.as_deref(), Some("The Boss"));
        assert_eq!(item.sender_address.as_deref(), Some("boss@corp.example"));
        assert_eq!(item.recipients.len(), 3);
        assert_eq!(item.recipients[2].role, RecipientRole::Cc);
        assert_eq!(item.read_state, ReadState::Read);
        assert_eq!(item.last_verb, Some(VERB_REPLY));
        assert_eq!(
            item.received.map(|d| d.timestamp()),
            Some(1_740_992_400)
        );
        assert!(item.body.unwrap().contains("Please approve"));
    }

    #[test]
    fn test_body_only_when_asked() {
        let item = parse_item(MESSAGE, 0, 0, false).unwrap();
        assert!(item.body.is_none());
    }

    #[test]
    fn test_status_headers() {
        let unread = MailboxStatus::from_headers(b"Status: O\r\n");
        assert!(!unread.read);
        let answered = MailboxStatus::from_headers(b"Status: RO\nX-Status: A\n");
        assert!(answered.read && answered.replied);
        let fwd = MailboxStatus::from_headers(b"X-Mozilla-Status: 1000\n");
        assert!(!fwd.read);
        assert_eq!(fwd.last_verb(), Some(VERB_FORWARD));
        assert_eq!(MailboxStatus::default().last_verb(), None);
    }

    #[test]
    fn test_report_and_calendar_kinds() {
        let report = b"From: mailer-daemon@x\nSubject: Undelivered\nContent-Type: multipart/report; report-type=delivery-status; boundary=\"b\"\n\n--b\nContent-Type: text/plain\n\nfail\n--b--\n";
        assert_eq!(parse_item(report, 0, 7, false).unwrap().kind, ItemKind::Report);
        let invite = b"From: a@x\nSubject: Sync\nContent-Type: text/calendar; method=REQUEST\n\nBEGIN:VCALENDAR\n";
        let item = parse_item(invite, 0, 9, false).unwrap();
        assert_eq!(item.kind, ItemKind::Meeting);
        assert_eq!(item.id.key, "@9");
    }

    #[test]
    fn test_raw_header_unfolds() {
        let headers = b"Subject: a\nX-Custom: one\n two\nOther: x\n";
        assert_eq!(raw_header(headers, "x-custom").as_deref(), Some("one two"));
        assert_eq!(raw_header(headers, "missing"), None);
    }

    #[test]
    fn test_header_block_stops_at_blank_line() {
        let block = header_block(b"A: 1\r\nB: 2\r\n\r\nStatus: R\r\n");
        assert_eq!(block, b"A: 1\r\nB: 2\r\n");
        assert_eq!(raw_header(block, "Status"), None);
    }
}
