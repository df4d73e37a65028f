//! Streaming MBOX splitter.
//!
//! Reads a folder file line by line through a buffered reader and hands each
//! raw message to a callback. Tolerant of mixed line endings, a UTF-8 BOM,
//! truncated trailing messages and binary bodies.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Result, TriageError};

const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Messages larger than this are truncated (their headers are all we need).
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Splits one MBOX file into raw messages.
pub struct MboxReader {
    path: PathBuf,
    file_size: u64,
}

impl MboxReader {
    /// Open a folder file. Does not check that it really is an MBOX.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TriageError::MailboxNotFound(path.clone())
            } else {
                TriageError::io(&path, e)
            }
        })?;
        Ok(Self {
            path,
            file_size: metadata.len(),
        })
    }

    /// Call `on_message(offset, raw_bytes)` for every message, in file order.
    ///
    /// The callback returns `false` to stop early. Returns the number of
    /// messages delivered.
    pub fn for_each_message(&self, on_message: &mut dyn FnMut(u64, &[u8]) -> bool) -> Result<u64> {
        if self.file_size == 0 {
            return Ok(0);
        }
        let file = File::open(&self.path).map_err(|e| TriageError::io(&self.path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut count: u64 = 0;
        let mut offset: u64 = 0;
        let mut message_start: u64 = 0;
        let mut message: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut line: Vec<u8> = Vec::with_capacity(4096);
        let mut prev_blank = true;
        let mut truncated = false;

        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .map_err(|e| TriageError::io(&self.path, e))?;
            if n == 0 {
                break;
            }

            if is_separator(&line) {
                if !prev_blank && offset > 0 {
                    warn!(
                        path = %self.path.display(),
                        offset,
                        "'From ' separator without preceding blank line"
                    );
                }
                if !message.is_empty() {
                    count += 1;
                    if !on_message(message_start, &message) {
                        return Ok(count);
                    }
                }
                message.clear();
                message_start = offset;
                truncated = false;
                message.extend_from_slice(&line);
            } else if message.len() + line.len() <= MAX_MESSAGE_SIZE {
                message.extend_from_slice(&line);
            } else if !truncated {
                warn!(offset = message_start, "Message exceeds maximum size, truncating");
                truncated = true;
            }

            prev_blank = is_blank(&line);
            offset += n as u64;
        }

        if !message.is_empty() {
            count += 1;
            on_message(message_start, &message);
        }
        Ok(count)
    }
}

/// `From ` at the start of a line, optionally after a BOM.
fn is_separator(line: &[u8]) -> bool {
    line.strip_prefix(&[0xEF, 0xBB, 0xBF])
        .unwrap_or(line)
        .starts_with(b"From ")
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|&b| matches!(b, b'\n' | b'\r' | b' ' | b'\t'))
}

/// Strip the leading `From ` envelope line from a raw message.
pub fn strip_envelope(raw: &[u8]) -> &[u8] {
    if !is_separator(raw) {
        return raw;
    }
    match raw.iter().position(|&b| b == b'\n') {
        Some(pos) => &raw[pos + 1..],
        None => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn collect(content: &[u8]) -> Vec<(u64, Vec<u8>)> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        let reader = MboxReader::open(file.path()).unwrap();
        let mut out = Vec::new();
        reader
            .for_each_message(&mut |offset, raw| {
                out.push((offset, raw.to_vec()));
                true
            })
            .unwrap();
        out
    }

    #[test]
    fn test_separator_detection() {
        assert!(is_separator(b"From user@example.com Thu Jan 01 00:00:00 2024\n"));
        assert!(!is_separator(b"from user@example.com\n"));
        assert!(!is_separator(b">From user@example.com\n"));
        let mut bom = vec![0xEF, 0xBB, 0xBF];
        bom.extend_from_slice(b"From x\n");
        assert!(is_separator(&bom));
    }

    #[test]
    fn test_splits_messages_with_offsets() {
        let content = b"From a@x Mon Jan 1 00:00:00 2024\nSubject: one\n\nbody\n\nFrom b@x Mon Jan 1 00:00:00 2024\r\nSubject: two\r\n\r\nbody\r\n";
        let messages = collect(content);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, 0);
        let second = content
            .windows(6)
            .rposition(|w| w == b"From b")
            .unwrap() as u64;
        assert_eq!(messages[1].0, second);
        assert!(messages[1].1.ends_with(b"body\r\n"));
    }

    #[test]
    fn test_escaped_from_stays_in_body() {
        let content = b"From a@x Mon Jan 1 00:00:00 2024\nSubject: one\n\n>From the desk of\n";
        let messages = collect(content);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_separator_without_blank_line_still_splits() {
        let content = b"From a@x Mon Jan 1 00:00:00 2024\nSubject: one\n\nbody\nFrom b@x Mon Jan 1 00:00:00 2024\nSubject: two\n\nbody\n";
        let messages = collect(content);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].1.ends_with(b"body\n"));
        assert!(messages[1].1.starts_with(b"From b@x"));
    }

    #[test]
    fn test_empty_file_and_stop_early() {
        assert!(collect(b"").is_empty());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"From a\n\nx\n\nFrom b\n\ny\n").unwrap();
        let reader = MboxReader::open(file.path()).unwrap();
        let delivered = reader.for_each_message(&mut |_, _| false).unwrap();
        assert_eq!(delivered, 1);
    }

    #[test]
    fn test_strip_envelope() {
        assert_eq!(strip_envelope(b"From a\nSubject: x\n"), b"Subject: x\n");
        assert_eq!(strip_envelope(b"Subject: x\n"), b"Subject: x\n");
    }

    #[test]
    fn test_missing_file() {
        let err = MboxReader::open("/definitely/not/here.mbox").err().unwrap();
        assert!(matches!(err, TriageError::MailboxNotFound(_)));
    }
}
