//! Signal extraction: walk the folder tree and turn mail into labelled records.
//!
//! The walk uses an explicit stack, so deep hierarchies do not grow the call
//! stack. A folder that cannot be listed is logged and skipped; its children
//! are still visited. A single unreadable item never stops the batch.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::{ExtractionConfig, IdentityConfig, LabelingConfig};
use crate::error::Result;
use crate::features::{clean_text, scan_recipients, sender_of, truncate_chars};
use crate::label::ground_truth;
use crate::model::address::Identity;
use crate::model::mail::MailItem;
use crate::model::record::{MailRecord, ObservedAction};
use crate::store::{Folder, ItemQuery, MailStore};

/// Per-folder outcome.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FolderSummary {
    /// Display path, e.g. `Inbox > Projects`.
    pub path: String,
    /// Records extracted from this folder.
    pub records: usize,
    /// Items that could not be read.
    pub skipped: usize,
    /// The folder listing came back newest-first.
    pub sorted: bool,
    /// Scanning stopped early at the cutoff.
    pub stopped_at_cutoff: bool,
}

/// Result of one extraction pass.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<MailRecord>,
    pub folders: Vec<FolderSummary>,
    /// Items skipped because a property could not be read.
    pub skipped_items: usize,
    /// Folders whose items could not be listed.
    pub failed_folders: Vec<String>,
}

/// Progress event: folder path and records extracted from it so far.
pub type ProgressFn<'a> = &'a dyn Fn(&str, usize);

/// Walks a store and produces labelled records.
pub struct Extractor {
    identity: Identity,
    internal_domain: String,
    lookback_days: u32,
    staleness_days: u32,
    snippet_chars: usize,
    scan_cap: usize,
    progress_every: usize,
}

impl Extractor {
    pub fn new(
        identity: &IdentityConfig,
        extraction: &ExtractionConfig,
        labeling: &LabelingConfig,
    ) -> Self {
        Self {
            identity: Identity::new(&identity.email, &identity.display_name),
            internal_domain: identity.internal_domain.clone(),
            lookback_days: extraction.lookback_days,
            staleness_days: labeling.staleness_days,
            snippet_chars: extraction.snippet_chars,
            scan_cap: extraction.recipient_scan_cap,
            progress_every: extraction.progress_every.max(1),
        }
    }

    /// Extract every folder below the store root, as of the current time.
    pub fn run<S: MailStore + ?Sized>(
        &self,
        store: &S,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<Extraction> {
        self.run_at(store, Utc::now(), progress)
    }

    /// Extract with an explicit "now", which fixes both the cutoff and item ages.
    ///
    /// Only a failure to open the root folder is an error.
    pub fn run_at<S: MailStore + ?Sized>(
        &self,
        store: &S,
        now: DateTime<Utc>,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<Extraction> {
        let cutoff = now - Duration::days(i64::from(self.lookback_days));
        info!(cutoff = %cutoff.date_naive(), "Extracting mailbox signals");

        let mut out = Extraction::default();
        let mut stack: Vec<(Folder, String)> = Vec::new();
        let root = store.root()?;
        let root_path = root.name.clone();
        stack.push((root, root_path));

        while let Some((folder, path)) = stack.pop() {
            self.scan_folder(store, &folder, &path, cutoff, now, progress, &mut out);

            match store.subfolders(&folder) {
                Ok(children) => {
                    // Reversed so the first child is popped first
                    for child in children.into_iter().rev() {
                        let child_path = format!("{path} > {}", child.name);
                        stack.push((child, child_path));
                    }
                }
                Err(e) => {
                    warn!(folder = %path, error = %e, "Could not list subfolders");
                }
            }
        }

        info!(
            records = out.records.len(),
            skipped = out.skipped_items,
            folders = out.folders.len(),
            "Extraction finished"
        );
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_folder<S: MailStore + ?Sized>(
        &self,
        store: &S,
        folder: &Folder,
        path: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        progress: Option<ProgressFn<'_>>,
        out: &mut Extraction,
    ) {
        info!(folder = %path, "Scanning folder");
        let query = ItemQuery {
            newest_first: true,
            unread_only: false,
            with_body: true,
        };
        let listing = match store.items(folder, query) {
            Ok(listing) => listing,
            Err(e) => {
                warn!(folder = %path, error = %e, "Could not read folder");
                out.failed_folders.push(path.to_string());
                return;
            }
        };
        if !listing.sorted {
            warn!(folder = %path, "Could not sort by received time, scanning every item");
        }

        let folder_name = clean_text(&folder.name);
        let mut summary = FolderSummary {
            path: path.to_string(),
            records: 0,
            skipped: 0,
            sorted: listing.sorted,
            stopped_at_cutoff: false,
        };

        for entry in listing.items {
            let item = match entry {
                Ok(item) => item,
                Err(e) => {
                    debug!(folder = %path, error = %e, "Skipping unreadable item");
                    summary.skipped += 1;
                    continue;
                }
            };
            if !item.is_mail() {
                continue;
            }
            let received = match item.received_or_err() {
                Ok(received) => received,
                Err(e) => {
                    debug!(folder = %path, error = %e, "Skipping item");
                    summary.skipped += 1;
                    continue;
                }
            };
            if received < cutoff {
                if listing.sorted {
                    // Everything after this one is older still
                    summary.stopped_at_cutoff = true;
                    break;
                }
                continue;
            }

            out.records
                .push(self.record_for(store, &item, &folder_name, received, now));
            summary.records += 1;

            if summary.records % self.progress_every == 0 {
                if let Some(cb) = progress {
                    cb(path, summary.records);
                }
            }
        }

        if let Some(cb) = progress {
            cb(path, summary.records);
        }
        info!(folder = %path, records = summary.records, "Folder done");
        out.skipped_items += summary.skipped;
        out.folders.push(summary);
    }

    /// Build the labelled record for one mail item.
    pub fn record_for<S: MailStore + ?Sized>(
        &self,
        store: &S,
        item: &MailItem,
        folder_name: &str,
        received: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MailRecord {
        let sender = sender_of(store, item, &self.internal_domain);
        let audience = scan_recipients(item, &self.identity, self.scan_cap);
        let action = ObservedAction::from_last_verb(item.last_verb);
        let label = ground_truth(action, item.read_state, received, now, self.staleness_days);
        let body = clean_text(item.body.as_deref().unwrap_or(""));

        MailRecord {
            sender_id: sender.id,
            sender_domain: sender.domain,
            display_name: clean_text(&sender.display_name),
            subject: clean_text(item.subject.as_deref().unwrap_or("")),
            body_snippet: truncate_chars(&body, self.snippet_chars),
            is_primary_recipient: audience.in_to,
            is_copied_recipient: audience.in_cc,
            recipient_count: audience.total,
            origin_folder: folder_name.to_string(),
            read_state: item.read_state,
            observed_action: action,
            label,
        }
    }
}
