//! Inference: score unread mail and tag what looks urgent.
//!
//! Items are scored with the same [`FeatureRow`] construction the dataset
//! was built from. Only items that cross a threshold are touched, and each
//! of those is saved exactly once.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ExtractionConfig, IdentityConfig, InferenceConfig};
use crate::error::Result;
use crate::features::FeatureRow;
use crate::model::address::Identity;
use crate::model::mail::{ItemId, MailItem};
use crate::store::{ItemQuery, MailStore};
use crate::train::UrgencyModel;

/// What to do with a scored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    None,
    Review,
    Urgent,
}

/// Two-threshold decision rule.
///
/// `p >= high` is urgent, `low <= p < high` is review, anything lower is
/// left alone.
pub fn decide(probability: f64, high: f64, low: f64) -> Action {
    if probability >= high {
        Action::Urgent
    } else if probability >= low {
        Action::Review
    } else {
        Action::None
    }
}

/// Score and outcome for one item.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub item: ItemId,
    pub subject: String,
    pub probability: f64,
    pub action: Action,
    /// The tag reached the store (always false on a dry run).
    pub applied: bool,
}

/// Counters of one inference pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InferenceSummary {
    /// Unread mail items that were scored.
    pub scanned: usize,
    pub urgent: usize,
    pub review: usize,
    pub skipped_non_mail: usize,
    /// Items that could not be read or tagged.
    pub failed: usize,
    pub decisions: Vec<Decision>,
}

/// Progress event: items handled so far, and the total when known.
pub type ScanProgressFn<'a> = &'a dyn Fn(usize, Option<usize>);

/// Scores the unread mail of a store's top folder.
pub struct Scanner<'m> {
    model: &'m UrgencyModel,
    identity: Identity,
    internal_domain: String,
    scan_cap: usize,
    high: f64,
    low: f64,
    urgent_tag: String,
    review_tag: String,
}

impl<'m> Scanner<'m> {
    /// Fails when the thresholds are out of order or outside `[0, 1]`.
    pub fn new(
        model: &'m UrgencyModel,
        identity: &IdentityConfig,
        extraction: &ExtractionConfig,
        inference: &InferenceConfig,
    ) -> Result<Self> {
        inference.validate()?;
        Ok(Self {
            model,
            identity: Identity::new(&identity.email, &identity.display_name),
            internal_domain: identity.internal_domain.clone(),
            scan_cap: extraction.recipient_scan_cap,
            high: inference.high_threshold,
            low: inference.low_threshold,
            urgent_tag: inference.urgent_tag.clone(),
            review_tag: inference.review_tag.clone(),
        })
    }

    /// Model input for an item, built exactly as during extraction.
    pub fn features<S: MailStore + ?Sized>(&self, store: &S, item: &MailItem) -> FeatureRow {
        FeatureRow::from_item(
            store,
            item,
            &self.identity,
            &self.internal_domain,
            self.scan_cap,
        )
    }

    /// Score every unread mail item in the root folder.
    ///
    /// With `dry_run` the store is never mutated. Only a failure to open the
    /// root folder or to create the categories is an error; anything that
    /// goes wrong with a single item is counted in `failed`.
    pub fn run<S: MailStore + ?Sized>(
        &self,
        store: &mut S,
        dry_run: bool,
        progress: Option<ScanProgressFn<'_>>,
    ) -> Result<InferenceSummary> {
        if !dry_run {
            store.ensure_category(&self.urgent_tag)?;
            store.ensure_category(&self.review_tag)?;
        }

        let root = store.root()?;
        let query = ItemQuery {
            newest_first: true,
            unread_only: true,
            with_body: false,
        };
        // Drain the listing first: tagging needs the store mutably
        let (filtered, total, entries) = {
            let listing = store.items(&root, query)?;
            let entries: Vec<Result<MailItem>> = listing.items.collect();
            (listing.unread_filtered, listing.len_hint, entries)
        };
        if !filtered {
            warn!(folder = %root.name, "Could not filter unread items, checking each one");
        }
        info!(folder = %root.name, items = entries.len(), dry_run, "Scanning for urgent mail");

        let count = entries.len();
        let mut summary = InferenceSummary::default();
        for (done, entry) in entries.into_iter().enumerate() {
            if let Some(report) = progress {
                report(done, total);
            }
            let item = match entry {
                Ok(item) => item,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable item");
                    summary.failed += 1;
                    continue;
                }
            };
            if !item.is_mail() {
                summary.skipped_non_mail += 1;
                continue;
            }
            if !item.read_state.is_unread() {
                continue;
            }
            summary.scanned += 1;

            let row = self.features(&*store, &item);
            let probability = self.model.predict_proba(&row);
            let action = decide(probability, self.high, self.low);
            debug!(item = %item.id, probability, ?action, "Scored");

            let applied = match self.tag_for(action) {
                Some(tag) if !dry_run => match tag_and_save(store, &item.id, tag) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(item = %item.id, error = %e, "Could not tag item");
                        summary.failed += 1;
                        false
                    }
                },
                _ => false,
            };
            if applied || dry_run {
                match action {
                    Action::Urgent => summary.urgent += 1,
                    Action::Review => summary.review += 1,
                    Action::None => {}
                }
            }

            summary.decisions.push(Decision {
                item: item.id,
                subject: row.subject,
                probability,
                action,
                applied,
            });
        }
        if let Some(report) = progress {
            report(count, total);
        }

        info!(
            scanned = summary.scanned,
            urgent = summary.urgent,
            review = summary.review,
            failed = summary.failed,
            "Scan finished"
        );
        Ok(summary)
    }

    fn tag_for(&self, action: Action) -> Option<&str> {
        match action {
            Action::Urgent => Some(&self.urgent_tag),
            Action::Review => Some(&self.review_tag),
            Action::None => None,
        }
    }
}

fn tag_and_save<S: MailStore + ?Sized>(store: &mut S, item: &ItemId, tag: &str) -> Result<()> {
    store.set_category(item, tag)?;
    store.save(item)
}
