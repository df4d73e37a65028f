//! Ground-truth labelling from observed behaviour.
//!
//! | Observed action | Read state | Age vs staleness | Label |
//! |---|---|---|---|
//! | replied / forwarded | any | any | actioned |
//! | none | unread | ≥ threshold | ignored |
//! | none | unread | < threshold | informational |
//! | none | read | any | informational |
//!
//! Note that "read but never answered" and "unread but still fresh" share
//! the informational class.

use chrono::{DateTime, Utc};

use crate::model::mail::ReadState;
use crate::model::record::{Label, ObservedAction};

/// Derive the label for one item. Pure; no I/O.
pub fn ground_truth(
    action: ObservedAction,
    read_state: ReadState,
    received: DateTime<Utc>,
    now: DateTime<Utc>,
    staleness_days: u32,
) -> Label {
    if action.is_action() {
        return Label::Actioned;
    }
    if read_state.is_unread() && age_in_days(received, now) >= i64::from(staleness_days) {
        return Label::Ignored;
    }
    Label::Informational
}

/// Whole days elapsed, rounded toward negative infinity.
fn age_in_days(received: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - received).num_seconds().div_euclid(86_400)
}
