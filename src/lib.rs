//! `mailtriage`: learn which mail you act on, and flag new mail that looks
//! the same.
//!
//! The crate has three passes over a [`store::MailStore`]:
//!
//! - [`extract`] walks the folder tree and turns mail into labelled
//!   [`model::record::MailRecord`]s, which [`dataset`] writes to a
//!   pipe-delimited file;
//! - [`train`] fits the feature transform and the classifier on that file,
//!   and [`artifact`] saves the result;
//! - [`infer`] scores unread mail with the saved model and tags what crosses
//!   the thresholds.
//!
//! Everything is synchronous and single-threaded. Stores are not required
//! to be thread-safe; callers must not run two passes against the same
//! store at once.

pub mod artifact;
pub mod config;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod features;
pub mod infer;
pub mod label;
pub mod model;
pub mod parser;
pub mod store;
pub mod train;
