//! Core data model: raw mail items, recipients, and labelled records.

pub mod address;
pub mod mail;
pub mod record;
