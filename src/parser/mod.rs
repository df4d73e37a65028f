//! Reading mail from disk: MBOX splitting and message decoding.

pub mod mbox;
pub mod message;
