//! Format-specific codecs.

pub mod jpeg;
pub mod png;
