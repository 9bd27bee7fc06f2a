//! Artifact lifecycle: publish files for download, sweep them after expiry.

pub mod publisher;
pub mod reference;
pub mod sweeper;
