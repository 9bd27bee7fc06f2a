//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use artifact_lifecycle::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{AlmError, Result};

// Artifacts
pub use crate::artifacts::publisher::{LinkOutcome, Publication, Publisher};
pub use crate::artifacts::reference::{
    ArtifactReference, ScratchEntry, download_url, generate_name, scan_scratch_dir,
};
pub use crate::artifacts::sweeper::{SweepReport, SweepRun, Sweeper};

// Logging
pub use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
