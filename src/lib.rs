#![forbid(unsafe_code)]

//! Artifact Lifecycle Manager (alm): time-bounded public download links for
//! files produced by an external command-line tool.
//!
//! Two operations:
//! 1. **Publish**: validate that a file lives under the allowed root and
//!    expose it as a named symlink in the public scratch directory
//! 2. **Sweep**: periodically delete links older than the configured TTL
//!
//! # Library usage
//!
//! ```rust,no_run
//! use artifact_lifecycle::prelude::*;
//!
//! # fn main() -> artifact_lifecycle::core::errors::Result<()> {
//! let config = Config::load(None)?;
//! let publisher = Publisher::new(&config.artifacts, None);
//! let publication = publisher.publish_generated(std::path::Path::new("out/report.txt"))?;
//! println!("{}", publication.public_path);
//!
//! let sweeper = Sweeper::from_config(&config, None);
//! sweeper.sweep()?;
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod artifacts;
pub mod core;
pub mod daemon;
pub mod logger;
