//! Daemon subsystem: sweep scheduler loop and signal handling.

#[cfg(feature = "daemon")]
pub mod loop_main;
#[cfg(feature = "daemon")]
pub mod signals;
