//! Shared infrastructure for the vlansync crates.
//!
//! Every crate in the workspace reports failures through [`SyncError`];
//! the variants map one-to-one onto the failure classes a sync run can
//! hit: bad desired config, rejected credentials, a device response
//! that no longer matches our scraping assumptions, an explicit device
//! rejection, or a connection-level fault.

pub mod error;

pub use error::{SyncError, SyncResult};
