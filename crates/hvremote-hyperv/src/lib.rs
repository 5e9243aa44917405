//! hvremote-hyperv: Hyper-V host operations
//!
//! Domain operations built on the transports in `hvremote-exec`: remote file
//! helpers and ISO image assembly.

pub mod client;
pub mod error;
pub mod iso;

pub use client::HypervClient;
pub use error::HypervError;
pub use iso::{IsoFileSystemType, IsoImage, IsoMediaType, IsoOutcome};
