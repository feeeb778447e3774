//! Installer artifact download
//!
//! - `platform` - Platform detection and artifact naming
//! - `core` - Streaming download with retry/backoff, progress, and checksum verification

mod core;
mod platform;

pub use core::{ArtifactFetcher, Downloader, verify_sha256};
pub use platform::Platform;
