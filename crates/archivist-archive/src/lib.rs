//! Finished support archives
//!
//! The existence of `<archive-root>/<namespace>/<name>.zip` is the single
//! signal that an archive build is complete. The assembler writes it
//! atomically and is the only component that lists or removes it.

pub mod assembler;
pub mod endpoint;

pub use assembler::{Listing, ZipAssembler};
pub use endpoint::DownloadEndpoint;
