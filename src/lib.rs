//! wd-bridge: mount a WD MyCloud device as a local filesystem.
//!
//! The remote speaks opaque ids over an HTTPS SDK; this crate translates
//! POSIX-style filesystem callbacks into those calls, with a tiered cache
//! (path→id, ETag-revalidated listings, hot/cold subfolder counts and file
//! sizes) in between, and a shadow-copy protocol for the remote's
//! write-once uploads.

pub mod api_client;
pub mod config;
pub mod error;
pub mod fs;
