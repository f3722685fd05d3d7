//! Object storage for rendered card artifacts (Cloudflare R2 via the S3 API).

pub mod client;
pub mod error;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
