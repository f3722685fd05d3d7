//! Messaging platform adapter.
//!
//! Stateless REST client for subscriber custom-field writes and content
//! messages, with the copy-URL-before-image-URL ordering contract encoded
//! in `deliver_artifact_fields`.

pub mod client;
pub mod error;
pub mod types;

pub use client::{MessagingClient, MessagingConfig, FIELD_COPY_URL, FIELD_IMAGE_URL};
pub use error::{MessagingError, MessagingResult};
pub use types::{CarouselCard, OutboundMessage, UrlButton};
