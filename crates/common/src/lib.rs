//! Shared types used across all chatterd crates.

pub mod types;

pub use types::{ChatType, MediaAttachment, ReplyPayload};
