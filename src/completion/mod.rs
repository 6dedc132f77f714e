//! Completion service client and wire types.
//!
//! The backend is any OpenAI-compatible chat endpoint. Responses are decoded
//! through [`CompletionEnvelope`] so that alternate shapes (`result`,
//! `content`, `message`, bare strings) reach call sites as one
//! [`Completion`] value.

mod client;
mod types;

pub use client::CompletionClient;
pub use types::*;
