//! Fetch recent Gmail inbox messages, strip them down to the text that
//! matters, and hand that text to a post generator.

pub mod cli;
pub mod config;
pub mod email_content;
pub mod error;
pub mod generation;
pub mod gmail_api;
pub mod pipeline;
pub mod sanitize;
pub mod types;

pub use error::{Error, Result};
