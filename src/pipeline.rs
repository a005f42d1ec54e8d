use tracing::debug;

use crate::email_content;
use crate::error::Result;
use crate::gmail_api::MessageFetcher;
use crate::sanitize;
use crate::types::{Message, MessageRecord};

/// Turn one fetched message into a normalized record.
pub fn normalize(message: &Message) -> Result<MessageRecord> {
    let decoded = email_content::decode(message)?;
    let clean_body = sanitize::clean(&decoded.body);
    let id = message.id.clone().unwrap_or_default();
    debug!(
        "Normalized {}: {} -> {} chars",
        id,
        decoded.body.len(),
        clean_body.len()
    );
    Ok(MessageRecord::new(id, decoded, clean_body))
}

/// list → fetch → decode → clean, for the most recent inbox messages.
pub struct Pipeline {
    fetcher: MessageFetcher,
}

impl Pipeline {
    pub fn new(fetcher: MessageFetcher) -> Self {
        Self { fetcher }
    }

    pub async fn run(&self, max_results: u32) -> Result<Vec<MessageRecord>> {
        let ids = self.fetcher.list_recent(max_results).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let messages = self.fetcher.fetch_all(&ids).await?;
        messages.iter().map(normalize).collect()
    }
}
