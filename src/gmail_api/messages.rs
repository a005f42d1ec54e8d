use std::sync::Arc;

use futures::future::try_join_all;
use reqwest::{Response, StatusCode};
use tracing::{debug, info, warn};

use super::auth::TokenSource;
use crate::error::{Error, Result};
use crate::types::{ApiErrorResponse, Message, MessagesResponse};

pub const GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Inbox only, minus the social and promotions tabs.
pub const INBOX_FILTER: &str = "in:inbox -category:{social promotions}";

/// Lists and fetches inbox messages with a token from the session.
pub struct MessageFetcher {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl MessageFetcher {
    pub fn new(client: reqwest::Client, tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_base_url(client, tokens, GMAIL_API_BASE_URL)
    }

    pub fn with_base_url(
        client: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Ids of up to `max_results` recent inbox messages. No matches is an
    /// empty list, not an error.
    pub async fn list_recent(&self, max_results: u32) -> Result<Vec<String>> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/messages", self.base_url);
        debug!("Listing messages: maxResults={} q={:?}", max_results, INBOX_FILTER);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[
                ("maxResults", max_results.to_string()),
                ("q", INBOX_FILTER.to_string()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let list: MessagesResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;

        let ids: Vec<String> = list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();
        if ids.is_empty() {
            info!("No emails found in response");
        } else {
            info!("Found {} emails", ids.len());
        }
        Ok(ids)
    }

    /// Full representation of one message, headers and part tree included.
    pub async fn fetch_one(&self, id: &str) -> Result<Message> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/messages/{}", self.base_url, id);
        debug!("Fetching message {}", id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[("format", "full")])
            .send()
            .await
            .map_err(transport_error)?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(transport_error)
    }

    /// Fetch every id concurrently. Succeeds only if every fetch does; on the
    /// first failure the other results are dropped.
    pub async fn fetch_all(&self, ids: &[String]) -> Result<Vec<Message>> {
        let messages = try_join_all(ids.iter().map(|id| self.fetch_one(id))).await?;
        debug!("Fetched {} messages", messages.len());
        Ok(messages)
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    warn!("Gmail request failed: {}", e);
    Error::Api("unknown".to_string())
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::FORBIDDEN => Err(Error::Permission),
        StatusCode::UNAUTHORIZED => Err(Error::InvalidToken),
        _ => {
            let body = response.text().await.unwrap_or_default();
            warn!("Gmail API returned {}: {}", status, body);
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| "unknown".to_string());
            Err(Error::Api(message))
        }
    }
}
