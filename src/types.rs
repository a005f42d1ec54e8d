use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRef {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Message {
    pub id: Option<String>,
    pub snippet: Option<String>,
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MessagePart {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    pub headers: Option<Vec<Header>>,
    pub body: Option<MessagePartBody>,
    pub parts: Option<Vec<MessagePart>>,
}

impl MessagePart {
    /// Base64url body data, if this part carries any.
    pub fn data(&self) -> Option<&str> {
        self.body.as_ref().and_then(|b| b.data.as_deref())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Header {
    pub name: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessagePartBody {
    pub data: Option<String>,
}

// Gmail error envelope: {"error": {"code": 403, "message": "..."}}
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub message: Option<String>,
}

/// Subject, snippet and plain-text body pulled out of a raw message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub subject: String,
    pub snippet: String,
    pub body: String,
}

/// One normalized inbox message, ready for the generation step.
///
/// Fields are read-only once built; the record is owned by whoever ran the
/// pipeline and is not cached anywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    id: String,
    subject: String,
    snippet: String,
    raw_body: String,
    clean_body: String,
}

impl MessageRecord {
    pub fn new(id: String, decoded: DecodedMessage, clean_body: String) -> Self {
        Self {
            id,
            subject: decoded.subject,
            snippet: decoded.snippet,
            raw_body: decoded.body,
            clean_body,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn snippet(&self) -> &str {
        &self.snippet
    }

    pub fn raw_body(&self) -> &str {
        &self.raw_body
    }

    pub fn clean_body(&self) -> &str {
        &self.clean_body
    }
}
