use crate::error::{Error, Result};
use crate::types::{DecodedMessage, Message, MessagePart};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, Engine};

pub const DEFAULT_SUBJECT: &str = "No Subject";

/// Part trees nested deeper than this are rejected rather than walked.
pub const MAX_PART_DEPTH: usize = 32;

// Gmail bodies use the URL-safe alphabet but padding varies, so decode with
// the standard alphabet after mapping `-`/`_` back and accept either form.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Extract subject, snippet and plain-text body from a fetched message.
pub fn decode(message: &Message) -> Result<DecodedMessage> {
    let snippet = message.snippet.clone().unwrap_or_default();
    let Some(payload) = message.payload.as_ref() else {
        return Ok(DecodedMessage {
            subject: DEFAULT_SUBJECT.to_string(),
            snippet,
            body: String::new(),
        });
    };

    Ok(DecodedMessage {
        subject: extract_subject(payload),
        snippet,
        body: extract_body(payload)?,
    })
}

// Exact, case-sensitive header match; an empty value counts as missing.
fn extract_subject(payload: &MessagePart) -> String {
    payload
        .headers
        .as_ref()
        .and_then(|headers| {
            headers
                .iter()
                .find(|h| h.name.as_deref() == Some("Subject"))
        })
        .and_then(|h| h.value.clone())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_SUBJECT.to_string())
}

/// Plain-text body of a payload.
///
/// A multipart payload contributes every `text/plain` part with data, in tree
/// order. A single-part payload is decoded as-is whatever its MIME type.
pub fn extract_body(payload: &MessagePart) -> Result<String> {
    if let Some(parts) = &payload.parts {
        let mut body = String::new();
        collect_plain_text(parts, 1, &mut body)?;
        return Ok(body);
    }

    match payload.data() {
        Some(data) => decode_body_data(data),
        None => Ok(String::new()),
    }
}

fn collect_plain_text(parts: &[MessagePart], depth: usize, out: &mut String) -> Result<()> {
    if depth > MAX_PART_DEPTH {
        return Err(Error::Decode(format!(
            "part tree nested deeper than {} levels",
            MAX_PART_DEPTH
        )));
    }

    for part in parts {
        let is_plain = part.mime_type.as_deref() == Some("text/plain");
        match (is_plain, part.data(), &part.parts) {
            (true, Some(data), _) => out.push_str(&decode_body_data(data)?),
            (_, _, Some(children)) => collect_plain_text(children, depth + 1, out)?,
            _ => {}
        }
    }
    Ok(())
}

/// Decode one base64url body into UTF-8 text.
pub fn decode_body_data(data: &str) -> Result<String> {
    let normalized: String = data
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let bytes = BODY_ENGINE
        .decode(normalized.as_bytes())
        .map_err(|e| Error::Decode(format!("invalid base64: {}", e)))?;

    String::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}
