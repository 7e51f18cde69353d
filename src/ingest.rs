//! Raw RFC 5322 message → unsubscribe metadata.

use mail_parser::{Message, MessageParser, PartType};
use tracing::info;

use crate::error::{IngestError, Result};
use crate::store::StatusStore;
use crate::unsubscribe::types::MessageMetadata;

/// Parse `raw` and store its metadata under `message_id`.
pub async fn ingest(store: &dyn StatusStore, message_id: &str, raw: &[u8]) -> Result<MessageMetadata> {
    let metadata = parse_raw(raw)?;
    store.upsert_message(message_id, &metadata).await?;
    info!(
        message_id,
        has_header = metadata.list_unsubscribe.is_some(),
        has_html = metadata.html_body.is_some(),
        "Message ingested"
    );
    Ok(metadata)
}

/// Parse a raw message and keep only what the engine needs.
///
/// Header values are unfolded and trimmed. Missing headers and a missing
/// HTML part are `None`, not errors.
pub fn parse_raw(raw: &[u8]) -> std::result::Result<MessageMetadata, IngestError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::Empty);
    }
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or(IngestError::Unparseable)?;

    // A parse that found no headers at all is not a message.
    if parsed.headers().is_empty() {
        return Err(IngestError::Unparseable);
    }

    Ok(MessageMetadata {
        list_unsubscribe: raw_header(&parsed, raw, "List-Unsubscribe"),
        list_unsubscribe_post: raw_header(&parsed, raw, "List-Unsubscribe-Post"),
        // `body_html` would render a text/plain part as HTML; only a real
        // text/html part counts.
        html_body: parsed
            .html_part(0)
            .and_then(|part| match &part.body {
                PartType::Html(html) => Some(html.to_string()),
                _ => None,
            })
            .filter(|html| !html.trim().is_empty()),
    })
}

/// Full value of the first top-level header called `name`, every folded
/// line included, sliced from the raw input by the parser's offsets.
fn raw_header(parsed: &Message<'_>, raw: &[u8], name: &str) -> Option<String> {
    let header = parsed
        .headers()
        .iter()
        .find(|h| h.name().eq_ignore_ascii_case(name))?;
    let bytes = raw.get(header.offset_start as usize..header.offset_end as usize)?;
    unfold(&String::from_utf8_lossy(bytes))
}

/// Collapse folded header lines into one and trim. Blank values are `None`.
fn unfold(value: &str) -> Option<String> {
    let unfolded = value
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!unfolded.is_empty()).then_some(unfolded)
}
