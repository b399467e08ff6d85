//! Markdown document codec
//!
//! A document is a `---` delimited YAML metadata block followed by a free-form
//! Markdown body. `parse` and `stringify` round-trip: the body is kept byte for
//! byte.

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

const DELIMITER: &str = "---";

/// Marker separating the shared body from local-only context.
///
/// Everything after the marker line stays on this machine: it is never pushed
/// to the remote tracker and survives remote overwrites.
pub const TRAILER_MARKER: &str = "<!-- trackdown:local -->";

const MAX_SLUG_LEN: usize = 50;

/// Split a document into its raw metadata block and body
fn split(text: &str) -> Option<(&str, &str)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == DELIMITER {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Parse a document into typed metadata and body
pub fn parse<T: DeserializeOwned>(text: &str) -> Result<(T, String)> {
    let (raw, body) = split(text)
        .ok_or_else(|| Error::Validation("missing or unterminated metadata block".into()))?;
    let metadata = serde_yaml::from_str(raw)?;
    Ok((metadata, body.to_string()))
}

/// Render metadata and body back into document text
pub fn stringify<T: Serialize>(metadata: &T, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(metadata)?;
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n{body}"))
}

/// Content hash used as the optimistic concurrency token
pub fn revision(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Lowercase ASCII slug: alphanumerics kept, everything else collapsed to `-`
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// `<id>-<slug><ext>`, or `<id><ext>` when the title has no usable characters
pub fn file_name(id: &str, title: &str, extension: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{id}{extension}")
    } else {
        format!("{id}-{slug}{extension}")
    }
}

/// Split a body into the shared part and the local-only trailer
pub fn split_trailer(body: &str) -> (&str, Option<&str>) {
    match body.find(TRAILER_MARKER) {
        Some(pos) => {
            let trailer = body[pos + TRAILER_MARKER.len()..].trim_start_matches(['\r', '\n']);
            (body[..pos].trim_end(), Some(trailer))
        }
        None => (body, None),
    }
}

/// Re-attach a local-only trailer below a shared body
pub fn join_trailer(shared: &str, trailer: Option<&str>) -> String {
    match trailer {
        Some(trailer) => format!("{}\n\n{}\n{}", shared.trim_end(), TRAILER_MARKER, trailer),
        None => shared.to_string(),
    }
}
