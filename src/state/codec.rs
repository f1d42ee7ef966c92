// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Snapshot codec for the persisted DNS entry state.
//!
//! The persisted form is a JSON envelope `{"compressedState": "<base64>"}` whose
//! single field holds the gzip-compressed raw snapshot. Older installations wrote
//! the raw snapshot directly, so readers use [`looks_like_compressed`] to pick the
//! decode path.
//!
//! The recognizer only scans a short prefix for the envelope's field name. A raw
//! snapshot that happens to begin with that exact key would be misclassified; raw
//! snapshots start with `{"entries"`, so this does not occur for data written by
//! this service.

use anyhow::{Context as _, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Field name marking the compressed envelope, including its quotes.
pub const COMPRESSED_MARKER: &str = "\"compressedState\"";

/// Number of leading bytes scanned for [`COMPRESSED_MARKER`].
pub const MARKER_WINDOW: usize = 20;

/// On-the-wire envelope around the compressed snapshot.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompressedEnvelope {
    #[serde(with = "base64_bytes")]
    compressed_state: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Whether a snapshot carries no information worth persisting.
fn is_trivial(data: &[u8]) -> bool {
    let trimmed = data.trim_ascii();
    trimmed.is_empty() || trimmed == b"null" || trimmed == b"{}"
}

/// Compress a raw snapshot into the envelope form.
///
/// Returns `None` for empty or trivially empty input (`null`, `{}`), which
/// callers persist as "no state". The output is deterministic for a given input.
///
/// # Errors
///
/// Returns an error if compression or serialization fails.
pub fn compress(state: &[u8]) -> Result<Option<Vec<u8>>> {
    if is_trivial(state) {
        return Ok(None);
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(state)
        .context("failed to compress DNS entry state")?;
    let compressed = encoder
        .finish()
        .context("failed to finish DNS entry state compression")?;

    let envelope = serde_json::to_vec(&CompressedEnvelope {
        compressed_state: compressed,
    })
    .context("failed to encode compressed DNS entry state")?;
    Ok(Some(envelope))
}

/// Decompress an envelope back into the raw snapshot.
///
/// Returns `None` for empty input or an envelope without payload.
///
/// # Errors
///
/// Returns an error if the envelope is malformed or the payload is not gzip data.
pub fn decompress(envelope: &[u8]) -> Result<Option<Vec<u8>>> {
    if envelope.trim_ascii().is_empty() {
        return Ok(None);
    }

    let envelope: CompressedEnvelope =
        serde_json::from_slice(envelope).context("failed to decode compressed state envelope")?;
    if envelope.compressed_state.is_empty() {
        return Ok(None);
    }

    let mut decoder = GzDecoder::new(envelope.compressed_state.as_slice());
    let mut state = Vec::new();
    decoder
        .read_to_end(&mut state)
        .context("failed to decompress DNS entry state")?;
    Ok(Some(state))
}

/// Cheap check whether persisted bytes are in envelope form.
///
/// Only the first [`MARKER_WINDOW`] bytes are scanned; nothing is parsed.
#[must_use]
pub fn looks_like_compressed(data: &[u8]) -> bool {
    let window = &data[..data.len().min(MARKER_WINDOW)];
    window
        .windows(COMPRESSED_MARKER.len())
        .any(|w| w == COMPRESSED_MARKER.as_bytes())
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod codec_tests;
