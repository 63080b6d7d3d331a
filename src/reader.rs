//! Reads file contents as text, degrading through encoding detection to a
//! diagnostic message instead of failing.

use std::path::Path;

use chardetng::EncodingDetector;
use encoding_rs::Encoding;

use crate::archive::ContentOrigin;

/// Text read from a file together with how it was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadContent {
    pub text: String,
    pub origin: ContentOrigin,
}

impl ReadContent {
    fn diagnostic(text: String) -> Self {
        Self {
            text,
            origin: ContentOrigin::Diagnostic,
        }
    }
}

/// Read `path` as text. Never fails.
///
/// 1. Valid UTF-8 is returned unchanged.
/// 2. Otherwise the encoding is guessed from the bytes and used to decode.
/// 3. If that also fails, a one-line diagnostic naming the file is returned.
pub fn read_text(path: &Path) -> ReadContent {
    match std::fs::read(path) {
        Ok(bytes) => decode_bytes(path, bytes),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            ReadContent::diagnostic(format!(
                "Unexpected error reading file: {} - {}",
                path.display(),
                e
            ))
        }
    }
}

/// Apply the decoding tiers of [`read_text`] to bytes already in memory
pub fn decode_bytes(path: &Path, bytes: Vec<u8>) -> ReadContent {
    let bytes = match String::from_utf8(bytes) {
        Ok(text) => {
            return ReadContent {
                text,
                origin: ContentOrigin::Utf8,
            }
        }
        Err(e) => e.into_bytes(),
    };

    tracing::debug!("{} is not valid UTF-8, detecting encoding", path.display());
    let mut detector = EncodingDetector::new();
    detector.feed(&bytes, true);
    let encoding: &'static Encoding = detector.guess(None, true);

    let (text, actual, had_errors) = encoding.decode(&bytes);
    if had_errors {
        tracing::warn!(
            "Decoding {} as {} produced malformed sequences",
            path.display(),
            actual.name()
        );
        return ReadContent::diagnostic(format!(
            "Error reading file with detected encoding: {} - malformed {} data",
            path.display(),
            actual.name()
        ));
    }

    tracing::info!("Read {} using detected encoding {}", path.display(), actual.name());
    ReadContent {
        text: text.into_owned(),
        origin: ContentOrigin::Detected(actual.name()),
    }
}
