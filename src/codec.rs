//! Conversion between base64 data URIs and stored binary blobs.
//!
//! Images cross the UI boundary as `data:<mime>;base64,<payload>` strings and
//! are stored as raw bytes tagged with their MIME type. Both directions fail
//! soft: a malformed URI becomes `None`, never an error.

use base64::{engine::general_purpose::STANDARD, Engine as _};

const DATA_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";

/// Raw image bytes plus the MIME type they were tagged with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Binary {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_data_uri(&self) -> String {
        format!(
            "{DATA_PREFIX}{}{BASE64_MARKER},{}",
            self.mime,
            STANDARD.encode(&self.bytes)
        )
    }
}

/// Parse a base64 data URI into a [`Binary`].
pub fn encode_to_binary(data_uri: &str) -> Option<Binary> {
    let rest = data_uri.strip_prefix(DATA_PREFIX)?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(BASE64_MARKER)?;
    if mime.is_empty() || mime.contains(';') {
        return None;
    }
    match STANDARD.decode(payload) {
        Ok(bytes) => Some(Binary::new(mime, bytes)),
        Err(err) => {
            tracing::debug!(
                target: "cuisto",
                event = "codec_decode_failed",
                mime = %mime,
                error = %err
            );
            None
        }
    }
}

/// Render a stored blob back into a data URI; `None` stays `None`.
pub fn decode_to_data_uri(binary: Option<&Binary>) -> Option<String> {
    binary.map(Binary::to_data_uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_mime_and_payload() {
        let binary = encode_to_binary("data:image/png;base64,AAEC").expect("valid uri");
        assert_eq!(binary.mime, "image/png");
        assert_eq!(binary.bytes, vec![0, 1, 2]);
    }

    #[test]
    fn rejects_malformed_uris() {
        assert!(encode_to_binary("").is_none());
        assert!(encode_to_binary("https://example.com/a.png").is_none());
        assert!(encode_to_binary("data:image/png,AAEC").is_none());
        assert!(encode_to_binary("data:;base64,AAEC").is_none());
        assert!(encode_to_binary("data:image/png;base64").is_none());
        assert!(encode_to_binary("data:image/png;base64,@@@").is_none());
    }

    #[test]
    fn decode_of_nothing_is_nothing() {
        assert_eq!(decode_to_data_uri(None), None);
    }

    #[test]
    fn empty_payload_is_allowed() {
        let binary = encode_to_binary("data:image/gif;base64,").expect("empty payload");
        assert!(binary.is_empty());
        assert_eq!(binary.to_data_uri(), "data:image/gif;base64,");
    }

    proptest! {
        #[test]
        fn data_uri_survives_binary_round_trip(
            bytes in proptest::collection::vec(any::<u8>(), 0..512),
            subtype in "[a-z]{1,8}",
        ) {
            let uri = format!("data:image/{subtype};base64,{}", STANDARD.encode(&bytes));
            let binary = encode_to_binary(&uri).expect("well formed");
            prop_assert_eq!(&binary.mime, &format!("image/{subtype}"));
            prop_assert_eq!(decode_to_data_uri(Some(&binary)), Some(uri));
        }
    }
}
