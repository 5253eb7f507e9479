//! The legacy gzip+base64 encoding envelope used by the per-engine
//! invocation discipline's rolling `overall.updateData` field. Any
//! JSON stored inside that field is `base64(gzip(utf8(json)))`; the
//! modern form (typed `json`/`JSON` columns) never uses this envelope.

use std::io::{Read, Write};

use crate::error::Error;

pub fn encode(json_bytes: &[u8]) -> String {
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(json_bytes)
        .expect("writing to an in-memory buffer cannot fail");
    let compressed = gz
        .finish()
        .expect("finishing an in-memory gzip stream cannot fail");
    base64::encode(compressed)
}

/// Decodes `envelope`, failing cleanly on bad base64 or bad gzip rather
/// than panicking.
pub fn decode(envelope: &str) -> Result<Vec<u8>, Error> {
    let compressed = base64::decode(envelope)
        .map_err(|err| Error::IoFailure(format!("bad base64 in legacy envelope: {err}")))?;
    let mut gz = flate2::read::GzDecoder::new(compressed.as_slice());
    let mut out = Vec::new();
    gz.read_to_end(&mut out)
        .map_err(|err| Error::IoFailure(format!("bad gzip in legacy envelope: {err}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_json() {
        let json = br#"{"n":1,"nested":{"a":[1,2,3]}}"#;
        let encoded = encode(json);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, json);
    }

    #[test]
    fn decode_rejects_bad_base64() {
        assert!(decode("not valid base64 !!").is_err());
    }

    #[test]
    fn decode_rejects_bad_gzip() {
        let bogus = base64::encode(b"not gzip data");
        assert!(decode(&bogus).is_err());
    }
}
