//! Zlib framing/codec layer: the on-disk representation of a loose object
//! is `deflate("<type> <size>\0<payload>")`. This module owns
//! both directions — `stream` is the decompressing reader used when an
//! object's hash needs to be re-derived while reading it back, and the
//! functions here are the simple encode/decode path used by the object
//! store for everything else.

pub mod stream;

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::errors::GitError;
use crate::internal::object::ObjectType;

/// Frames an object's type and payload as `"<type> <size>\0<payload>"` and
/// deflates it — the exact bytes written under `objects/<hash>`.
pub fn compress_object(object_type: ObjectType, payload: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut framed = Vec::with_capacity(payload.len() + 16);
    framed.extend(object_type.as_str().as_bytes());
    framed.push(b' ');
    framed.extend(payload.len().to_string().as_bytes());
    framed.push(b'\0');
    framed.extend(payload);

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&framed)?;
    Ok(encoder.finish()?)
}

/// Inflates a loose object and splits the `"<type> <size>\0"` header from
/// its payload, verifying the declared size matches what was decoded.
pub fn decompress_object(compressed: &[u8]) -> Result<(ObjectType, Vec<u8>), GitError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut framed = Vec::new();
    decoder
        .read_to_end(&mut framed)
        .map_err(|e| GitError::Corrupt(format!("failed to inflate object: {e}")))?;

    let space = framed
        .iter()
        .position(|b| *b == b' ')
        .ok_or_else(|| GitError::Corrupt("object frame missing type separator".into()))?;
    let nul = framed
        .iter()
        .position(|b| *b == 0x00)
        .ok_or_else(|| GitError::Corrupt("object frame missing size terminator".into()))?;

    let object_type = ObjectType::from_str_token(
        std::str::from_utf8(&framed[..space])
            .map_err(|e| GitError::Corrupt(format!("object type is not utf-8: {e}")))?,
    )?;
    let declared_size: usize = std::str::from_utf8(&framed[space + 1..nul])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| GitError::Corrupt("object frame has a non-numeric size".into()))?;

    let payload = framed[nul + 1..].to_vec();
    if payload.len() != declared_size {
        return Err(GitError::Corrupt(format!(
            "object declares size {} but payload is {} bytes",
            declared_size,
            payload.len()
        )));
    }

    Ok((object_type, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_compress_and_decompress() {
        let payload = b"hello world".to_vec();
        let compressed = compress_object(ObjectType::Blob, &payload).unwrap();
        let (object_type, decoded) = decompress_object(&compressed).unwrap();
        assert_eq!(object_type, ObjectType::Blob);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rejects_size_mismatch() {
        // Hand-craft a frame with a lying size.
        let mut framed = Vec::new();
        framed.extend(b"blob 999\0");
        framed.extend(b"short");
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&framed).unwrap();
        let compressed = encoder.finish().unwrap();

        let err = decompress_object(&compressed).unwrap_err();
        assert!(matches!(err, GitError::Corrupt(_)));
    }
}
