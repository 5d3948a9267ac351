use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::Result;
use crate::record::CacheRecord;

/// Encodes cache records into a compact byte form: structural JSON
/// serialization followed by gzip compression. Replays decode the stored
/// bytes and nothing else.
#[derive(Debug, Clone)]
pub struct ResponseCodec {
    level: Compression,
}

impl Default for ResponseCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCodec {
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }

    pub fn encode(&self, record: &CacheRecord) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(record)?;

        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<CacheRecord> {
        let mut decoder = GzDecoder::new(bytes);
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;

        Ok(serde_json::from_slice(&json)?)
    }
}
