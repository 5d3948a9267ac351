use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;

/// Raw-body accessor the engine fingerprints through: read all bytes, then
/// reset so the real handler can still consume the body. Implementations
/// must buffer non-seekable sources rather than draining them.
#[async_trait]
pub trait RawBody: Send {
    /// Returns the complete body bytes, buffering if needed.
    async fn read_all(&mut self) -> Result<Bytes>;

    /// Resets the logical read position to the start.
    fn rewind(&mut self);

    /// Whether the body has been consumed since the last rewind.
    fn is_consumed(&self) -> bool;
}

/// In-memory body buffer. Streaming sources are collected into it once via
/// [`BufferedBody::from_reader`], after which reads are repeatable.
#[derive(Debug, Clone)]
pub struct BufferedBody {
    bytes: Bytes,
    consumed: bool,
}

impl BufferedBody {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            consumed: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(Bytes::new())
    }

    /// Buffers a non-seekable async source into a rewindable body.
    pub async fn from_reader<R: AsyncRead + Unpin>(mut reader: R) -> Result<Self> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(Self::new(buf))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[async_trait]
impl RawBody for BufferedBody {
    async fn read_all(&mut self) -> Result<Bytes> {
        self.consumed = true;
        Ok(self.bytes.clone())
    }

    fn rewind(&mut self) {
        self.consumed = false;
    }

    fn is_consumed(&self) -> bool {
        self.consumed
    }
}

/// Computes a stable SHA-256 fingerprint over the canonical encoding of
/// method, path and raw body, used to detect key reuse with a different
/// payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprinter;

impl Fingerprinter {
    /// Hashes `method | path | body-as-text` and returns the hex digest.
    ///
    /// The read is non-destructive: the body position is reset afterwards.
    /// Absent or empty bodies contribute an empty string, so bodiless
    /// mutating requests still get a deterministic fingerprint.
    pub async fn fingerprint(
        &self,
        method: &Method,
        path: &str,
        body: &mut dyn RawBody,
    ) -> Result<String> {
        let bytes = body.read_all().await?;
        let body_text = String::from_utf8_lossy(&bytes);

        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(path.as_bytes());
        hasher.update(b"|");
        hasher.update(body_text.as_bytes());

        body.rewind();

        Ok(hex::encode(hasher.finalize()))
    }
}
