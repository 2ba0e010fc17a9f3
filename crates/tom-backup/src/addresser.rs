/// ContentAddresser: stable content identity from uploaded bytes.
///
/// SHA-256 over the raw stream, read in bounded chunks. Hashing yields to the
/// scheduler every few chunks so a large upload cannot starve resolvers
/// sharing the runtime. Read errors propagate; nothing is persisted here.
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::BackupError;
use crate::types::{ContentId, HASH_CHUNK_SIZE, HASH_YIELD_EVERY};

/// Computes [`ContentId`]s from byte streams.
#[derive(Debug, Clone)]
pub struct ContentAddresser {
    chunk_size: usize,
    yield_every: usize,
}

impl ContentAddresser {
    pub fn new() -> Self {
        Self {
            chunk_size: HASH_CHUNK_SIZE,
            yield_every: HASH_YIELD_EVERY,
        }
    }

    /// Custom chunking (both values are clamped to at least 1).
    pub fn with_chunking(chunk_size: usize, yield_every: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            yield_every: yield_every.max(1),
        }
    }

    /// Hash a stream to its content identity.
    pub async fn hash_reader<R>(&self, mut reader: R) -> Result<ContentId, BackupError>
    where
        R: AsyncRead + Unpin,
    {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut chunks = 0usize;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            chunks += 1;
            if chunks % self.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }

        Ok(finish(hasher))
    }
}

impl Default for ContentAddresser {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash an in-memory payload.
pub fn hash_bytes(data: &[u8]) -> ContentId {
    let mut hasher = Sha256::new();
    hasher.update(data);
    finish(hasher)
}

fn finish(hasher: Sha256) -> ContentId {
    let digest = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    ContentId::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    /// Serves one chunk, then fails.
    struct FailingReader {
        served: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if !self.served {
                self.served = true;
                buf.put_slice(b"partial");
                Poll::Ready(Ok(()))
            } else {
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "download interrupted",
                )))
            }
        }
    }

    #[test]
    fn known_vectors() {
        assert_eq!(hash_bytes(b"abc").to_hex(), ABC_SHA256);
        assert_eq!(hash_bytes(b"").to_hex(), EMPTY_SHA256);
    }

    #[tokio::test]
    async fn reader_matches_bytes() {
        let addresser = ContentAddresser::with_chunking(2, 1);
        let id = addresser.hash_reader(&b"abc"[..]).await.unwrap();
        assert_eq!(id.to_hex(), ABC_SHA256);
    }

    #[tokio::test]
    async fn empty_stream() {
        let id = ContentAddresser::new().hash_reader(&b""[..]).await.unwrap();
        assert_eq!(id.to_hex(), EMPTY_SHA256);
    }

    #[tokio::test]
    async fn read_error_propagates() {
        let err = ContentAddresser::new()
            .hash_reader(FailingReader { served: false })
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Io(_)));
    }

    #[test]
    fn zero_chunking_is_clamped() {
        let a = ContentAddresser::with_chunking(0, 0);
        assert_eq!(a.chunk_size, 1);
        assert_eq!(a.yield_every, 1);
    }

    proptest! {
        #[test]
        fn identity_independent_of_chunking(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            chunk in 1usize..512,
            yield_every in 1usize..8,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let streamed = rt.block_on(
                ContentAddresser::with_chunking(chunk, yield_every).hash_reader(&data[..]),
            ).unwrap();
            prop_assert_eq!(streamed, hash_bytes(&data));
        }
    }
}
