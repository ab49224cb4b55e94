//! Pluggable attention backend.
//!
//! The engine doesn't care how attention is actually computed — only that
//! it can hand a backend a chunk of token ids plus the KV blocks backing
//! them and get logits back. Swapping in a real kernel (flash-attention,
//! paged-attention, whatever) means implementing this one trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::kv::BlockHandle;

#[async_trait]
pub trait AttentionBackend: Send + Sync {
    /// Run a forward pass over `chunk` using the KV state held in
    /// `kv_blocks`. Returns one logit per input token.
    async fn forward(
        &self,
        request_id: &str,
        chunk: &[u32],
        kv_blocks: &[BlockHandle],
    ) -> Result<Vec<f32>>;
}

/// A deterministic stand-in backend for tests and local development: each
/// token's "logit" is just its id cast to `f32`. No real attention math.
#[derive(Debug, Default)]
pub struct EchoBackend;

#[async_trait]
impl AttentionBackend for EchoBackend {
    async fn forward(
        &self,
        _request_id: &str,
        chunk: &[u32],
        _kv_blocks: &[BlockHandle],
    ) -> Result<Vec<f32>> {
        Ok(chunk.iter().map(|&t| t as f32).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_backend_returns_one_logit_per_token() {
        let backend = EchoBackend;
        let out = backend.forward("req", &[4, 5, 6], &[]).await.unwrap();
        assert_eq!(out, vec![4.0, 5.0, 6.0]);
    }
}
