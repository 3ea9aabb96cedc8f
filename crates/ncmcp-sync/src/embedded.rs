//! Embedded collaborators.
//!
//! Deployments without an external vector service run against these: an
//! in-process index and a feature-hashing embedder. They satisfy the
//! same traits the external clients implement, so swapping them in or
//! out never touches the pipeline.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use ncmcp_core::BridgeResult;

use crate::collaborators::{EmbeddedChunk, EmbeddingService, VectorStore};
use crate::document::DocumentRef;

const EMBEDDING_DIMENSIONS: usize = 64;

/// Feature-hashing embedder: deterministic, dependency-free, and good
/// enough for keyword-level similarity when no model is configured.
#[derive(Debug, Default)]
pub struct HashingEmbedder;

fn embed_one(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIMENSIONS];
    for token in text.split_whitespace() {
        let token = token.to_lowercase();
        // FNV-1a over the token picks the bucket.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x1_0000_01b3);
        }
        vector[(hash % EMBEDDING_DIMENSIONS as u64) as usize] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[async_trait]
impl EmbeddingService for HashingEmbedder {
    async fn embed(&self, chunks: &[String]) -> BridgeResult<Vec<Vec<f32>>> {
        Ok(chunks.iter().map(|c| embed_one(c)).collect())
    }
}

#[derive(Debug, Default)]
struct StoredDocument {
    fingerprint: String,
    chunks: Vec<EmbeddedChunk>,
}

/// In-process vector index keyed by `(user_id, file_id)`.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    documents: Mutex<HashMap<(String, i64), StoredDocument>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents, for tests and status pages.
    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn index_state(&self, user_id: &str) -> BridgeResult<HashMap<i64, String>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|((_, file_id), doc)| (*file_id, doc.fingerprint.clone()))
            .collect())
    }

    async fn upsert_chunks(
        &self,
        document: &DocumentRef,
        chunks: &[EmbeddedChunk],
    ) -> BridgeResult<()> {
        self.documents.lock().unwrap().insert(
            (document.user_id.clone(), document.file_id),
            StoredDocument {
                fingerprint: document.fingerprint(),
                chunks: chunks.to_vec(),
            },
        );
        Ok(())
    }
}
