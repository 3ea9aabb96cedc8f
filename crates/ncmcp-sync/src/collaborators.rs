//! Collaborator seams of the pipeline.
//!
//! Text extraction, embedding, and the vector store are external to the
//! core; the pipeline talks to them through these traits. The plain-text
//! processor ships here because every deployment needs it.

use std::collections::HashMap;

use async_trait::async_trait;

use ncmcp_core::{BridgeError, BridgeResult};

use crate::document::DocumentRef;

/// Extracts indexable text from one document family.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// Whether this processor handles the MIME type.
    fn supports(&self, content_type: &str) -> bool;

    /// Extract plain text from raw bytes.
    async fn extract_text(&self, bytes: &[u8], content_type: &str) -> BridgeResult<String>;
}

/// MIME-type dispatch over registered processors.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: Vec<Box<dyn DocumentProcessor>>,
}

impl ProcessorRegistry {
    /// Registry with the built-in plain-text processor.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Box::new(PlainTextProcessor));
        registry
    }

    /// Add a processor; later registrations win on overlap.
    pub fn register(&mut self, processor: Box<dyn DocumentProcessor>) {
        self.processors.insert(0, processor);
    }

    /// Find the processor for a MIME type.
    pub fn find(&self, content_type: &str) -> Option<&dyn DocumentProcessor> {
        self.processors
            .iter()
            .find(|p| p.supports(content_type))
            .map(AsRef::as_ref)
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.processors.len())
            .finish()
    }
}

/// Text-family documents pass through unchanged.
pub struct PlainTextProcessor;

#[async_trait]
impl DocumentProcessor for PlainTextProcessor {
    fn supports(&self, content_type: &str) -> bool {
        content_type.starts_with("text/")
            || content_type == "application/json"
            || content_type == "application/x-yaml"
    }

    async fn extract_text(&self, bytes: &[u8], content_type: &str) -> BridgeResult<String> {
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            BridgeError::pipeline(format!("{content_type} document is not valid UTF-8"))
        })
    }
}

/// Computes embeddings for text chunks.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// One vector per input chunk, in order.
    async fn embed(&self, chunks: &[String]) -> BridgeResult<Vec<Vec<f32>>>;
}

/// One embedded chunk headed for the vector store.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

/// The vector index the pipeline keeps in step with the upstream.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Current index state for a user: file id to stored fingerprint.
    async fn index_state(&self, user_id: &str) -> BridgeResult<HashMap<i64, String>>;

    /// Replace a document's chunks, keyed by `(file_id, chunk_index)`,
    /// and record its fingerprint.
    async fn upsert_chunks(
        &self,
        document: &DocumentRef,
        chunks: &[EmbeddedChunk],
    ) -> BridgeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_processor_covers_text_family() {
        let registry = ProcessorRegistry::with_defaults();
        assert!(registry.find("text/markdown").is_some());
        assert!(registry.find("text/plain").is_some());
        assert!(registry.find("application/json").is_some());
        assert!(registry.find("application/pdf").is_none());

        let processor = registry.find("text/plain").unwrap();
        let text = processor.extract_text(b"hello", "text/plain").await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_pipeline_error() {
        let processor = PlainTextProcessor;
        let err = processor
            .extract_text(&[0xff, 0xfe], "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Pipeline(_)));
    }
}
