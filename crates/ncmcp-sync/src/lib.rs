//! Background document-indexing pipeline.
//!
//! A scanner discovers upstream documents carrying the indexing tag,
//! diffs them against the vector index, and hands changed ones to a
//! bounded queue drained by a processor pool (fetch, extract, embed,
//! upsert). Extraction, embedding, and the vector store itself are
//! collaborators behind traits.

pub mod collaborators;
pub mod document;
pub mod embedded;
pub mod pipeline;

pub use collaborators::{
    DocumentProcessor, EmbeddedChunk, EmbeddingService, PlainTextProcessor,
    ProcessorRegistry, VectorStore,
};
pub use document::DocumentRef;
pub use pipeline::{chunk_text, start, Pipeline, PipelineConfig, PipelineContext};
