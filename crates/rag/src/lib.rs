//! Knowledge retrieval for troubleshooting calls
//!
//! Features:
//! - YAML/JSON knowledge base loading
//! - Bilingual (Malayalam/English) query expansion
//! - Keyword + token-similarity ranking
//! - Core `KnowledgeRetriever` implementation

pub mod knowledge_loader;
pub mod query_expansion;
pub mod retriever;

pub use knowledge_loader::{KnowledgeDocument, KnowledgeFile, KnowledgeLoader};
pub use query_expansion::{ExpandedQuery, QueryExpander};
pub use retriever::{KeywordRetriever, RetrieverConfig, SearchResult};

use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Index error: {0}")]
    Index(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<RagError> for call_agent_core::Error {
    fn from(err: RagError) -> Self {
        call_agent_core::Error::knowledge(err.to_string())
    }
}
