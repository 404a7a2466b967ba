//! Knowledge base loader
//!
//! Loads troubleshooting documents from YAML/JSON files in a directory.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::RagError;

/// Knowledge document format for YAML/JSON files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    /// Unique document ID
    pub id: String,
    pub title: String,
    /// Solution text returned to the conversation
    pub content: String,
    /// Category (e.g. "hardware", "infrastructure", "performance")
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    /// Keywords for boosting
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Symptom phrases; an exact phrase match outweighs a keyword
    #[serde(default)]
    pub symptoms: Vec<String>,
    /// Equipment the document applies to; empty means any
    #[serde(default)]
    pub device_types: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

/// Knowledge base file format
#[derive(Debug, Serialize, Deserialize)]
pub struct KnowledgeFile {
    #[serde(default)]
    pub version: Option<String>,
    pub documents: Vec<KnowledgeDocument>,
}

/// Loader for knowledge files
pub struct KnowledgeLoader;

impl KnowledgeLoader {
    /// Load every YAML/JSON knowledge file in a directory
    ///
    /// A missing directory yields no documents. Files that fail to parse are
    /// logged and skipped.
    pub fn load_directory(knowledge_dir: &Path) -> Result<Vec<KnowledgeDocument>, RagError> {
        if !knowledge_dir.exists() {
            tracing::warn!(
                path = %knowledge_dir.display(),
                "Knowledge directory does not exist"
            );
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(knowledge_dir)
            .map_err(|e| RagError::Index(format!("Failed to read directory: {}", e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| RagError::Index(format!("Failed to read entry: {}", e)))?;
            let path = entry.path();
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if matches!(extension, "yaml" | "yml" | "json") {
                paths.push(path);
            }
        }
        // Stable document order regardless of directory listing order
        paths.sort();

        let mut documents = Vec::new();
        for path in paths {
            match Self::load_file(&path) {
                Ok(file) => {
                    tracing::info!(
                        file = %path.display(),
                        documents = file.documents.len(),
                        "Loaded knowledge file"
                    );
                    documents.extend(file.documents);
                }
                Err(e) => {
                    tracing::error!(
                        file = %path.display(),
                        error = %e,
                        "Failed to load knowledge file"
                    );
                }
            }
        }

        tracing::info!(
            directory = %knowledge_dir.display(),
            total_documents = documents.len(),
            "Knowledge base loading complete"
        );
        Ok(documents)
    }

    /// Load a single knowledge file
    pub fn load_file(path: &Path) -> Result<KnowledgeFile, RagError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RagError::Index(format!("Failed to read file: {}", e)))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match extension {
            "json" => serde_json::from_str(&content)
                .map_err(|e| RagError::Parse(format!("JSON parse error: {}", e))),
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| RagError::Parse(format!("YAML parse error: {}", e))),
            _ => Err(RagError::Index(format!(
                "Unsupported file type: {}",
                extension
            ))),
        }
    }
}
