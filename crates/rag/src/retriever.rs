//! Keyword retriever over the loaded knowledge base
//!
//! Score per document = 0.6 × token cosine similarity with the content
//! + 0.4 × keyword/symptom match score. Documents for other equipment than
//! the customer's plan are damped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use unicode_segmentation::UnicodeSegmentation;

use call_agent_config::KnowledgeConfig;
use call_agent_core::{CustomerProfile, KnowledgeRetriever, Result};

use crate::knowledge_loader::{KnowledgeDocument, KnowledgeLoader};
use crate::query_expansion::QueryExpander;
use crate::RagError;

const CONTENT_WEIGHT: f64 = 0.6;
const KEYWORD_WEIGHT: f64 = 0.4;
const KEYWORD_PHRASE_MATCH: f64 = 1.5;
const KEYWORD_TOKEN_MATCH: f64 = 1.0;
const KEYWORD_PARTIAL_MATCH: f64 = 0.5;
const SYMPTOM_MATCH: f64 = 2.0;
const DEVICE_MISMATCH_FACTOR: f64 = 0.8;

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub top_k: usize,
    /// Results scoring below this are dropped
    pub min_score: f64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 2,
            min_score: 0.05,
        }
    }
}

/// One scored document
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub content: String,
    pub score: f64,
}

struct IndexedDocument {
    document: KnowledgeDocument,
    term_counts: HashMap<String, usize>,
    norm: f64,
    keywords: Vec<String>,
    symptoms: Vec<String>,
}

impl IndexedDocument {
    fn new(document: KnowledgeDocument) -> Self {
        let term_counts = term_counts(&format!("{} {}", document.title, document.content));
        let norm = magnitude(&term_counts);
        let keywords = document.keywords.iter().map(|k| k.to_lowercase()).collect();
        let symptoms = document.symptoms.iter().map(|s| s.to_lowercase()).collect();
        Self {
            document,
            term_counts,
            norm,
            keywords,
            symptoms,
        }
    }
}

/// In-memory keyword retriever
pub struct KeywordRetriever {
    documents: Vec<IndexedDocument>,
    expander: QueryExpander,
    config: RetrieverConfig,
}

impl KeywordRetriever {
    pub fn new(documents: Vec<KnowledgeDocument>, config: RetrieverConfig) -> Self {
        Self {
            documents: documents.into_iter().map(IndexedDocument::new).collect(),
            expander: QueryExpander::default(),
            config,
        }
    }

    /// Load documents from the configured directory
    pub fn from_config(config: &KnowledgeConfig) -> std::result::Result<Self, RagError> {
        let documents = KnowledgeLoader::load_directory(Path::new(&config.documents_dir))?;
        Ok(Self::new(
            documents,
            RetrieverConfig {
                top_k: config.top_k.max(1),
                ..Default::default()
            },
        ))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Rank documents for a query, best first
    pub fn search(&self, query: &str, customer: Option<&CustomerProfile>) -> Vec<SearchResult> {
        let expanded = self.expander.expand(query).text();
        let query_text = expanded.to_lowercase();
        let query_terms = tokenize(&query_text);
        if query_terms.is_empty() {
            return Vec::new();
        }
        let query_counts = count(&query_terms);
        let query_norm = magnitude(&query_counts);
        let plan = customer
            .and_then(|c| c.plan.as_deref())
            .map(str::to_lowercase);

        let mut results: Vec<SearchResult> = self
            .documents
            .iter()
            .map(|doc| {
                let content = cosine(&query_counts, query_norm, &doc.term_counts, doc.norm);
                let keywords = keyword_score(&query_text, &query_terms, doc);
                let mut score = CONTENT_WEIGHT * content + KEYWORD_WEIGHT * keywords;

                if let Some(plan) = &plan {
                    if !device_matches(&doc.document.device_types, plan) {
                        score *= DEVICE_MISMATCH_FACTOR;
                    }
                }

                SearchResult {
                    id: doc.document.id.clone(),
                    title: doc.document.title.clone(),
                    content: doc.document.content.clone(),
                    score,
                }
            })
            .filter(|r| r.score >= self.config.min_score)
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(self.config.top_k);
        results
    }
}

#[async_trait]
impl KnowledgeRetriever for KeywordRetriever {
    async fn query(&self, text: &str, customer: Option<&CustomerProfile>) -> Result<String> {
        let results = self.search(text, customer);
        tracing::debug!(
            query = %text,
            hits = results.len(),
            top = results.first().map(|r| r.id.as_str()).unwrap_or("-"),
            "Knowledge query"
        );

        Ok(results
            .iter()
            .map(|r| format!("{}: {}", r.title, r.content.trim()))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

fn count(terms: &[String]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for term in terms {
        *counts.entry(term.clone()).or_insert(0) += 1;
    }
    counts
}

fn term_counts(text: &str) -> HashMap<String, usize> {
    count(&tokenize(text))
}

fn magnitude(counts: &HashMap<String, usize>) -> f64 {
    counts
        .values()
        .map(|c| (*c as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn cosine(
    query: &HashMap<String, usize>,
    query_norm: f64,
    doc: &HashMap<String, usize>,
    doc_norm: f64,
) -> f64 {
    if query_norm == 0.0 || doc_norm == 0.0 {
        return 0.0;
    }
    let dot: f64 = query
        .iter()
        .filter_map(|(term, q)| doc.get(term).map(|d| (*q * *d) as f64))
        .sum();
    dot / (query_norm * doc_norm)
}

fn keyword_score(query_text: &str, query_terms: &[String], doc: &IndexedDocument) -> f64 {
    let mut exact = 0.0;
    let mut partial = 0.0;

    for keyword in &doc.keywords {
        if query_text.contains(keyword.as_str()) {
            exact += KEYWORD_PHRASE_MATCH;
            continue;
        }
        for term in query_terms {
            if term == keyword {
                exact += KEYWORD_TOKEN_MATCH;
            } else if term.contains(keyword.as_str()) || keyword.contains(term.as_str()) {
                partial += KEYWORD_PARTIAL_MATCH;
            }
        }
    }

    for symptom in &doc.symptoms {
        if query_text.contains(symptom.as_str()) {
            exact += SYMPTOM_MATCH;
        }
    }

    (0.8 * exact + 0.2 * partial) / query_terms.len() as f64
}

/// `fiber_modem` matches a plan mentioning "fiber"
fn device_matches(device_types: &[String], plan: &str) -> bool {
    device_types.is_empty()
        || device_types.iter().any(|device| {
            device
                .split('_')
                .next()
                .map(|family| plan.contains(&family.to_lowercase()))
                .unwrap_or(false)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: &str, content: &str, keywords: &[&str], devices: &[&str]) -> KnowledgeDocument {
        KnowledgeDocument {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            category: None,
            language: "en".to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            symptoms: Vec::new(),
            device_types: devices.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn retriever() -> KeywordRetriever {
        KeywordRetriever::new(
            vec![
                doc(
                    "NET_002",
                    "Fiber Break Issue",
                    "A red light on the modem means the fiber signal is lost. Register a fiber break complaint.",
                    &["red light", "fiber", "signal"],
                    &["fiber_modem"],
                ),
                doc(
                    "NET_004",
                    "Slow Internet Issue",
                    "Restart the modem and check the number of connected devices.",
                    &["slow", "speed"],
                    &["fiber_modem", "wifi_router"],
                ),
                doc(
                    "TV_001",
                    "No Signal On TV",
                    "Check the HDMI cable between the set-top box and the TV.",
                    &["hdmi", "tv", "no signal"],
                    &["stb"],
                ),
            ],
            RetrieverConfig::default(),
        )
    }

    #[test]
    fn test_red_light_ranks_fiber_break_first() {
        let results = retriever().search("there is a red light on my modem", None);
        assert_eq!(results[0].id, "NET_002");
        assert!(results.len() <= 2);
    }

    #[test]
    fn test_malayalam_query_is_expanded() {
        let results = retriever().search("സ്പീഡ് വളരെ കുറവാണ്", None);
        assert_eq!(results[0].id, "NET_004");
    }

    #[test]
    fn test_device_mismatch_damps_score() {
        let r = retriever();
        let mut customer = CustomerProfile::new("Anu", "9876543210");
        let neutral = r.search("no signal on tv hdmi", None);
        customer.plan = Some("Fiber 100 Mbps".to_string());
        let damped = r.search("no signal on tv hdmi", Some(&customer));

        let before = neutral.iter().find(|x| x.id == "TV_001").unwrap().score;
        let after = damped.iter().find(|x| x.id == "TV_001").unwrap().score;
        assert!(after < before);
    }

    #[test]
    fn test_unrelated_query_returns_nothing() {
        assert!(retriever().search("lovely weather today", None).is_empty());
        assert!(retriever().search("   ", None).is_empty());
    }

    #[tokio::test]
    async fn test_query_formats_snippets() {
        let snippet = retriever()
            .query("my internet is slow", None)
            .await
            .unwrap();
        assert!(snippet.starts_with("Slow Internet Issue: Restart the modem"));
    }

    #[test]
    fn test_from_config_missing_directory() {
        let config = KnowledgeConfig {
            documents_dir: "/nonexistent/knowledge".to_string(),
            top_k: 3,
        };
        let r = KeywordRetriever::from_config(&config).unwrap();
        assert!(r.is_empty());
    }
}
