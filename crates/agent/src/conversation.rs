//! Per-call conversation handle
//!
//! Wraps the language model for one call. Diagnostic phrasing and the
//! end-of-call summary go through the same handle and serialize on its
//! lock. Dialogue and knowledge results are read through the shared caches.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use call_agent_config::DialogueConfig;
use call_agent_core::{
    ConversationEntry, CustomerProfile, Error, KnowledgeRetriever, LanguageModel, Result,
    TroubleshootingStepRecord,
};
use call_agent_pipeline::{cache_key, ResponseCaches};

/// Pieces of session state rendered into the model context
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelContext<'a> {
    pub customer: Option<&'a CustomerProfile>,
    pub history: &'a [ConversationEntry],
    pub steps: &'a [TroubleshootingStepRecord],
    pub issue_type: Option<&'a str>,
    pub sub_issues: &'a [String],
    pub step_guidance: Option<&'a str>,
    pub knowledge: Option<&'a str>,
}

pub struct ConversationHandle {
    llm: Option<Arc<dyn LanguageModel>>,
    knowledge: Option<Arc<dyn KnowledgeRetriever>>,
    caches: Arc<ResponseCaches>,
    config: DialogueConfig,
    lock: Mutex<()>,
}

impl ConversationHandle {
    pub fn new(
        llm: Option<Arc<dyn LanguageModel>>,
        knowledge: Option<Arc<dyn KnowledgeRetriever>>,
        caches: Arc<ResponseCaches>,
        config: DialogueConfig,
    ) -> Self {
        Self {
            llm,
            knowledge,
            caches,
            config,
            lock: Mutex::new(()),
        }
    }

    /// Whether step prompts should be phrased by the model
    pub fn uses_language_model(&self) -> bool {
        self.config.use_language_model && self.llm.is_some()
    }

    pub fn config(&self) -> &DialogueConfig {
        &self.config
    }

    /// Generate a reply for `prompt` in `context`
    ///
    /// The cache key covers both, so a reply is never reused for a different
    /// conversation state.
    pub async fn complete(&self, prompt: &str, context: &str) -> Result<String> {
        let Some(llm) = self.llm.clone() else {
            return Err(Error::generation("no language model configured"));
        };

        let key = cache_key(prompt, context);
        let max_chars = self.config.max_response_chars;

        self.caches
            .dialogue
            .get_or_try_insert_with(&key, || async move {
                let _guard = self.lock.lock().await;
                let started = std::time::Instant::now();

                let mut stream = llm.send(prompt, context).await?;
                let mut text = String::new();
                while let Some(chunk) = stream.next().await {
                    text.push_str(&chunk?);
                }

                let reply = trim_response(text.trim(), max_chars);
                if reply.is_empty() {
                    return Err(Error::generation("empty response"));
                }
                tracing::debug!(
                    model = llm.model_name(),
                    chars = reply.len(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Generated response"
                );
                Ok(reply)
            })
            .await
    }

    /// Two-sentence summary of the call for the report
    ///
    /// Falls back to a fixed-format summary when no model is available or
    /// generation fails.
    pub async fn summarize(
        &self,
        history: &[ConversationEntry],
        steps: &[TroubleshootingStepRecord],
        issue_type: Option<&str>,
    ) -> String {
        if history.is_empty() {
            return fallback_summary(history, steps, issue_type);
        }
        if self.llm.is_none() {
            return fallback_summary(history, steps, issue_type);
        }

        let mut transcript = String::new();
        for entry in history {
            transcript.push_str(&format!("User: {}\n", entry.user));
            if !entry.bot.is_empty() {
                transcript.push_str(&format!("Bot: {}\n", entry.bot));
            }
        }

        let prompt = "Summarize this support call in at most two sentences. \
                      Mention the problem and what was tried.";
        match self.complete(prompt, &transcript).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(error = %e, "Summary generation failed, using fallback");
                fallback_summary(history, steps, issue_type)
            }
        }
    }

    /// Knowledge snippets for `text`, or `None` if none arrive in time
    pub async fn knowledge_context(
        &self,
        text: &str,
        customer: Option<&CustomerProfile>,
    ) -> Option<String> {
        let retriever = self.knowledge.clone()?;
        let scope = customer.map(|c| c.phone.as_str()).unwrap_or_default();
        let key = cache_key(text, scope);
        let timeout = Duration::from_millis(self.config.knowledge_timeout_ms);

        let result = self
            .caches
            .knowledge
            .get_or_try_insert_with(&key, || async move {
                match tokio::time::timeout(timeout, retriever.query(text, customer)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::knowledge(format!(
                        "no result within {}ms",
                        timeout.as_millis()
                    ))),
                }
            })
            .await;

        match result {
            Ok(snippet) if !snippet.trim().is_empty() => Some(snippet),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Proceeding without knowledge context");
                None
            }
        }
    }

    /// Render the model context
    pub fn build_context(&self, parts: &ModelContext<'_>) -> String {
        let mut out: Vec<String> = Vec::new();

        if let Some(customer) = parts.customer {
            out.push("Customer Information:".to_string());
            out.push(customer.info_block());
        }

        let history_start = parts.history.len().saturating_sub(self.config.history_window);
        let recent = &parts.history[history_start..];
        if !recent.is_empty() {
            out.push("\nRecent Conversation History:".to_string());
            for entry in recent {
                out.push(format!("User: {}", entry.user));
                out.push(format!("Bot: {}", entry.bot));
            }
        }

        let steps_start = parts.steps.len().saturating_sub(self.config.step_window);
        let steps = &parts.steps[steps_start..];
        if !steps.is_empty() {
            out.push("\nRecent Troubleshooting Steps:".to_string());
            for step in steps {
                out.push(format!("- {} -> {}", step.step_id, step.outcome.as_str()));
            }
        }

        if let Some(issue) = parts.issue_type {
            out.push("\nIssue Classification:".to_string());
            out.push(format!("- Main Issue: {}", issue));
            if !parts.sub_issues.is_empty() {
                out.push(format!("- Sub-issues: {}", parts.sub_issues.join(", ")));
            }
        }

        if let Some(guidance) = parts.step_guidance {
            out.push("\nNext Step Guidance:".to_string());
            out.push(guidance.to_string());
        }

        if let Some(knowledge) = parts.knowledge {
            out.push("\nRelevant Information:".to_string());
            out.push(knowledge.to_string());
        }

        out.join("\n")
    }
}

/// Cut `text` at the last sentence end within `max_chars`
///
/// Text without a sentence end inside the limit is returned whole.
pub fn trim_response(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut cut = None;
    for i in 0..max_chars.min(chars.len()) {
        let (idx, c) = chars[i];
        let at_boundary = chars
            .get(i + 1)
            .map_or(true, |(_, next)| next.is_whitespace());
        if matches!(c, '.' | '!' | '?') && at_boundary {
            cut = Some(idx + c.len_utf8());
        }
    }

    match cut {
        Some(end) => text[..end].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Summary built from session data alone
pub fn fallback_summary(
    history: &[ConversationEntry],
    steps: &[TroubleshootingStepRecord],
    issue_type: Option<&str>,
) -> String {
    let issue = issue_type.unwrap_or("an unidentified issue");
    if steps.is_empty() {
        return format!(
            "Caller reported {} over {} exchange(s); no troubleshooting steps were completed.",
            issue,
            history.len()
        );
    }
    let tried: Vec<String> = steps
        .iter()
        .map(|s| format!("{} ({})", s.step_id, s.outcome.as_str()))
        .collect();
    format!(
        "Caller reported {}. Steps tried: {}.",
        issue,
        tried.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use call_agent_config::CacheConfig;
    use call_agent_core::{StepOutcome, TextStream};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        calls: AtomicUsize,
        reply: &'static str,
    }

    #[async_trait]
    impl LanguageModel for CountingModel {
        async fn send(&self, _prompt: &str, _context: &str) -> Result<TextStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let chunks: Vec<Result<String>> = self
                .reply
                .split_inclusive(' ')
                .map(|s| Ok(s.to_string()))
                .collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn send(&self, _prompt: &str, _context: &str) -> Result<TextStream> {
            Err(Error::generation("backend down"))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    struct SlowKnowledge;

    #[async_trait]
    impl KnowledgeRetriever for SlowKnowledge {
        async fn query(&self, _text: &str, _customer: Option<&CustomerProfile>) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    fn caches() -> Arc<ResponseCaches> {
        Arc::new(ResponseCaches::new(&CacheConfig::default()))
    }

    fn step(id: &str, outcome: StepOutcome) -> TroubleshootingStepRecord {
        TroubleshootingStepRecord {
            step_id: id.to_string(),
            prompt: String::new(),
            user_response: String::new(),
            outcome,
            priority_score: 0.0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_complete_is_cached_per_context() {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
            reply: "Please restart the modem. ",
        });
        let handle = ConversationHandle::new(
            Some(model.clone()),
            None,
            caches(),
            DialogueConfig::default(),
        );

        let first = handle.complete("it is down", "ctx-a").await.unwrap();
        let second = handle.complete("it is down", "ctx-a").await.unwrap();
        assert_eq!(first, "Please restart the modem.");
        assert_eq!(first, second);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        handle.complete("it is down", "ctx-b").await.unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_summary_falls_back_on_failure() {
        let handle = ConversationHandle::new(
            Some(Arc::new(FailingModel)),
            None,
            caches(),
            DialogueConfig::default(),
        );
        let history = vec![ConversationEntry::new("internet is down")];
        let steps = vec![step("restart_modem", StepOutcome::Failure)];

        let summary = handle
            .summarize(&history, &steps, Some("internet_down"))
            .await;
        assert!(summary.contains("internet_down"));
        assert!(summary.contains("restart_modem (failure)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_knowledge_timeout_yields_none() {
        let handle = ConversationHandle::new(
            None,
            Some(Arc::new(SlowKnowledge)),
            caches(),
            DialogueConfig::default(),
        );
        assert!(handle.knowledge_context("red light", None).await.is_none());
    }

    #[test]
    fn test_context_windows() {
        let handle = ConversationHandle::new(None, None, caches(), DialogueConfig::default());
        let history: Vec<ConversationEntry> = (0..8)
            .map(|i| ConversationEntry {
                user: format!("u{}", i),
                bot: format!("b{}", i),
                timestamp: Utc::now(),
            })
            .collect();
        let steps: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| step(id, StepOutcome::Success))
            .collect();

        let ctx = handle.build_context(&ModelContext {
            history: &history,
            steps: &steps,
            issue_type: Some("internet_down"),
            step_guidance: Some("Ask about the lights"),
            ..Default::default()
        });

        assert!(!ctx.contains("User: u2"));
        assert!(ctx.contains("User: u3"));
        assert!(ctx.contains("User: u7"));
        assert!(!ctx.contains("- a -> success"));
        assert!(ctx.contains("- d -> success"));
        assert!(ctx.contains("Main Issue: internet_down"));
        assert!(ctx.contains("Ask about the lights"));
    }

    #[test]
    fn test_trim_response() {
        assert_eq!(trim_response("Short reply.", 500), "Short reply.");
        let long = "First sentence here. Second one is longer than the limit allows";
        assert_eq!(trim_response(long, 30), "First sentence here.");
        let no_end = "a".repeat(40);
        assert_eq!(trim_response(&no_end, 10), no_end);
        assert_eq!(trim_response("Version 2.5 is out now and more", 20), "Version 2.5 is out now and more");
    }
}
