//! Context Compressor (C8): keeps a conversation under its token ceiling by
//! summarising an older span of messages into one synthetic assistant
//! message, falling back to a local extractive summary when the model is
//! unavailable or errors.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::llm::{CompletionResponse, LlmClient};
use crate::message::{Conversation, Message, Role};
use crate::token::estimate_messages;

const MIN_SUMMARY_CHARS: usize = 200;
const CHARS_PER_TOKEN_ESTIMATE: usize = 4;
const FALLBACK_MAX_SNIPPETS: usize = 10;
const FALLBACK_SNIPPET_LENGTH: usize = 160;
const MIN_COMPRESSION_REDUCTION_RATIO: f64 = 0.10;

/// Test hook standing in for a real model call; lets Controller/Compressor
/// tests avoid network access entirely.
pub trait SummaryOverride: Send + Sync {
    fn summarize(&self, transcript: &str) -> Option<String>;
}

#[derive(Clone, Debug)]
pub struct CompressorConfig {
    pub enabled: bool,
    pub max_context_tokens: u32,
    pub target_context_tokens: u32,
    pub preserve_recent_messages: usize,
    pub summary_max_tokens: u32,
    pub summary_model: Option<String>,
    pub max_compression_passes: u32,
    pub verbose: bool,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_context_tokens: 185_000,
            target_context_tokens: 165_000,
            preserve_recent_messages: 15,
            summary_max_tokens: 2000,
            summary_model: None,
            max_compression_passes: 3,
            verbose: false,
        }
    }
}

/// Lifetime counters. Not reset by [`Compressor::reset`] — only by
/// [`Compressor::reset_metrics`] — per the original's preserved behaviour.
#[derive(Clone, Debug, Default)]
pub struct CompressionMetrics {
    pub total_compressions: u64,
    pub total_tokens_before: u64,
    pub total_tokens_after: u64,
    pub total_messages_compressed: u64,
    pub api_calls_successful: u64,
    pub fallback_summaries_used: u64,
}

impl CompressionMetrics {
    pub fn compression_ratio(&self) -> f64 {
        if self.total_tokens_before == 0 {
            0.0
        } else {
            1.0 - (self.total_tokens_after as f64 / self.total_tokens_before as f64)
        }
    }

    pub fn tokens_saved(&self) -> i64 {
        self.total_tokens_before as i64 - self.total_tokens_after as i64
    }
}

impl fmt::Display for CompressionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Compressions: {} | Messages compressed: {} | Tokens saved: {} ({:.1}%) | API: {} | Fallback: {}",
            self.total_compressions,
            self.total_messages_compressed,
            self.tokens_saved(),
            self.compression_ratio() * 100.0,
            self.api_calls_successful,
            self.fallback_summaries_used,
        )
    }
}

/// Outcome of a single `maybe_compress` call.
#[derive(Debug)]
pub enum CompressionOutcome {
    NotNeeded,
    NoSpanAvailable,
    Compressed { passes: u32 },
}

pub struct Compressor {
    config: CompressorConfig,
    metrics: CompressionMetrics,
    marker: String,
    compression_count: u32,
    override_summarizer: Option<Arc<dyn SummaryOverride>>,
}

impl Compressor {
    pub fn new(config: CompressorConfig) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            config,
            metrics: CompressionMetrics::default(),
            marker: format!("context_summary:{}", &suffix[..8]),
            compression_count: 0,
            override_summarizer: None,
        }
    }

    pub fn with_override(mut self, summarizer: Arc<dyn SummaryOverride>) -> Self {
        self.override_summarizer = Some(summarizer);
        self
    }

    pub fn metrics(&self) -> &CompressionMetrics {
        &self.metrics
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Zeroes the compression-pass counter only; metrics survive `/clear`.
    pub fn reset(&mut self) {
        self.compression_count = 0;
    }

    pub fn reset_metrics(&mut self) {
        self.metrics = CompressionMetrics::default();
    }

    /// Runs up to `max(1, max_compression_passes)` compression passes,
    /// stopping early once under the token ceiling or once convergence
    /// stalls. `trigger` labels the header line (`"manual"` for `/compact`).
    pub async fn maybe_compress(
        &mut self,
        conversation: &mut Conversation,
        llm: &dyn LlmClient,
        trigger: Option<&str>,
    ) -> CompressionOutcome {
        if !self.config.enabled {
            return CompressionOutcome::NotNeeded;
        }

        let forced = trigger == Some("manual");
        let max_passes = self.config.max_compression_passes.max(1);
        let mut passes_done = 0;

        for pass_index in 0..max_passes {
            let tokens = estimate_messages(conversation.messages());
            if !forced && tokens <= self.config.max_context_tokens {
                break;
            }
            if forced && pass_index > 0 {
                break;
            }

            let Some((start, end)) = self.select_span(conversation) else {
                return if passes_done == 0 {
                    CompressionOutcome::NoSpanAvailable
                } else {
                    CompressionOutcome::Compressed { passes: passes_done }
                };
            };

            let window_tokens = estimate_messages(&conversation.messages()[start..end]);
            let total_tokens_before = tokens;

            let (summary_text, used_api) = self.summarize(&conversation.messages()[start..end], llm).await;
            let summary_text = self.truncate_summary(summary_text);

            self.compression_count += 1;
            let first_role = role_label(&conversation.messages()[start]);
            let last_role = role_label(&conversation.messages()[end - 1]);
            let formatted = format_summary(
                self.compression_count,
                end - start,
                &first_role,
                &last_role,
                window_tokens,
                total_tokens_before,
                trigger,
                pass_index,
                &summary_text,
            );

            let summary_message = Message::summary(self.marker.clone(), formatted);
            splice_replace(conversation, start, end, summary_message);

            let tokens_after = estimate_messages(conversation.messages());

            self.metrics.total_compressions += 1;
            self.metrics.total_tokens_before += total_tokens_before as u64;
            self.metrics.total_tokens_after += tokens_after as u64;
            self.metrics.total_messages_compressed += (end - start) as u64;
            if used_api {
                self.metrics.api_calls_successful += 1;
            } else {
                self.metrics.fallback_summaries_used += 1;
            }

            passes_done += 1;

            let reduction_ratio = if total_tokens_before == 0 {
                0.0
            } else {
                1.0 - (tokens_after as f64 / total_tokens_before as f64)
            };

            if !forced
                && (reduction_ratio < MIN_COMPRESSION_REDUCTION_RATIO
                    || tokens_after <= self.config.target_context_tokens)
            {
                break;
            }
        }

        if passes_done == 0 {
            CompressionOutcome::NoSpanAvailable
        } else {
            CompressionOutcome::Compressed { passes: passes_done }
        }
    }

    /// Non-system span `[first, tail_start)` older than the preserved tail,
    /// skipped if it's empty or already entirely summaries.
    fn select_span(&self, conversation: &Conversation) -> Option<(usize, usize)> {
        let messages = conversation.messages();
        let non_system: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role != Role::System)
            .map(|(i, _)| i)
            .collect();

        if non_system.len() <= self.config.preserve_recent_messages {
            return None;
        }

        let tail_start_pos = non_system.len() - self.config.preserve_recent_messages;
        let tail_start = non_system[tail_start_pos];
        let first = non_system[0];

        if first >= tail_start {
            return None;
        }

        let span_all_summaries = messages[first..tail_start]
            .iter()
            .all(|m| m.is_summary_with_marker_prefix("context_summary:"));
        if span_all_summaries {
            return None;
        }

        Some((first, tail_start))
    }

    async fn summarize(&self, span: &[Message], llm: &dyn LlmClient) -> (String, bool) {
        let transcript = render_transcript(span);

        if let Some(overridden) = &self.override_summarizer {
            if let Some(text) = overridden.summarize(&transcript) {
                return (text, true);
            }
        }

        let system = Message::system("You condense developer conversations into durable context summaries.");
        let instructions = format!(
            "Summarize the conversation below into durable notes a developer assistant can use \
             to keep working without re-reading the originals.\n\n<conversation>\n{}\n</conversation>",
            transcript
        );
        let user = Message::user(instructions);

        match llm
            .complete_with_model(&[system, user], &[], self.config.summary_model.as_deref())
            .await
        {
            Ok(CompletionResponse::Text(text)) if !text.trim().is_empty() => (text, true),
            _ => (self.fallback_summary(span), false),
        }
    }

    fn fallback_summary(&self, span: &[Message]) -> String {
        let mut bullets = Vec::new();
        for message in span {
            if bullets.len() >= FALLBACK_MAX_SNIPPETS {
                break;
            }
            let Some(content) = &message.content else { continue };
            let first_line = content.lines().next().unwrap_or("");
            if first_line.trim().is_empty() {
                continue;
            }
            let snippet: String = first_line.chars().take(FALLBACK_SNIPPET_LENGTH).collect();
            let label = message.name.clone().unwrap_or_else(|| role_label(message));
            bullets.push(format!("- {}: {}", label, snippet));
        }

        if bullets.is_empty() {
            "Earlier conversation compressed. No textual content captured.".to_string()
        } else {
            format!("Key points kept due to local fallback:\n{}", bullets.join("\n"))
        }
    }

    fn truncate_summary(&self, text: String) -> String {
        let budget = (self.config.summary_max_tokens as usize * CHARS_PER_TOKEN_ESTIMATE).max(MIN_SUMMARY_CHARS);
        if text.chars().count() <= budget {
            return text;
        }
        let cut: String = text.chars().take(budget).collect();
        let trimmed = match cut.rsplit_once('\n') {
            Some((head, _)) if !head.is_empty() => head.to_string(),
            _ => cut,
        };
        trimmed.trim_end().to_string()
    }
}

fn role_label(message: &Message) -> String {
    match message.role {
        Role::System => "system".to_string(),
        Role::User => "user".to_string(),
        Role::Assistant => "assistant".to_string(),
        Role::Tool => "tool".to_string(),
    }
}

fn render_transcript(span: &[Message]) -> String {
    span.iter()
        .map(|m| {
            let label = m.name.clone().unwrap_or_else(|| role_label(m));
            let content = m.content.clone().unwrap_or_default();
            format!("{}: {}", label.to_uppercase(), content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[allow(clippy::too_many_arguments)]
fn format_summary(
    compression_count: u32,
    span_len: usize,
    first_role: &str,
    last_role: &str,
    window_tokens: u32,
    total_tokens: u32,
    trigger: Option<&str>,
    pass_index: u32,
    summary_body: &str,
) -> String {
    let header = format!(
        "[context compression #{} | span: {} messages ({}\u{2192}{}); was \u{2248}{} tokens of \u{2248}{}]",
        compression_count, span_len, first_role, last_role, window_tokens, total_tokens
    );
    let trigger_line = format!(
        "Triggered by: {} (pass {}).",
        trigger.unwrap_or("automatic"),
        pass_index + 1
    );
    let guidance = "Use this summary instead of asking the user to repeat earlier details. \
                    Assume the compressed messages already occurred.";

    format!("{}\n{}\n\n{}\n\n{}", header, trigger_line, summary_body, guidance).trim().to_string()
}

fn splice_replace(conversation: &mut Conversation, start: usize, end: usize, replacement: Message) {
    let messages = conversation.messages_mut();
    messages.splice(start..end, std::iter::once(replacement));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolDefinition;
    use async_trait::async_trait;

    struct StubLlm {
        response: String,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<CompletionResponse, crate::error::AgentError> {
            Ok(CompletionResponse::Text(self.response.clone()))
        }

        async fn stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _tx: tokio::sync::mpsc::Sender<crate::stream::StreamChunk>,
        ) -> Result<(), crate::error::AgentError> {
            Ok(())
        }
    }

    /// Records whatever model it was asked to summarize under, so tests can
    /// assert the Compressor actually threads `summary_model` through.
    struct ModelRecordingLlm {
        seen_model: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl LlmClient for ModelRecordingLlm {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<CompletionResponse, crate::error::AgentError> {
            Ok(CompletionResponse::Text("summary via default model".to_string()))
        }

        async fn stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _tx: tokio::sync::mpsc::Sender<crate::stream::StreamChunk>,
        ) -> Result<(), crate::error::AgentError> {
            Ok(())
        }

        async fn complete_with_model(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            model: Option<&str>,
        ) -> Result<CompletionResponse, crate::error::AgentError> {
            *self.seen_model.lock().unwrap() = model.map(|m| m.to_string());
            Ok(CompletionResponse::Text("summary via overridden model".to_string()))
        }
    }

    #[tokio::test]
    async fn summarizer_call_carries_the_configured_summary_model() {
        let mut conv = conversation_with(30);
        let mut compressor = Compressor::new(CompressorConfig {
            preserve_recent_messages: 5,
            max_context_tokens: 1_000_000,
            summary_model: Some("small-fast-model".to_string()),
            ..Default::default()
        });
        let llm = ModelRecordingLlm { seen_model: std::sync::Mutex::new(None) };

        compressor.maybe_compress(&mut conv, &llm, Some("manual")).await;

        assert_eq!(llm.seen_model.lock().unwrap().as_deref(), Some("small-fast-model"));
    }

    fn conversation_with(n: usize) -> Conversation {
        let mut conv = Conversation::new("you are a coding assistant");
        for i in 0..n {
            conv.push(Message::user(format!("message {}", i)));
        }
        conv
    }

    #[tokio::test]
    async fn no_compression_below_preserve_window() {
        let mut conv = conversation_with(5);
        let mut compressor = Compressor::new(CompressorConfig {
            preserve_recent_messages: 15,
            ..Default::default()
        });
        let llm = StubLlm { response: "summary".to_string() };
        let outcome = compressor.maybe_compress(&mut conv, &llm, None).await;
        assert!(matches!(outcome, CompressionOutcome::NotNeeded) || conv.len() == 6);
    }

    #[tokio::test]
    async fn manual_trigger_compresses_even_under_ceiling() {
        let mut conv = conversation_with(30);
        let mut compressor = Compressor::new(CompressorConfig {
            preserve_recent_messages: 5,
            max_context_tokens: 1_000_000,
            ..Default::default()
        });
        let llm = StubLlm { response: "a durable summary of the early conversation".to_string() };
        let outcome = compressor.maybe_compress(&mut conv, &llm, Some("manual")).await;
        assert!(matches!(outcome, CompressionOutcome::Compressed { .. }));
        assert!(conv.messages().iter().any(|m| m.is_summary_with_marker_prefix("context_summary:")));
    }

    #[tokio::test]
    async fn fallback_summary_used_when_model_returns_empty() {
        let mut conv = conversation_with(30);
        let mut compressor = Compressor::new(CompressorConfig {
            preserve_recent_messages: 5,
            max_context_tokens: 1_000_000,
            ..Default::default()
        });
        let llm = StubLlm { response: String::new() };
        compressor.maybe_compress(&mut conv, &llm, Some("manual")).await;
        assert_eq!(compressor.metrics().fallback_summaries_used, 1);
        assert_eq!(compressor.metrics().api_calls_successful, 0);
    }

    #[test]
    fn reset_clears_pass_counter_not_metrics() {
        let mut compressor = Compressor::new(CompressorConfig::default());
        compressor.metrics.total_compressions = 3;
        compressor.compression_count = 3;
        compressor.reset();
        assert_eq!(compressor.compression_count, 0);
        assert_eq!(compressor.metrics.total_compressions, 3);
    }

    #[test]
    fn metrics_display_matches_expected_format() {
        let metrics = CompressionMetrics {
            total_compressions: 2,
            total_tokens_before: 1000,
            total_tokens_after: 500,
            total_messages_compressed: 20,
            api_calls_successful: 1,
            fallback_summaries_used: 1,
        };
        assert_eq!(
            metrics.to_string(),
            "Compressions: 2 | Messages compressed: 20 | Tokens saved: 500 (50.0%) | API: 1 | Fallback: 1"
        );
    }
}
