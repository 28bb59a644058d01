// LocalAgent Gate - Chat Completion Flow
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// One chat turn: last user message -> duplicate guard -> dispatcher ->
// generation fallback. Framing into the chat-completions envelope (or
// word-chunked SSE) happens after the full text is known.

use crate::dispatch::{DispatchResult, Dispatcher};
use crate::guard::{GuardVerdict, RequestGuard};
use crate::llm::{SamplingParams, TextGenerator};
use crate::metrics::Metrics;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Model id this gateway answers as.
pub const AGENT_MODEL: &str = "localagent-pro";

pub const GREETING: &str = "Hello! I am LocalAgent-Pro.

I can help with:
- reading and writing files (inside the sandbox)
- listing directories
- fetching web pages (allowed domains only)
- answering questions via the local model

Try: \"Erstelle Datei test.txt mit Hello World\", \"Liste alle Dateien auf\" or \"Lies Datei test.txt\".";

pub const LOOP_NOTICE: &str = "LOOP PROTECTION ACTIVE

This request was repeated several times within a short time.
Please rephrase it or wait 2 seconds.";

pub const GENERATION_APOLOGY: &str = "Sorry, I could not generate an answer. Please try again.";

const LOG_PREVIEW_CHARS: usize = 200;

// ============================================================================
// REQUEST
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Content of the last user-role message, if any.
    pub fn prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .filter(|c| !c.is_empty())
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(AGENT_MODEL)
    }
}

// ============================================================================
// FLOW
// ============================================================================

/// Which path produced the reply text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    Greeting,
    LoopBlocked,
    Tools,
    Generated,
    GenerationFailed,
}

impl ChatOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatOutcome::Greeting => "greeting",
            ChatOutcome::LoopBlocked => "loop_blocked",
            ChatOutcome::Tools => "tools",
            ChatOutcome::Generated => "generated",
            ChatOutcome::GenerationFailed => "generation_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub outcome: ChatOutcome,
    pub content: String,
}

pub struct ChatService {
    guard: RequestGuard,
    dispatcher: Arc<Dispatcher>,
    generator: Arc<dyn TextGenerator>,
    metrics: Arc<Metrics>,
    defaults: SamplingParams,
}

impl ChatService {
    pub fn new(
        guard: RequestGuard,
        dispatcher: Arc<Dispatcher>,
        generator: Arc<dyn TextGenerator>,
        metrics: Arc<Metrics>,
        defaults: SamplingParams,
    ) -> Self {
        Self { guard, dispatcher, generator, metrics, defaults }
    }

    pub fn generator(&self) -> &dyn TextGenerator {
        self.generator.as_ref()
    }

    pub fn complete(&self, request: &ChatRequest) -> ChatReply {
        let Some(prompt) = request.prompt() else {
            log::debug!("No user message, sending greeting");
            return ChatReply { outcome: ChatOutcome::Greeting, content: GREETING.to_string() };
        };
        log::info!("User prompt: {}", truncate_for_log(prompt));

        if let GuardVerdict::Blocked { repeats } = self.guard.check_and_record(prompt) {
            log::warn!("Loop detected: '{}' ({}x inside window)", truncate_for_log(prompt), repeats);
            self.metrics.record_loop_detection();
            return ChatReply { outcome: ChatOutcome::LoopBlocked, content: LOOP_NOTICE.to_string() };
        }

        if let result @ DispatchResult::Executed(_) = self.dispatcher.dispatch(prompt) {
            let rendered = result.render();
            log::debug!("Tool result: {}", truncate_for_log(&rendered));
            return ChatReply {
                outcome: ChatOutcome::Tools,
                content: format!("LocalAgent-Pro handled your request:\n\n{}", rendered),
            };
        }

        let params = SamplingParams {
            temperature: request.temperature.unwrap_or(self.defaults.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.defaults.max_tokens),
        };
        let model = self.generator.model();
        match self.generator.generate(prompt, &params) {
            Ok(text) => {
                self.metrics.record_generation(model, true);
                ChatReply { outcome: ChatOutcome::Generated, content: text }
            }
            Err(e) => {
                log::error!("Generation failed: {}", e);
                self.metrics.record_generation(model, false);
                ChatReply { outcome: ChatOutcome::GenerationFailed, content: GENERATION_APOLOGY.to_string() }
            }
        }
    }
}

// ============================================================================
// FRAMING
// ============================================================================

fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Non-streaming chat-completions envelope.
pub fn completion_body(id: &str, created: i64, model: &str, prompt: &str, content: &str) -> Value {
    let prompt_tokens = count_tokens(prompt);
    let completion_tokens = count_tokens(content);
    json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens
        }
    })
}

/// Word-chunked SSE stream of an already complete text, ending in [DONE].
pub fn stream_body(id: &str, created: i64, model: &str, content: &str) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    let last = words.len().saturating_sub(1);
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        let (piece, finish) = if i < last { (format!("{} ", word), Value::Null) } else { (word.to_string(), json!("stop")) };
        let chunk = json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model,
            "choices": [{
                "index": 0,
                "delta": { "content": piece },
                "finish_reason": finish
            }]
        });
        out.push_str(&format!("data: {}\n\n", chunk));
    }
    out.push_str("data: [DONE]\n\n");
    out
}

pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4())
}

/// First 200 characters, with a size note when cut.
pub fn truncate_for_log(text: &str) -> String {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}... ({} chars)", &text[..cut], text.chars().count()),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ShellPolicy;
    use crate::llm::StubGenerator;
    use crate::tools::tests::{fixture, Fixture};

    const DEFAULTS: SamplingParams = SamplingParams { temperature: 0.7, max_tokens: 500 };

    struct Harness {
        _dir: tempfile::TempDir,
        service: ChatService,
        generator: Arc<StubGenerator>,
        metrics: Arc<Metrics>,
    }

    fn harness(generator: StubGenerator) -> Harness {
        let Fixture { dir, registry, metrics, .. } = fixture(true);
        let dispatcher =
            Arc::new(Dispatcher::new(Arc::new(registry), ShellPolicy { enabled: false, require_trigger: true }));
        let generator = Arc::new(generator);
        let service =
            ChatService::new(RequestGuard::default(), dispatcher, generator.clone(), metrics.clone(), DEFAULTS);
        Harness { _dir: dir, service, generator, metrics }
    }

    fn request(messages: &[(&str, &str)]) -> ChatRequest {
        ChatRequest {
            messages: messages
                .iter()
                .map(|(role, content)| ChatMessage { role: role.to_string(), content: content.to_string() })
                .collect(),
            model: None,
            stream: false,
            temperature: None,
            max_tokens: None,
        }
    }

    #[test]
    fn last_user_message_is_the_prompt() {
        let req = request(&[("user", "first"), ("assistant", "x"), ("user", "second"), ("assistant", "y")]);
        assert_eq!(req.prompt(), Some("second"));
        assert_eq!(request(&[("system", "be brief")]).prompt(), None);
    }

    #[test]
    fn greeting_without_user_message() {
        let h = harness(StubGenerator::replying("unused"));
        let reply = h.service.complete(&request(&[("system", "be brief")]));
        assert_eq!(reply.outcome, ChatOutcome::Greeting);
        assert!(h.generator.prompts().is_empty());
    }

    #[test]
    fn tool_output_is_framed() {
        let h = harness(StubGenerator::replying("unused"));
        let reply = h.service.complete(&request(&[("user", "Erstelle Datei hello.txt mit Hallo Welt")]));
        assert_eq!(reply.outcome, ChatOutcome::Tools);
        assert!(reply.content.starts_with("LocalAgent-Pro handled your request:\n\n[write_file]\nOK: wrote"));
        assert!(h.generator.prompts().is_empty());
    }

    #[test]
    fn repeat_inside_window_is_blocked_and_counted() {
        let h = harness(StubGenerator::replying("unused"));
        let req = request(&[("user", "Liste alle Dateien auf")]);
        assert_eq!(h.service.complete(&req).outcome, ChatOutcome::Tools);
        let second = h.service.complete(&req);
        assert_eq!(second.outcome, ChatOutcome::LoopBlocked);
        assert!(second.content.to_lowercase().contains("loop"));
        assert_eq!(h.metrics.loop_detections(), 1);
    }

    #[test]
    fn unrecognized_prompt_goes_to_generator() {
        let h = harness(StubGenerator::replying("Mir geht es gut."));
        let reply = h.service.complete(&request(&[("user", "Wie geht es dir?")]));
        assert_eq!(reply, ChatReply { outcome: ChatOutcome::Generated, content: "Mir geht es gut.".into() });
        assert_eq!(h.generator.prompts(), vec!["Wie geht es dir?".to_string()]);
        assert_eq!(h.metrics.snapshot().generation_calls["stub-model:success"], 1);
    }

    #[test]
    fn generation_failure_apologizes() {
        let h = harness(StubGenerator::failing());
        let reply = h.service.complete(&request(&[("user", "Wie geht es dir?")]));
        assert_eq!(reply.outcome, ChatOutcome::GenerationFailed);
        assert_eq!(reply.content, GENERATION_APOLOGY);
        assert_eq!(h.metrics.snapshot().generation_calls["stub-model:failed"], 1);
    }

    #[test]
    fn envelope_shape() {
        let body = completion_body("chatcmpl-1", 1_700_000_000, "localagent-pro", "two words", "three short words");
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["role"], "assistant");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert_eq!(body["usage"]["total_tokens"], 5);
    }

    #[test]
    fn stream_chunks_words_and_terminates() {
        let sse = stream_body("chatcmpl-1", 0, "m", "OK: wrote file");
        let events: Vec<&str> = sse.split("\n\n").filter(|e| !e.is_empty()).collect();
        assert_eq!(events.len(), 4);
        assert_eq!(*events.last().unwrap(), "data: [DONE]");

        let first: Value = serde_json::from_str(events[0].strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(first["choices"][0]["delta"]["content"], "OK: ");
        assert!(first["choices"][0]["finish_reason"].is_null());
        let last: Value = serde_json::from_str(events[2].strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(last["choices"][0]["delta"]["content"], "file");
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn log_preview_is_bounded() {
        assert_eq!(truncate_for_log("short"), "short");
        let long = "ä".repeat(250);
        let preview = truncate_for_log(&long);
        assert!(preview.starts_with(&"ä".repeat(200)));
        assert!(preview.ends_with("... (250 chars)"));
    }
}
