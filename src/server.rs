// LocalAgent Gate - HTTP Server
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// tiny_http front end. A fixed pool of worker threads pulls requests off
// one shared listener; routing is a pure function of (method, path,
// body) so it is testable without sockets. Tool failures are 200 with
// text; only malformed request bodies are client errors.

use crate::chat::{completion_body, completion_id, stream_body, ChatRequest, ChatService, AGENT_MODEL};
use crate::config::{AgentConfig, ServerConfig};
use crate::dispatch::{Dispatcher, ShellPolicy};
use crate::domains::{DomainAccess, WhitelistStore};
use crate::guard::RequestGuard;
use crate::llm::{OllamaClient, SamplingParams};
use crate::metrics::Metrics;
use crate::paths::Sandbox;
use crate::tools::ToolRegistry;
use anyhow::Context;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;
use tiny_http::{Header, Response, Server};

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";
const EVENT_STREAM: &str = "text/event-stream";

// ============================================================================
// WIRING
// ============================================================================

pub fn domains_from_config(config: &AgentConfig) -> DomainAccess {
    DomainAccess::new(
        config.static_domains(),
        config.wildcard_domains(),
        config.auto_whitelist_enabled,
        WhitelistStore::new(config.whitelist_path()),
    )
}

/// Real registry + dispatcher for a configuration.
pub fn dispatcher_from_config(config: &AgentConfig, metrics: Arc<Metrics>) -> anyhow::Result<Dispatcher> {
    let sandbox = Sandbox::new(config.sandbox, config.sandbox_root());
    let domains = Arc::new(domains_from_config(config));
    let registry = ToolRegistry::new(sandbox, domains, metrics).context("Failed to build tool registry")?;
    let shell = ShellPolicy {
        enabled: config.shell_enabled(),
        require_trigger: config.shell_execution.require_explicit_trigger,
    };
    Ok(Dispatcher::new(Arc::new(registry), shell))
}

/// Everything a worker needs to answer a request.
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    chat: ChatService,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, chat: ChatService, metrics: Arc<Metrics>) -> Self {
        Self { dispatcher, chat, metrics }
    }

    pub fn from_config(config: &AgentConfig) -> anyhow::Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let dispatcher = Arc::new(dispatcher_from_config(config, metrics.clone())?);
        let generator = OllamaClient::new(&config.llm).map_err(anyhow::Error::msg)?;
        let defaults = SamplingParams { temperature: config.llm.temperature, max_tokens: config.llm.max_tokens };
        let chat = ChatService::new(
            RequestGuard::default(),
            dispatcher.clone(),
            Arc::new(generator),
            metrics.clone(),
            defaults,
        );
        Ok(Self::new(dispatcher, chat, metrics))
    }
}

// ============================================================================
// ROUTING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpReply {
    fn json(status: u16, value: &Value) -> Self {
        Self { status, content_type: JSON, body: value.to_string() }
    }

    fn text(status: u16, body: String) -> Self {
        Self { status, content_type: TEXT, body }
    }

    fn error(status: u16, kind: &str, message: &str) -> Self {
        Self::json(status, &json!({ "error": { "message": message, "type": kind, "code": status } }))
    }
}

pub fn route(state: &AppState, method: &str, path_and_query: &str, body: &str) -> HttpReply {
    let started = Instant::now();
    let Ok(url) = url::Url::parse(&format!("http://localhost{}", path_and_query)) else {
        return HttpReply::error(400, "invalid_request_error", "malformed request target");
    };
    let path = url.path();

    let reply = match (method, path) {
        ("POST", "/v1/chat/completions") => chat_completions(state, body),
        ("GET", "/test") | ("POST", "/test") => {
            let from_query = url.query_pairs().find(|(k, _)| k == "prompt").map(|(_, v)| v.into_owned());
            direct_test(state, from_query, body)
        }
        ("GET", "/health") => health(state),
        ("GET", "/whitelist") => whitelist(state),
        ("GET", "/v1/models") => models(state),
        ("GET", "/metrics") => HttpReply::json(200, &json!(state.metrics.snapshot())),
        ("GET", "/metrics/prometheus") => match state.metrics.encode_text() {
            Ok(text) => HttpReply::text(200, text),
            Err(e) => HttpReply::error(500, "internal_error", &format!("metrics encoding failed: {}", e)),
        },
        ("GET", "/") => HttpReply::text(200, info_text(state)),
        _ => HttpReply::error(404, "not_found", &format!("no route for {} {}", method, path)),
    };

    let endpoint = if reply.status == 404 { "unmatched" } else { path };
    state.metrics.record_request(endpoint, &reply.status.to_string());
    state.metrics.observe_request_duration(endpoint, started.elapsed().as_secs_f64());
    reply
}

fn chat_completions(state: &AppState, body: &str) -> HttpReply {
    let request: ChatRequest = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("Rejected chat request: {}", e);
            return HttpReply::error(400, "invalid_request_error", &format!("invalid chat request: {}", e));
        }
    };
    log::debug!("Chat request: {} messages, model={}, stream={}", request.messages.len(), request.model(), request.stream);

    let reply = state.chat.complete(&request);
    log::info!("Chat reply: outcome={}, {} chars", reply.outcome.as_str(), reply.content.len());

    let id = completion_id();
    let created = chrono::Utc::now().timestamp();
    let prompt = request.prompt().unwrap_or("");
    if request.stream {
        return HttpReply {
            status: 200,
            content_type: EVENT_STREAM,
            body: stream_body(&id, created, request.model(), &reply.content),
        };
    }
    HttpReply::json(200, &completion_body(&id, created, request.model(), prompt, &reply.content))
}

fn direct_test(state: &AppState, from_query: Option<String>, body: &str) -> HttpReply {
    let from_body = || {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("prompt").and_then(Value::as_str).map(str::to_string))
    };
    let Some(prompt) = from_query.or_else(from_body).filter(|p| !p.trim().is_empty()) else {
        return HttpReply::error(400, "invalid_request_error", "missing prompt (use ?prompt=... or {\"prompt\": ...})");
    };

    let result = state.dispatcher.dispatch(&prompt);
    HttpReply::json(
        200,
        &json!({
            "prompt": prompt,
            "result": result.render(),
            "recognized": result.recognized(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
    )
}

fn health(state: &AppState) -> HttpReply {
    let registry = state.dispatcher.registry();
    let domains = registry.domains();
    HttpReply::json(
        200,
        &json!({
            "status": "healthy",
            "sandbox": registry.sandbox().enabled(),
            "sandbox_path": registry.sandbox().root().display().to_string(),
            "shell_enabled": state.dispatcher.shell_policy().enabled,
            "allowed_domains": domains.static_domains(),
            "wildcard_active": domains.wildcard(),
            "auto_whitelist_enabled": domains.auto_learn(),
            "auto_whitelist_count": domains.learned_domains().len(),
            "model": state.chat.generator().model(),
        }),
    )
}

fn whitelist(state: &AppState) -> HttpReply {
    let domains = state.dispatcher.registry().domains();
    let learned = domains.learned_domains();
    HttpReply::json(
        200,
        &json!({
            "auto_whitelist_enabled": domains.auto_learn(),
            "wildcard_active": domains.wildcard(),
            "count": learned.len(),
            "approved_domains": learned,
            "file": domains.store_path().display().to_string(),
        }),
    )
}

fn models(state: &AppState) -> HttpReply {
    let created = chrono::Utc::now().timestamp();
    let entry = |id: &str| json!({ "id": id, "object": "model", "created": created, "owned_by": "localagent" });
    HttpReply::json(
        200,
        &json!({
            "object": "list",
            "data": [entry(AGENT_MODEL), entry(state.chat.generator().model())],
        }),
    )
}

fn info_text(state: &AppState) -> String {
    let registry = state.dispatcher.registry();
    format!(
        "LocalAgent Gate v{}\n\
         Sandbox: {} ({})\n\n\
         Endpoints:\n\
         \x20 POST /v1/chat/completions  chat (tools, loop protection, model fallback)\n\
         \x20 GET  /test?prompt=...      run the dispatcher directly\n\
         \x20 GET  /health               status\n\
         \x20 GET  /whitelist            learned domains\n\
         \x20 GET  /v1/models            model list\n\
         \x20 GET  /metrics              counters (JSON)\n\
         \x20 GET  /metrics/prometheus   counters (Prometheus text)\n",
        env!("CARGO_PKG_VERSION"),
        if registry.sandbox().enabled() { "on" } else { "off" },
        registry.sandbox().root().display(),
    )
}

// ============================================================================
// SERVE
// ============================================================================

fn respond(state: &AppState, mut request: tiny_http::Request) {
    let _active = state.metrics.track_active();
    let method = request.method().to_string().to_uppercase();
    let target = request.url().to_string();

    let mut body = String::new();
    let reply = match request.as_reader().read_to_string(&mut body) {
        Ok(_) => route(state, &method, &target, &body),
        Err(e) => HttpReply::error(400, "invalid_request_error", &format!("unreadable body: {}", e)),
    };
    log::debug!("{} {} -> {}", method, target, reply.status);

    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        log::warn!("Failed to send response for {}: {}", target, e);
    }
}

/// Bind and serve until the listener fails.
pub fn run(state: AppState, config: &ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let server = Server::http(&addr).map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    let server = Arc::new(server);
    let state = Arc::new(state);
    let workers = config.workers.max(1);
    log::info!("LocalAgent Gate listening on http://{} ({} workers)", addr, workers);

    let handles: Vec<_> = (0..workers)
        .map(|n| {
            let server = server.clone();
            let state = state.clone();
            std::thread::Builder::new()
                .name(format!("http-worker-{}", n))
                .spawn(move || loop {
                    match server.recv() {
                        Ok(request) => respond(&state, request),
                        Err(e) => {
                            log::error!("Listener error: {}", e);
                            break;
                        }
                    }
                })
                .context("Failed to spawn worker thread")
        })
        .collect::<anyhow::Result<_>>()?;

    for handle in handles {
        if handle.join().is_err() {
            log::error!("Worker thread panicked");
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubGenerator;
    use crate::tools::tests::{fixture, Fixture};

    struct Harness {
        _dir: tempfile::TempDir,
        state: AppState,
    }

    fn harness() -> Harness {
        let Fixture { dir, registry, metrics, .. } = fixture(true);
        let dispatcher =
            Arc::new(Dispatcher::new(Arc::new(registry), ShellPolicy { enabled: false, require_trigger: true }));
        let chat = ChatService::new(
            RequestGuard::default(),
            dispatcher.clone(),
            Arc::new(StubGenerator::replying("generated answer")),
            metrics.clone(),
            SamplingParams { temperature: 0.7, max_tokens: 500 },
        );
        Harness { _dir: dir, state: AppState::new(dispatcher, chat, metrics) }
    }

    fn json_of(reply: &HttpReply) -> Value {
        assert_eq!(reply.content_type, JSON);
        serde_json::from_str(&reply.body).unwrap()
    }

    fn chat(messages: Value) -> String {
        json!({ "model": "localagent-pro", "messages": messages }).to_string()
    }

    #[test]
    fn chat_runs_tools() {
        let h = harness();
        let body = chat(json!([{ "role": "user", "content": "Erstelle Datei hello.txt mit Hallo Welt" }]));
        let reply = route(&h.state, "POST", "/v1/chat/completions", &body);
        assert_eq!(reply.status, 200);
        let v = json_of(&reply);
        assert!(v["id"].as_str().unwrap().starts_with("chatcmpl-"));
        let content = v["choices"][0]["message"]["content"].as_str().unwrap();
        assert!(content.contains("[write_file]\nOK: wrote"), "{content}");
    }

    #[test]
    fn chat_falls_back_to_generation() {
        let h = harness();
        let body = chat(json!([{ "role": "user", "content": "Erzähl mir einen Witz" }]));
        let v = json_of(&route(&h.state, "POST", "/v1/chat/completions", &body));
        assert_eq!(v["choices"][0]["message"]["content"], "generated answer");
    }

    #[test]
    fn chat_repeat_is_loop_blocked() {
        let h = harness();
        let body = chat(json!([{ "role": "user", "content": "Liste alle Dateien auf" }]));
        route(&h.state, "POST", "/v1/chat/completions", &body);
        let v = json_of(&route(&h.state, "POST", "/v1/chat/completions", &body));
        let content = v["choices"][0]["message"]["content"].as_str().unwrap();
        assert!(content.starts_with("LOOP PROTECTION"), "{content}");
        assert_eq!(h.state.metrics.loop_detections(), 1);
    }

    #[test]
    fn chat_stream_is_sse() {
        let h = harness();
        let body = json!({ "stream": true, "messages": [{ "role": "user", "content": "Hi there" }] }).to_string();
        let reply = route(&h.state, "POST", "/v1/chat/completions", &body);
        assert_eq!(reply.content_type, EVENT_STREAM);
        assert!(reply.body.starts_with("data: {"));
        assert!(reply.body.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn malformed_chat_is_client_error() {
        let h = harness();
        assert_eq!(route(&h.state, "POST", "/v1/chat/completions", "{not json").status, 400);
        let missing = route(&h.state, "POST", "/v1/chat/completions", r#"{"model":"x"}"#);
        assert_eq!(missing.status, 400);
        assert!(json_of(&missing)["error"]["message"].as_str().unwrap().contains("messages"));
    }

    #[test]
    fn test_endpoint_accepts_query_and_body() {
        let h = harness();
        let v = json_of(&route(&h.state, "GET", "/test?prompt=Liste%20alle%20Dateien%20auf", ""));
        assert_eq!(v["recognized"], true);
        assert!(v["result"].as_str().unwrap().starts_with("[list_files]"));

        let v = json_of(&route(&h.state, "POST", "/test", r#"{"prompt": "Wie spät ist es?"}"#));
        assert_eq!(v["recognized"], false);
        assert!(v["timestamp"].is_string());

        assert_eq!(route(&h.state, "GET", "/test", "").status, 400);
    }

    #[test]
    fn test_endpoint_bypasses_loop_guard() {
        let h = harness();
        for _ in 0..3 {
            let v = json_of(&route(&h.state, "GET", "/test?prompt=Liste+Dateien", ""));
            assert_eq!(v["recognized"], true);
        }
        assert_eq!(h.state.metrics.loop_detections(), 0);
    }

    #[test]
    fn health_and_whitelist_are_read_only() {
        let h = harness();
        let v = json_of(&route(&h.state, "GET", "/health", ""));
        assert_eq!(v["status"], "healthy");
        assert_eq!(v["sandbox"], true);
        assert_eq!(v["allowed_domains"], json!(["github.com"]));
        assert_eq!(v["auto_whitelist_count"], 0);
        assert_eq!(v["model"], "stub-model");

        let v = json_of(&route(&h.state, "GET", "/whitelist", ""));
        assert_eq!(v["wildcard_active"], false);
        assert_eq!(v["approved_domains"], json!([]));
        assert!(!h.state.dispatcher.registry().domains().store_path().exists());
    }

    #[test]
    fn models_metrics_info_and_404() {
        let h = harness();
        let v = json_of(&route(&h.state, "GET", "/v1/models", ""));
        assert_eq!(v["data"][0]["id"], AGENT_MODEL);
        assert_eq!(v["data"][1]["id"], "stub-model");

        route(&h.state, "GET", "/nope", "");
        let v = json_of(&route(&h.state, "GET", "/metrics", ""));
        assert_eq!(v["requests"]["unmatched:404"], 1);

        let info = route(&h.state, "GET", "/", "");
        assert_eq!(info.content_type, TEXT);
        assert!(info.body.contains("/v1/chat/completions"));

        let missing = route(&h.state, "DELETE", "/health", "");
        assert_eq!(missing.status, 404);
        assert!(json_of(&missing)["error"].is_object());
    }

    #[test]
    fn request_durations_are_recorded_and_exposed() {
        let h = harness();
        route(&h.state, "GET", "/health", "");
        route(&h.state, "GET", "/health", "");

        let v = json_of(&route(&h.state, "GET", "/metrics", ""));
        assert_eq!(v["request_duration"]["/health"]["count"], 2);

        let text = route(&h.state, "GET", "/metrics/prometheus", "");
        assert_eq!(text.status, 200);
        assert_eq!(text.content_type, TEXT);
        assert!(text.body.contains("localagent_request_duration_seconds_count"));
        assert!(text.body.contains("localagent_requests_total"));
    }

    #[test]
    fn serves_over_a_socket() {
        let h = harness();
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let worker = {
            let server = server.clone();
            std::thread::spawn(move || {
                if let Ok(request) = server.recv() {
                    respond(&h.state, request);
                }
            })
        };

        let client = reqwest::blocking::Client::builder().no_proxy().build().unwrap();
        let resp = client.get(format!("http://{}/health", addr)).send().unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.headers()["content-type"], JSON);
        worker.join().unwrap();
    }
}
