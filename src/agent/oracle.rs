use async_trait::async_trait;
use log::{debug, info, warn};
use ollama_rs::{Ollama, generation::completion::request::GenerationRequest, models::ModelOptions};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::time::{Duration, sleep};

use crate::actions::{ActionKind, ActionRequest, ScrollDirection};
use crate::memory::{ChatMessage, HistoryEntry};
use crate::types::{AgentError, PageElement};

/// Everything the oracle sees for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub task: String,
    /// The snapshot, serialised as a JSON array of elements.
    pub dom: String,
    pub screenshot: Option<String>,
    pub action_history: Vec<HistoryEntry>,
    pub chat_history: Vec<ChatMessage>,
}

/// The oracle's answer, loosely typed as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub needs_confirmation: bool,
}

impl Default for Decision {
    fn default() -> Self {
        Self {
            action: ActionKind::Wait,
            element_id: None,
            text: None,
            url: None,
            reasoning: None,
            needs_confirmation: false,
        }
    }
}

impl Decision {
    /// Checks the payload the action needs and builds the typed request.
    pub fn to_request(&self) -> Result<ActionRequest, String> {
        let element = || {
            self.element_id
                .ok_or_else(|| format!("{} requires an element_id", self.action))
        };
        let text = || self.text.clone().unwrap_or_default();

        Ok(match self.action {
            ActionKind::Click => ActionRequest::Click {
                element_id: element()?,
            },
            ActionKind::Type => ActionRequest::Type {
                element_id: element()?,
                text: text(),
            },
            ActionKind::PressEnter => ActionRequest::PressEnter {
                element_id: element()?,
            },
            ActionKind::Scroll => ActionRequest::Scroll {
                direction: ScrollDirection::from_text(self.text.as_deref()),
            },
            ActionKind::OpenUrl => {
                let url = self
                    .url
                    .clone()
                    .or_else(|| self.text.clone())
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| "open_url requires a url".to_string())?;
                ActionRequest::OpenUrl { url }
            }
            ActionKind::Finish => ActionRequest::Finish,
            ActionKind::SaveMemory => ActionRequest::SaveMemory {
                content: self
                    .text
                    .clone()
                    .ok_or_else(|| "save_memory requires text".to_string())?,
            },
            ActionKind::Wait | ActionKind::Unknown => {
                return Err(format!("unsupported action '{}'", self.action));
            }
        })
    }
}

/// External decision-maker consulted once per step.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, AgentError>;
}

#[async_trait]
impl<T: Oracle + ?Sized> Oracle for Box<T> {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, AgentError> {
        (**self).decide(request).await
    }
}

/// Oracle reached over HTTP, posting the request as JSON.
pub struct HttpOracle {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOracle {
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:8000/analyze";

    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

impl Default for HttpOracle {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ENDPOINT)
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, AgentError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::OracleError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::OracleError(format!(
                "Server Error: {}",
                status.as_u16()
            )));
        }

        response
            .json::<Decision>()
            .await
            .map_err(|e| AgentError::OracleError(format!("Invalid decision: {e}")))
    }
}

const MAX_DOM_ITEMS: usize = 300;
const MAX_ATTEMPTS: usize = 2;

const SYSTEM_PROMPT: &str = r#"You are a browser automation agent. You see the interactive elements of the current page and pick ONE next action.

Answer with a single JSON object and nothing else:
{"thought_process": "...", "action": "click|type|scroll|open_url|finish|save_memory|press_enter|ask_user_confirmation", "element_id": 1, "text": "...", "scroll_direction": "up|down|top|bottom", "url": "..."}

Rules:
- Use element IDs from the DOM list only.
- Use save_memory to remember facts needed later in the task.
- Use ask_user_confirmation before anything irreversible: payments, deletions, sending messages.
- Use finish once the task is done."#;

/// Role the local model plays, picked once per task by a routing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specialist {
    Recruiter,
    Mail,
    Shopper,
    Generalist,
}

impl Specialist {
    /// Reads a router answer. Anything unrecognised falls back to `Generalist`.
    pub fn from_reply(reply: &str) -> Self {
        let reply = reply.to_uppercase();
        if reply.contains("RECRUITER") {
            Specialist::Recruiter
        } else if reply.contains("GMAIL") {
            Specialist::Mail
        } else if reply.contains("SHOPPER") {
            Specialist::Shopper
        } else {
            Specialist::Generalist
        }
    }

    fn focus(&self) -> &'static str {
        match self {
            Specialist::Recruiter => "You specialise in job boards: search vacancies, open postings, fill application forms. Save vacancy titles and links with save_memory before moving on.",
            Specialist::Mail => "You specialise in web mail: open, read, sort and draft messages. Always ask_user_confirmation before sending or deleting mail.",
            Specialist::Shopper => "You specialise in online shops: search products, compare prices, manage the cart. Save prices with save_memory and ask_user_confirmation before checkout or payment.",
            Specialist::Generalist => "You handle any web task.",
        }
    }
}

fn router_prompt(task: &str) -> String {
    format!(
        "CLASSIFY TASK: \"{task}\"\nCATEGORIES: RECRUITER (jobs, resume, vacancy), GMAIL (email, outlook, spam), SHOPPER (buy, price, cart, amazon), GENERALIST (other).\nOUTPUT: Just the category name."
    )
}

/// Oracle backed by a local model served by Ollama.
#[derive(Debug)]
pub struct OllamaOracle {
    ollama: Ollama,
    model: String,
    temperature: f32,
    /// Last routed task and its specialist.
    routed: Mutex<Option<(String, Specialist)>>,
}

#[derive(Debug, Deserialize)]
struct ModelReply {
    #[serde(default)]
    thought_process: Option<String>,
    action: String,
    #[serde(default)]
    scroll_direction: Option<String>,
    #[serde(default)]
    element_id: Option<u32>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl OllamaOracle {
    pub fn new(model: &str) -> Self {
        Self {
            ollama: Ollama::default(),
            model: model.to_string(),
            temperature: 0.2,
            routed: Mutex::new(None),
        }
    }

    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, AgentError> {
        let req = GenerationRequest::new(self.model.clone(), prompt.to_string())
            .options(ModelOptions::default().temperature(temperature));

        let res = self
            .ollama
            .generate(req)
            .await
            .map_err(|e| AgentError::OracleError(e.to_string()))?;

        debug!("Model replied: {}", res.response);
        Ok(res.response)
    }

    async fn ask(&self, prompt: &str) -> Result<Decision, AgentError> {
        parse_reply(&self.generate(prompt, self.temperature).await?)
    }

    async fn specialist(&self, task: &str) -> Specialist {
        if let Some((routed_task, specialist)) = self.cached_route() {
            if routed_task == task {
                return specialist;
            }
        }

        let specialist = match self.generate(&router_prompt(task), 0.0).await {
            Ok(reply) => Specialist::from_reply(&reply),
            Err(e) => {
                warn!("Task routing failed, using the general agent: {e}");
                Specialist::Generalist
            }
        };
        info!("Routed task to {specialist:?}");
        *self.routed.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((task.to_string(), specialist));
        specialist
    }

    fn cached_route(&self) -> Option<(String, Specialist)> {
        self.routed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Oracle for OllamaOracle {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, AgentError> {
        let specialist = self.specialist(&request.task).await;
        let prompt = build_prompt(request, specialist);
        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.ask(&prompt).await {
                Ok(decision) => return Ok(decision),
                Err(e) => {
                    warn!("Model error (attempt {attempt}): {e}");
                    last_error = Some(e);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AgentError::OracleError("no attempts made".into())))
    }
}

pub fn build_prompt(request: &DecisionRequest, specialist: Specialist) -> String {
    let facts: Vec<&str> = request
        .chat_history
        .iter()
        .filter_map(ChatMessage::memory_fact)
        .collect();
    let memory = if facts.is_empty() {
        "Memory empty.".to_string()
    } else {
        facts[facts.len().saturating_sub(5)..].join("\n")
    };

    format!(
        "{SYSTEM_PROMPT}\n{focus}\n\n=== GLOBAL CONTEXT ===\nGlobal Memory (Saved Items): {memory}\nCurrent Goal: \"{task}\"\n\nPREVIOUS ACTIONS (Last 5 steps):\n{history}\n\nCURRENT VISIBLE INTERACTIVE ELEMENTS (DOM):\n{dom}\n\nSelect the ID that best matches the next logical step for the task: \"{task}\".",
        task = request.task,
        focus = specialist.focus(),
        history = format_history(&request.action_history),
        dom = format_dom_for_llm(&request.dom),
    )
}

fn format_history(history: &[HistoryEntry]) -> String {
    let recent = &history[history.len().saturating_sub(5)..];
    recent
        .iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            HistoryEntry::Action { decision, .. } => format!(
                "Step {}: {} on ID {} ('{}') - Reason: {}",
                i + 1,
                decision.action,
                decision
                    .element_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "None".into()),
                decision.text.as_deref().unwrap_or("None"),
                decision.reasoning.as_deref().unwrap_or("None"),
            ),
            HistoryEntry::Note(message) => format!("Step {}: [system] {}", i + 1, message.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders a serialised snapshot as one compact line per element.
pub fn format_dom_for_llm(dom: &str) -> String {
    let elements: Vec<PageElement> = match serde_json::from_str(dom) {
        Ok(elements) => elements,
        Err(e) => {
            warn!("Error formatting DOM: {e}");
            return "Error parsing DOM data.".to_string();
        }
    };

    let mut lines = Vec::new();
    for (i, el) in elements.iter().enumerate() {
        if i >= MAX_DOM_ITEMS {
            lines.push(format!(
                "... and {} more items (SCROLL to see them)",
                elements.len() - i
            ));
            break;
        }

        let attrs = &el.attributes;
        let mut parts = Vec::new();
        fn non_empty(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.is_empty())
        }
        if let Some(role) = non_empty(&attrs.role) {
            parts.push(format!("role='{role}'"));
        }
        if let Some(placeholder) = non_empty(&attrs.placeholder) {
            parts.push(format!("ph='{placeholder}'"));
        }
        if let Some(label) = non_empty(&attrs.aria_label) {
            parts.push(format!("label='{label}'"));
        }
        if let Some(name) = non_empty(&attrs.name) {
            parts.push(format!("name='{name}'"));
        }
        if let Some(href) = attrs.href.as_deref().filter(|h| h.chars().count() > 2) {
            parts.push(format!("href='{}'", shorten_href(href)));
        }

        let attrs = if parts.is_empty() {
            String::new()
        } else {
            format!("({})", parts.join(", "))
        };

        let mut text: String = el.text.replace('\n', " ").trim().to_string();
        if text.chars().count() > 60 {
            text = format!("{}...", text.chars().take(60).collect::<String>());
        }

        lines.push(format!("[{}] {} \"{}\" {}", el.id, el.tag.to_uppercase(), text, attrs));
    }
    lines.join("\n")
}

fn shorten_href(href: &str) -> String {
    let count = href.chars().count();
    if count < 30 {
        href.to_string()
    } else {
        let tail: String = href.chars().skip(count - 25).collect();
        format!("...{tail}")
    }
}

/// Bare domains get a scheme; anything else becomes a web search.
pub fn normalize_url(raw: &str) -> String {
    if raw.starts_with("http") {
        return raw.to_string();
    }
    if raw.contains('.') && !raw.contains(' ') {
        format!("https://{raw}")
    } else {
        let query: String = url::form_urlencoded::byte_serialize(raw.as_bytes()).collect();
        format!("https://www.google.com/search?q={query}")
    }
}

fn parse_reply(raw: &str) -> Result<Decision, AgentError> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let reply: ModelReply = serde_json::from_str(cleaned)
        .map_err(|e| AgentError::OracleError(format!("Failed to parse model reply: {e}")))?;

    if reply.action == "ask_user_confirmation" {
        return Ok(Decision {
            action: ActionKind::Wait,
            reasoning: Some(
                reply
                    .thought_process
                    .unwrap_or_else(|| "Security Check Required".into()),
            ),
            needs_confirmation: true,
            ..Default::default()
        });
    }

    let action: ActionKind = serde_json::from_value(serde_json::Value::String(reply.action))
        .map_err(|e| AgentError::OracleError(e.to_string()))?;

    let text = if action == ActionKind::Scroll {
        let valid = |d: &Option<String>| {
            d.as_deref()
                .filter(|d| matches!(*d, "up" | "down" | "top" | "bottom"))
                .map(str::to_string)
        };
        Some(
            valid(&reply.text)
                .or_else(|| valid(&reply.scroll_direction))
                .unwrap_or_else(|| "down".into()),
        )
    } else {
        reply.text
    };

    Ok(Decision {
        action,
        element_id: reply.element_id,
        text,
        url: reply.url.as_deref().map(normalize_url),
        reasoning: reply.thought_process,
        needs_confirmation: false,
    })
}
