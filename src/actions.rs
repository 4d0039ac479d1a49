use serde::{Deserialize, Serialize};
use std::fmt;

/// Action names as they appear on the wire, both in oracle decisions and bridge messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Type,
    Scroll,
    PressEnter,
    OpenUrl,
    Finish,
    SaveMemory,
    /// The oracle asked for nothing to happen, typically alongside a confirmation request.
    Wait,
    #[serde(other)]
    Unknown,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Scroll => "scroll",
            ActionKind::PressEnter => "press_enter",
            ActionKind::OpenUrl => "open_url",
            ActionKind::Finish => "finish",
            ActionKind::SaveMemory => "save_memory",
            ActionKind::Wait => "wait",
            ActionKind::Unknown => "unknown",
        }
    }

    pub fn targets_element(&self) -> bool {
        matches!(
            self,
            ActionKind::Click | ActionKind::Type | ActionKind::PressEnter
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
    Top,
    Bottom,
}

impl ScrollDirection {
    /// Anything unrecognised scrolls down.
    pub fn from_text(text: Option<&str>) -> Self {
        match text.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            Some("up") => ScrollDirection::Up,
            Some("top") => ScrollDirection::Top,
            Some("bottom") => ScrollDirection::Bottom,
            _ => ScrollDirection::Down,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Top => "top",
            ScrollDirection::Bottom => "bottom",
        }
    }
}

/// A validated oracle decision, ready to be carried out.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequest {
    Click { element_id: u32 },
    Type { element_id: u32, text: String },
    Scroll { direction: ScrollDirection },
    PressEnter { element_id: u32 },
    OpenUrl { url: String },
    Finish,
    SaveMemory { content: String },
}

impl ActionRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionRequest::Click { .. } => ActionKind::Click,
            ActionRequest::Type { .. } => ActionKind::Type,
            ActionRequest::Scroll { .. } => ActionKind::Scroll,
            ActionRequest::PressEnter { .. } => ActionKind::PressEnter,
            ActionRequest::OpenUrl { .. } => ActionKind::OpenUrl,
            ActionRequest::Finish => ActionKind::Finish,
            ActionRequest::SaveMemory { .. } => ActionKind::SaveMemory,
        }
    }

    /// The bridge message for this request, if the page performs it.
    pub fn page_action(&self) -> Option<PageAction> {
        let (id, text) = match self {
            ActionRequest::Click { element_id } | ActionRequest::PressEnter { element_id } => {
                (Some(*element_id), None)
            }
            ActionRequest::Type { element_id, text } => (Some(*element_id), Some(text.clone())),
            ActionRequest::Scroll { direction } => (None, Some(direction.as_str().to_string())),
            ActionRequest::OpenUrl { url } => (None, Some(url.clone())),
            ActionRequest::Finish | ActionRequest::SaveMemory { .. } => return None,
        };
        Some(PageAction {
            kind: self.kind(),
            id,
            text,
        })
    }
}

impl fmt::Display for ActionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRequest::Click { element_id } => write!(f, "click -> ID: {element_id}"),
            ActionRequest::Type { element_id, text } => {
                write!(f, "type '{text}' -> ID: {element_id}")
            }
            ActionRequest::Scroll { direction } => write!(f, "scroll {}", direction.as_str()),
            ActionRequest::PressEnter { element_id } => write!(f, "press_enter -> ID: {element_id}"),
            ActionRequest::OpenUrl { url } => write!(f, "open_url {url}"),
            ActionRequest::Finish => f.write_str("finish"),
            ActionRequest::SaveMemory { content } => write!(f, "save_memory '{content}'"),
        }
    }
}

/// Action message sent across the bridge: `{"type": ..., "id": ..., "text": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl PageAction {
    pub fn new(kind: ActionKind, id: Option<u32>, text: Option<&str>) -> Self {
        Self {
            kind,
            id,
            text: text.map(str::to_string),
        }
    }
}

/// How an action ended, as recorded in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ActionOutcome {
    Success,
    Error(String),
}

impl ActionOutcome {
    /// Executor statuses signal failure with an `Error` prefix.
    pub fn from_status(status: &str) -> Self {
        if status.starts_with("Error") {
            ActionOutcome::Error(status.to_string())
        } else {
            ActionOutcome::Success
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Success)
    }
}

/// Synthetic events the executor dispatches on a target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    MouseOver,
    MouseDown,
    MouseUp,
    Click,
    Input,
    Change,
    Blur,
    KeyDown,
    KeyPress,
    KeyUp,
}

/// Pointer sequence many frameworks listen for, not just the terminal click.
pub const CLICK_SEQUENCE: [DomEvent; 4] = [
    DomEvent::MouseOver,
    DomEvent::MouseDown,
    DomEvent::MouseUp,
    DomEvent::Click,
];

/// Key events for Enter, in dispatch order.
pub const ENTER_SEQUENCE: [DomEvent; 3] = [DomEvent::KeyDown, DomEvent::KeyPress, DomEvent::KeyUp];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    Mouse,
    /// Keyboard events always carry the Enter key.
    Keyboard,
    Plain,
}

impl DomEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomEvent::MouseOver => "mouseover",
            DomEvent::MouseDown => "mousedown",
            DomEvent::MouseUp => "mouseup",
            DomEvent::Click => "click",
            DomEvent::Input => "input",
            DomEvent::Change => "change",
            DomEvent::Blur => "blur",
            DomEvent::KeyDown => "keydown",
            DomEvent::KeyPress => "keypress",
            DomEvent::KeyUp => "keyup",
        }
    }

    pub fn family(&self) -> EventFamily {
        match self {
            DomEvent::MouseOver | DomEvent::MouseDown | DomEvent::MouseUp | DomEvent::Click => {
                EventFamily::Mouse
            }
            DomEvent::KeyDown | DomEvent::KeyPress | DomEvent::KeyUp => EventFamily::Keyboard,
            DomEvent::Input | DomEvent::Change | DomEvent::Blur => EventFamily::Plain,
        }
    }
}
