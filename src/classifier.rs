//! Pure predicates deciding which page nodes the agent may address.
//!
//! Everything here works on plain facts gathered from the live page, so the
//! heuristics can be exercised without a browser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest text reported for a single element.
pub const MAX_TEXT_CHARS: usize = 200;

const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "textarea", "select", "summary", "details",
];

const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "checkbox", "menuitem", "tab", "textbox", "option", "searchbox",
    "combobox", "switch",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

/// Bounding client rect, relative to the viewport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: String,
    pub cursor: String,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".into(),
            visibility: "visible".into(),
            opacity: "1".into(),
            cursor: "auto".into(),
        }
    }
}

/// Layout and attribute facts of one element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFacts {
    /// Lower-case tag name.
    pub tag: String,
    pub style: ComputedStyle,
    pub rect: Rect,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub checked: Option<bool>,
}

impl NodeFacts {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn has_tag(&self, tags: &[&str]) -> bool {
        tags.contains(&self.tag.as_str())
    }
}

/// Text-bearing facts, fetched only for elements that survived classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextSource {
    /// Current value of an input or textarea.
    #[serde(default)]
    pub value: Option<String>,
    /// Label of the selected option of a select.
    #[serde(default)]
    pub selected_option: Option<String>,
    #[serde(default)]
    pub inner_text: String,
    /// Non-empty alt texts of descendant images, in document order.
    #[serde(default)]
    pub image_alts: Vec<String>,
}

pub fn is_visible(node: &NodeFacts, viewport: &Viewport) -> bool {
    let style = &node.style;
    let rect = &node.rect;
    let transparent = style
        .opacity
        .trim()
        .parse::<f64>()
        .map(|opacity| opacity == 0.0)
        .unwrap_or(false);

    style.display != "none"
        && style.visibility != "hidden"
        && !transparent
        && rect.width > 2.0
        && rect.height > 2.0
        && rect.top < viewport.height
        && rect.bottom > 0.0
}

/// Heuristic union: native controls, ARIA widget roles, inline handlers,
/// editable regions and anything styled with a pointer cursor.
pub fn is_interactive(node: &NodeFacts) -> bool {
    if node.has_tag(INTERACTIVE_TAGS) {
        return true;
    }
    if let Some(role) = node.attr("role") {
        if INTERACTIVE_ROLES.contains(&role) {
            return true;
        }
    }
    if node.attr("onclick").is_some_and(|handler| !handler.is_empty()) {
        return true;
    }
    if node.attr("contenteditable") == Some("true") {
        return true;
    }
    node.style.cursor == "pointer"
}

pub fn extract_text(node: &NodeFacts, source: &TextSource) -> String {
    let raw = match node.tag.as_str() {
        "input" | "textarea" => source
            .value
            .as_deref()
            .filter(|value| !value.is_empty())
            .or_else(|| node.attr("placeholder"))
            .unwrap_or_default()
            .to_string(),
        "select" => source.selected_option.clone().unwrap_or_default(),
        _ => {
            let mut text = String::new();
            for alt in source.image_alts.iter().filter(|alt| !alt.is_empty()) {
                text.push_str(&format!("[IMG: {alt}] "));
            }
            text.push_str(&source.inner_text);

            if text.trim().is_empty() {
                text = node
                    .attr("aria-label")
                    .filter(|label| !label.is_empty())
                    .or_else(|| node.attr("title"))
                    .unwrap_or_default()
                    .to_string();
            }
            text
        }
    };

    let truncated: String = collapse_whitespace(&raw)
        .chars()
        .take(MAX_TEXT_CHARS)
        .collect();
    truncated.trim_end().to_string()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
