use async_trait::async_trait;
use log::debug;

use crate::actions::DomEvent;
use crate::classifier::{self, NodeFacts, TextSource, Viewport};
use crate::types::{AgentError, ElementAttributes, PageElement};

/// Tags never considered, whatever their styling.
pub const IGNORE_TAGS: &[&str] = &[
    "script", "style", "svg", "path", "noscript", "meta", "link", "head", "title", "br", "hr",
    "iframe",
];

/// Tags kept in a snapshot even without any text, since their value is the point.
const FORM_FIELD_TAGS: &[&str] = &["input", "select", "textarea"];

/// Attribute stamped onto every addressed node.
pub const AGENT_ID_ATTR: &str = "data-agent-id";
pub const DETECTED_CLASS: &str = "ai-agent-detected";
pub const ACTIVE_CLASS: &str = "ai-agent-active";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollTo {
    /// Relative scroll by the given number of CSS pixels (negative is up).
    By(f64),
    Top,
    Bottom,
}

/// Native access to a live page's node tree.
///
/// Handles are only guaranteed to be valid until the page mutates; operations
/// on a stale handle fail with an error rather than panicking.
#[async_trait]
pub trait Page: Clone + Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    /// Whether the current document still carries the marker `Host::attach`
    /// leaves behind. Navigating or replacing the document clears it.
    async fn is_attached(&self) -> Result<bool, AgentError>;

    async fn viewport(&self) -> Result<Viewport, AgentError>;

    /// Every element of the document in pre-order, with its layout facts.
    async fn elements(&self) -> Result<Vec<(Self::Handle, NodeFacts)>, AgentError>;

    async fn facts(&self, node: &Self::Handle) -> Result<NodeFacts, AgentError>;

    /// Text facts for a batch of nodes, in the same order.
    async fn text_sources(&self, nodes: &[Self::Handle]) -> Result<Vec<TextSource>, AgentError>;

    /// Looks a node up by its stamped `data-agent-id`.
    async fn find_by_agent_id(&self, id: u32) -> Result<Option<Self::Handle>, AgentError>;

    /// Nearest ancestor-or-self matching `a, button, input, [role="button"]`.
    async fn closest_clickable(
        &self,
        node: &Self::Handle,
    ) -> Result<Option<Self::Handle>, AgentError>;

    /// Stamps IDs and adds the "detected" marker.
    async fn mark_detected(&self, stamped: &[(Self::Handle, u32)]) -> Result<(), AgentError>;

    /// Removes every "detected" marker from the document.
    async fn clear_detected(&self) -> Result<(), AgentError>;

    async fn set_active(&self, node: &Self::Handle, active: bool) -> Result<(), AgentError>;

    async fn scroll_into_view(&self, node: &Self::Handle) -> Result<(), AgentError>;

    async fn focus(&self, node: &Self::Handle) -> Result<(), AgentError>;

    async fn dispatch(&self, node: &Self::Handle, event: DomEvent) -> Result<(), AgentError>;

    /// Writes `value` through the element prototype's native setter so framework
    /// value trackers observe the change.
    async fn set_native_value(&self, node: &Self::Handle, value: &str) -> Result<(), AgentError>;

    async fn scroll(&self, to: ScrollTo) -> Result<(), AgentError>;

    async fn navigate(&self, url: &str) -> Result<(), AgentError>;
}

/// Transient ID to node handle mapping for the current snapshot.
///
/// IDs are dense and start at 1; a new snapshot discards all previous entries.
#[derive(Debug, Clone)]
pub struct ElementRegistry<H> {
    handles: Vec<H>,
}

impl<H> Default for ElementRegistry<H> {
    fn default() -> Self {
        Self {
            handles: Vec::new(),
        }
    }
}

impl<H> ElementRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handle` under the next ID and returns that ID.
    pub fn register(&mut self, handle: H) -> u32 {
        self.handles.push(handle);
        self.handles.len() as u32
    }

    pub fn get(&self, id: u32) -> Option<&H> {
        let index = (id as usize).checked_sub(1)?;
        self.handles.get(index)
    }

    pub fn clear(&mut self) {
        self.handles.clear();
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Builds snapshots of the interactive elements of a page and owns the live registry.
pub struct SnapshotBuilder<P: Page> {
    page: P,
    registry: ElementRegistry<P::Handle>,
}

impl<P: Page> SnapshotBuilder<P> {
    pub fn new(page: P) -> Self {
        Self {
            page,
            registry: ElementRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ElementRegistry<P::Handle> {
        &self.registry
    }

    /// Walks the page in document order and returns every visible interactive
    /// element, replacing the registry with handles for the returned IDs.
    pub async fn snapshot(&mut self) -> Result<Vec<PageElement>, AgentError> {
        self.page.clear_detected().await?;
        self.registry.clear();

        let viewport = self.page.viewport().await?;
        let candidates: Vec<(P::Handle, NodeFacts)> = self
            .page
            .elements()
            .await?
            .into_iter()
            .filter(|(_, facts)| !IGNORE_TAGS.contains(&facts.tag.as_str()))
            .filter(|(_, facts)| classifier::is_visible(facts, &viewport))
            .filter(|(_, facts)| classifier::is_interactive(facts))
            .collect();

        let handles: Vec<P::Handle> = candidates.iter().map(|(h, _)| h.clone()).collect();
        let sources = self.page.text_sources(&handles).await?;
        if sources.len() != candidates.len() {
            return Err(AgentError::DomExtractionError(format!(
                "expected text for {} elements, got {}",
                candidates.len(),
                sources.len()
            )));
        }

        let mut elements = Vec::new();
        let mut stamped = Vec::new();
        for ((handle, facts), source) in candidates.into_iter().zip(sources) {
            let text = classifier::extract_text(&facts, &source);
            if text.is_empty() && !FORM_FIELD_TAGS.contains(&facts.tag.as_str()) {
                continue;
            }

            let id = self.registry.register(handle.clone());
            stamped.push((handle, id));
            elements.push(describe(id, &facts, text));
        }

        self.page.mark_detected(&stamped).await?;
        debug!("Snapshot produced {} elements", elements.len());
        Ok(elements)
    }
}

fn describe(id: u32, facts: &NodeFacts, text: String) -> PageElement {
    let attr = |name: &str| facts.attr(name).map(str::to_string);
    PageElement {
        id,
        tag: facts.tag.clone(),
        text,
        attributes: ElementAttributes {
            r#type: attr("type"),
            placeholder: attr("placeholder"),
            aria_label: attr("aria-label"),
            name: attr("name"),
            role: attr("role"),
            href: attr("href"),
            checked: facts.checked,
        },
    }
}
