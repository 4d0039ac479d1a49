//! In-memory stand-ins for the browser and the oracle.

use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::actions::DomEvent;
use crate::agent::oracle::{Decision, DecisionRequest, Oracle};
use crate::classifier::{NodeFacts, Rect, TextSource, Viewport};
use crate::client::{self, Host, TabId};
use crate::dom::{ACTIVE_CLASS, AGENT_ID_ATTR, DETECTED_CLASS, Page, ScrollTo};
use crate::types::AgentError;

const START_URL: &str = "https://example.com/";

const VIEWPORT: Viewport = Viewport {
    width: 1280.0,
    height: 800.0,
};

#[derive(Debug, Clone)]
pub(crate) struct FakeNode {
    pub facts: NodeFacts,
    pub own_text: String,
    pub value: Option<String>,
    parent: Option<usize>,
    children: Vec<usize>,
    classes: BTreeSet<String>,
}

impl FakeNode {
    pub fn new(tag: &str) -> Self {
        Self {
            facts: NodeFacts {
                tag: tag.to_string(),
                rect: Rect {
                    top: 10.0,
                    bottom: 40.0,
                    width: 100.0,
                    height: 30.0,
                },
                ..Default::default()
            },
            own_text: String::new(),
            value: None,
            parent: None,
            children: Vec::new(),
            classes: BTreeSet::new(),
        }
    }

    pub fn link(text: &str, href: &str) -> Self {
        Self::new("a").text(text).attr("href", href)
    }

    pub fn button(text: &str) -> Self {
        Self::new("button").text(text)
    }

    pub fn input(placeholder: &str) -> Self {
        Self::new("input").attr("placeholder", placeholder)
    }

    pub fn text(mut self, text: &str) -> Self {
        self.own_text = text.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.facts
            .attributes
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn pointer(mut self) -> Self {
        self.facts.style.cursor = "pointer".into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.facts.style.display = "none".into();
        self
    }

    pub fn offscreen(mut self) -> Self {
        self.facts.rect.top = VIEWPORT.height + 100.0;
        self.facts.rect.bottom = VIEWPORT.height + 130.0;
        self
    }
}

#[derive(Debug, Default)]
struct FakeDom {
    location: String,
    attached: bool,
    /// Clicking this node loads the given URL.
    load_on_click: Option<(usize, String)>,
    nodes: Vec<FakeNode>,
    events: Vec<(usize, String)>,
    scrolls: Vec<ScrollTo>,
    navigations: Vec<String>,
    dispatch_error: Option<String>,
    snapshot_error: Option<String>,
}

impl FakeDom {
    fn node(&self, idx: usize) -> Result<&FakeNode, AgentError> {
        self.nodes
            .get(idx)
            .ok_or_else(|| AgentError::OperationError(format!("stale handle {idx}")))
    }

    fn node_mut(&mut self, idx: usize) -> Result<&mut FakeNode, AgentError> {
        self.nodes
            .get_mut(idx)
            .ok_or_else(|| AgentError::OperationError(format!("stale handle {idx}")))
    }

    fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack: Vec<usize> = (0..self.nodes.len())
            .filter(|&idx| self.nodes[idx].parent.is_none())
            .rev()
            .collect();
        while let Some(idx) = stack.pop() {
            order.push(idx);
            stack.extend(self.nodes[idx].children.iter().rev());
        }
        order
    }

    fn descendants(&self, idx: usize) -> Vec<usize> {
        let mut found = Vec::new();
        let mut stack: Vec<usize> = self.nodes[idx].children.iter().rev().copied().collect();
        while let Some(child) = stack.pop() {
            found.push(child);
            stack.extend(self.nodes[child].children.iter().rev());
        }
        found
    }

    fn text_source(&self, idx: usize) -> Result<TextSource, AgentError> {
        let node = self.node(idx)?;
        let descendants = self.descendants(idx);

        let inner_text = std::iter::once(idx)
            .chain(descendants.iter().copied())
            .map(|i| self.nodes[i].own_text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let image_alts = descendants
            .iter()
            .map(|&i| &self.nodes[i].facts)
            .filter(|facts| facts.tag == "img")
            .filter_map(|facts| facts.attr("alt"))
            .filter(|alt| !alt.is_empty())
            .map(str::to_string)
            .collect();

        Ok(TextSource {
            value: node.value.clone(),
            selected_option: None,
            inner_text,
            image_alts,
        })
    }

    fn log(&mut self, idx: usize, entry: impl Into<String>) {
        self.events.push((idx, entry.into()));
    }

    fn load(&mut self, url: &str) {
        self.location = url.to_string();
        self.attached = false;
    }
}

/// A DOM tree whose handles are node indices.
#[derive(Debug, Clone)]
pub(crate) struct FakePage {
    dom: Arc<Mutex<FakeDom>>,
}

impl FakePage {
    pub fn new() -> Self {
        let dom = FakeDom {
            location: START_URL.to_string(),
            ..Default::default()
        };
        Self {
            dom: Arc::new(Mutex::new(dom)),
        }
    }

    /// Sets the marker a host leaves on the document when it attaches.
    pub fn mark_attached(&self) {
        self.dom.lock().unwrap().attached = true;
    }

    /// Replaces the document, as a navigation does. Nodes stay for simplicity.
    pub fn load(&self, url: &str) {
        self.dom.lock().unwrap().load(url);
    }

    pub fn load_on_click(&self, idx: usize, url: &str) {
        self.dom.lock().unwrap().load_on_click = Some((idx, url.to_string()));
    }

    pub fn location(&self) -> String {
        self.dom.lock().unwrap().location.clone()
    }

    /// Appends `node` under `parent` and returns its handle.
    pub fn add(&self, parent: Option<usize>, mut node: FakeNode) -> usize {
        let mut dom = self.dom.lock().unwrap();
        let idx = dom.nodes.len();
        node.parent = parent;
        dom.nodes.push(node);
        if let Some(parent) = parent {
            dom.nodes[parent].children.push(idx);
        }
        idx
    }

    pub fn update(&self, idx: usize, change: impl FnOnce(&mut FakeNode)) {
        change(&mut self.dom.lock().unwrap().nodes[idx]);
    }

    pub fn agent_id(&self, idx: usize) -> Option<u32> {
        let dom = self.dom.lock().unwrap();
        dom.nodes[idx].facts.attr(AGENT_ID_ATTR)?.parse().ok()
    }

    pub fn has_class(&self, idx: usize, class: &str) -> bool {
        self.dom.lock().unwrap().nodes[idx].classes.contains(class)
    }

    pub fn value(&self, idx: usize) -> Option<String> {
        self.dom.lock().unwrap().nodes[idx].value.clone()
    }

    pub fn events_on(&self, idx: usize) -> Vec<String> {
        self.dom
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|(node, _)| *node == idx)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub fn scrolls(&self) -> Vec<ScrollTo> {
        self.dom.lock().unwrap().scrolls.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.dom.lock().unwrap().navigations.clone()
    }

    pub fn fail_dispatch(&self, message: &str) {
        self.dom.lock().unwrap().dispatch_error = Some(message.to_string());
    }

    pub fn fail_snapshot(&self, message: &str) {
        self.dom.lock().unwrap().snapshot_error = Some(message.to_string());
    }
}

#[async_trait]
impl Page for FakePage {
    type Handle = usize;

    async fn is_attached(&self) -> Result<bool, AgentError> {
        Ok(self.dom.lock().unwrap().attached)
    }

    async fn viewport(&self) -> Result<Viewport, AgentError> {
        Ok(VIEWPORT)
    }

    async fn elements(&self) -> Result<Vec<(usize, NodeFacts)>, AgentError> {
        let dom = self.dom.lock().unwrap();
        if let Some(message) = &dom.snapshot_error {
            return Err(AgentError::DomExtractionError(message.clone()));
        }
        Ok(dom
            .preorder()
            .into_iter()
            .map(|idx| (idx, dom.nodes[idx].facts.clone()))
            .collect())
    }

    async fn facts(&self, node: &usize) -> Result<NodeFacts, AgentError> {
        Ok(self.dom.lock().unwrap().node(*node)?.facts.clone())
    }

    async fn text_sources(&self, nodes: &[usize]) -> Result<Vec<TextSource>, AgentError> {
        let dom = self.dom.lock().unwrap();
        nodes.iter().map(|&idx| dom.text_source(idx)).collect()
    }

    async fn find_by_agent_id(&self, id: u32) -> Result<Option<usize>, AgentError> {
        let dom = self.dom.lock().unwrap();
        let wanted = id.to_string();
        Ok(dom
            .nodes
            .iter()
            .position(|node| node.facts.attr(AGENT_ID_ATTR) == Some(wanted.as_str())))
    }

    async fn closest_clickable(&self, node: &usize) -> Result<Option<usize>, AgentError> {
        let dom = self.dom.lock().unwrap();
        let mut current = Some(*node);
        while let Some(idx) = current {
            let facts = &dom.node(idx)?.facts;
            if matches!(facts.tag.as_str(), "a" | "button" | "input")
                || facts.attr("role") == Some("button")
            {
                return Ok(Some(idx));
            }
            current = dom.nodes[idx].parent;
        }
        Ok(None)
    }

    async fn mark_detected(&self, stamped: &[(usize, u32)]) -> Result<(), AgentError> {
        let mut dom = self.dom.lock().unwrap();
        for (idx, id) in stamped {
            let node = dom.node_mut(*idx)?;
            node.facts
                .attributes
                .insert(AGENT_ID_ATTR.to_string(), id.to_string());
            node.classes.insert(DETECTED_CLASS.to_string());
        }
        Ok(())
    }

    async fn clear_detected(&self) -> Result<(), AgentError> {
        for node in &mut self.dom.lock().unwrap().nodes {
            node.classes.remove(DETECTED_CLASS);
        }
        Ok(())
    }

    async fn set_active(&self, node: &usize, active: bool) -> Result<(), AgentError> {
        let mut dom = self.dom.lock().unwrap();
        let classes = &mut dom.node_mut(*node)?.classes;
        if active {
            classes.insert(ACTIVE_CLASS.to_string());
        } else {
            classes.remove(ACTIVE_CLASS);
        }
        Ok(())
    }

    async fn scroll_into_view(&self, node: &usize) -> Result<(), AgentError> {
        self.dom.lock().unwrap().log(*node, "scrollIntoView");
        Ok(())
    }

    async fn focus(&self, node: &usize) -> Result<(), AgentError> {
        self.dom.lock().unwrap().log(*node, "focus");
        Ok(())
    }

    async fn dispatch(&self, node: &usize, event: DomEvent) -> Result<(), AgentError> {
        let mut dom = self.dom.lock().unwrap();
        if let Some(message) = &dom.dispatch_error {
            return Err(AgentError::OperationError(message.clone()));
        }
        dom.log(*node, event.event_type());
        if event == DomEvent::Click {
            if let Some((target, url)) = dom.load_on_click.clone() {
                if target == *node {
                    dom.load(&url);
                }
            }
        }
        Ok(())
    }

    async fn set_native_value(&self, node: &usize, value: &str) -> Result<(), AgentError> {
        let mut dom = self.dom.lock().unwrap();
        dom.node_mut(*node)?.value = Some(value.to_string());
        dom.log(*node, format!("value={value}"));
        Ok(())
    }

    async fn scroll(&self, to: ScrollTo) -> Result<(), AgentError> {
        self.dom.lock().unwrap().scrolls.push(to);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        self.dom.lock().unwrap().navigations.push(url.to_string());
        Ok(())
    }
}

#[derive(Debug)]
struct HostState {
    tab: Option<TabId>,
    attach_error: Option<String>,
    failing_captures: usize,
    navigations: Vec<String>,
    attach_count: usize,
}

/// A browser with a single tab showing `page`.
#[derive(Debug)]
pub(crate) struct FakeHost {
    page: FakePage,
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new(page: FakePage) -> Self {
        Self {
            page,
            state: Mutex::new(HostState {
                tab: Some(TabId::from("tab-1")),
                attach_error: None,
                failing_captures: 0,
                navigations: Vec::new(),
                attach_count: 0,
            }),
        }
    }

    pub fn close_tab(&self) {
        self.state.lock().unwrap().tab = None;
    }

    pub fn refuse_attach(&self, message: &str) {
        self.state.lock().unwrap().attach_error = Some(message.to_string());
    }

    /// Makes the next `count` screenshot captures fail.
    pub fn fail_captures(&self, count: usize) {
        self.state.lock().unwrap().failing_captures = count;
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn attach_count(&self) -> usize {
        self.state.lock().unwrap().attach_count
    }
}

#[async_trait]
impl Host for FakeHost {
    type Page = FakePage;

    async fn active_tab(&self) -> Result<Option<TabId>, AgentError> {
        Ok(self.state.lock().unwrap().tab.clone())
    }

    async fn attach(&self, _tab: &TabId) -> Result<FakePage, AgentError> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.attach_error {
            return Err(AgentError::OperationError(message.clone()));
        }
        let location = self.page.location();
        if let Ok(url) = url::Url::parse(&location) {
            if !client::is_scriptable(&url) {
                return Err(AgentError::OperationError(format!(
                    "cannot script pages at {url}"
                )));
            }
        }
        state.attach_count += 1;
        self.page.mark_attached();
        Ok(self.page.clone())
    }

    async fn capture_visible_tab(&self, _tab: &TabId) -> Result<String, AgentError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_captures > 0 {
            state.failing_captures -= 1;
            return Err(AgentError::OperationError("capture failed".into()));
        }
        Ok("data:image/png;base64,iVBORw0KGgo=".to_string())
    }

    async fn navigate(&self, _tab: &TabId, url: &str) -> Result<(), AgentError> {
        self.state.lock().unwrap().navigations.push(url.to_string());
        self.page.load(url);
        Ok(())
    }
}

/// Replays canned decisions and records every request it was asked about.
#[derive(Debug, Default)]
pub(crate) struct ScriptedOracle {
    script: Mutex<VecDeque<Result<Decision, AgentError>>>,
    fallback: Option<Decision>,
    requests: Mutex<Vec<DecisionRequest>>,
    asked_at: Mutex<Vec<Instant>>,
    cancel: Option<CancellationToken>,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Result<Decision, AgentError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Answers `decision` forever.
    pub fn repeating(decision: Decision) -> Self {
        Self {
            fallback: Some(decision),
            ..Default::default()
        }
    }

    /// Cancels `token` while answering the first request.
    pub fn cancel_on_call(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Gaps between consecutive requests.
    pub fn intervals(&self) -> Vec<std::time::Duration> {
        self.asked_at
            .lock()
            .unwrap()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, AgentError> {
        self.requests.lock().unwrap().push(request.clone());
        self.asked_at.lock().unwrap().push(Instant::now());
        if let Some(token) = &self.cancel {
            token.cancel();
        }

        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(decision)) => Ok(decision.clone()),
            (None, None) => Err(AgentError::OracleError("script exhausted".into())),
        }
    }
}
