use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Local;
use fantoccini::{
    Client, ClientBuilder,
    wd::{Capabilities, WindowHandle},
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::actions::{DomEvent, EventFamily};
use crate::classifier::{NodeFacts, TextSource, Viewport};
use crate::dom::{Page, ScrollTo};
use crate::js;
use crate::types::{AgentError, BrowserOptions};

/// URL schemes a page agent may be attached to.
const SCRIPTABLE_SCHEMES: &[&str] = &["http", "https", "file"];

/// Opaque identifier of one browser tab.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(String);

impl TabId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TabId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<WindowHandle> for TabId {
    fn from(handle: WindowHandle) -> Self {
        Self(String::from(handle))
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tab-level browser operations the orchestration loop relies on.
#[async_trait]
pub trait Host: Send + Sync {
    type Page: Page;

    async fn active_tab(&self) -> Result<Option<TabId>, AgentError>;

    /// Prepares `tab` for a page agent. Fails for pages that cannot be scripted.
    async fn attach(&self, tab: &TabId) -> Result<Self::Page, AgentError>;

    /// PNG of the visible viewport as a `data:` URL.
    async fn capture_visible_tab(&self, tab: &TabId) -> Result<String, AgentError>;

    async fn navigate(&self, tab: &TabId, url: &str) -> Result<(), AgentError>;
}

/// High-level browser automation client powered by 'fantoccini'.
#[derive(Clone)]
pub struct BrowserClient {
    /// The underlying WebDriver client instance.
    pub client: Client,
    /// Configuration options used to initialize the browser.
    options: BrowserOptions,
}

impl BrowserClient {
    /// Connects to the WebDriver server with the given options and returns a `BrowserClient`.
    pub async fn connect(options: BrowserOptions) -> Result<Self, AgentError> {
        let mut caps = Capabilities::new();

        let mut firefox_options = json!({
            "args": if options.headless {
                vec!["-headless"]
            } else {
                vec![]
            }
        });

        if let Some(ua) = &options.user_agent {
            firefox_options["prefs"] = json!({
                "general.useragent.override": ua
            });
        }

        caps.insert("moz:firefoxOptions".to_string(), firefox_options);

        if let Some(proxy) = &options.proxy {
            caps.insert(
                "proxy".to_string(),
                json!({
                    "proxyType": "manual",
                    "httpProxy": proxy,
                    "sslProxy" : proxy
                }),
            );
        }

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&options.webdriver_url)
            .await
            .map_err(|e| AgentError::ConnectionError(e.to_string()))?;

        if let Some((width, height)) = options.window_size {
            client
                .set_window_size(width, height)
                .await
                .map_err(|e| AgentError::OperationError(e.to_string()))?;
        }

        info!("Connected to WebDriver at {}", options.webdriver_url);
        Ok(Self { client, options })
    }

    /// Navigates the current tab to the given URL.
    pub async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        self.client
            .goto(url)
            .await
            .map_err(|e| AgentError::OperationError(e.to_string()))
    }

    /// Pushes a new message into the floating progress panel of the current page.
    pub async fn push_browser_log(&self, message: &str) -> Result<(), AgentError> {
        self.client
            .execute(js::PUSH_LOG, vec![json!(message)])
            .await
            .map(|_| ())
            .map_err(|e| AgentError::OperationError(format!("Failed to push browser log: {e}")))
    }

    /// Shuts down the browser session and closes the webdriver.
    pub async fn shutdown(self) -> Result<(), AgentError> {
        self.client
            .close()
            .await
            .map_err(|e| AgentError::OperationError(e.to_string()))
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>, AgentError> {
        self.client
            .screenshot()
            .await
            .map_err(|e| AgentError::OperationError(e.to_string()))
    }

    /// Makes `tab` the window WebDriver commands apply to.
    async fn focus_tab(&self, tab: &TabId) -> Result<(), AgentError> {
        let current = self
            .client
            .window()
            .await
            .map_err(|e| AgentError::OperationError(e.to_string()))?;
        if TabId::from(current) == *tab {
            return Ok(());
        }

        let handle = WindowHandle::try_from(tab.as_str().to_string())
            .map_err(|e| AgentError::OperationError(e.to_string()))?;
        self.client
            .switch_to_window(handle)
            .await
            .map_err(|e| AgentError::OperationError(e.to_string()))
    }
}

fn save_png(output_dir: &Path, prefix: &str, png_data: &[u8]) -> Result<PathBuf, AgentError> {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S%.3f");
    let path = output_dir.join(format!("{prefix}-{timestamp}.png"));
    fs::write(&path, png_data).map_err(|e| AgentError::OperationError(e.to_string()))?;
    Ok(path)
}

/// Whether a page agent can run on `url`.
pub fn is_scriptable(url: &url::Url) -> bool {
    SCRIPTABLE_SCHEMES.contains(&url.scheme()) || url.as_str() == "about:blank"
}

#[async_trait]
impl Host for BrowserClient {
    type Page = WebDriverPage;

    async fn active_tab(&self) -> Result<Option<TabId>, AgentError> {
        match self.client.window().await {
            Ok(handle) => Ok(Some(TabId::from(handle))),
            Err(e) => {
                warn!("No current window: {e}");
                Ok(None)
            }
        }
    }

    async fn attach(&self, tab: &TabId) -> Result<WebDriverPage, AgentError> {
        self.focus_tab(tab).await?;
        let url = self
            .client
            .current_url()
            .await
            .map_err(|e| AgentError::OperationError(e.to_string()))?;
        if !is_scriptable(&url) {
            return Err(AgentError::OperationError(format!(
                "cannot script pages at {url}"
            )));
        }

        let page = WebDriverPage {
            client: self.client.clone(),
        };
        page.run(&js::attach_page(), vec![]).await?;
        debug!("Attached to {url}");
        Ok(page)
    }

    async fn capture_visible_tab(&self, tab: &TabId) -> Result<String, AgentError> {
        self.focus_tab(tab).await?;
        let png_data = self.screenshot_png().await?;
        if let Some(dir) = &self.options.screenshot_dir {
            match save_png(dir, "step", &png_data) {
                Ok(path) => debug!("Saved screenshot to {}", path.display()),
                Err(e) => warn!("Could not save screenshot: {e}"),
            }
        }
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png_data)))
    }

    async fn navigate(&self, tab: &TabId, url: &str) -> Result<(), AgentError> {
        self.focus_tab(tab).await?;
        BrowserClient::navigate(self, url).await
    }
}

/// A live page reached through WebDriver script execution.
///
/// Handles are W3C element references, which WebDriver turns back into nodes
/// when they are passed as script arguments.
#[derive(Clone)]
pub struct WebDriverPage {
    client: Client,
}

#[derive(Deserialize)]
struct Collected {
    node: Value,
    facts: NodeFacts,
}

impl WebDriverPage {
    async fn run(&self, script: &str, args: Vec<Value>) -> Result<Value, AgentError> {
        self.client
            .execute(script, args)
            .await
            .map_err(|e| AgentError::OperationError(e.to_string()))
    }

    async fn run_on(&self, script: &str, node: &Value, mut extra: Vec<Value>) -> Result<Value, AgentError> {
        extra.insert(0, node.clone());
        self.run(script, extra).await
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, AgentError> {
    serde_json::from_value(value).map_err(|e| AgentError::DomExtractionError(e.to_string()))
}

fn element_or_none(value: Value) -> Option<Value> {
    (!value.is_null()).then_some(value)
}

fn family_name(event: DomEvent) -> &'static str {
    match event.family() {
        EventFamily::Mouse => "mouse",
        EventFamily::Keyboard => "keyboard",
        EventFamily::Plain => "plain",
    }
}

#[async_trait]
impl Page for WebDriverPage {
    type Handle = Value;

    async fn is_attached(&self) -> Result<bool, AgentError> {
        Ok(self.run(js::IS_ATTACHED, vec![]).await?.as_bool().unwrap_or(false))
    }

    async fn viewport(&self) -> Result<Viewport, AgentError> {
        decode(self.run(js::VIEWPORT, vec![]).await?)
    }

    async fn elements(&self) -> Result<Vec<(Value, NodeFacts)>, AgentError> {
        let collected: Vec<Collected> = decode(self.run(&js::collect_elements(), vec![]).await?)?;
        Ok(collected.into_iter().map(|c| (c.node, c.facts)).collect())
    }

    async fn facts(&self, node: &Value) -> Result<NodeFacts, AgentError> {
        decode(self.run_on(&js::describe_node(), node, vec![]).await?)
    }

    async fn text_sources(&self, nodes: &[Value]) -> Result<Vec<TextSource>, AgentError> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        decode(self.run(js::TEXT_SOURCES, vec![Value::Array(nodes.to_vec())]).await?)
    }

    async fn find_by_agent_id(&self, id: u32) -> Result<Option<Value>, AgentError> {
        let found = self.run(&js::find_by_agent_id(), vec![json!(id)]).await?;
        Ok(element_or_none(found))
    }

    async fn closest_clickable(&self, node: &Value) -> Result<Option<Value>, AgentError> {
        let found = self.run_on(js::CLOSEST_CLICKABLE, node, vec![]).await?;
        Ok(element_or_none(found))
    }

    async fn mark_detected(&self, stamped: &[(Value, u32)]) -> Result<(), AgentError> {
        let pairs: Vec<Value> = stamped
            .iter()
            .map(|(node, id)| json!([node, id]))
            .collect();
        self.run(&js::mark_detected(), vec![Value::Array(pairs)])
            .await
            .map(|_| ())
    }

    async fn clear_detected(&self) -> Result<(), AgentError> {
        self.run(&js::clear_detected(), vec![]).await.map(|_| ())
    }

    async fn set_active(&self, node: &Value, active: bool) -> Result<(), AgentError> {
        self.run_on(&js::set_active(), node, vec![json!(active)])
            .await
            .map(|_| ())
    }

    async fn scroll_into_view(&self, node: &Value) -> Result<(), AgentError> {
        self.run_on(js::SCROLL_INTO_VIEW, node, vec![]).await.map(|_| ())
    }

    async fn focus(&self, node: &Value) -> Result<(), AgentError> {
        self.run_on(js::FOCUS, node, vec![]).await.map(|_| ())
    }

    async fn dispatch(&self, node: &Value, event: DomEvent) -> Result<(), AgentError> {
        let args = vec![json!(event.event_type()), json!(family_name(event))];
        self.run_on(js::DISPATCH_EVENT, node, args).await.map(|_| ())
    }

    async fn set_native_value(&self, node: &Value, value: &str) -> Result<(), AgentError> {
        self.run_on(js::SET_NATIVE_VALUE, node, vec![json!(value)])
            .await
            .map(|_| ())
    }

    async fn scroll(&self, to: ScrollTo) -> Result<(), AgentError> {
        let result = match to {
            ScrollTo::By(pixels) => self.run(js::SCROLL_BY, vec![json!(pixels)]).await,
            ScrollTo::Top => self.run(js::SCROLL_TO_TOP, vec![]).await,
            ScrollTo::Bottom => self.run(js::SCROLL_TO_BOTTOM, vec![]).await,
        };
        result.map(|_| ())
    }

    async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        self.client
            .goto(url)
            .await
            .map_err(|e| AgentError::OperationError(e.to_string()))
    }
}
