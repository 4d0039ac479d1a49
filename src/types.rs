use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio::time::Duration;

//
// ---------- Error Types ----------
//
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("WebDriver connection failed: {0}")]
    ConnectionError(String),

    #[error("Browser operation failed: {0}")]
    OperationError(String),

    #[error("Invalid agent configuration: {0}")]
    ConfigError(String),

    #[error("Failed to extract elements: {0}")]
    DomExtractionError(String),

    #[error("Page bridge unavailable: {0}")]
    BridgeError(String),

    #[error("Decision oracle failed: {0}")]
    OracleError(String),

    #[error("No active tab")]
    NoActiveSurface,

    #[error("A confirmation is already pending: {0}")]
    ConfirmationPending(String),

    #[error("Confirmation was abandoned before a decision was made")]
    ConfirmationDropped,
}

//
// ---------- DOM Types ----------
//

/// One interactive element of a snapshot, as reported to the oracle.
///
/// The `id` is only meaningful against the registry of the snapshot that issued it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageElement {
    pub id: u32,
    pub tag: String,
    pub text: String,
    pub attributes: ElementAttributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementAttributes {
    pub r#type: Option<String>,
    pub placeholder: Option<String>,
    pub aria_label: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub href: Option<String>,
    pub checked: Option<bool>,
}

//
// ---------- Browser Config ----------
//
/// Configuration options for initializing a browser session.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserOptions {
    /// Whether the browser should run in headless mode.
    pub headless: bool,
    /// Optional window dimensions (width, height).
    pub window_size: Option<(u32, u32)>,
    /// Optional proxy URL to use for HTTP/HTTPS traffic.
    pub proxy: Option<String>,
    /// Optional user agent string override.
    pub user_agent: Option<String>,
    pub webdriver_url: String,
    /// When set, every visual capture is also written here.
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: false,
            window_size: Some((1920, 1080)),
            proxy: None,
            user_agent: None,
            webdriver_url: "http://localhost:4444".to_string(),
            screenshot_dir: None,
        }
    }
}

impl BrowserOptions {
    /// Creates a new `BrowserOptions` instance with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets headless mode (true = no UI).
    pub fn headless(mut self, enabled: bool) -> Self {
        self.headless = enabled;
        self
    }

    /// Sets the browser window size.
    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = Some((width, height));
        self
    }

    /// Sets a proxy server for the browser session.
    pub fn proxy(mut self, proxy_url: &str) -> Self {
        self.proxy = Some(proxy_url.to_string());
        self
    }

    /// Overrides the browser's default user agent string.
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }

    /// Sets the WebDriver server to connect to.
    pub fn webdriver_url(mut self, url: &str) -> Self {
        self.webdriver_url = url.to_string();
        self
    }

    /// Saves every captured screenshot into `dir` as well.
    pub fn screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = Some(dir.into());
        self
    }
}

//
// ---------- Agent Config ----------
//

/// Fixed waits the page-side executor inserts around an action.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExecutorTimings {
    pub scroll_settle: Duration,
    pub focus_settle: Duration,
    pub highlight_linger: Duration,
}

impl Default for ExecutorTimings {
    fn default() -> Self {
        Self {
            scroll_settle: Duration::from_millis(800),
            focus_settle: Duration::from_millis(600),
            highlight_linger: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOptions {
    pub max_steps: usize,
    pub history_window: usize,
    pub bridge_settle: Duration,
    pub snapshot_retry_delay: Duration,
    pub memory_settle: Duration,
    pub navigation_settle: Duration,
    pub scroll_settle: Duration,
    pub action_settle: Duration,
    pub executor: ExecutorTimings,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_steps: 30,
            history_window: 5,
            bridge_settle: Duration::from_millis(500),
            snapshot_retry_delay: Duration::from_millis(1000),
            memory_settle: Duration::from_millis(500),
            navigation_settle: Duration::from_millis(5000),
            scroll_settle: Duration::from_millis(1500),
            action_settle: Duration::from_millis(2500),
            executor: ExecutorTimings::default(),
        }
    }
}

impl AgentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of loop iterations per run.
    pub fn max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }

    /// Number of recent actions sent to the oracle each step.
    pub fn history_window(mut self, entries: usize) -> Self {
        self.history_window = entries;
        self
    }

    pub fn navigation_settle(mut self, millis: u64) -> Self {
        self.navigation_settle = Duration::from_millis(millis);
        self
    }

    pub fn action_settle(mut self, millis: u64) -> Self {
        self.action_settle = Duration::from_millis(millis);
        self
    }

    pub fn scroll_settle(mut self, millis: u64) -> Self {
        self.scroll_settle = Duration::from_millis(millis);
        self
    }

    pub fn executor(mut self, timings: ExecutorTimings) -> Self {
        self.executor = timings;
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_steps == 0 {
            return Err(AgentError::ConfigError(
                "max_steps must be at least 1".into(),
            ));
        }
        if self.history_window == 0 {
            return Err(AgentError::ConfigError(
                "history_window must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
