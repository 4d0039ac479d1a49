//! Request/response protocol between the orchestration loop and the agent
//! living inside a page.
//!
//! Messages cross the boundary as JSON values, one request at a time, the same
//! way an extension talks to its content script.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::actions::PageAction;
use crate::dom::{Page, SnapshotBuilder};
use crate::executor::ActionExecutor;
use crate::types::{AgentError, ExecutorTimings, PageElement};

const PONG: &str = "PONG";
const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeRequest {
    Control(ControlMessage),
    Action(PageAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "GET_DOM")]
    GetDom,
}

impl BridgeRequest {
    pub fn ping() -> Self {
        BridgeRequest::Control(ControlMessage::Ping)
    }

    pub fn get_dom() -> Self {
        BridgeRequest::Control(ControlMessage::GetDom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeResponse {
    Pong(String),
    Dom(Vec<PageElement>),
    Status { status: String },
    Failure { error: String },
}

/// Page-side half of the bridge: owns the snapshot registry and the executor.
pub struct PageAgent<P: Page> {
    page: P,
    snapshots: SnapshotBuilder<P>,
    executor: ActionExecutor<P>,
}

impl<P: Page> PageAgent<P> {
    pub fn new(page: P, timings: ExecutorTimings) -> Self {
        Self {
            executor: ActionExecutor::new(page.clone(), timings),
            snapshots: SnapshotBuilder::new(page.clone()),
            page,
        }
    }

    pub async fn handle(&mut self, request: BridgeRequest) -> BridgeResponse {
        match request {
            BridgeRequest::Control(ControlMessage::Ping) => match self.page.is_attached().await {
                Ok(true) => BridgeResponse::Pong(PONG.to_string()),
                Ok(false) => BridgeResponse::Failure {
                    error: "page agent is not attached to this document".into(),
                },
                Err(e) => BridgeResponse::Failure {
                    error: e.to_string(),
                },
            },
            BridgeRequest::Control(ControlMessage::GetDom) => match self.snapshots.snapshot().await {
                Ok(elements) => BridgeResponse::Dom(elements),
                Err(e) => BridgeResponse::Failure {
                    error: e.to_string(),
                },
            },
            BridgeRequest::Action(action) => BridgeResponse::Status {
                status: self
                    .executor
                    .execute(self.snapshots.registry(), &action)
                    .await,
            },
        }
    }

    async fn handle_raw(&mut self, message: Value) -> Value {
        let response = match serde_json::from_value::<BridgeRequest>(message) {
            Ok(request) => self.handle(request).await,
            Err(e) => BridgeResponse::Failure {
                error: format!("Unrecognised message: {e}"),
            },
        };
        serde_json::to_value(&response).unwrap_or_else(|e| {
            serde_json::json!({ "error": format!("Unserialisable response: {e}") })
        })
    }
}

struct Envelope {
    message: Value,
    reply: oneshot::Sender<Value>,
}

/// Starts the page agent on its own task and returns the loop-side handle.
///
/// The agent stops once every client clone has been dropped.
pub fn serve<P: Page>(mut agent: PageAgent<P>) -> BridgeClient {
    let (tx, mut rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let response = agent.handle_raw(envelope.message).await;
            if envelope.reply.send(response).is_err() {
                debug!("Bridge caller went away before the reply");
            }
        }
        debug!("Page agent stopped");
    });
    BridgeClient { tx }
}

/// Loop-side handle for talking to a page agent.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    tx: mpsc::Sender<Envelope>,
}

impl BridgeClient {
    pub async fn request(&self, request: &BridgeRequest) -> Result<BridgeResponse, AgentError> {
        let message = serde_json::to_value(request)
            .map_err(|e| AgentError::BridgeError(format!("cannot encode request: {e}")))?;
        let (reply, response) = oneshot::channel();

        self.tx
            .send(Envelope { message, reply })
            .await
            .map_err(|_| {
                AgentError::BridgeError(
                    "Could not establish connection. Receiving end does not exist.".into(),
                )
            })?;
        let value = response.await.map_err(|_| {
            AgentError::BridgeError("The page closed before a response was received.".into())
        })?;

        serde_json::from_value(value)
            .map_err(|e| AgentError::BridgeError(format!("malformed response: {e}")))
    }

    /// Liveness probe that reaches into the live document, so a page replaced
    /// by navigation answers with an error.
    pub async fn ping(&self) -> Result<(), AgentError> {
        match self.request(&BridgeRequest::ping()).await? {
            BridgeResponse::Pong(reply) if reply == PONG => Ok(()),
            BridgeResponse::Failure { error } => Err(AgentError::BridgeError(error)),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn get_dom(&self) -> Result<Vec<PageElement>, AgentError> {
        match self.request(&BridgeRequest::get_dom()).await? {
            BridgeResponse::Dom(elements) => Ok(elements),
            BridgeResponse::Failure { error } => Err(AgentError::DomExtractionError(error)),
            other => Err(unexpected(&other)),
        }
    }

    /// Runs one page action and returns the executor's status string.
    pub async fn act(&self, action: PageAction) -> Result<String, AgentError> {
        match self.request(&BridgeRequest::Action(action)).await? {
            BridgeResponse::Status { status } => Ok(status),
            BridgeResponse::Failure { error } => Ok(format!("Error: {error}")),
            other => Err(unexpected(&other)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn unexpected(response: &BridgeResponse) -> AgentError {
    warn!("Unexpected bridge response: {response:?}");
    AgentError::BridgeError(format!("unexpected response: {response:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionKind;
    use crate::testing::{FakeNode, FakePage};
    use serde_json::json;

    fn page_with_button() -> FakePage {
        let page = FakePage::new();
        let body = page.add(None, FakeNode::new("body"));
        page.add(Some(body), FakeNode::button("Log In"));
        page.mark_attached();
        page
    }

    #[test]
    fn requests_use_extension_wire_format() {
        assert_eq!(
            serde_json::to_value(BridgeRequest::ping()).unwrap(),
            json!({"type": "PING"})
        );
        assert_eq!(
            serde_json::to_value(BridgeRequest::get_dom()).unwrap(),
            json!({"type": "GET_DOM"})
        );

        let parsed: BridgeRequest =
            serde_json::from_value(json!({"type": "click", "id": 3})).unwrap();
        assert_eq!(
            parsed,
            BridgeRequest::Action(PageAction::new(ActionKind::Click, Some(3), None))
        );
    }

    #[test]
    fn responses_use_extension_wire_format() {
        assert_eq!(
            serde_json::to_value(BridgeResponse::Pong(PONG.into())).unwrap(),
            json!("PONG")
        );
        let status: BridgeResponse = serde_json::from_value(json!({"status": "Done"})).unwrap();
        assert_eq!(
            status,
            BridgeResponse::Status {
                status: "Done".into()
            }
        );
        let empty: BridgeResponse = serde_json::from_value(json!([])).unwrap();
        assert_eq!(empty, BridgeResponse::Dom(vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_through_served_agent() {
        let page = page_with_button();
        let bridge = serve(PageAgent::new(page.clone(), ExecutorTimings::default()));

        bridge.ping().await.unwrap();
        let dom = bridge.get_dom().await.unwrap();
        assert_eq!(dom.len(), 1);
        assert_eq!(dom[0].text, "Log In");

        let status = bridge
            .act(PageAction::new(ActionKind::Click, Some(1), None))
            .await
            .unwrap();
        assert_eq!(status, "Done");

        let stale = bridge
            .act(PageAction::new(ActionKind::Click, Some(7), None))
            .await
            .unwrap();
        assert_eq!(stale, "Error: Element ID 7 not found (stale DOM?)");
    }

    #[tokio::test]
    async fn ping_fails_once_the_document_is_replaced() {
        let page = page_with_button();
        let bridge = serve(PageAgent::new(page.clone(), ExecutorTimings::default()));
        bridge.ping().await.unwrap();

        page.load("https://example.com/next");

        match bridge.ping().await {
            Err(AgentError::BridgeError(message)) => assert!(message.contains("not attached")),
            other => panic!("unexpected ping result {other:?}"),
        }
        assert!(!bridge.is_closed());
    }

    #[tokio::test]
    async fn undecodable_message_gets_error_reply() {
        let mut agent = PageAgent::new(page_with_button(), ExecutorTimings::default());
        let reply = agent.handle_raw(json!({"id": 3, "text": "hi"})).await;
        assert!(reply["error"].as_str().unwrap().starts_with("Unrecognised message"));
    }

    #[tokio::test]
    async fn snapshot_failure_surfaces_as_extraction_error() {
        let page = page_with_button();
        page.fail_snapshot("layout thrashing");
        let bridge = serve(PageAgent::new(page, ExecutorTimings::default()));

        let err = bridge.get_dom().await.unwrap_err();
        assert!(matches!(err, AgentError::DomExtractionError(_)));
    }

    #[tokio::test]
    async fn dropped_page_agent_is_unreachable() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let bridge = BridgeClient { tx };

        assert!(bridge.is_closed());
        assert!(matches!(
            bridge.ping().await,
            Err(AgentError::BridgeError(_))
        ));
    }
}
