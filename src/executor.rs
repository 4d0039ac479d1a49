use log::{debug, info, warn};
use tokio::time::sleep;

use crate::actions::{ActionKind, CLICK_SEQUENCE, DomEvent, ENTER_SEQUENCE, PageAction, ScrollDirection};
use crate::classifier;
use crate::dom::{ElementRegistry, Page, ScrollTo};
use crate::types::{AgentError, ExecutorTimings};

/// Share of the viewport height scrolled by one `up`/`down` step.
const SCROLL_FRACTION: f64 = 0.8;

/// Performs page actions against the live registry.
///
/// `execute` never fails: every problem is reported as a status string starting
/// with `Error`, which callers fold into history.
pub struct ActionExecutor<P: Page> {
    page: P,
    timings: ExecutorTimings,
}

impl<P: Page> ActionExecutor<P> {
    pub fn new(page: P, timings: ExecutorTimings) -> Self {
        Self { page, timings }
    }

    pub async fn execute(&self, registry: &ElementRegistry<P::Handle>, action: &PageAction) -> String {
        match action.kind {
            ActionKind::Scroll => return self.scroll(action.text.as_deref()).await,
            ActionKind::OpenUrl => return self.open_url(action.text.as_deref()).await,
            kind if !kind.targets_element() => {
                return format!("Error: Unsupported page action {kind}");
            }
            _ => {}
        }

        let Some(id) = action.id else {
            return format!("Error: Missing element ID for {}", action.kind);
        };
        let Some(mut node) = self.resolve(registry, id).await else {
            return format!("Error: Element ID {id} not found (stale DOM?)");
        };

        if action.kind == ActionKind::Click {
            node = self.retarget_click(node).await;
        }

        let result = self.perform(action, &node).await;
        self.release_highlight(node);

        match result {
            Ok(()) => "Done".to_string(),
            Err(e) => format!("Error executing {}: {}", action.kind, e),
        }
    }

    async fn resolve(&self, registry: &ElementRegistry<P::Handle>, id: u32) -> Option<P::Handle> {
        if let Some(node) = registry.get(id) {
            return Some(node.clone());
        }
        match self.page.find_by_agent_id(id).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Lookup of element {id} by attribute failed: {e}");
                None
            }
        }
    }

    /// Oracles often pick a decorative child (an icon, a span) of the real control.
    async fn retarget_click(&self, node: P::Handle) -> P::Handle {
        let interactive = match self.page.facts(&node).await {
            Ok(facts) => classifier::is_interactive(&facts),
            Err(_) => return node,
        };
        if interactive {
            return node;
        }
        match self.page.closest_clickable(&node).await {
            Ok(Some(parent)) => {
                info!("Auto-corrected click target to parent interactive element");
                parent
            }
            _ => node,
        }
    }

    async fn perform(&self, action: &PageAction, node: &P::Handle) -> Result<(), AgentError> {
        self.page.scroll_into_view(node).await?;
        self.page.set_active(node, true).await?;
        sleep(self.timings.focus_settle).await;

        match action.kind {
            ActionKind::Click => {
                self.page.focus(node).await?;
                self.dispatch_all(node, &CLICK_SEQUENCE).await
            }
            ActionKind::Type => {
                self.page.focus(node).await?;
                self.page
                    .set_native_value(node, action.text.as_deref().unwrap_or_default())
                    .await?;
                self.dispatch_all(node, &[DomEvent::Input, DomEvent::Change, DomEvent::Blur])
                    .await
            }
            ActionKind::PressEnter => {
                self.page.focus(node).await?;
                self.dispatch_all(node, &ENTER_SEQUENCE).await
            }
            _ => Ok(()),
        }
    }

    async fn dispatch_all(&self, node: &P::Handle, events: &[DomEvent]) -> Result<(), AgentError> {
        for event in events {
            self.page.dispatch(node, *event).await?;
        }
        Ok(())
    }

    /// Drops the "active" marker after a delay without holding up the caller.
    fn release_highlight(&self, node: P::Handle) {
        let page = self.page.clone();
        let linger = self.timings.highlight_linger;
        tokio::spawn(async move {
            sleep(linger).await;
            if let Err(e) = page.set_active(&node, false).await {
                debug!("Could not clear active marker: {e}");
            }
        });
    }

    async fn scroll(&self, direction: Option<&str>) -> String {
        let target = match ScrollDirection::from_text(direction) {
            ScrollDirection::Top => ScrollTo::Top,
            ScrollDirection::Bottom => ScrollTo::Bottom,
            vertical => {
                let amount = match self.page.viewport().await {
                    Ok(viewport) => viewport.height * SCROLL_FRACTION,
                    Err(e) => return format!("Error executing scroll: {e}"),
                };
                if vertical == ScrollDirection::Up {
                    ScrollTo::By(-amount)
                } else {
                    ScrollTo::By(amount)
                }
            }
        };

        if let Err(e) = self.page.scroll(target).await {
            return format!("Error executing scroll: {e}");
        }
        sleep(self.timings.scroll_settle).await;
        "Scrolled".to_string()
    }

    async fn open_url(&self, url: Option<&str>) -> String {
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return "Error: open_url requires a target URL".to_string();
        };
        match self.page.navigate(url).await {
            Ok(()) => "Done".to_string(),
            Err(e) => format!("Error executing open_url: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ACTIVE_CLASS, SnapshotBuilder};
    use crate::testing::{FakeNode, FakePage};
    use tokio::time::Duration;

    fn login_page() -> (FakePage, usize, usize) {
        let page = FakePage::new();
        let body = page.add(None, FakeNode::new("body"));
        let email = page.add(Some(body), FakeNode::input("Email"));
        let button = page.add(Some(body), FakeNode::button("Log In"));
        (page, email, button)
    }

    async fn snapshot(page: &FakePage) -> ElementRegistry<usize> {
        let mut builder = SnapshotBuilder::new(page.clone());
        builder.snapshot().await.unwrap();
        builder.registry().clone()
    }

    fn executor(page: &FakePage) -> ActionExecutor<FakePage> {
        ActionExecutor::new(page.clone(), ExecutorTimings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn click_dispatches_canonical_pointer_sequence() {
        let (page, _, button) = login_page();
        let registry = snapshot(&page).await;

        let status = executor(&page)
            .execute(&registry, &PageAction::new(ActionKind::Click, Some(2), None))
            .await;

        assert_eq!(status, "Done");
        assert_eq!(
            page.events_on(button),
            vec!["scrollIntoView", "focus", "mouseover", "mousedown", "mouseup", "click"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn click_on_decorative_child_retargets_to_anchor() {
        let page = FakePage::new();
        let body = page.add(None, FakeNode::new("body"));
        let link = page.add(Some(body), FakeNode::link("Cart", "/cart"));
        let icon = page.add(Some(link), FakeNode::new("span").text("cart"));
        let mut registry = ElementRegistry::new();
        registry.register(icon);

        let status = executor(&page)
            .execute(&registry, &PageAction::new(ActionKind::Click, Some(1), None))
            .await;

        assert_eq!(status, "Done");
        assert!(page.events_on(icon).is_empty());
        assert!(page.events_on(link).contains(&"click".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn type_sets_native_value_then_notifies_framework() {
        let (page, email, _) = login_page();
        let registry = snapshot(&page).await;

        let status = executor(&page)
            .execute(
                &registry,
                &PageAction::new(ActionKind::Type, Some(1), Some("me@example.com")),
            )
            .await;

        assert_eq!(status, "Done");
        assert_eq!(page.value(email).as_deref(), Some("me@example.com"));
        assert_eq!(
            page.events_on(email),
            vec![
                "scrollIntoView",
                "focus",
                "value=me@example.com",
                "input",
                "change",
                "blur"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn press_enter_dispatches_key_triplet() {
        let (page, email, _) = login_page();
        let registry = snapshot(&page).await;

        let status = executor(&page)
            .execute(&registry, &PageAction::new(ActionKind::PressEnter, Some(1), None))
            .await;

        assert_eq!(status, "Done");
        assert_eq!(
            page.events_on(email)[2..].to_vec(),
            vec!["keydown", "keypress", "keyup"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_id_reports_stale_dom() {
        let (page, _, _) = login_page();
        let registry = snapshot(&page).await;

        let status = executor(&page)
            .execute(&registry, &PageAction::new(ActionKind::Click, Some(42), None))
            .await;

        assert_eq!(status, "Error: Element ID 42 not found (stale DOM?)");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_registry_falls_back_to_stamped_attribute() {
        let (page, _, button) = login_page();
        snapshot(&page).await;

        let status = executor(&page)
            .execute(
                &ElementRegistry::new(),
                &PageAction::new(ActionKind::Click, Some(2), None),
            )
            .await;

        assert_eq!(status, "Done");
        assert!(page.events_on(button).contains(&"click".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_failure_becomes_error_status() {
        let (page, _, _) = login_page();
        let registry = snapshot(&page).await;
        page.fail_dispatch("element is detached");

        let status = executor(&page)
            .execute(&registry, &PageAction::new(ActionKind::Click, Some(2), None))
            .await;

        assert!(status.starts_with("Error executing click: "), "{status}");
        assert!(status.contains("element is detached"));
    }

    #[tokio::test(start_paused = true)]
    async fn active_marker_is_removed_after_linger() {
        let (page, _, button) = login_page();
        let registry = snapshot(&page).await;

        executor(&page)
            .execute(&registry, &PageAction::new(ActionKind::Click, Some(2), None))
            .await;
        assert!(page.has_class(button, ACTIVE_CLASS));

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert!(!page.has_class(button, ACTIVE_CLASS));
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_uses_most_of_the_viewport() {
        let (page, _, _) = login_page();
        let registry = ElementRegistry::new();
        let exec = executor(&page);

        assert_eq!(
            exec.execute(&registry, &PageAction::new(ActionKind::Scroll, None, None))
                .await,
            "Scrolled"
        );
        exec.execute(&registry, &PageAction::new(ActionKind::Scroll, None, Some("up")))
            .await;
        exec.execute(&registry, &PageAction::new(ActionKind::Scroll, None, Some("top")))
            .await;
        exec.execute(
            &registry,
            &PageAction::new(ActionKind::Scroll, None, Some("bottom")),
        )
        .await;

        assert_eq!(
            page.scrolls(),
            vec![
                ScrollTo::By(640.0),
                ScrollTo::By(-640.0),
                ScrollTo::Top,
                ScrollTo::Bottom
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn open_url_navigates_without_registry() {
        let (page, _, _) = login_page();
        let status = executor(&page)
            .execute(
                &ElementRegistry::new(),
                &PageAction::new(ActionKind::OpenUrl, None, Some("https://example.com")),
            )
            .await;

        assert_eq!(status, "Done");
        assert_eq!(page.navigations(), vec!["https://example.com".to_string()]);
    }

    #[tokio::test]
    async fn non_page_actions_are_rejected() {
        let (page, _, _) = login_page();
        let status = executor(&page)
            .execute(
                &ElementRegistry::new(),
                &PageAction::new(ActionKind::Finish, None, None),
            )
            .await;
        assert_eq!(status, "Error: Unsupported page action finish");
    }
}
