//! Scripts run inside the page through WebDriver `execute`.
//!
//! Node handles travel as WebDriver element references, so every script that
//! touches a node receives it through `arguments`.

use crate::dom::{ACTIVE_CLASS, AGENT_ID_ATTR, DETECTED_CLASS};

/// Layout facts for one element, in the shape of `NodeFacts`.
const FACTS_FN: &str = r#"
function agentFacts(el) {
    const style = window.getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    const attributes = {};
    for (const attr of el.attributes) {
        attributes[attr.name] = attr.value;
    }
    // Handlers assigned from script never show up as attributes.
    if (typeof el.onclick === "function" && !attributes.onclick) {
        attributes.onclick = "[handler]";
    }
    const checkable = el.type === "checkbox" || el.type === "radio";
    return {
        tag: el.tagName.toLowerCase(),
        style: {
            display: style.display,
            visibility: style.visibility,
            opacity: style.opacity,
            cursor: style.cursor
        },
        rect: {
            top: rect.top,
            bottom: rect.bottom,
            width: rect.width,
            height: rect.height
        },
        attributes,
        checked: checkable ? el.checked : null
    };
}
"#;

pub const IS_ATTACHED: &str = "return window.aiAgentInitialized === true;";

pub const VIEWPORT: &str = r#"
return { width: window.innerWidth, height: window.innerHeight };
"#;

/// Every element under `<body>` in document order, as `[{ node, facts }]`.
pub fn collect_elements() -> String {
    format!(
        r#"{FACTS_FN}
if (!document.body) return [];
const all = [document.body, ...document.body.querySelectorAll("*")];
return all.map(el => ({{ node: el, facts: agentFacts(el) }}));
"#
    )
}

pub fn describe_node() -> String {
    format!("{FACTS_FN}\nreturn agentFacts(arguments[0]);")
}

pub const TEXT_SOURCES: &str = r#"
return arguments[0].map(el => {
    const tag = el.tagName.toLowerCase();
    const editable = tag === "input" || tag === "textarea";
    const selected = tag === "select" && el.selectedIndex >= 0
        ? el.options[el.selectedIndex].text
        : null;
    const alts = Array.from(el.querySelectorAll("img"))
        .map(img => img.alt)
        .filter(alt => alt && alt.trim().length > 0);
    return {
        value: editable ? el.value : null,
        selected_option: selected,
        inner_text: el.innerText || el.textContent || "",
        image_alts: alts
    };
});
"#;

pub fn find_by_agent_id() -> String {
    format!(r#"return document.querySelector(`[{AGENT_ID_ATTR}="${{arguments[0]}}"]`);"#)
}

pub const CLOSEST_CLICKABLE: &str = r#"
return arguments[0].closest('a, button, input, [role="button"]');
"#;

/// Takes `[[node, id], ...]`.
pub fn mark_detected() -> String {
    format!(
        r#"
for (const [el, id] of arguments[0]) {{
    el.setAttribute("{AGENT_ID_ATTR}", String(id));
    el.classList.add("{DETECTED_CLASS}");
}}
"#
    )
}

pub fn clear_detected() -> String {
    format!(
        r#"
document.querySelectorAll(".{DETECTED_CLASS}")
    .forEach(el => el.classList.remove("{DETECTED_CLASS}"));
"#
    )
}

pub fn set_active() -> String {
    format!(r#"arguments[0].classList.toggle("{ACTIVE_CLASS}", arguments[1]);"#)
}

/// Flags the document as attached and installs the outline styles for
/// detected and active elements, once per document.
pub fn attach_page() -> String {
    format!(
        r#"
window.aiAgentInitialized = true;
if (document.getElementById("ai-agent-styles")) return;
const style = document.createElement("style");
style.id = "ai-agent-styles";
style.textContent = `
    .{DETECTED_CLASS} {{
        outline: 2px dashed rgba(255, 0, 0, 0.5) !important;
        outline-offset: 1px;
    }}
    .{ACTIVE_CLASS} {{
        outline: 3px solid red !important;
        background-color: rgba(255, 0, 0, 0.1) !important;
        transition: all 0.2s ease-in-out;
    }}
`;
(document.head || document.documentElement).appendChild(style);
"#
    )
}

pub const SCROLL_INTO_VIEW: &str = r#"
arguments[0].scrollIntoView({ behavior: "smooth", block: "center", inline: "center" });
"#;

pub const FOCUS: &str = "arguments[0].focus();";

/// Takes the node, the event type and its family (`mouse`, `keyboard` or `plain`).
pub const DISPATCH_EVENT: &str = r#"
const [el, type, family] = arguments;
let event;
if (family === "mouse") {
    event = new MouseEvent(type, { bubbles: true, cancelable: true, view: window });
} else if (family === "keyboard") {
    event = new KeyboardEvent(type, {
        key: "Enter",
        code: "Enter",
        keyCode: 13,
        which: 13,
        bubbles: true,
        cancelable: true
    });
} else {
    event = new Event(type, { bubbles: true });
}
el.dispatchEvent(event);
"#;

/// Writes through the prototype setter and rewinds React's value tracker so
/// the following `input` event is seen as a change.
pub const SET_NATIVE_VALUE: &str = r#"
const [el, value] = arguments;
if (el.isContentEditable) {
    el.textContent = value;
    return;
}
const proto = {
    INPUT: window.HTMLInputElement,
    TEXTAREA: window.HTMLTextAreaElement,
    SELECT: window.HTMLSelectElement
}[el.tagName]?.prototype;
const descriptor = proto && Object.getOwnPropertyDescriptor(proto, "value");
const previous = el.value;
if (descriptor && descriptor.set) {
    descriptor.set.call(el, value);
} else {
    el.value = value;
}
if (el._valueTracker) {
    el._valueTracker.setValue(previous);
}
"#;

pub const SCROLL_BY: &str = r#"window.scrollBy({ top: arguments[0], behavior: "smooth" });"#;

pub const SCROLL_TO_TOP: &str = r#"window.scrollTo({ top: 0, behavior: "smooth" });"#;

pub const SCROLL_TO_BOTTOM: &str =
    r#"window.scrollTo({ top: document.body.scrollHeight, behavior: "smooth" });"#;

/// Appends a line to a floating progress panel, creating the panel on first use.
pub const PUSH_LOG: &str = r#"
(() => {
    if (!window.pushAgentLog) {
        const panel = document.createElement("div");
        panel.id = "ai-agent-log";
        panel.style.position = "fixed";
        panel.style.top = "10px";
        panel.style.left = "10px";
        panel.style.width = "500px";
        panel.style.maxHeight = "500px";
        panel.style.overflowY = "auto";
        panel.style.background = "rgba(0, 0, 0, 0.05)";
        panel.style.color = "red";
        panel.style.fontSize = "12px";
        panel.style.fontFamily = "monospace";
        panel.style.padding = "10px";
        panel.style.zIndex = "99999";
        panel.style.pointerEvents = "none";
        document.body.appendChild(panel);

        window.pushAgentLog = function(msg) {
            const timestamp = new Date().toISOString().split("T")[1].split(".")[0];
            const entry = document.createElement("div");
            entry.style.whiteSpace = "pre-wrap";
            entry.textContent = `[${timestamp}] ${msg}`;
            panel.appendChild(entry);
            if (panel.childElementCount > 5) {
                panel.scrollTop = panel.scrollHeight;
            }
        };
    }
    window.pushAgentLog(arguments[0]);
})();
"#;
