pub mod actions;
pub mod agent;
pub mod bridge;
pub mod classifier;
pub mod client;
pub mod dom;
pub mod executor;
pub mod gate;
pub mod js;
pub mod memory;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::oracle::{Decision, HttpOracle, OllamaOracle, Oracle};
pub use agent::{Agent, AgentEvent, RunOutcome, RunReport};
pub use client::{BrowserClient, Host, TabId};
pub use types::{AgentError, AgentOptions, BrowserOptions};
