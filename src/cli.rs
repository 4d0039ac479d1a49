use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "page-agent",
    about = "Drive a browser tab towards a goal, one observed step at a time",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open a URL and run tasks against it
    Run {
        /// The starting URL
        #[arg(short, long)]
        url: String,

        /// Task to run once; without it tasks are read from stdin, one per line
        #[arg(short, long)]
        task: Option<String>,

        /// HTTP decision endpoint
        #[arg(long, conflicts_with = "ollama_model")]
        oracle_url: Option<String>,

        /// Decide with a local Ollama model instead of an HTTP endpoint
        #[arg(long)]
        ollama_model: Option<String>,

        #[arg(long)]
        headless: bool,

        #[arg(long, default_value_t = 30)]
        max_steps: usize,

        /// WebDriver server URL
        #[arg(long, default_value = "http://localhost:4444")]
        webdriver: String,

        /// Directory that receives every step's screenshot
        #[arg(long)]
        screenshots: Option<PathBuf>,

        /// HTTP(S) proxy for the browser
        #[arg(long)]
        proxy: Option<String>,

        #[arg(long)]
        user_agent: Option<String>,
    },
}

/// What one line typed on stdin asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Approve,
    Deny,
    Stop,
    Task(String),
    /// Blank lines, and anything but an answer while a confirmation is pending.
    Ignored,
}

impl Input {
    pub fn parse(line: &str, confirmation_pending: bool) -> Self {
        let line = line.trim();
        if line.eq_ignore_ascii_case("stop") {
            return Input::Stop;
        }
        if confirmation_pending {
            return match line.to_lowercase().as_str() {
                "y" | "yes" => Input::Approve,
                "n" | "no" => Input::Deny,
                _ => Input::Ignored,
            };
        }
        if line.is_empty() {
            Input::Ignored
        } else {
            Input::Task(line.to_string())
        }
    }
}
