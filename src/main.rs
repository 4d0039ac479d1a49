mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands, Input};
use env_logger::Env;
use log::{debug, error, warn};
use page_agent::{
    Agent, AgentError, AgentOptions, BrowserClient, BrowserOptions, HttpOracle, OllamaOracle,
    Oracle, gate::SecurityGate,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Token of the run in progress, if any.
type CurrentRun = Arc<Mutex<Option<CancellationToken>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            url,
            task,
            oracle_url,
            ollama_model,
            headless,
            max_steps,
            webdriver,
            screenshots,
            proxy,
            user_agent,
        } => {
            let mut options = BrowserOptions::default()
                .headless(headless)
                .webdriver_url(&webdriver);
            if let Some(proxy) = &proxy {
                options = options.proxy(proxy);
            }
            if let Some(ua) = &user_agent {
                options = options.user_agent(ua);
            }
            if let Some(dir) = screenshots {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("cannot create {}", dir.display()))?;
                options = options.screenshot_dir(dir);
            }

            let client = BrowserClient::connect(options).await?;
            client.navigate(&url).await?;
            println!("🌐 Browser opened at {url}.");

            let oracle: Box<dyn Oracle> = match ollama_model {
                Some(model) => Box::new(OllamaOracle::new(&model)),
                None => Box::new(HttpOracle::new(
                    oracle_url.as_deref().unwrap_or(HttpOracle::DEFAULT_ENDPOINT),
                )),
            };

            let mut agent = Agent::new(
                client.clone(),
                oracle,
                AgentOptions::default().max_steps(max_steps),
            );
            tokio::spawn(mirror_events(agent.subscribe(), client.clone()));

            let shutdown = CancellationToken::new();
            let current: CurrentRun = Arc::default();
            tokio::spawn(watch_ctrl_c(agent.gate(), current.clone(), shutdown.clone()));

            let one_shot = task.is_some();
            let mut tasks = read_stdin(agent.gate(), current.clone());
            let mut next = task;

            loop {
                let task = match next.take() {
                    Some(task) => task,
                    None => {
                        println!("🤖 Enter a task (Ctrl+C to exit):");
                        tokio::select! {
                            line = tasks.recv() => match line {
                                Some(task) => task,
                                None => break,
                            },
                            _ = shutdown.cancelled() => break,
                        }
                    }
                };

                let cancel = shutdown.child_token();
                set_current(&current, Some(cancel.clone()));
                let result = agent.run(&task, cancel).await;
                set_current(&current, None);

                match result {
                    Ok(report) => {
                        println!("🏁 {} after {} steps", report.outcome, report.steps);
                        for fact in &report.memory {
                            println!("   • {fact}");
                        }
                    }
                    Err(AgentError::ConfigError(problem)) => warn!("Skipped task: {problem}"),
                    Err(e) => error!("Run failed: {e}"),
                }

                if one_shot || shutdown.is_cancelled() {
                    break;
                }
            }

            client.shutdown().await?;
            Ok(())
        }
    }
}

fn set_current(current: &CurrentRun, token: Option<CancellationToken>) {
    *current.lock().unwrap_or_else(PoisonError::into_inner) = token;
}

/// Cancels the current run, or exits when idle. Always denies a pending confirmation.
async fn watch_ctrl_c(gate: Arc<SecurityGate>, current: CurrentRun, shutdown: CancellationToken) {
    while tokio::signal::ctrl_c().await.is_ok() {
        gate.deny();
        let running = current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match running {
            Some(run) => {
                println!("🛑 Stopping after the current step...");
                run.cancel();
            }
            None => {
                shutdown.cancel();
                return;
            }
        }
    }
}

/// Routes stdin lines: answers to a pending confirmation, `stop`, or new tasks.
fn read_stdin(gate: Arc<SecurityGate>, current: CurrentRun) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let pending = gate.pending_reason();
            match Input::parse(&line, pending.is_some()) {
                Input::Approve => {
                    gate.approve();
                }
                Input::Deny => {
                    gate.deny();
                }
                Input::Stop => {
                    gate.deny();
                    let running = current
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    if let Some(run) = running {
                        run.cancel();
                    }
                }
                Input::Task(task) => {
                    if tx.send(task).await.is_err() {
                        break;
                    }
                }
                Input::Ignored => {
                    if let Some(reason) = pending {
                        println!("Answer y or n: {reason}");
                    }
                }
            }
        }
        debug!("stdin closed");
    });
    rx
}

/// Prints progress and mirrors it into the page's log panel.
async fn mirror_events(mut events: broadcast::Receiver<page_agent::AgentEvent>, client: BrowserClient) {
    loop {
        match events.recv().await {
            Ok(event) => {
                println!("{event}");
                if let Err(e) = client.push_browser_log(&event.to_string()).await {
                    debug!("{e}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Missed {missed} progress events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
