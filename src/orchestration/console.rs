//! Operator console
//!
//! Reads commands line by line and maps them onto the lifecycle manager.
//! Unknown input is ignored. `send` pushes one exchange through the running
//! engine and prints the result.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};

use super::{
    lifecycle::LifecycleManager,
    shutdown::{signalled, ShutdownSignal},
};
use crate::{
    core::{BackgroundService, ErrorContext, RunnerResult, ShutdownWatch},
    engine::Exchange,
    engine_error,
};

const USAGE: &str = "\
Commands:
  exit, stop, quit   stop routing and terminate
  reload, restart    reload every pipeline script
  status             show state and registered routes
  send <uri> [body]  deliver a message, e.g. send direct:greetings world
  ?, help            show this help
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Stop,
    Reload,
    Help,
    Status,
    Send { endpoint: String, body: String },
}

impl ConsoleCommand {
    /// Trimmed, case-insensitive keyword match. `None` for anything
    /// unrecognised.
    pub fn parse(line: &str) -> Option<Self> {
        let (keyword, rest) = split_word(line.trim());
        match keyword.to_ascii_lowercase().as_str() {
            "send" => {
                let (endpoint, body) = split_word(rest);
                if endpoint.is_empty() {
                    return None;
                }
                Some(ConsoleCommand::Send {
                    endpoint: endpoint.to_string(),
                    body: body.to_string(),
                })
            }
            _ if !rest.is_empty() => None,
            "exit" | "stop" | "quit" => Some(ConsoleCommand::Stop),
            "reload" | "restart" => Some(ConsoleCommand::Reload),
            "?" | "help" => Some(ConsoleCommand::Help),
            "status" => Some(ConsoleCommand::Status),
            _ => None,
        }
    }
}

/// First word and the trimmed remainder.
fn split_word(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    }
}

pub struct CommandConsole<R, W> {
    manager: Arc<LifecycleManager>,
    shutdown: ShutdownSignal,
    input: R,
    output: W,
}

impl CommandConsole<BufReader<Stdin>, Stdout> {
    pub fn stdio(manager: Arc<LifecycleManager>, shutdown: ShutdownSignal) -> Self {
        Self::new(manager, shutdown, BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R, W> CommandConsole<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        manager: Arc<LifecycleManager>,
        shutdown: ShutdownSignal,
        input: R,
        output: W,
    ) -> Self {
        Self {
            manager,
            shutdown,
            input,
            output,
        }
    }

    /// Carry out one command. Returns `false` once the console should close.
    async fn execute(&mut self, command: ConsoleCommand) -> bool {
        match command {
            ConsoleCommand::Stop => {
                if let Err(e) = self.manager.stop().await {
                    error!("Can't stop routing engine: {e}");
                }
                self.shutdown.trigger();
                false
            }
            ConsoleCommand::Reload => match self.manager.reload().await {
                Ok(_) => true,
                Err(e) => {
                    error!("Can't restart routing engine: {e}");
                    self.shutdown.trigger();
                    false
                }
            },
            ConsoleCommand::Help => {
                self.write(USAGE).await;
                true
            }
            ConsoleCommand::Status => {
                let routes = self.manager.routes();
                let status = format!(
                    "state: {}\nroutes ({}): {}\n",
                    self.manager.state(),
                    routes.len(),
                    routes.join(", ")
                );
                self.write(&status).await;
                true
            }
            ConsoleCommand::Send { endpoint, body } => {
                let reply = match Self::deliver(&self.manager, endpoint, body).await {
                    Ok(exchange) => format!("{exchange}\n"),
                    Err(e) => format!("error: {e}\n"),
                };
                self.write(&reply).await;
                true
            }
        }
    }

    async fn deliver(
        manager: &LifecycleManager,
        endpoint: String,
        body: String,
    ) -> RunnerResult<Exchange> {
        let engine = manager
            .engine()
            .ok_or_else(|| engine_error!("Routing engine was never started"))?;

        // Routes may block on delay steps
        tokio::task::spawn_blocking(move || engine.send(&endpoint, Exchange::new(body)))
            .await
            .with_context("Delivery task failed")?
    }

    async fn write(&mut self, text: &str) {
        let mut result = self.output.write_all(text.as_bytes()).await;
        if result.is_ok() {
            result = self.output.flush().await;
        }
        if let Err(e) = result {
            warn!("Can't write to console: {e}");
        }
    }
}

#[async_trait]
impl<R, W> BackgroundService for CommandConsole<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn start_service(&mut self, mut shutdown: ShutdownWatch) {
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                biased;
                _ = signalled(&mut shutdown) => break,
                read = self.input.read_line(&mut line) => read,
            };

            match read {
                Ok(0) => break,
                Ok(_) => {
                    if let Some(command) = ConsoleCommand::parse(&line) {
                        if !self.execute(command).await {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!("Can't read console input: {e}");
                    break;
                }
            }
        }
        info!("Console closed");
    }

    fn name(&self) -> &'static str {
        "command console"
    }
}
