//! Echo Bot Example
//!
//! A console bot demonstrating the botkit lifecycle: each line typed on stdin
//! is delivered as a chat message, replies are printed to stdout, and the
//! bot's state survives restarts when a `file://` store is configured.
//!
//! # Commands
//!
//! ```text
//! /start       - Greeting, records the user
//! /stats       - Echo counter and distinct users
//! /fail        - Fails on purpose to show error capture
//! <text>       - Echoed back
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-bot -- --config demos/echo_bot/botkit.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use botkit::core::{BoxedDispatcher, DispatchResult, UpdateHandler};
use botkit::prelude::*;
use clap::Parser;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(about = "Console echo bot")]
struct Args {
    /// Configuration file to load instead of the default search paths.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. "development".
    #[arg(long)]
    profile: Option<String>,

    /// User id attached to every typed message.
    #[arg(long, default_value_t = 1)]
    user_id: i64,
}

// ============================================================================
// Console Dispatcher
// ============================================================================

/// Feeds stdin lines to a [`LocalDispatcher`] and prints the replies.
///
/// Stdin is read on a plain thread so a pending read never holds up runtime
/// shutdown.
struct ConsoleDispatcher {
    inner: Arc<LocalDispatcher>,
    user_id: i64,
    lines: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Forwards lines until input ends, a read fails or the receiver is gone.
fn pump_lines(
    lines: impl Iterator<Item = std::io::Result<String>>,
    tx: &mpsc::UnboundedSender<String>,
) {
    for line in lines {
        let Ok(line) = line else { break };
        if tx.send(line).is_err() {
            break;
        }
    }
}

impl ConsoleDispatcher {
    fn new(user_id: i64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || pump_lines(std::io::stdin().lines(), &tx));

        Self {
            inner: Arc::new(LocalDispatcher::new("console")),
            user_id,
            lines: Arc::new(Mutex::new(rx)),
            reader: Mutex::new(None),
        }
    }

    async fn forward_lines(
        inner: Arc<LocalDispatcher>,
        user_id: i64,
        lines: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    ) {
        let mut lines = lines.lock().await;
        let mut update_id = 0;
        while let Some(line) = lines.recv().await {
            if line.trim().is_empty() {
                continue;
            }

            update_id += 1;
            let update = Update::message(0, user_id, line).with_id(update_id);
            let inner = Arc::clone(&inner);
            // Each update runs in its own task so `stop` can drain it.
            tokio::spawn(async move {
                match inner.dispatch(update).await {
                    Ok(Some(reply)) => println!("bot> {}", reply.text),
                    Ok(None) => {}
                    Err(e) => warn!("Update dropped: {e}"),
                }
            });
        }
        debug!("stdin closed");
    }
}

#[async_trait]
impl Dispatcher for ConsoleDispatcher {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn register_handler(&self, trigger: Trigger, handler: UpdateHandler) -> DispatchResult<()> {
        self.inner.register_handler(trigger, handler)
    }

    fn clear_handlers(&self) {
        self.inner.clear_handlers();
    }

    async fn initialize(&self) -> DispatchResult<()> {
        self.inner.initialize().await
    }

    async fn start(&self) -> DispatchResult<()> {
        self.inner.start().await?;
        let task = tokio::spawn(Self::forward_lines(
            Arc::clone(&self.inner),
            self.user_id,
            Arc::clone(&self.lines),
        ));
        if let Some(previous) = self.reader.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop(&self) -> DispatchResult<()> {
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        self.inner.stop().await
    }
}

// ============================================================================
// Handler Functions
// ============================================================================

/// Adds the sender to the `users` list once.
fn remember_user(state: &mut BotState, user_id: Option<i64>) -> HandlerResult<()> {
    let Some(user_id) = user_id else {
        return Ok(());
    };
    let mut users = state.get::<Vec<i64>>("users").unwrap_or_default();
    if !users.contains(&user_id) {
        users.push(user_id);
        state.set("users", users)?;
    }
    Ok(())
}

async fn start_handler(ctx: HandlerContext) -> HandlerResult<&'static str> {
    let user_id = ctx.update().user_id;
    ctx.with_state(|s| remember_user(s, user_id)).await?;
    Ok("Hello! I'm an Echo Bot. Send me any message and I'll repeat it!")
}

async fn stats_handler(ctx: HandlerContext) -> HandlerResult<String> {
    let (echoed, users) = ctx
        .with_state(|s| {
            (
                s.get::<i64>("messages_echoed").unwrap_or(0),
                s.get::<Vec<i64>>("users").unwrap_or_default(),
            )
        })
        .await;
    Ok(format!(
        "Stats:\n- Messages echoed: {echoed}\n- Unique users: {}",
        users.len()
    ))
}

async fn fail_handler(_ctx: HandlerContext) -> HandlerResult<()> {
    Err(HandlerError::msg("failing on request"))
}

/// Echoes the text back and records the sender.
async fn echo_handler(ctx: HandlerContext) -> HandlerResult<Option<String>> {
    let Some(text) = ctx.text().map(str::to_owned) else {
        return Ok(None);
    };
    let user_id = ctx.update().user_id;

    ctx.with_state(|s| {
        s.increment("messages_echoed", 1);
        remember_user(s, user_id)
    })
    .await?;

    Ok(Some(text))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut defaults = BotkitConfig::default();
    defaults.bot.name = Some("echo_bot".into());

    let mut builder = BotRuntime::builder().merge(defaults);
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }

    let user_id = args.user_id;
    let runtime = builder.build_with(|_| {
        let dispatcher: BoxedDispatcher = Arc::new(ConsoleDispatcher::new(user_id));
        Ok(dispatcher)
    })?;

    let mut state_defaults = BotState::new();
    state_defaults.set("messages_echoed", 0)?;
    state_defaults.set("users", Vec::<i64>::new())?;
    runtime.set_state_defaults(state_defaults);

    runtime
        .on_command("start", start_handler)
        .on_command("stats", stats_handler)
        .on_command("fail", fail_handler)
        .on_message(echo_handler);

    let report = runtime.run().await?;
    info!(
        status = %report.record.status,
        state_saved = report.state_saved,
        "Echo bot exited"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pump_lines_stops_on_read_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let lines = vec![
            Ok("hello".to_string()),
            Err(std::io::Error::other("closed")),
            Ok("never".to_string()),
        ];
        pump_lines(lines.into_iter(), &tx);

        assert_eq!(rx.try_recv().unwrap(), "hello");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_pump_lines_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut lines = vec![Ok("a".to_string()), Ok("b".to_string())].into_iter();
        pump_lines(lines.by_ref(), &tx);
        assert_eq!(lines.next().map(|l| l.unwrap()), Some("b".to_string()));
    }
}
