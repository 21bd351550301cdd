//! Terminal chat channel.
//!
//! A [`ChannelPort`] that prints agent responses to stdout, plus the
//! REPL loop that feeds stdin lines through the orchestrator.

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use lantern_channels::{ChannelError, ChannelPort};
use lantern_core::runtime::Runtime;
use lantern_types::event::InboundMessage;

/// Prints responses to the terminal.
pub struct ConsoleChannel;

impl ConsoleChannel {
    /// Create the channel.
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelPort for ConsoleChannel {
    fn name(&self) -> &str {
        "cli"
    }

    fn is_authorized(&self, _sender_id: &str) -> bool {
        // The local terminal is trusted.
        true
    }

    async fn send_message(&self, _chat: &str, text: &str) -> Result<(), ChannelError> {
        println!("lantern> {text}");
        Ok(())
    }
}

/// Read stdin lines and run each through a full turn.
pub async fn chat_loop(runtime: &Runtime) -> Result<()> {
    println!("lantern chat. Empty line or Ctrl-D exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            break;
        }
        let msg = InboundMessage::new("cli", "local", "terminal", line);
        match runtime.orchestrator.process_message(msg).await {
            Ok(outcome) => {
                if let Some(error) = outcome.error_message {
                    eprintln!("delivery error: {error}");
                }
            }
            Err(e) => eprintln!("turn failed: {e}"),
        }
    }
    Ok(())
}
