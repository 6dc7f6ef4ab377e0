//! Wire framing for `scheduler_core::protocol::Message`: one JSON object
//! per line. Socket handling lives here; the message shapes themselves
//! are the core crate's concern.

use anyhow::{Context, Result};
use scheduler_core::protocol::Message;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub struct MessageReader {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
}

impl MessageReader {
    pub fn new(read_half: OwnedReadHalf) -> Self {
        MessageReader { lines: BufReader::new(read_half).lines() }
    }

    /// Reads the next message, or `None` on a clean EOF (the peer hung
    /// up). A line that fails to parse is a protocol violation: logged
    /// and skipped rather than treated as a disconnect.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        loop {
            let line = self.lines.next_line().await.context("reading from socket")?;
            let Some(line) = line else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(&line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    tracing::warn!(error = %e, line, "dropping malformed message");
                    continue;
                }
            }
        }
    }
}

pub struct MessageWriter {
    write_half: OwnedWriteHalf,
}

impl MessageWriter {
    pub fn new(write_half: OwnedWriteHalf) -> Self {
        MessageWriter { write_half }
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        let mut line = serde_json::to_string(msg).context("encoding message")?;
        line.push('\n');
        self.write_half.write_all(line.as_bytes()).await.context("writing to socket")?;
        Ok(())
    }
}
