//! Console transport — reads lines from stdin as inbound events, prints
//! text replies to stdout and writes image artifacts into the work dir.
//!
//! Runs until the `shutdown` token is cancelled (Ctrl-C) or stdin closes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bot::InboundEvent;
use crate::dispatch::{DeliveryAck, Transport, TransportError};
use crate::error::AppError;
use crate::render::RenderedArtifact;
use crate::runtime::{Component, ComponentFuture};

// ── ConsoleChannel (inbound) ─────────────────────────────────────────────────

/// Stdin reader component. Each line becomes one [`InboundEvent`] with this
/// channel's id as the origin.
pub struct ConsoleChannel {
    channel_id: String,
    events: mpsc::Sender<InboundEvent>,
}

impl ConsoleChannel {
    pub fn new(channel_id: impl Into<String>, events: mpsc::Sender<InboundEvent>) -> Self {
        Self { channel_id: channel_id.into(), events }
    }
}

impl Component for ConsoleChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_console(self.channel_id, self.events, shutdown))
    }
}

async fn run_console(
    channel_id: String,
    events: mpsc::Sender<InboundEvent>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    info!(%channel_id, "console channel started — type a command and press Enter. Ctrl-C to quit.");
    println!("──────────────────────────────────────");
    println!(" psychotropic console  (Ctrl-C to quit)");
    println!("──────────────────────────────────────");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(%channel_id, "shutdown signal received — closing console channel");
                break;
            }

            line = lines.next_line() => {
                match line {
                    Err(e) => {
                        warn!(%channel_id, "console read error: {e}");
                        break;
                    }
                    Ok(None) => {
                        info!(%channel_id, "stdin closed");
                        break;
                    }
                    Ok(Some(input)) => {
                        let input = input.trim().to_string();
                        if input.is_empty() { continue; }

                        debug!(%channel_id, input = %input, "console received line");
                        let event = InboundEvent { origin: channel_id.clone(), text: input };
                        if events.send(event).await.is_err() {
                            warn!(%channel_id, "bot loop gone, console exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

// ── ConsoleSink (outbound) ───────────────────────────────────────────────────

/// Console-side [`Transport`]: text goes to stdout, images are written as
/// files under the work dir and their path is printed.
#[derive(Debug)]
pub struct ConsoleSink {
    work_dir: PathBuf,
    counter: AtomicU64,
}

impl ConsoleSink {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir, counter: AtomicU64::new(0) }
    }

    fn extension_for(mime_type: &str) -> &'static str {
        match mime_type {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            _ => "bin",
        }
    }
}

impl Transport for ConsoleSink {
    async fn send_text(&self, destination: &str, text: &str) -> Result<DeliveryAck, TransportError> {
        println!("[{destination}] {text}");
        Ok(DeliveryAck::default())
    }

    async fn send_image(
        &self,
        destination: &str,
        artifact: &RenderedArtifact,
        caption: &str,
    ) -> Result<DeliveryAck, TransportError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let ext = Self::extension_for(artifact.mime_type);
        let path = self.work_dir.join(format!("artifact-{n:04}.{ext}"));

        std::fs::create_dir_all(&self.work_dir)
            .and_then(|()| std::fs::write(&path, &artifact.bytes))
            .map_err(|e| TransportError::Permanent(format!("cannot write artifact: {e}")))?;

        println!("[{destination}] {caption} → {}", path.display());
        Ok(DeliveryAck { message_id: Some(path.display().to_string()) })
    }
}
