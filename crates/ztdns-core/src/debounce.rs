//! Quiet-window batching of interface events
//!
//! Bursts of raw link events (an interface flapping down/up/down, a bridge
//! bringing up several ports) are collected until no new event has arrived
//! for the configured window, then delivered as one batch.

use crate::traits::{InterfaceEvent, stopped};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

/// Coalesces [`InterfaceEvent`]s into batches
#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    window: Duration,
}

impl Debouncer {
    /// Create a debouncer with the given quiet window
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Quiet window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Forward batches from `input` to `output` until stopped
    ///
    /// Every event restarts the quiet window. When the window expires the
    /// buffered batch is sent and the buffer is cleared. Returns when `stop`
    /// is raised (pending events are discarded), when `output` is closed, or
    /// when `input` is closed (pending events are flushed first).
    pub async fn run(
        self,
        mut input: mpsc::Receiver<InterfaceEvent>,
        output: mpsc::Sender<Vec<InterfaceEvent>>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut pending: Vec<InterfaceEvent> = Vec::new();
        let quiet = tokio::time::sleep(self.window);
        tokio::pin!(quiet);

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut stop) => {
                    if !pending.is_empty() {
                        debug!("Debouncer stopping, discarding {} pending event(s)", pending.len());
                    }
                    return;
                }

                event = input.recv() => match event {
                    Some(event) => {
                        debug!("Interface {} {}", event.name, event.kind);
                        pending.push(event);
                        quiet.as_mut().reset(Instant::now() + self.window);
                    }
                    None => {
                        if !pending.is_empty() {
                            let _ = output.send(std::mem::take(&mut pending)).await;
                        }
                        return;
                    }
                },

                _ = &mut quiet, if !pending.is_empty() => {
                    let batch = std::mem::take(&mut pending);
                    debug!("Delivering batch of {} interface event(s)", batch.len());
                    if output.send(batch).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
