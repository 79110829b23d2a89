//! Tile Service: single-owner task driving a [`TileManager`].
//!
//! The service owns the manager and is the only writer of tile state. Viewport
//! updates, decode completions and animation frames all arrive as events on
//! one task, so no tile is ever touched from two places.
//!
//! # Architecture
//!
//! ```text
//!  TileServiceHandle ──commands──┐
//!                                ▼
//!                     ┌─────────────────────┐
//!  decode workers ───▶│     TileService     │──watch──▶ observers
//!   (completions)     │  select! {          │
//!                     │    command,         │
//!  interval ─────────▶│    completion,      │
//!   (while fading)    │    tick }           │
//!                     └─────────────────────┘
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::TransformKind;
use crate::geometry::IntRect;

use super::manager::{RefreshStatus, TileManager, TileReceivers, TileStats};

/// Capacity of the command queue.
const COMMAND_QUEUE_CAPACITY: usize = 64;

// =============================================================================
// Commands
// =============================================================================

/// Viewport parameters of one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRequest {
    pub scale: f32,
    pub visible_rect: IntRect,
    pub rotation: i32,
    pub transform: TransformKind,
    pub caller: String,
}

enum Command {
    Refresh {
        request: RefreshRequest,
        reply: oneshot::Sender<RefreshStatus>,
    },
    Stats {
        reply: oneshot::Sender<TileStats>,
    },
    Clean {
        caller: String,
        reply: oneshot::Sender<()>,
    },
    Close {
        caller: String,
        reply: oneshot::Sender<()>,
    },
}

// =============================================================================
// Handle
// =============================================================================

/// Cheap, cloneable handle to a running [`TileService`].
#[derive(Debug, Clone)]
pub struct TileServiceHandle {
    commands: mpsc::Sender<Command>,
    receivers: TileReceivers,
}

impl TileServiceHandle {
    /// Ask the service to reconcile tiles with a new viewport.
    ///
    /// Returns [`RefreshStatus::Closed`] once the service has stopped.
    pub async fn refresh_tiles(
        &self,
        scale: f32,
        visible_rect: IntRect,
        rotation: i32,
        transform: TransformKind,
        caller: impl Into<String>,
    ) -> RefreshStatus {
        let (reply, rx) = oneshot::channel();
        let request = RefreshRequest {
            scale,
            visible_rect,
            rotation,
            transform,
            caller: caller.into(),
        };
        if self
            .commands
            .send(Command::Refresh { request, reply })
            .await
            .is_err()
        {
            return RefreshStatus::Closed;
        }
        rx.await.unwrap_or(RefreshStatus::Closed)
    }

    /// Current counters, or `None` once the service has stopped.
    pub async fn stats(&self) -> Option<TileStats> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Stats { reply }).await.ok()?;
        rx.await.ok()
    }

    /// Free every tile. The service keeps running.
    pub async fn clean(&self, caller: impl Into<String>) {
        let (reply, rx) = oneshot::channel();
        let command = Command::Clean {
            caller: caller.into(),
            reply,
        };
        if self.commands.send(command).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Free every tile, close the decoder and stop the service.
    pub async fn close(&self, caller: impl Into<String>) {
        let (reply, rx) = oneshot::channel();
        let command = Command::Close {
            caller: caller.into(),
            reply,
        };
        if self.commands.send(command).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// True once the service task has exited.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Observable state of the managed tiles.
    pub fn receivers(&self) -> &TileReceivers {
        &self.receivers
    }

    pub fn subscribe(&self) -> TileReceivers {
        self.receivers.clone()
    }
}

// =============================================================================
// Service
// =============================================================================

/// Event loop owning one [`TileManager`].
pub struct TileService {
    manager: TileManager,
    commands: mpsc::Receiver<Command>,
    frame_interval: Duration,
}

impl TileService {
    /// Move `manager` onto a new task and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(manager: TileManager) -> TileServiceHandle {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let receivers = manager.subscribe();
        let frame_interval = manager.config().animation.interval.max(Duration::from_millis(1));
        let service = TileService {
            manager,
            commands: rx,
            frame_interval,
        };
        tokio::spawn(service.run());
        TileServiceHandle {
            commands: tx,
            receivers,
        }
    }

    async fn run(mut self) {
        let Some(mut completions) = self.manager.take_completion_receiver() else {
            return;
        };
        let mut ticker = time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("TileService started. {}", self.manager);

        loop {
            let animating = self.manager.is_animating();
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }
                        None => {
                            // Every handle dropped
                            self.manager.close("handleDropped");
                            break;
                        }
                    }
                }
                Some(completion) = completions.recv() => {
                    let was_animating = self.manager.is_animating();
                    self.manager.handle_completion(completion);
                    if !was_animating && self.manager.is_animating() {
                        ticker.reset();
                    }
                }
                _ = ticker.tick(), if animating => {
                    self.manager.tick(Instant::now());
                }
            }
        }
        info!("TileService stopped. {}", self.manager);
    }

    /// Returns false when the loop should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Refresh { request, reply } => {
                let was_animating = self.manager.is_animating();
                let status = self.manager.refresh_tiles(
                    request.scale,
                    request.visible_rect,
                    request.rotation,
                    request.transform,
                    &request.caller,
                );
                if !was_animating && self.manager.is_animating() {
                    debug!("refreshTiles:{}. animation started", request.caller);
                }
                let _ = reply.send(status);
                true
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.manager.stats());
                true
            }
            Command::Clean { caller, reply } => {
                self.manager.clean(&caller);
                let _ = reply.send(());
                true
            }
            Command::Close { caller, reply } => {
                self.manager.close(&caller);
                let _ = reply.send(());
                false
            }
        }
    }
}
