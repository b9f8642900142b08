//! Cooperative checkpoint scheduling.
//!
//! Epistemic foundation:
//! - K_i: One task owns all scheduler state; host events arrive over a channel
//! - K_i: The periodic tick and host events never run concurrently
//! - B_i: The host may drop the handle → the loop ends cleanly

mod engine;
mod state;

pub use engine::*;
pub use state::*;

use crate::models::{PlrError, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Host-originated event delivered to the scheduler task.
#[derive(Debug)]
pub enum SchedulerEvent {
    JobStarted,
    LayerChanged {
        layer: Option<i64>,
        layer_height: Option<f64>,
    },
    ToolActivated,
    /// The job ended; `filename` names the job file to restore if it was rewritten
    JobFinished { filename: Option<String> },
    Enable,
    Disable,
    SetResuming(bool),
    ForceSave(oneshot::Sender<Result<SaveOutcome>>),
    Reset(oneshot::Sender<Result<()>>),
    QueryStatus(oneshot::Sender<StatusReport>),
    Shutdown,
}

/// What the loop does after handling an event.
enum Flow {
    Continue,
    WakeNow,
    Stop,
}

/// Cloneable sender side of the scheduler task.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerEvent>,
}

impl SchedulerHandle {
    /// Create a handle and the receiver to pass to [`CheckpointScheduler::run`].
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    async fn send(&self, event: SchedulerEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| PlrError::ChannelClosed)
    }

    pub async fn job_started(&self) -> Result<()> {
        self.send(SchedulerEvent::JobStarted).await
    }

    pub async fn layer_changed(&self, layer: Option<i64>, layer_height: Option<f64>) -> Result<()> {
        self.send(SchedulerEvent::LayerChanged {
            layer,
            layer_height,
        })
        .await
    }

    pub async fn tool_activated(&self) -> Result<()> {
        self.send(SchedulerEvent::ToolActivated).await
    }

    pub async fn job_finished(&self, filename: Option<String>) -> Result<()> {
        self.send(SchedulerEvent::JobFinished { filename }).await
    }

    pub async fn enable(&self) -> Result<()> {
        self.send(SchedulerEvent::Enable).await
    }

    pub async fn disable(&self) -> Result<()> {
        self.send(SchedulerEvent::Disable).await
    }

    pub async fn set_resuming(&self, resuming: bool) -> Result<()> {
        self.send(SchedulerEvent::SetResuming(resuming)).await
    }

    /// Non-blocking resume-flag update for synchronous callers.
    pub fn notify_resuming(&self, resuming: bool) -> Result<()> {
        self.tx
            .try_send(SchedulerEvent::SetResuming(resuming))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    PlrError::Internal("Scheduler event queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => PlrError::ChannelClosed,
            })
    }

    pub async fn force_save(&self) -> Result<SaveOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(SchedulerEvent::ForceSave(tx)).await?;
        rx.await.map_err(|_| PlrError::ChannelClosed)?
    }

    pub async fn reset(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(SchedulerEvent::Reset(tx)).await?;
        rx.await.map_err(|_| PlrError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let (tx, rx) = oneshot::channel();
        self.send(SchedulerEvent::QueryStatus(tx)).await?;
        rx.await.map_err(|_| PlrError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SchedulerEvent::Shutdown).await
    }
}

fn wait_for(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs_f64(IDLE_POLL_SECS))
}

impl CheckpointScheduler {
    /// Drive the scheduler until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<SchedulerEvent>) {
        info!("Checkpoint scheduler started");
        let mut next_tick = Instant::now();

        loop {
            tokio::select! {
                _ = sleep_until(next_tick) => {
                    let now = self.providers().now();
                    let delay = self.tick(now);
                    next_tick = Instant::now() + wait_for(delay);
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("All scheduler handles dropped");
                        break;
                    };
                    let now = self.providers().now();
                    match self.handle_event(now, event) {
                        Flow::Continue => {}
                        Flow::WakeNow => next_tick = Instant::now(),
                        Flow::Stop => break,
                    }
                }
            }
        }

        info!("Checkpoint scheduler stopped");
    }

    fn handle_event(&mut self, now: f64, event: SchedulerEvent) -> Flow {
        match event {
            SchedulerEvent::JobStarted => Flow::WakeNow,
            SchedulerEvent::LayerChanged {
                layer,
                layer_height,
            } => wake_if(self.on_layer_change(now, layer, layer_height)),
            SchedulerEvent::ToolActivated => wake_if(self.on_tool_activated(now)),
            SchedulerEvent::JobFinished { filename } => {
                self.on_job_finished(filename.as_deref());
                Flow::WakeNow
            }
            SchedulerEvent::Enable => {
                self.enable();
                Flow::WakeNow
            }
            SchedulerEvent::Disable => {
                self.disable();
                Flow::Continue
            }
            SchedulerEvent::SetResuming(resuming) => {
                self.set_resuming(resuming);
                Flow::Continue
            }
            SchedulerEvent::ForceSave(reply) => {
                if reply.send(self.force_save_now(now)).is_err() {
                    warn!("Force-save requester went away");
                }
                Flow::Continue
            }
            SchedulerEvent::Reset(reply) => {
                if reply.send(self.reset()).is_err() {
                    warn!("Reset requester went away");
                }
                Flow::Continue
            }
            SchedulerEvent::QueryStatus(reply) => {
                if reply.send(self.status()).is_err() {
                    debug!("Status requester went away");
                }
                Flow::Continue
            }
            SchedulerEvent::Shutdown => Flow::Stop,
        }
    }
}

fn wake_if(wake: bool) -> Flow {
    if wake {
        Flow::WakeNow
    } else {
        Flow::Continue
    }
}
