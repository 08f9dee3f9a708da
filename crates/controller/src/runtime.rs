//! The control loop: a single task that owns the [`Controller`] and
//! serialises ticks and requests onto it.
//!
//! ```text
//!  HTTP handler ──Command──▶ mpsc ──▶ ┌──────────────┐
//!  HTTP handler ──Command──▶      ──▶ │ control task │ ◀── interval tick
//!              ◀──oneshot reply────── └──────────────┘
//! ```
//!
//! Handlers never see controller state directly, so two concurrent
//! requests can never both observe an idle session and both start one.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::controller::{Controller, ScheduleStatus, Trigger};
use crate::lines::LineDriver;
use crate::session::SessionError;
use crate::store::{Storage, StoreError};
use crate::watering::WateringConfig;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub enum Command {
    GetConfig(Reply<WateringConfig>),
    UpdateConfig(WateringConfig, Reply<Result<(), StoreError>>),
    ResetConfig(Reply<Result<(), StoreError>>),
    Trigger(Trigger, Reply<Result<(), SessionError>>),
    Stop(Reply<Result<(), SessionError>>),
    SkipNext(Reply<()>),
    CancelSkip(Reply<()>),
    Schedule(Reply<ScheduleStatus>),
    Status(Reply<bool>),
    AuditLog(Reply<Result<Option<String>, StoreError>>),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("control loop is not running")]
pub struct ControllerGone;

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

pub fn channel(capacity: usize) -> (ControllerHandle, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ControllerHandle { tx }, rx)
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ControllerGone> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| ControllerGone)?;
        rx.await.map_err(|_| ControllerGone)
    }

    pub async fn config(&self) -> Result<WateringConfig, ControllerGone> {
        self.request(Command::GetConfig).await
    }

    pub async fn update_config(
        &self,
        config: WateringConfig,
    ) -> Result<Result<(), StoreError>, ControllerGone> {
        self.request(|reply| Command::UpdateConfig(config, reply)).await
    }

    pub async fn reset_config(&self) -> Result<Result<(), StoreError>, ControllerGone> {
        self.request(Command::ResetConfig).await
    }

    pub async fn trigger(
        &self,
        trigger: Trigger,
    ) -> Result<Result<(), SessionError>, ControllerGone> {
        self.request(|reply| Command::Trigger(trigger, reply)).await
    }

    pub async fn stop(&self) -> Result<Result<(), SessionError>, ControllerGone> {
        self.request(Command::Stop).await
    }

    pub async fn skip_next(&self) -> Result<(), ControllerGone> {
        self.request(Command::SkipNext).await
    }

    pub async fn cancel_skip(&self) -> Result<(), ControllerGone> {
        self.request(Command::CancelSkip).await
    }

    pub async fn schedule(&self) -> Result<ScheduleStatus, ControllerGone> {
        self.request(Command::Schedule).await
    }

    pub async fn is_watering(&self) -> Result<bool, ControllerGone> {
        self.request(Command::Status).await
    }

    pub async fn audit_log(&self) -> Result<Result<Option<String>, StoreError>, ControllerGone> {
        self.request(Command::AuditLog).await
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Run until every [`ControllerHandle`] has been dropped, then switch the
/// lines off.
pub async fn run<C, S, L>(
    mut controller: Controller<C, S, L>,
    mut commands: mpsc::Receiver<Command>,
    tick_every: Duration,
) where
    C: Clock,
    S: Storage,
    L: LineDriver,
{
    let mut ticker = tokio::time::interval(tick_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(tick_ms = tick_every.as_millis() as u64, "control loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => controller.tick(),
            cmd = commands.recv() => match cmd {
                Some(cmd) => dispatch(&mut controller, cmd),
                None => break,
            },
        }
    }

    controller.shutdown();
    info!("control loop stopped");
}

// A dropped reply receiver only means the requester went away.
fn dispatch<C, S, L>(c: &mut Controller<C, S, L>, cmd: Command)
where
    C: Clock,
    S: Storage,
    L: LineDriver,
{
    debug!(?cmd, "command");
    match cmd {
        Command::GetConfig(reply) => {
            let _ = reply.send(c.config().clone());
        }
        Command::UpdateConfig(config, reply) => {
            let _ = reply.send(c.update_config(config));
        }
        Command::ResetConfig(reply) => {
            let _ = reply.send(c.reset_config());
        }
        Command::Trigger(trigger, reply) => {
            let _ = reply.send(c.trigger(trigger));
        }
        Command::Stop(reply) => {
            let _ = reply.send(c.stop());
        }
        Command::SkipNext(reply) => {
            c.skip_next();
            let _ = reply.send(());
        }
        Command::CancelSkip(reply) => {
            c.cancel_skip();
            let _ = reply.send(());
        }
        Command::Schedule(reply) => {
            let _ = reply.send(c.schedule_status());
        }
        Command::Status(reply) => {
            let _ = reply.send(c.is_watering());
        }
        Command::AuditLog(reply) => {
            let _ = reply.send(c.audit_log());
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::controller::ControllerOptions;
    use crate::lines::RecordingLines;
    use crate::store::MemStorage;
    use time::macros::date;

    fn spawn_loop() -> (ControllerHandle, tokio::task::JoinHandle<()>) {
        let clock = ManualClock::at(date!(2026 - 08 - 01), 12, 0);
        let controller = Controller::new(
            clock,
            MemStorage::default(),
            RecordingLines::default(),
            ControllerOptions::default(),
        );
        let (handle, rx) = channel(8);
        let task = tokio::spawn(run(controller, rx, Duration::from_millis(10)));
        (handle, task)
    }

    #[tokio::test]
    async fn requests_round_trip() {
        let (handle, _task) = spawn_loop();
        assert_eq!(handle.config().await.unwrap(), WateringConfig::default());
        assert!(!handle.is_watering().await.unwrap());
        handle.trigger(Trigger::Both).await.unwrap().unwrap();
        assert!(handle.is_watering().await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_triggers_start_exactly_one_session() {
        let (handle, _task) = spawn_loop();
        let attempts: Vec<_> = (0..10)
            .map(|_| {
                let h = handle.clone();
                tokio::spawn(async move { h.trigger(Trigger::Both).await.unwrap() })
            })
            .collect();

        let mut started = 0;
        let mut rejected = 0;
        for a in attempts {
            match a.await.unwrap() {
                Ok(()) => started += 1,
                Err(SessionError::AlreadyActive) => rejected += 1,
                Err(e) => panic!("unexpected {e}"),
            }
        }
        assert_eq!(started, 1);
        assert_eq!(rejected, 9);
    }

    #[tokio::test]
    async fn skip_round_trip() {
        let (handle, _task) = spawn_loop();
        handle.skip_next().await.unwrap();
        assert!(handle.schedule().await.unwrap().skip_next);
        handle.cancel_skip().await.unwrap();
        assert!(!handle.schedule().await.unwrap().skip_next);
    }

    #[tokio::test]
    async fn loop_exits_when_handles_dropped() {
        let (handle, task) = spawn_loop();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop did not exit")
            .unwrap();
    }

    #[tokio::test]
    async fn closed_loop_reports_gone() {
        let (handle, rx) = channel(1);
        drop(rx);
        assert_eq!(handle.is_watering().await, Err(ControllerGone));
    }
}
