//! Periodic background sync.
//!
//! The scheduler calls a round function on a jittered interval and backs off
//! exponentially while rounds keep failing. [`sync_round`] is the round
//! function the daemon uses: one [`SyncService::sync_all`] bounded by the
//! configured budget.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::service::SyncService;

/// Exponential delay applied after failed rounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(30 * 60),
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// `initial * factor^(failures - 1)`, capped at `max`; zero without failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let Some(exponent) = failures.checked_sub(1) else {
            return Duration::ZERO;
        };
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.factor.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Base time between rounds.
    pub interval: Duration,
    /// Fraction of the interval added or removed at random, in 0.0..=1.0.
    pub jitter: f64,
    pub backoff: Backoff,
    /// Rounds are no longer attempted after this many failures in a row.
    pub give_up_after: u32,
    /// Time budget handed to each round as its deadline.
    pub round_budget: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            jitter: 0.1,
            backoff: Backoff::default(),
            give_up_after: 20,
            round_budget: Some(Duration::from_secs(120)),
        }
    }
}

impl SchedulerConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_round_budget(mut self, budget: Option<Duration>) -> Self {
        self.round_budget = budget;
        self
    }

    /// The interval moved by a random amount within the jitter.
    pub fn jittered_interval(&self) -> Duration {
        let base = self.interval.as_secs_f64();
        let spread = base * self.jitter;
        if spread <= 0.0 {
            return self.interval;
        }
        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((base + offset).max(0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Run a round now; the regular timer restarts afterwards.
    SyncNow,
    /// Skip timed rounds until resumed. `SyncNow` still runs.
    Pause,
    Resume,
    Stop,
}

/// What the scheduler has done so far.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    pub paused: bool,
    pub rounds: u64,
    /// Failed rounds since the last success.
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_round_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SchedulerState {
    fn finish_round(&mut self, outcome: Result<(), String>) {
        let now = Utc::now();
        self.rounds += 1;
        self.last_round_at = Some(now);
        match outcome {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.last_success = Some(now);
                self.last_error = None;
            }
            Err(message) => {
                self.consecutive_failures += 1;
                self.last_error = Some(message);
            }
        }
    }
}

pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

/// The scheduler loop has exited; commands can no longer be delivered.
#[derive(Debug, Clone, Copy, Error)]
#[error("scheduler is no longer running")]
pub struct SchedulerStopped;

/// Runs sync rounds until stopped.
pub struct Scheduler {
    config: SchedulerConfig,
    state: SharedSchedulerState,
    commands: mpsc::Sender<SchedulerCommand>,
    inbox: mpsc::Receiver<SchedulerCommand>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (commands, inbox) = mpsc::channel(8);
        Self {
            config,
            state: SharedSchedulerState::default(),
            commands,
            inbox,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            commands: self.commands.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Runs the loop, starting with an immediate round.
    ///
    /// `round` receives the deadline derived from the round budget and
    /// returns an error message when the round failed.
    pub async fn run<F, Fut>(mut self, round: F)
    where
        F: Fn(Option<Instant>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        info!(interval_secs = self.config.interval.as_secs(), "scheduler started");
        self.round(&round).await;

        loop {
            let wait = self.next_wait().await;
            debug!(wait_secs = wait.as_secs(), "waiting for next round");

            let command = tokio::select! {
                _ = tokio::time::sleep(wait) => None,
                received = self.inbox.recv() => Some(received.unwrap_or(SchedulerCommand::Stop)),
            };

            match command {
                None if self.state.read().await.paused => debug!("paused, round skipped"),
                None | Some(SchedulerCommand::SyncNow) => self.round(&round).await,
                Some(SchedulerCommand::Pause) => self.set_paused(true).await,
                Some(SchedulerCommand::Resume) => self.set_paused(false).await,
                Some(SchedulerCommand::Stop) => break,
            }
        }
        info!("scheduler stopped");
    }

    async fn set_paused(&self, paused: bool) {
        info!(paused, "scheduler pause toggled");
        self.state.write().await.paused = paused;
    }

    async fn next_wait(&self) -> Duration {
        match self.state.read().await.consecutive_failures {
            0 => self.config.jittered_interval(),
            failures => self.config.backoff.delay(failures),
        }
    }

    async fn round<F, Fut>(&self, round: &F)
    where
        F: Fn(Option<Instant>) -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        let failures = self.state.read().await.consecutive_failures;
        if failures >= self.config.give_up_after {
            error!(failures, "giving up after repeated failed rounds");
            return;
        }

        let deadline = self.config.round_budget.map(|budget| Instant::now() + budget);
        let outcome = round(deadline).await;
        if let Err(message) = &outcome {
            warn!(error = %message, "sync round failed");
        }
        self.state.write().await.finish_round(outcome);
    }
}

/// Sends commands to a running [`Scheduler`] and reads its state.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    state: SharedSchedulerState,
}

impl SchedulerHandle {
    pub async fn send(&self, command: SchedulerCommand) -> Result<(), SchedulerStopped> {
        self.commands.send(command).await.map_err(|_| SchedulerStopped)
    }

    pub async fn sync_now(&self) -> Result<(), SchedulerStopped> {
        self.send(SchedulerCommand::SyncNow).await
    }

    pub async fn stop(&self) -> Result<(), SchedulerStopped> {
        self.send(SchedulerCommand::Stop).await
    }

    pub async fn snapshot(&self) -> SchedulerState {
        self.state.read().await.clone()
    }
}

/// One daemon round: every connected provider, failing if any run aborted.
pub async fn sync_round(service: &SyncService, deadline: Option<Instant>) -> Result<(), String> {
    let report = service.sync_all(deadline).await.map_err(|e| e.to_string())?;
    let failed: Vec<String> = report
        .outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().err().map(|e| format!("{}: {e}", o.provider)))
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(failed.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn jitter_stays_within_the_spread() {
        let config = SchedulerConfig::new(Duration::from_secs(100)).with_jitter(0.2);
        for _ in 0..50 {
            let secs = config.jittered_interval().as_secs_f64();
            assert!((80.0..=120.0).contains(&secs), "{secs}");
        }
        let fixed = SchedulerConfig::new(Duration::from_secs(100)).with_jitter(0.0);
        assert_eq!(fixed.jittered_interval(), Duration::from_secs(100));
    }

    #[test]
    fn backoff_grows_until_capped() {
        let backoff = Backoff {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(600),
            factor: 2.0,
        };
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_secs(30));
        assert_eq!(backoff.delay(2), Duration::from_secs(60));
        assert_eq!(backoff.delay(5), Duration::from_secs(480));
        assert_eq!(backoff.delay(6), Duration::from_secs(600));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn rounds_update_state() {
        let mut state = SchedulerState::default();
        state.finish_round(Err("google: provider unavailable".to_string()));
        state.finish_round(Err("google: provider unavailable".to_string()));
        assert_eq!(state.consecutive_failures, 2);
        assert!(state.last_success.is_none());

        state.finish_round(Ok(()));
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.rounds, 3);
        assert!(state.last_error.is_none());
        assert!(state.last_success.is_some());
    }

    #[tokio::test]
    async fn commands_drive_the_loop() {
        let scheduler = Scheduler::new(
            SchedulerConfig::new(Duration::from_secs(3600)).with_round_budget(None),
        );
        let handle = scheduler.handle();
        let rounds = Arc::new(AtomicU32::new(0));
        let counter = rounds.clone();

        let task = tokio::spawn(scheduler.run(move |deadline| {
            let counter = counter.clone();
            async move {
                assert!(deadline.is_none());
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rounds.load(Ordering::SeqCst), 1);

        handle.sync_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rounds.load(Ordering::SeqCst), 2);

        handle.send(SchedulerCommand::Pause).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.snapshot().await.paused);

        // Manual rounds still run while paused.
        handle.sync_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rounds.load(Ordering::SeqCst), 3);

        handle.send(SchedulerCommand::Resume).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.snapshot().await.paused);

        handle.stop().await.unwrap();
        task.await.unwrap();
        assert!(handle.sync_now().await.is_err());
    }

    #[tokio::test]
    async fn failed_rounds_back_off_then_recover() {
        let config = SchedulerConfig::new(Duration::from_secs(3600)).with_backoff(Backoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(40),
            factor: 2.0,
        });
        let scheduler = Scheduler::new(config);
        let handle = scheduler.handle();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let task = tokio::spawn(scheduler.run(move |deadline| {
            let counter = counter.clone();
            async move {
                assert!(deadline.is_some());
                match counter.fetch_add(1, Ordering::SeqCst) {
                    n if n < 3 => Err(format!("google: attempt {n} failed")),
                    _ => Ok(()),
                }
            }
        }));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        let state = handle.snapshot().await;
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.rounds, 4);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }
}
