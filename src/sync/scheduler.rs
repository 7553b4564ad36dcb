//! Background scheduling of sync cycles.
//!
//! Two kinds of jobs run on tokio tasks: a periodic job (network and battery
//! preconditions) and a one-shot immediate job (network only). Failed cycles
//! are retried according to a [`RetryPolicy`]. Cancellation is only observed
//! while a job is waiting, so a cycle that has started always completes.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::client::{SyncClient, SyncOutcome};
use super::device::DeviceState;
use super::retry::RetryPolicy;
use super::transport::SyncTransport;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between periodic cycles.
    pub interval: Duration,
    pub retry: RetryPolicy,
    /// How often unmet preconditions are re-checked.
    pub constraint_poll: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            retry: RetryPolicy::default(),
            constraint_poll: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Periodic,
    Immediate,
}

struct Job {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Job {
    fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    fn stop(self) {
        let _ = self.cancel.send(true);
    }
}

pub struct SyncScheduler<T, D> {
    client: Arc<SyncClient<T, D>>,
    config: SchedulerConfig,
    periodic: Mutex<Option<Job>>,
    immediate: Mutex<Option<Job>>,
}

impl<T, D> SyncScheduler<T, D>
where
    T: SyncTransport + 'static,
    D: DeviceState + 'static,
{
    pub fn new(client: Arc<SyncClient<T, D>>, config: SchedulerConfig) -> Self {
        Self {
            client,
            config,
            periodic: Mutex::new(None),
            immediate: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &Arc<SyncClient<T, D>> {
        &self.client
    }

    /// Starts the periodic job unless one is already active.
    /// Returns false if an existing job was kept.
    pub fn schedule_periodic(&self) -> bool {
        let mut slot = self.periodic.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(Job::is_active) {
            tracing::debug!("Periodic sync already scheduled");
            return false;
        }

        tracing::info!("Scheduling periodic sync every {:?}", self.config.interval);
        *slot = Some(self.spawn(JobKind::Periodic));
        true
    }

    /// Runs one sync as soon as the network is available, replacing any
    /// pending immediate request.
    pub fn schedule_immediate(&self) {
        let mut slot = self.immediate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.stop();
        }

        tracing::info!("Scheduling immediate sync");
        *slot = Some(self.spawn(JobKind::Immediate));
    }

    /// Stops both jobs.
    pub fn cancel(&self) {
        for slot in [&self.periodic, &self.immediate] {
            if let Some(job) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                job.stop();
            }
        }
        tracing::info!("Sync jobs cancelled");
    }

    pub fn is_periodic_scheduled(&self) -> bool {
        self.periodic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Job::is_active)
    }

    pub fn is_immediate_pending(&self) -> bool {
        self.immediate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Job::is_active)
    }

    fn spawn(&self, kind: JobKind) -> Job {
        let (cancel, mut cancelled) = watch::channel(false);
        let client = Arc::clone(&self.client);
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            match kind {
                JobKind::Immediate => {
                    if wait_for_preconditions(&*client, false, config.constraint_poll, &mut cancelled)
                        .await
                    {
                        run_with_retry(&*client, &config.retry, &mut cancelled).await;
                    }
                }
                JobKind::Periodic => loop {
                    if !wait_for_preconditions(&*client, true, config.constraint_poll, &mut cancelled)
                        .await
                    {
                        break;
                    }
                    if run_with_retry(&*client, &config.retry, &mut cancelled)
                        .await
                        .is_none()
                    {
                        break;
                    }
                    if !sleep_or_cancel(config.interval, &mut cancelled).await {
                        break;
                    }
                },
            }
            tracing::debug!("{:?} sync job finished", kind);
        });

        Job { cancel, handle }
    }
}

/// Runs cycles until one does not need a retry or attempts run out.
/// Returns `None` if cancelled while waiting between attempts.
pub async fn run_with_retry<T, D>(
    client: &SyncClient<T, D>,
    policy: &RetryPolicy,
    cancelled: &mut watch::Receiver<bool>,
) -> Option<SyncOutcome>
where
    T: SyncTransport,
    D: DeviceState,
{
    let mut attempt = 1;
    loop {
        let outcome = client.run_sync_cycle().await;
        if !outcome.should_retry() {
            return Some(outcome);
        }
        if !policy.should_retry(attempt) {
            tracing::warn!("Sync gave up after {} attempt(s): {}", attempt, outcome);
            return Some(outcome);
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::info!(
            "Sync attempt {}/{} returned {}, retrying in {:?}",
            attempt,
            policy.max_attempts,
            outcome,
            delay
        );
        if !sleep_or_cancel(delay, cancelled).await {
            return None;
        }
        attempt += 1;
    }
}

/// Waits until the network is up (and, for periodic jobs, the battery is not
/// low). Returns false if cancelled first.
async fn wait_for_preconditions<T, D>(
    client: &SyncClient<T, D>,
    needs_battery: bool,
    poll: Duration,
    cancelled: &mut watch::Receiver<bool>,
) -> bool
where
    T: SyncTransport,
    D: DeviceState,
{
    loop {
        if *cancelled.borrow() {
            return false;
        }

        let network = client.device().is_network_available().await;
        let battery_ok = !needs_battery || !client.device().is_battery_low();
        if network && battery_ok {
            return true;
        }

        tracing::debug!(
            "Sync deferred (network: {}, battery ok: {})",
            network,
            battery_ok
        );
        if !sleep_or_cancel(poll, cancelled).await {
            return false;
        }
    }
}

/// Sleeps for `duration`. Returns false if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancelled: &mut watch::Receiver<bool>) -> bool {
    if *cancelled.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancelled.changed() => false,
    }
}
