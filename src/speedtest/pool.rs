//! The worker pool behind one download or upload phase.
//!
//! A phase walks `Launching → Running → Draining → Finalized`. Elapsed time is
//! measured from the moment every initial connection is up, so handshakes never eat
//! into the measured window.

use super::progress::{IntermediateSample, ProgressReporter};
use super::worker::{Connector, Launch, Worker, WorkerKind};
use super::PhaseResult;
use crate::error::{Error, Result};
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

/// How long cancelled workers get to finish their in-flight operation.
pub(crate) const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

const REPORT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Launching,
    Running,
    Draining,
    Finalized,
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseState::Launching => "launching",
            PhaseState::Running => "running",
            PhaseState::Draining => "draining",
            PhaseState::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// One worker lineage: the first worker and every replacement share this token.
struct WorkerHandle {
    token: CancellationToken,
}

pub struct WorkerPool<C: Connector> {
    connector: Arc<C>,
    kind: WorkerKind,
    concurrency: usize,
    duration: Duration,
    poll_interval: Duration,
    state: PhaseState,
}

impl<C: Connector> WorkerPool<C> {
    pub fn new(
        connector: Arc<C>,
        kind: WorkerKind,
        concurrency: usize,
        duration: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            connector,
            kind,
            concurrency,
            duration,
            poll_interval,
            state: PhaseState::Launching,
        }
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    /// Runs the phase to completion.
    ///
    /// Fails only if not a single connection of the initial wave could be
    /// established; in that case `on_progress` is never called.
    pub async fn run<F>(&mut self, on_progress: F) -> Result<PhaseResult>
    where
        F: Fn(IntermediateSample) + Send + 'static,
    {
        if self.state != PhaseState::Launching {
            return Err(Error::Config(format!(
                "{} phase already {}",
                self.kind, self.state
            )));
        }
        if self.concurrency == 0 || self.duration.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::Config(format!(
                "{} phase needs a positive concurrency, duration and poll interval",
                self.kind
            )));
        }

        let phase_token = CancellationToken::new();
        let (bytes_tx, mut bytes_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        let (respawn_tx, mut respawn_rx) = mpsc::channel(self.concurrency);
        let (start_tx, start_rx) = watch::channel(false);
        let mut workers = JoinSet::new();
        let mut handles = Vec::with_capacity(self.concurrency);
        let mut barrier = Vec::with_capacity(self.concurrency);

        info!(
            "{} phase: launching {} connections",
            self.kind, self.concurrency
        );
        for _ in 0..self.concurrency {
            let token = phase_token.child_token();
            let (ready_tx, ready_rx) = oneshot::channel();
            let worker = self.worker(token.clone(), &bytes_tx, &respawn_tx);
            workers.spawn(worker.run(Some(Launch {
                ready: ready_tx,
                start: start_rx.clone(),
            })));
            handles.push(WorkerHandle { token });
            barrier.push(ready_rx);
        }
        drop(start_rx);

        let mut first_error = None;
        let mut unlaunched = Vec::new();
        for (handle, ready_rx) in handles.iter().zip(barrier) {
            match ready_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    debug!("{} connection failed during launch: {}", self.kind, err);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    unlaunched.push(handle.token.clone());
                }
                Err(_) => unlaunched.push(handle.token.clone()),
            }
        }
        if unlaunched.len() == handles.len() {
            phase_token.cancel();
            self.state = PhaseState::Finalized;
            return Err(first_error.unwrap_or_else(|| {
                Error::Connectivity(format!("no {} connection could be established", self.kind))
            }));
        }

        self.transition(PhaseState::Running);
        let total = Arc::new(AtomicU64::new(0));
        let started_at = Instant::now();
        let _ = start_tx.send(true);
        if !unlaunched.is_empty() {
            warn!(
                "{} phase: {} of {} connections failed to open, replacing them",
                self.kind,
                unlaunched.len(),
                handles.len()
            );
        }
        for token in unlaunched {
            let worker = self.worker(token, &bytes_tx, &respawn_tx);
            workers.spawn(worker.run(None));
        }

        let reporter =
            ProgressReporter::spawn(total.clone(), started_at, self.poll_interval, on_progress);
        let deadline = sleep_until(started_at + self.duration);
        tokio::pin!(deadline);

        let mut respawns = 0usize;
        let ended_at = loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break Instant::now(),
                Some(token) = respawn_rx.recv() => {
                    respawns += 1;
                    let worker = self.worker(token, &bytes_tx, &respawn_tx);
                    workers.spawn(worker.run(None));
                    while workers.try_join_next().is_some() {}
                }
                Some(n) = bytes_rx.recv() => {
                    total.fetch_add(n, Ordering::AcqRel);
                }
            }
        };

        self.transition(PhaseState::Draining);
        reporter.stop().await;
        for handle in &handles {
            handle.token.cancel();
        }
        // Reports still queued in bytes_rx finished at or after the deadline and stay uncounted.
        let result = PhaseResult {
            bytes_total: total.load(Ordering::Acquire),
            elapsed: ended_at.duration_since(started_at),
        };

        drop(bytes_tx);
        drop(respawn_tx);
        bytes_rx.close();
        respawn_rx.close();
        let drained = timeout(SHUTDOWN_GRACE, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            debug!(
                "{} phase: aborting {} workers still busy after cancellation",
                self.kind,
                workers.len()
            );
            workers.abort_all();
        }

        self.transition(PhaseState::Finalized);
        info!(
            "{} phase finished: {} bytes in {:?} ({:.2} Mbps, {} respawns)",
            self.kind,
            result.bytes_total,
            result.elapsed,
            result.mbps(),
            respawns
        );
        Ok(result)
    }

    fn worker(
        &self,
        token: CancellationToken,
        bytes_tx: &mpsc::Sender<u64>,
        respawn_tx: &mpsc::Sender<CancellationToken>,
    ) -> Worker<C> {
        Worker {
            connector: self.connector.clone(),
            kind: self.kind,
            token,
            bytes_tx: bytes_tx.clone(),
            respawn_tx: respawn_tx.clone(),
        }
    }

    fn transition(&mut self, next: PhaseState) {
        debug!("{} phase: {} -> {}", self.kind, self.state, next);
        self.state = next;
    }
}
