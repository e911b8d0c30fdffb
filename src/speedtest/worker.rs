use crate::error::{Error, Result};
use log::{debug, warn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Pause before a replacement that could not connect asks for another one.
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Download,
    Upload,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Download => write!(f, "download"),
            WorkerKind::Upload => write!(f, "upload"),
        }
    }
}

/// Opens the persistent connection a transfer worker runs on.
pub trait Connector: Send + Sync + 'static {
    type Conn: Transfer;

    fn connect(&self, kind: WorkerKind) -> impl Future<Output = Result<Self::Conn>> + Send;
}

/// One established transfer connection.
pub trait Transfer: Send + 'static {
    /// Performs exactly one read-and-discard or one write and returns the bytes moved.
    fn transfer(&mut self) -> impl Future<Output = Result<u64>> + Send;

    /// Best-effort shutdown once the worker has been cancelled.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Readiness barrier and start gate for a worker of the initial wave.
pub(crate) struct Launch {
    pub ready: oneshot::Sender<Result<()>>,
    pub start: watch::Receiver<bool>,
}

pub(crate) struct Worker<C: Connector> {
    pub connector: Arc<C>,
    pub kind: WorkerKind,
    pub token: CancellationToken,
    pub bytes_tx: mpsc::Sender<u64>,
    pub respawn_tx: mpsc::Sender<CancellationToken>,
}

impl<C: Connector> Worker<C> {
    /// Runs until the token is cancelled or the connection fails.
    ///
    /// A failed connection is never retried here: the lineage's token goes back to
    /// the coordinator on `respawn_tx` and this task ends.
    pub async fn run(self, launch: Option<Launch>) {
        let mut conn = match self.connector.connect(self.kind).await {
            Ok(conn) => conn,
            Err(err) => {
                self.connect_failed(err, launch).await;
                return;
            }
        };

        if let Some(Launch { ready, mut start }) = launch {
            if ready.send(Ok(())).is_err() {
                return;
            }
            if start.wait_for(|started| *started).await.is_err() {
                return;
            }
        }

        loop {
            if self.token.is_cancelled() {
                break;
            }

            match conn.transfer().await {
                Ok(n) => {
                    if self.bytes_tx.send(n).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!("{} worker lost its connection: {}", self.kind, err);
                    let _ = self.respawn_tx.send(self.token.clone()).await;
                    return;
                }
            }
        }

        conn.close().await;
    }

    async fn connect_failed(&self, err: Error, launch: Option<Launch>) {
        match launch {
            // The barrier must hear from every launched worker, failure included.
            Some(launch) => {
                let _ = launch.ready.send(Err(err));
            }
            None => {
                warn!("{} replacement could not connect: {}", self.kind, err);
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {
                        let _ = self.respawn_tx.send(self.token.clone()).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        fail_after: usize,
        done: Arc<AtomicUsize>,
    }

    impl Transfer for Counting {
        async fn transfer(&mut self) -> Result<u64> {
            tokio::task::yield_now().await;
            if self.done.load(Ordering::SeqCst) >= self.fail_after {
                return Err(Error::Transfer("reset".into()));
            }
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(10)
        }

        async fn close(self) {}
    }

    struct Fixed {
        fail_after: usize,
        refuse: bool,
        done: Arc<AtomicUsize>,
    }

    impl Connector for Fixed {
        type Conn = Counting;

        async fn connect(&self, _kind: WorkerKind) -> Result<Counting> {
            if self.refuse {
                return Err(Error::Connectivity("refused".into()));
            }
            Ok(Counting {
                fail_after: self.fail_after,
                done: self.done.clone(),
            })
        }
    }

    fn worker(
        connector: Fixed,
    ) -> (
        Worker<Fixed>,
        mpsc::Receiver<u64>,
        mpsc::Receiver<CancellationToken>,
    ) {
        let (bytes_tx, bytes_rx) = mpsc::channel(64);
        let (respawn_tx, respawn_rx) = mpsc::channel(1);
        let worker = Worker {
            connector: Arc::new(connector),
            kind: WorkerKind::Download,
            token: CancellationToken::new(),
            bytes_tx,
            respawn_tx,
        };
        (worker, bytes_rx, respawn_rx)
    }

    #[tokio::test]
    async fn failing_connection_requests_respawn_with_its_token() {
        let done = Arc::new(AtomicUsize::new(0));
        let (worker, mut bytes_rx, mut respawn_rx) = worker(Fixed {
            fail_after: 3,
            refuse: false,
            done: done.clone(),
        });
        let token = worker.token.clone();

        worker.run(None).await;

        let mut total = 0;
        while let Ok(n) = bytes_rx.try_recv() {
            total += n;
        }
        assert_eq!(total, 30);
        let returned = respawn_rx.try_recv().expect("respawn request");
        token.cancel();
        assert!(returned.is_cancelled(), "respawn must carry the lineage token");
    }

    #[tokio::test]
    async fn cancelled_worker_starts_no_io() {
        let done = Arc::new(AtomicUsize::new(0));
        let (worker, mut bytes_rx, mut respawn_rx) = worker(Fixed {
            fail_after: usize::MAX,
            refuse: false,
            done: done.clone(),
        });
        worker.token.cancel();

        worker.run(None).await;

        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert!(bytes_rx.try_recv().is_err());
        assert!(respawn_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn launch_failure_is_reported_through_the_barrier() {
        let (worker, _bytes_rx, mut respawn_rx) = worker(Fixed {
            fail_after: 0,
            refuse: true,
            done: Arc::new(AtomicUsize::new(0)),
        });
        let (ready_tx, ready_rx) = oneshot::channel();
        let (_start_tx, start_rx) = watch::channel(false);

        worker
            .run(Some(Launch {
                ready: ready_tx,
                start: start_rx,
            }))
            .await;

        assert!(matches!(ready_rx.await, Ok(Err(Error::Connectivity(_)))));
        assert!(respawn_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn launched_worker_waits_for_the_start_gate() {
        let done = Arc::new(AtomicUsize::new(0));
        let (worker, mut bytes_rx, _respawn_rx) = worker(Fixed {
            fail_after: 1,
            refuse: false,
            done: done.clone(),
        });
        let (ready_tx, ready_rx) = oneshot::channel();
        let (start_tx, start_rx) = watch::channel(false);

        let task = tokio::spawn(worker.run(Some(Launch {
            ready: ready_tx,
            start: start_rx,
        })));

        assert!(matches!(ready_rx.await, Ok(Ok(()))));
        tokio::task::yield_now().await;
        assert_eq!(done.load(Ordering::SeqCst), 0);

        start_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(bytes_rx.recv().await, Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_that_cannot_connect_asks_again_after_a_delay() {
        let (worker, _bytes_rx, mut respawn_rx) = worker(Fixed {
            fail_after: 0,
            refuse: true,
            done: Arc::new(AtomicUsize::new(0)),
        });
        let started = tokio::time::Instant::now();

        worker.run(None).await;

        assert!(respawn_rx.try_recv().is_ok());
        assert!(started.elapsed() >= RECONNECT_DELAY);
    }
}
