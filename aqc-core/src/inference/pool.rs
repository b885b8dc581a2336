//! Isolated detector instances on dedicated worker threads.
//!
//! ```text
//! detect() ──► crossbeam Sender<Job> ──► aqc-vad-0 ─┐
//!                                    ──► aqc-vad-1 ─┼─► oneshot reply
//!                                    ──► aqc-vad-N ─┘
//! ```
//!
//! Each worker builds its own detector from the factory *on its own thread*
//! and warms it up before reporting ready, so detectors never cross threads.
//! Dropping the pool closes the job channel; workers finish the job in hand
//! and exit, and are joined.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::DetectorFactory;
use crate::error::{AqcError, Result};
use crate::metrics::SpeechInterval;
use crate::vad::SpeechDetector;

struct Job {
    pcm_path: PathBuf,
    reply: oneshot::Sender<Result<Vec<SpeechInterval>>>,
}

pub struct DetectorPool {
    tx: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl DetectorPool {
    /// Spawn `size` workers and block until every one has built and warmed up
    /// its detector.
    ///
    /// # Errors
    /// The first worker build/warm-up failure; already-started workers are
    /// shut down before returning.
    pub fn start(size: usize, factory: DetectorFactory) -> Result<Self> {
        let size = size.max(1);
        let (tx, rx) = unbounded::<Job>();
        // Sync channel: each worker reports detector readiness back to start().
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = rx.clone();
            let factory = factory.clone();
            let ready_tx = ready_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("aqc-vad-{index}"))
                .spawn(move || worker_loop(index, factory, rx, ready_tx))?;
            workers.push(handle);
        }
        drop(ready_tx);
        drop(rx);

        let pool = Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            size,
        };

        for _ in 0..size {
            let ready = ready_rx.recv().map_err(|_| {
                AqcError::WorkerUnavailable("worker exited before reporting ready".into())
            });
            if let Err(e) = ready.and_then(|r| r) {
                error!(error = %e, "vad worker failed to start");
                pool.shutdown();
                return Err(e);
            }
        }

        info!(workers = size, "vad worker pool ready");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Dispatch one file to the next free worker and await its reply.
    pub async fn detect(&self, pcm_path: PathBuf) -> Result<Vec<SpeechInterval>> {
        let (reply, reply_rx) = oneshot::channel();
        {
            let tx = self.tx.lock();
            let tx = tx
                .as_ref()
                .ok_or_else(|| AqcError::WorkerUnavailable("pool is shut down".into()))?;
            tx.send(Job { pcm_path, reply })
                .map_err(|_| AqcError::WorkerUnavailable("no live workers".into()))?;
        }

        reply_rx
            .await
            .map_err(|_| AqcError::WorkerUnavailable("worker dropped the job".into()))?
    }

    /// Close the job channel and join every worker. Idempotent.
    pub fn shutdown(&self) {
        let tx = self.tx.lock().take();
        if tx.is_none() {
            return;
        }
        drop(tx);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                warn!("vad worker panicked during shutdown");
            }
        }
        info!("vad worker pool stopped");
    }
}

impl Drop for DetectorPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DetectorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorPool")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

fn worker_loop(
    index: usize,
    factory: DetectorFactory,
    rx: Receiver<Job>,
    ready_tx: std::sync::mpsc::Sender<Result<()>>,
) {
    let mut detector: Box<dyn SpeechDetector> = match factory().and_then(|mut d| {
        d.warm_up()?;
        Ok(d)
    }) {
        Ok(d) => {
            let _ = ready_tx.send(Ok(()));
            d
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    drop(ready_tx);
    debug!(worker = index, "vad worker ready");

    while let Ok(job) = rx.recv() {
        let result = catch_unwind(AssertUnwindSafe(|| detector.detect(&job.pcm_path)))
            .unwrap_or_else(|_| {
                error!(worker = index, "detector panicked");
                Err(AqcError::Inference("detector panicked".into()))
            });
        // Requester may have timed out and gone away.
        let _ = job.reply.send(result);
    }

    debug!(worker = index, "vad worker exiting");
}
