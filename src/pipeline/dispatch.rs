//! Bounded delivery queue and worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::PipelineExecutor;
use crate::hooks::{Hook, Request};

pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One accepted inbound request awaiting processing.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub hook: Hook,
    pub request: Request,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("delivery queue is full")]
    QueueFull,
    #[error("dispatcher is shutting down")]
    Closed,
}

/// Admission side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Delivery>,
    accepting: Arc<AtomicBool>,
}

/// Owner of the worker tasks.
pub struct DispatcherHandle {
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    accepting: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Spawn the workers and return the admission side plus a handle for
    /// shutting them down.
    pub fn start(
        executor: Arc<PipelineExecutor>,
        config: DispatcherConfig,
    ) -> (Dispatcher, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accepting = Arc::new(AtomicBool::new(true));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    executor.clone(),
                    rx.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(
            target: "pipeline",
            workers = config.workers.max(1),
            queue_capacity = config.queue_capacity.max(1),
            "dispatcher started"
        );

        (
            Dispatcher {
                tx,
                accepting: accepting.clone(),
            },
            DispatcherHandle {
                workers,
                shutdown: shutdown_tx,
                accepting,
            },
        )
    }

    /// Enqueue without waiting. A full queue is reported, never awaited.
    pub fn try_dispatch(&self, delivery: Delivery) -> Result<(), DispatchError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(DispatchError::Closed);
        }
        self.tx.try_send(delivery).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}

impl DispatcherHandle {
    /// Stop admitting deliveries, let the workers drain what is queued and
    /// wait for them to exit.
    pub async fn shutdown(self) {
        self.accepting.store(false, Ordering::Release);
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            let _ = worker.await;
        }
        info!(target: "pipeline", "dispatcher stopped");
    }
}

async fn worker_loop(
    worker: usize,
    executor: Arc<PipelineExecutor>,
    rx: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                delivery = rx.recv() => delivery,
                _ = shutdown.changed() => None,
            }
        };
        match next {
            Some(delivery) => run(worker, &executor, delivery).await,
            None => break,
        }
    }

    // Drain whatever was admitted before shutdown.
    loop {
        let next = rx.lock().await.try_recv().ok();
        match next {
            Some(delivery) => run(worker, &executor, delivery).await,
            None => break,
        }
    }
    debug!(target: "pipeline", worker, "worker exited");
}

async fn run(worker: usize, executor: &PipelineExecutor, delivery: Delivery) {
    debug!(target: "pipeline", worker, hook = %delivery.hook.id, "delivery dequeued");
    executor.execute(&delivery.hook, &delivery.request).await;
}
