//! Bounded worker pool for background soft-deletion
//!
//! Requests are acknowledged once their aliases are queued. Each alias is
//! deleted on its own by whichever worker picks it up; failures are logged
//! and never retried. Jobs still queued when the process dies are lost.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::storage::Storage;

#[derive(Debug, Error)]
#[error("deletion queue is shut down")]
pub struct QueueClosed;

#[derive(Debug)]
struct DeleteJob {
    owner_id: i64,
    alias: String,
}

pub struct DeletionQueue {
    sender: Mutex<Option<mpsc::Sender<DeleteJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DeletionQueue {
    pub fn new(storage: Arc<dyn Storage>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let storage = Arc::clone(&storage);
                let rx = Arc::clone(&rx);
                tokio::spawn(run_worker(worker, storage, rx))
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    /// Queue one deletion per alias; waits only while the queue is full
    pub async fn submit(&self, owner_id: i64, aliases: Vec<String>) -> Result<(), QueueClosed> {
        let sender = self.sender.lock().await.clone().ok_or(QueueClosed)?;

        for alias in aliases {
            sender
                .send(DeleteJob { owner_id, alias })
                .await
                .map_err(|_| QueueClosed)?;
        }

        Ok(())
    }

    /// Stop accepting jobs and wait for the queued ones to finish
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Deletion worker panicked: {}", e);
            }
        }
        info!("Deletion queue drained");
    }
}

async fn run_worker(
    worker: usize,
    storage: Arc<dyn Storage>,
    rx: Arc<Mutex<mpsc::Receiver<DeleteJob>>>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            debug!(worker, "deletion worker stopping");
            break;
        };

        if let Err(e) = storage
            .delete(job.owner_id, std::slice::from_ref(&job.alias))
            .await
        {
            error!(
                worker,
                owner_id = job.owner_id,
                alias = %job.alias,
                "Failed to delete alias: {}",
                e
            );
        }
    }
}
