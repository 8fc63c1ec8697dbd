//! Bounded, deduplicating work queue feeding the scan-loop task. A pair
//! already pending a scan is not enqueued twice — the fallback timer and a
//! flurry of book-ticker moves on the same pair collapse into one scan.

use std::collections::HashSet;
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::types::Pair;

const QUEUE_CAPACITY: usize = 256;

pub struct ScanQueue {
    tx: mpsc::Sender<Pair>,
    rx: Mutex<mpsc::Receiver<Pair>>,
    pending: StdMutex<HashSet<String>>,
}

impl ScanQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self { tx, rx: Mutex::new(rx), pending: StdMutex::new(HashSet::new()) }
    }

    /// No-op if `pair` already has a scan pending. Never blocks.
    pub fn enqueue(&self, pair: Pair) {
        let key = pair.canonical();
        let mut pending = self.pending.lock().unwrap();
        if pending.contains(&key) {
            return;
        }
        match self.tx.try_send(pair) {
            Ok(()) => {
                pending.insert(key);
            }
            Err(e) => warn!(pair = %key, error = %e, "scan queue full, dropping enqueue"),
        }
    }

    pub async fn recv(&self) -> Option<Pair> {
        let mut rx = self.rx.lock().await;
        let pair = rx.recv().await?;
        self.pending.lock().unwrap().remove(&pair.canonical());
        Some(pair)
    }
}
