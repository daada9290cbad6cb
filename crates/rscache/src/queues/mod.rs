//! The four internal queues (§5): unbounded, multi-producer/multi-consumer,
//! blocking FIFOs, one dedicated worker thread each. Built directly on
//! `crossbeam_channel::unbounded` rather than a hand-rolled blocking queue.

pub mod main_queue;
pub mod read;
pub mod return_queue;
pub mod write;

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{adapter::StorageAdapter, entry::Entry};

/// A write-out task produced by the main-queue worker and consumed by the
/// write-queue worker: the entry plus the already-split storage payload.
pub struct WriteTask<A: StorageAdapter> {
    pub key: A::Key,
    pub entry: Arc<Entry<A>>,
    pub write_data: A::StorageWrite,
}

/// Owns the sending and receiving halves of all four queues. Cloning a
/// `Sender`/`Receiver` is cheap (`crossbeam_channel` reference-counts
/// internally), so each worker thread gets its own clone of the ends it
/// needs.
pub struct Queues<A: StorageAdapter> {
    pub read_tx: Sender<Arc<Entry<A>>>,
    pub read_rx: Receiver<Arc<Entry<A>>>,
    pub main_tx: Sender<Arc<Entry<A>>>,
    pub main_rx: Receiver<Arc<Entry<A>>>,
    pub write_tx: Sender<WriteTask<A>>,
    pub write_rx: Receiver<WriteTask<A>>,
    pub return_tx: Sender<Arc<Entry<A>>>,
    pub return_rx: Receiver<Arc<Entry<A>>>,
}

impl<A: StorageAdapter> Queues<A> {
    pub fn new() -> Self {
        let (read_tx, read_rx) = unbounded();
        let (main_tx, main_rx) = unbounded();
        let (write_tx, write_rx) = unbounded();
        let (return_tx, return_rx) = unbounded();
        Self {
            read_tx,
            read_rx,
            main_tx,
            main_rx,
            write_tx,
            write_rx,
            return_tx,
            return_rx,
        }
    }

    pub fn enqueue_read(&self, entry: Arc<Entry<A>>) {
        let _ = self.read_tx.send(entry);
    }

    pub fn enqueue_main(&self, entry: Arc<Entry<A>>) {
        let _ = self.main_tx.send(entry);
    }

    pub fn enqueue_write(&self, task: WriteTask<A>) {
        let _ = self.write_tx.send(task);
    }

    pub fn enqueue_return(&self, entry: Arc<Entry<A>>) {
        let _ = self.return_tx.send(entry);
    }
}

impl<A: StorageAdapter> Default for Queues<A> {
    fn default() -> Self {
        Self::new()
    }
}
