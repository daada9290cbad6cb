//! The injectable I/O dispatch hook used by the read and write queue
//! workers. This is deliberately not a thread-pool implementation (that's
//! an explicit external collaborator) — just the seam a caller can plug a
//! real pool into. Absent one, storage calls run inline on the worker
//! thread, which is the engine's default.

/// Runs a unit of storage I/O somewhere. The default, [`InlineExecutor`],
/// runs it synchronously on the calling (worker) thread.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        job();
    }
}

/// Runs `job` to completion, either inline (when `executor` is `None`) or
/// dispatched through the configured executor, blocking the caller on a
/// one-shot channel for the result either way.
pub fn run<T: Send + 'static>(
    executor: Option<&std::sync::Arc<dyn Executor>>,
    job: impl FnOnce() -> T + Send + 'static,
) -> T {
    match executor {
        None => job(),
        Some(executor) => {
            let (tx, rx) = crossbeam_channel::bounded(1);
            executor.execute(Box::new(move || {
                let _ = tx.send(job());
            }));
            rx.recv().expect("executor dropped job without producing a result")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn inline_executor_runs_synchronously() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        InlineExecutor.execute(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
    }
}
