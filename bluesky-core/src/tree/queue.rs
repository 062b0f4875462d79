//! Process-wide transaction queue.
//!
//! A single detached thread serializes every user-supplied closure: event
//! callbacks and object/link/node transactions. The thread id is published
//! so callers can detect reentrancy — a synchronous transaction submitted
//! from the queue's own thread runs on a short-lived one-shot worker instead
//! of deadlocking on the queue's own mailbox. Delivery preserves send order.

use crate::error::Error;
use crate::transaction::TrResult;
use once_cell::sync::Lazy;
use std::panic::AssertUnwindSafe;
use std::sync::mpsc;
use std::thread::{self, ThreadId};

enum QMsg {
    Run(Box<dyn FnOnce() + Send>),
}

/// The process-wide transaction queue handle.
pub struct TransQueue {
    tx: mpsc::Sender<QMsg>,
    thread_id: ThreadId,
}

static QUEUE: Lazy<TransQueue> = Lazy::new(TransQueue::start);

/// The process-wide transaction queue.
pub fn queue() -> &'static TransQueue {
    &QUEUE
}

impl TransQueue {
    fn start() -> Self {
        let (tx, rx) = mpsc::channel::<QMsg>();
        let (id_tx, id_rx) = mpsc::channel();
        thread::Builder::new()
            .name("bs-queue".into())
            .spawn(move || {
                let _ = id_tx.send(thread::current().id());
                while let Ok(QMsg::Run(f)) = rx.recv() {
                    f();
                }
            })
            .expect("transaction queue thread must start");
        let thread_id = id_rx.recv().expect("transaction queue thread must report its id");
        Self { tx, thread_id }
    }

    /// Id of the queue's thread; equality with the current thread means the
    /// caller is already inside a queued closure.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Whether the current thread is the queue thread.
    pub fn is_reentrant(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Enqueue a fire-and-forget closure. Panics inside it are caught and
    /// logged.
    pub fn enqueue(&self, f: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(QMsg::Run(Box::new(move || {
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(f)) {
                tracing::error!(
                    "async transaction panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        })));
    }

    /// Run a synchronous transaction and await its result.
    pub async fn apply(
        &self,
        f: impl FnOnce() -> TrResult + Send + 'static,
    ) -> TrResult {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = self.tx.send(QMsg::Run(Box::new(move || {
            let _ = tx.send(run_guarded(f));
        })));
        rx.await
            .unwrap_or_else(|_| Err(Error::Custom("transaction queue is gone".into()).pack()))
    }

    /// Blocking form of [`TransQueue::apply`], usable from inside another
    /// queued closure.
    ///
    /// When called reentrantly (or from any context that must not wait on
    /// the queue mailbox), the closure runs on a one-shot worker thread; the
    /// outer transaction's serialization is unaffected because the outer
    /// closure keeps occupying the queue thread until this call returns.
    pub fn apply_blocking(&self, f: impl FnOnce() -> TrResult + Send + 'static) -> TrResult {
        if self.is_reentrant() {
            return match thread::Builder::new()
                .name("bs-queue-oneshot".into())
                .spawn(move || run_guarded(f))
            {
                Ok(worker) => worker
                    .join()
                    .unwrap_or_else(|_| Err(Error::Fault("one-shot worker panicked".into()).pack())),
                Err(e) => Err(Error::Custom(format!("can't spawn one-shot worker: {e}")).pack()),
            };
        }
        let (tx, rx) = mpsc::channel();
        let _ = self.tx.send(QMsg::Run(Box::new(move || {
            let _ = tx.send(run_guarded(f));
        })));
        rx.recv()
            .unwrap_or_else(|_| Err(Error::Custom("transaction queue is gone".into()).pack()))
    }
}

fn run_guarded(f: impl FnOnce() -> TrResult) -> TrResult {
    std::panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(Error::Fault(panic_message(payload.as_ref())).pack()))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Propdict;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn preserves_send_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = seen.clone();
            queue().enqueue(move || seen.lock().push(i));
        }
        // A sync transaction behind the async ones flushes the mailbox.
        let _ = queue().apply_blocking(|| Ok(Propdict::new()));
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn sync_apply_returns_info() {
        let res = queue().apply_blocking(|| {
            let mut info = Propdict::new();
            info.set("answer", 42i64);
            Ok(info)
        });
        assert_eq!(res.unwrap().get_int("answer"), Some(42));
    }

    #[test]
    fn reentrant_apply_completes() {
        let res = queue().apply_blocking(|| {
            assert!(queue().is_reentrant());
            // Inner sync transaction from the queue's own thread.
            let inner = queue().apply_blocking(|| {
                let mut info = Propdict::new();
                info.set("inner", true);
                Ok(info)
            })?;
            let mut info = Propdict::new();
            info.merge(inner);
            info.set("outer", true);
            Ok(info)
        });
        let info = res.unwrap();
        assert_eq!(info.get_bool("inner"), Some(true));
        assert_eq!(info.get_bool("outer"), Some(true));
    }

    #[test]
    fn panic_in_async_transaction_is_swallowed() {
        let hits = Arc::new(AtomicUsize::new(0));
        queue().enqueue(|| panic!("should not kill the queue"));
        let hits2 = hits.clone();
        queue().enqueue(move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        let _ = queue().apply_blocking(|| Ok(Propdict::new()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_apply_works() {
        let res = queue()
            .apply(|| {
                let mut info = Propdict::new();
                info.set("ok", true);
                Ok(info)
            })
            .await;
        assert_eq!(res.unwrap().get_bool("ok"), Some(true));
    }
}
