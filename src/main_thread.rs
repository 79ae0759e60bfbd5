//! Owning-thread dispatcher
//!
//! Script contexts may only be touched from the thread that owns the
//! embedding runtime. Every evaluate/expose/reload is wrapped in a job and
//! queued here; the embedder drains the queue on that thread, or lets
//! [`MainThread::spawn`] drive it on a dedicated tokio task.

use tokio::sync::{mpsc, oneshot};

use crate::error::{BridgeError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable handle for queueing work onto the owning thread
#[derive(Clone)]
pub struct MainThread {
    tx: mpsc::UnboundedSender<Job>,
}

/// Receiving half, drained on the owning thread
pub struct MainLoop {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl MainThread {
    /// Create a handle and the loop the embedder must drive
    pub fn channel() -> (Self, MainLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, MainLoop { rx })
    }

    /// Create a handle whose loop runs on its own tokio task
    pub fn spawn() -> (Self, tokio::task::JoinHandle<()>) {
        let (handle, main_loop) = Self::channel();
        let task = tokio::spawn(main_loop.run());
        (handle, task)
    }

    /// Queue a job without waiting for it
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.tx
            .send(Box::new(job))
            .map_err(|_| BridgeError::MainThreadGone)
    }

    /// Queue a job and wait for its result
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(move || {
            let _ = tx.send(f());
        })?;
        rx.await.map_err(|_| BridgeError::MainThreadGone)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl MainLoop {
    /// Run jobs in order until every handle is dropped
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            job();
        }
        tracing::debug!("Main thread loop finished");
    }

    /// Run whatever is queued right now and return how many jobs ran
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let (main, _task) = MainThread::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            main.post(move || seen.lock().unwrap().push(i)).unwrap();
        }
        let total = main.run(|| 42).await.unwrap();

        assert_eq!(total, 42);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_run_pending_drains_queue() {
        let (main, mut main_loop) = MainThread::channel();
        main.post(|| {}).unwrap();
        main.post(|| {}).unwrap();
        assert_eq!(main_loop.run_pending(), 2);
        assert_eq!(main_loop.run_pending(), 0);
    }

    #[tokio::test]
    async fn test_post_fails_after_loop_dropped() {
        let (main, main_loop) = MainThread::channel();
        drop(main_loop);
        assert!(main.is_closed());
        assert_eq!(main.post(|| {}), Err(BridgeError::MainThreadGone));
        assert_eq!(main.run(|| 1).await, Err(BridgeError::MainThreadGone));
    }
}
