// CLASSIFICATION: COMMUNITY
// Filename: value_task.rs v0.2
// Author: Lukas Bower
// Date Modified: 2025-10-21

//! Lazily resolved value backed by a background task.
//!
//! One producer task computes the value; any number of consumers await
//! readiness. A producer that gives up (or dies) resolves consumers with
//! `None`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

enum State<T> {
    Pending,
    Done(Option<Arc<T>>),
}

/// Handle to a value that a background task is still producing.
pub struct ValueTask<T> {
    rx: watch::Receiver<State<T>>,
}

impl<T> Clone for ValueTask<T> {
    fn clone(&self) -> Self {
        Self { rx: self.rx.clone() }
    }
}

impl<T: Send + Sync + 'static> ValueTask<T> {
    /// Spawn the producer and return the consumer handle.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = Option<T>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(State::Pending);
        tokio::spawn(async move {
            let value = fut.await.map(Arc::new);
            let _ = tx.send(State::Done(value));
        });
        Self { rx }
    }

    /// Wait until the producer finished and return its value.
    pub async fn ready(&self) -> Option<Arc<T>> {
        let mut rx = self.rx.clone();
        loop {
            if let State::Done(value) = &*rx.borrow_and_update() {
                return value.clone();
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Non-blocking peek; `None` while still pending or when production failed.
    pub fn try_get(&self) -> Option<Arc<T>> {
        match &*self.rx.borrow() {
            State::Done(value) => value.clone(),
            State::Pending => None,
        }
    }
}
