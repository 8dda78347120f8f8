//! Single-shot await primitive: one producer sets a value, one consumer
//! awaits it with a timeout. Grounded in
//! `examples/original_source/src/common/redpepper/common/connection.py`'s
//! use of `Slot` for ping/pong correlation and RPC response correlation.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

use gw_common::error::{Error, Result};

/// A one-shot value handoff. `set` may be called at most once; a second
/// call is a silent no-op (the slot was already consumed or abandoned).
/// `get` consumes the slot and returns an error on timeout or if the
/// sender was dropped (e.g. the connection closed) without setting a
/// value.
pub struct Slot<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
    rx: Mutex<Option<oneshot::Receiver<T>>>,
}

impl<T: Send + 'static> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Slot<T> {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Resolve the slot. Returns `false` if it was already set/consumed.
    pub fn set(&self, value: T) -> bool {
        let mut guard = self.tx.lock().unwrap();
        match guard.take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Await the value with a timeout. The slot can only be awaited once;
    /// a second call returns `Error::Closed`.
    pub async fn get(&self, timeout: Duration) -> Result<T> {
        let rx = {
            let mut guard = self.rx.lock().unwrap();
            guard.take()
        };
        let Some(rx) = rx else {
            return Err(Error::Closed);
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => Err(Error::Timeout("slot".into())),
        }
    }

    /// Cancel the slot: drop the sender so that a caller already parked in
    /// `get` (awaiting the receiver directly, outside any lock) observes
    /// the channel close immediately instead of waiting out its timeout.
    /// Used when a connection tears down and all outstanding Slots must
    /// resolve an error to their waiter.
    pub fn cancel(&self) {
        self.tx.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_before_get_resolves_immediately() {
        let slot: Slot<i32> = Slot::new();
        assert!(slot.set(42));
        let value = slot.get(Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn get_without_set_times_out() {
        let slot: Slot<i32> = Slot::new();
        let result = slot.get(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn second_set_is_a_no_op() {
        let slot: Slot<i32> = Slot::new();
        assert!(slot.set(1));
        assert!(!slot.set(2));
        assert_eq!(slot.get(Duration::from_secs(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancel_makes_pending_set_fail() {
        let slot: Slot<i32> = Slot::new();
        slot.cancel();
        assert!(!slot.set(1));
    }

    #[tokio::test]
    async fn cancel_resolves_an_already_parked_get_promptly() {
        let slot: Arc<Slot<i32>> = Arc::new(Slot::new());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.get(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        slot.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancel should resolve the waiter well before its own timeout")
            .unwrap();
        assert!(matches!(result, Err(Error::Closed)));
    }
}
