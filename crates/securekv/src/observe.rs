//! Change notification for one key.
//!
//! [`KeyObserver`] sits outside the store: it performs writes through the
//! synchronous [`SecureStore`] API, re-reads the key afterwards and publishes
//! the result on a `tokio::sync::watch` channel. UI layers hold the receiver
//! and re-render when it changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bridge::ValueBridge;
use crate::descriptor::KeyDescriptor;
use crate::error::Result;
use crate::store::SecureStore;

/// Publishes the current value of one key to any number of subscribers.
pub struct KeyObserver<V, B> {
    store: Arc<SecureStore>,
    key: KeyDescriptor<V, B>,
    tx: watch::Sender<Option<V>>,
}

impl<V, B> KeyObserver<V, B>
where
    V: PartialEq,
    B: ValueBridge<V>,
{
    /// Read the key once and start publishing.
    pub fn new(store: Arc<SecureStore>, key: KeyDescriptor<V, B>) -> Result<Self> {
        let current = store.get(&key)?;
        let (tx, _rx) = watch::channel(current);
        Ok(Self { store, key, tx })
    }

    pub fn key(&self) -> &KeyDescriptor<V, B> {
        &self.key
    }

    /// A receiver that starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<Option<V>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<V>
    where
        V: Clone,
    {
        self.tx.borrow().clone()
    }

    /// Write through the store, then publish the stored value.
    pub fn set(&self, value: &V) -> Result<()> {
        self.store.set(value, &self.key)?;
        self.refresh()
    }

    /// Remove through the store, then publish the absence.
    pub fn remove(&self) -> Result<()> {
        self.store.remove(&self.key)?;
        self.refresh()
    }

    /// Re-read the key and publish it if it changed. Picks up writes made
    /// elsewhere.
    pub fn refresh(&self) -> Result<()> {
        let value = self.store.get(&self.key)?;
        let changed = self.tx.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
        if changed {
            tracing::debug!(key = %self.key.key(), "published new key value");
        }
        Ok(())
    }
}

impl<V, B> KeyObserver<V, B>
where
    V: PartialEq + Send + Sync + 'static,
    B: ValueBridge<V> + 'static,
{
    /// Refresh every `period` until all receivers are dropped.
    ///
    /// Each read runs on the blocking pool. Read failures are logged and the
    /// next tick tries again.
    pub fn poll_every(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let observer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if observer.tx.is_closed() {
                    tracing::debug!(key = %observer.key.key(), "no subscribers left; polling stopped");
                    break;
                }
                let reader = Arc::clone(&observer);
                match tokio::task::spawn_blocking(move || reader.refresh()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::warn!(key = %observer.key.key(), error = %err, "poll refresh failed");
                    }
                    Err(err) => {
                        tracing::error!(key = %observer.key.key(), error = %err, "poll refresh task failed");
                    }
                }
            }
        })
    }
}
