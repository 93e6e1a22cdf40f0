//! Subscription registry
//!
//! Maps a subject to the one persistent subscription a client holds on it.
//! Each subject has its own slot lock, held from lookup to insert, so two
//! racing registrations for the same subject can never both create a
//! subscription. A slow subscribe only holds up its own subject.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::types::Result;

/// Handle to a persistent subscription and its delivery task
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    subject: String,
    /// Cancelled to ask the delivery task to stop
    shutdown: CancellationToken,
    /// Cancelled by the delivery task when it exits
    finished: CancellationToken,
}

impl SubscriptionHandle {
    pub fn new(subject: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            shutdown: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// True until the delivery task has exited
    pub fn is_active(&self) -> bool {
        !self.finished.is_cancelled()
    }

    /// Ask the delivery task to stop and unsubscribe
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the delivery task has exited
    pub async fn closed(&self) {
        self.finished.cancelled().await
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn finished_token(&self) -> CancellationToken {
        self.finished.clone()
    }
}

/// Registration slot for one subject
type Slot = Arc<Mutex<Option<SubscriptionHandle>>>;

/// Per-client map of subject -> persistent subscription
#[derive(Default)]
pub struct SubscriptionRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, subject: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(subject.to_string()).or_default())
    }

    async fn existing_slot(&self, subject: &str) -> Option<Slot> {
        self.slots.lock().await.get(subject).cloned()
    }

    async fn all_slots(&self) -> Vec<(String, Slot)> {
        self.slots
            .lock()
            .await
            .iter()
            .map(|(subject, slot)| (subject.clone(), Arc::clone(slot)))
            .collect()
    }

    /// Return the active handle for `subject`, creating it with `factory`
    /// if there is none.
    ///
    /// The boolean is `true` when `factory` ran. A factory error leaves the
    /// registry untouched. An entry whose task already exited is replaced.
    /// Only callers registering the same subject wait on a running factory.
    pub async fn get_or_create<F, Fut>(
        &self,
        subject: &str,
        factory: F,
    ) -> Result<(SubscriptionHandle, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SubscriptionHandle>>,
    {
        let slot = self.slot(subject).await;
        let mut entry = slot.lock().await;

        if let Some(existing) = entry.as_ref() {
            if existing.is_active() {
                debug!("Reusing subscription {} on {}", existing.id, subject);
                return Ok((existing.clone(), false));
            }
            debug!("Replacing finished subscription {} on {}", existing.id, subject);
        }

        let handle = factory().await?;
        *entry = Some(handle.clone());
        Ok((handle, true))
    }

    /// Active handle for `subject`, if any
    pub async fn get(&self, subject: &str) -> Option<SubscriptionHandle> {
        let slot = self.existing_slot(subject).await?;
        let entry = slot.lock().await;
        entry.as_ref().filter(|h| h.is_active()).cloned()
    }

    /// Remove the entry for `subject` and stop its task
    pub async fn remove(&self, subject: &str) -> Option<SubscriptionHandle> {
        let slot = self.existing_slot(subject).await?;
        let handle = slot.lock().await.take()?;
        handle.stop();
        Some(handle)
    }

    /// Number of subjects with an active subscription
    pub async fn active_count(&self) -> usize {
        self.subjects().await.len()
    }

    /// Subjects with an active subscription, sorted
    ///
    /// A subject whose registration is still in flight is not listed.
    pub async fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .all_slots()
            .await
            .into_iter()
            .filter(|(_, slot)| {
                slot.try_lock()
                    .map(|entry| entry.as_ref().is_some_and(|h| h.is_active()))
                    .unwrap_or(false)
            })
            .map(|(subject, _)| subject)
            .collect();
        subjects.sort();
        subjects
    }

    /// Stop and drop every entry
    ///
    /// Registrations still in flight finish first and are stopped with
    /// the rest.
    pub async fn shutdown_all(&self) -> Vec<SubscriptionHandle> {
        let mut drained = Vec::new();
        for (_, slot) in self.all_slots().await {
            if let Some(handle) = slot.lock().await.take() {
                handle.stop();
                drained.push(handle);
            }
        }
        drained
    }
}
