//! Bookkeeping for in-flight media uploads.
//!
//! Each optimistic attach registers one `UploadTask`. Completion events
//! look their task up by media id; anything not in the ledger was
//! cancelled (its container was deleted) and its handle already released,
//! so late completions are ignored. This is what keeps handle release
//! exactly-once.

use crate::image_processing::EncodedUpload;
use crate::model::{ClientId, LocalBlobHandle, MediaId};
use crate::patch::{MediaAnchor, Subtree};
use crate::transport::RetrySchedule;
use crate::UnixTimeMs;

#[derive(Debug, Clone, PartialEq)]
pub enum UploadPhase {
    InFlight,
    AwaitingRetry { next_attempt_at: UnixTimeMs },
}

#[derive(Debug, Clone)]
pub struct UploadTask {
    pub media_id: MediaId,
    pub client: ClientId,
    pub anchor: MediaAnchor,
    pub handle: LocalBlobHandle,
    pub payload: EncodedUpload,
    pub schedule: RetrySchedule,
    pub phase: UploadPhase,
}

impl UploadTask {
    #[must_use]
    pub fn new(
        media_id: MediaId,
        client: ClientId,
        anchor: MediaAnchor,
        handle: LocalBlobHandle,
        payload: EncodedUpload,
        schedule: RetrySchedule,
    ) -> Self {
        Self {
            media_id,
            client,
            anchor,
            handle,
            payload,
            schedule,
            // Due immediately; the dispatcher flips it to InFlight.
            phase: UploadPhase::AwaitingRetry {
                next_attempt_at: UnixTimeMs(0),
            },
        }
    }

    #[must_use]
    pub fn is_due(&self, now: UnixTimeMs) -> bool {
        match &self.phase {
            UploadPhase::InFlight => false,
            UploadPhase::AwaitingRetry { next_attempt_at } => !now.is_before(*next_attempt_at),
        }
    }

    pub fn mark_in_flight(&mut self) {
        self.phase = UploadPhase::InFlight;
    }

    pub fn await_retry(&mut self, next_attempt_at: UnixTimeMs) {
        self.phase = UploadPhase::AwaitingRetry { next_attempt_at };
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadLedger {
    tasks: Vec<UploadTask>,
}

impl UploadLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: UploadTask) {
        self.tasks.push(task);
    }

    #[must_use]
    pub fn get(&self, media_id: &MediaId) -> Option<&UploadTask> {
        self.tasks.iter().find(|t| &t.media_id == media_id)
    }

    #[must_use]
    pub fn get_mut(&mut self, media_id: &MediaId) -> Option<&mut UploadTask> {
        self.tasks.iter_mut().find(|t| &t.media_id == media_id)
    }

    pub fn remove(&mut self, media_id: &MediaId) -> Option<UploadTask> {
        let pos = self.tasks.iter().position(|t| &t.media_id == media_id)?;
        Some(self.tasks.remove(pos))
    }

    /// Media ids whose retry wait has elapsed.
    #[must_use]
    pub fn due(&self, now: UnixTimeMs) -> Vec<MediaId> {
        self.tasks
            .iter()
            .filter(|t| t.is_due(now))
            .map(|t| t.media_id.clone())
            .collect()
    }

    /// Drops every task anchored inside the removed subtree and hands the
    /// released handles back for revocation.
    pub fn cancel_within(&mut self, client: &ClientId, scope: &Subtree) -> Vec<LocalBlobHandle> {
        self.drain_where(|t| &t.client == client && t.anchor.is_within(scope))
    }

    /// Drops every task for a removed client.
    pub fn cancel_for_client(&mut self, client: &ClientId) -> Vec<LocalBlobHandle> {
        self.drain_where(|t| &t.client == client)
    }

    fn drain_where(&mut self, pred: impl Fn(&UploadTask) -> bool) -> Vec<LocalBlobHandle> {
        let mut released = Vec::new();
        self.tasks.retain(|t| {
            if pred(t) {
                released.push(t.handle.clone());
                false
            } else {
                true
            }
        });
        released
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadTask> {
        self.tasks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChecklistItemId, EnvironmentId};
    use crate::transport::RetryPolicy;

    fn task(client: &ClientId, env: &EnvironmentId) -> UploadTask {
        UploadTask::new(
            MediaId::generate(),
            client.clone(),
            MediaAnchor::ChecklistItem {
                environment: env.clone(),
                item: ChecklistItemId::generate(),
            },
            LocalBlobHandle::new("blob:mem/1"),
            EncodedUpload {
                base64_data: "QUJD".into(),
                file_name: "photo.jpg".into(),
                mime_type: "image/jpeg".into(),
            },
            RetrySchedule::new(RetryPolicy::default()),
        )
    }

    #[test]
    fn fresh_tasks_are_due_and_in_flight_tasks_are_not() {
        let client = ClientId::generate();
        let env = EnvironmentId::generate();
        let mut ledger = UploadLedger::new();
        let t = task(&client, &env);
        let id = t.media_id.clone();
        ledger.register(t);

        let now = UnixTimeMs(1_000);
        assert_eq!(ledger.due(now), vec![id.clone()]);

        ledger.get_mut(&id).unwrap().mark_in_flight();
        assert!(ledger.due(now).is_empty());

        ledger.get_mut(&id).unwrap().await_retry(now.add_millis(500));
        assert!(ledger.due(now).is_empty());
        assert_eq!(ledger.due(now.add_millis(500)), vec![id]);
    }

    #[test]
    fn cancelling_a_subtree_releases_only_its_handles() {
        let client = ClientId::generate();
        let kitchen = EnvironmentId::generate();
        let bedroom = EnvironmentId::generate();
        let mut ledger = UploadLedger::new();
        ledger.register(task(&client, &kitchen));
        ledger.register(task(&client, &bedroom));

        let released = ledger.cancel_within(&client, &Subtree::Environment(kitchen));
        assert_eq!(released.len(), 1);
        assert_eq!(ledger.len(), 1);

        let released = ledger.cancel_for_client(&client);
        assert_eq!(released.len(), 1);
        assert!(ledger.is_empty());
    }
}
