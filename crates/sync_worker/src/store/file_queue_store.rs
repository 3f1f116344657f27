use async_trait::async_trait;
use chrono::Utc;
use common::domain::{
    DomainError, DomainResult, EnqueuePourInput, PourQueueStore, QueuedEntry, SyncState,
};
use common::garde::validate_struct;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Queue contents keyed by outlet id. Entries within an outlet are kept in
/// enqueue order.
type QueueMap = HashMap<String, Vec<QueuedEntry>>;

/// File-backed implementation of [`PourQueueStore`].
///
/// Entries live in memory behind an `RwLock` and are snapshotted to a JSON
/// file after every mutation, so attempt counters and unsynced readings
/// survive a process restart. A snapshot failure is surfaced as
/// `DomainError::QueuePersistence` to the caller of the mutating operation;
/// losing a pour reading silently is the one unacceptable outcome here.
///
/// The write lock serializes mutations; inspector reads only take the read
/// lock. A revision counter on a `watch` channel is bumped after each
/// committed mutation so a UI layer can adapt its own change notification
/// without the core embedding any reactivity model.
pub struct FilePourQueueStore {
    queues: RwLock<QueueMap>,
    snapshot_path: Option<PathBuf>,
    revision: watch::Sender<u64>,
}

impl FilePourQueueStore {
    /// Open a store backed by the given snapshot file, loading any queued
    /// entries a previous process left behind. A missing file is an empty
    /// queue; an unreadable or corrupt file is a persistence error.
    pub async fn load(path: impl Into<PathBuf>) -> DomainResult<Self> {
        let path = path.into();

        let queues: QueueMap = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                DomainError::QueuePersistence(format!(
                    "corrupt queue snapshot {}: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => QueueMap::new(),
            Err(e) => {
                return Err(DomainError::QueuePersistence(format!(
                    "cannot read queue snapshot {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let entries: usize = queues.values().map(Vec::len).sum();
        info!(
            path = %path.display(),
            outlets = queues.len(),
            entries,
            "Loaded pour queue snapshot"
        );

        Ok(Self {
            queues: RwLock::new(queues),
            snapshot_path: Some(path),
            revision: watch::channel(0).0,
        })
    }

    /// Memory-only store, used in tests and demos
    pub fn in_memory() -> Self {
        Self {
            queues: RwLock::new(QueueMap::new()),
            snapshot_path: None,
            revision: watch::channel(0).0,
        }
    }

    /// Change-notification hook: the receiver sees a new revision after
    /// every committed mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Snapshot the full queue map. Called with the write lock held, so the
    /// file always reflects a consistent state.
    async fn persist(&self, queues: &QueueMap) -> DomainResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let json = serde_json::to_vec(queues)
            .map_err(|e| DomainError::QueuePersistence(e.to_string()))?;

        // Write-then-rename so a crash mid-write cannot truncate the
        // previous snapshot
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &json).await.map_err(|e| {
            DomainError::QueuePersistence(format!("cannot write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            DomainError::QueuePersistence(format!("cannot replace {}: {}", path.display(), e))
        })?;

        Ok(())
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

fn find_entry_mut<'a>(queues: &'a mut QueueMap, entry_id: &str) -> Option<&'a mut QueuedEntry> {
    queues
        .values_mut()
        .flat_map(|entries| entries.iter_mut())
        .find(|entry| entry.entry_id == entry_id)
}

#[async_trait]
impl PourQueueStore for FilePourQueueStore {
    async fn enqueue(&self, input: EnqueuePourInput) -> DomainResult<QueuedEntry> {
        validate_struct(&input)?;
        let (outlet_id, reading) = input.into_reading();

        let entry = QueuedEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            outlet_id: outlet_id.clone(),
            reading,
            queued_at: Utc::now(),
            sync_attempts: 0,
            sync_error: None,
            synced_at: None,
            last_attempt_at: None,
        };

        let mut queues = self.queues.write().await;
        queues
            .entry(outlet_id.clone())
            .or_default()
            .push(entry.clone());

        if let Err(e) = self.persist(&queues).await {
            // Roll the append back so the error means "not enqueued"; a
            // caller retry must not double-queue the reading
            if let Some(entries) = queues.get_mut(&outlet_id) {
                entries.pop();
            }
            return Err(e);
        }
        drop(queues);
        self.bump_revision();

        debug!(
            entry_id = %entry.entry_id,
            outlet_id = %entry.outlet_id,
            device_code = %entry.reading.device_code,
            poured_ml = entry.reading.poured_ml,
            "Enqueued pour reading"
        );

        Ok(entry)
    }

    async fn list_unsynced(&self, outlet_id: &str) -> DomainResult<Vec<QueuedEntry>> {
        let queues = self.queues.read().await;
        let mut unsynced: Vec<QueuedEntry> = queues
            .get(outlet_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.synced_at.is_none())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // Stable sort: entries queued in the same instant keep append order
        unsynced.sort_by_key(|e| e.queued_at);
        Ok(unsynced)
    }

    async fn mark_synced(&self, entry_id: &str) -> DomainResult<()> {
        let mut queues = self.queues.write().await;
        let entry = find_entry_mut(&mut queues, entry_id)
            .ok_or_else(|| DomainError::QueueEntryNotFound(entry_id.to_string()))?;

        if entry.synced_at.is_some() {
            // Idempotent: already terminal
            return Ok(());
        }

        entry.synced_at = Some(Utc::now());
        self.persist(&queues).await?;
        drop(queues);
        self.bump_revision();
        Ok(())
    }

    async fn mark_failed(&self, entry_id: &str, error: &str) -> DomainResult<QueuedEntry> {
        let mut queues = self.queues.write().await;
        let entry = find_entry_mut(&mut queues, entry_id)
            .ok_or_else(|| DomainError::QueueEntryNotFound(entry_id.to_string()))?;

        if entry.synced_at.is_some() {
            // Terminal entries are immutable; a failure report that raced a
            // successful sync is dropped
            warn!(entry_id = %entry_id, "Ignoring failure report for synced entry");
            return Ok(entry.clone());
        }

        entry.sync_attempts += 1;
        entry.sync_error = Some(error.to_string());
        entry.last_attempt_at = Some(Utc::now());
        let updated = entry.clone();

        self.persist(&queues).await?;
        drop(queues);
        self.bump_revision();
        Ok(updated)
    }

    async fn purge_synced(&self, outlet_id: &str) -> DomainResult<u64> {
        let mut queues = self.queues.write().await;
        let removed = match queues.get_mut(outlet_id) {
            Some(entries) => {
                let before = entries.len();
                entries.retain(|e| e.synced_at.is_none());
                (before - entries.len()) as u64
            }
            None => 0,
        };

        if removed > 0 {
            self.persist(&queues).await?;
            drop(queues);
            self.bump_revision();
            info!(outlet_id = %outlet_id, removed, "Purged synced queue entries");
        }

        Ok(removed)
    }

    async fn discard_failed(&self, entry_id: &str) -> DomainResult<()> {
        let mut queues = self.queues.write().await;

        let position = queues.iter_mut().find_map(|(outlet_id, entries)| {
            entries
                .iter()
                .position(|e| e.entry_id == entry_id)
                .map(|idx| (outlet_id.clone(), idx))
        });

        let Some((outlet_id, idx)) = position else {
            return Err(DomainError::QueueEntryNotFound(entry_id.to_string()));
        };

        let entry = &queues[&outlet_id][idx];
        if entry.state() != SyncState::Failed {
            // Pending entries are never deleted implicitly and synced
            // entries go through purge
            return Err(DomainError::QueueEntryNotFailed(entry_id.to_string()));
        }

        let entry = queues.get_mut(&outlet_id).map(|e| e.remove(idx));
        self.persist(&queues).await?;
        drop(queues);
        self.bump_revision();

        if let Some(entry) = entry {
            info!(
                entry_id = %entry.entry_id,
                outlet_id = %entry.outlet_id,
                attempts = entry.sync_attempts,
                error = entry.sync_error.as_deref().unwrap_or(""),
                "Operator discarded failed queue entry"
            );
        }

        Ok(())
    }

    async fn list_entries(&self, outlet_id: &str) -> DomainResult<Vec<QueuedEntry>> {
        let queues = self.queues.read().await;
        let mut entries: Vec<QueuedEntry> =
            queues.get(outlet_id).cloned().unwrap_or_default();
        entries.sort_by_key(|e| e.queued_at);
        Ok(entries)
    }

    async fn outlets_with_unsynced(&self) -> DomainResult<Vec<String>> {
        let queues = self.queues.read().await;
        Ok(queues
            .iter()
            .filter(|(_, entries)| entries.iter().any(|e| e.synced_at.is_none()))
            .map(|(outlet_id, _)| outlet_id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(outlet_id: &str, device_code: &str, poured_ml: f64) -> EnqueuePourInput {
        EnqueuePourInput {
            outlet_id: outlet_id.to_string(),
            device_code: device_code.to_string(),
            poured_ml,
            pulse_count: 100,
            started_at: None,
            battery: Some(75),
        }
    }

    #[tokio::test]
    async fn test_enqueued_entry_is_never_silently_lost() {
        let store = FilePourQueueStore::in_memory();
        let entry = store.enqueue(input("outlet-1", "POUR-001", 45.0)).await.unwrap();

        let unsynced = store.list_unsynced("outlet-1").await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].entry_id, entry.entry_id);
        assert_eq!(unsynced[0].sync_attempts, 0);
        assert!(unsynced[0].synced_at.is_none());

        // After syncing, the entry leaves the unsynced view but is still held
        store.mark_synced(&entry.entry_id).await.unwrap();
        assert!(store.list_unsynced("outlet-1").await.unwrap().is_empty());
        let all = store.list_entries("outlet-1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].synced_at.is_some());
    }

    #[tokio::test]
    async fn test_invalid_reading_is_rejected_at_enqueue() {
        let store = FilePourQueueStore::in_memory();
        let result = store.enqueue(input("outlet-1", "POUR-001", -5.0)).await;
        assert!(matches!(result, Err(DomainError::ValidationError(_))));
        assert!(store.list_unsynced("outlet-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_unsynced_preserves_enqueue_order() {
        let store = FilePourQueueStore::in_memory();
        let first = store.enqueue(input("outlet-1", "POUR-001", 10.0)).await.unwrap();
        let second = store.enqueue(input("outlet-1", "POUR-001", 20.0)).await.unwrap();
        let third = store.enqueue(input("outlet-1", "POUR-002", 30.0)).await.unwrap();

        let unsynced = store.list_unsynced("outlet-1").await.unwrap();
        let ids: Vec<&str> = unsynced.iter().map(|e| e.entry_id.as_str()).collect();
        assert_eq!(ids, vec![&first.entry_id, &second.entry_id, &third.entry_id]);
    }

    #[tokio::test]
    async fn test_mark_synced_is_idempotent_and_terminal() {
        let store = FilePourQueueStore::in_memory();
        let entry = store.enqueue(input("outlet-1", "POUR-001", 45.0)).await.unwrap();

        store.mark_synced(&entry.entry_id).await.unwrap();
        let after_first: Vec<QueuedEntry> = store.list_entries("outlet-1").await.unwrap();

        // Second mark is a no-op, not an error, and changes nothing
        store.mark_synced(&entry.entry_id).await.unwrap();
        let after_second = store.list_entries("outlet-1").await.unwrap();
        assert_eq!(after_first, after_second);

        // A late failure report cannot touch a terminal entry either
        let untouched = store.mark_failed(&entry.entry_id, "late error").await.unwrap();
        assert_eq!(untouched.sync_attempts, 0);
        assert!(untouched.sync_error.is_none());
        assert_eq!(store.list_entries("outlet-1").await.unwrap(), after_second);
    }

    #[tokio::test]
    async fn test_mark_failed_accumulates_attempts() {
        let store = FilePourQueueStore::in_memory();
        let entry = store.enqueue(input("outlet-1", "POUR-404", 45.0)).await.unwrap();

        let failed = store
            .mark_failed(&entry.entry_id, "device not found: POUR-404")
            .await
            .unwrap();
        assert_eq!(failed.sync_attempts, 1);
        assert_eq!(failed.state(), SyncState::Failed);
        assert!(failed.last_attempt_at.is_some());

        let failed = store
            .mark_failed(&entry.entry_id, "device not found: POUR-404")
            .await
            .unwrap();
        assert_eq!(failed.sync_attempts, 2);
        assert_eq!(
            failed.sync_error.as_deref(),
            Some("device not found: POUR-404")
        );
        // Still retrievable for the next pass
        assert_eq!(store.list_unsynced("outlet-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_unknown_entry_is_an_error() {
        let store = FilePourQueueStore::in_memory();
        assert!(matches!(
            store.mark_synced("missing").await,
            Err(DomainError::QueueEntryNotFound(_))
        ));
        assert!(matches!(
            store.mark_failed("missing", "boom").await,
            Err(DomainError::QueueEntryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_synced_leaves_pending_untouched() {
        let store = FilePourQueueStore::in_memory();
        let mut synced_ids = Vec::new();
        for i in 0..3 {
            let e = store
                .enqueue(input("outlet-1", "POUR-001", 10.0 + f64::from(i)))
                .await
                .unwrap();
            store.mark_synced(&e.entry_id).await.unwrap();
            synced_ids.push(e.entry_id);
        }
        let pending_a = store.enqueue(input("outlet-1", "POUR-001", 40.0)).await.unwrap();
        let pending_b = store.enqueue(input("outlet-1", "POUR-002", 50.0)).await.unwrap();

        let removed = store.purge_synced("outlet-1").await.unwrap();
        assert_eq!(removed, 3);

        let remaining = store.list_entries("outlet-1").await.unwrap();
        let ids: Vec<&str> = remaining.iter().map(|e| e.entry_id.as_str()).collect();
        assert_eq!(ids, vec![&pending_a.entry_id, &pending_b.entry_id]);
    }

    #[tokio::test]
    async fn test_discard_failed_refuses_pending_and_synced() {
        let store = FilePourQueueStore::in_memory();
        let pending = store.enqueue(input("outlet-1", "POUR-001", 10.0)).await.unwrap();
        let synced = store.enqueue(input("outlet-1", "POUR-001", 20.0)).await.unwrap();
        store.mark_synced(&synced.entry_id).await.unwrap();
        let failed = store.enqueue(input("outlet-1", "POUR-001", 30.0)).await.unwrap();
        store.mark_failed(&failed.entry_id, "no active pairing: dev-1").await.unwrap();

        assert!(matches!(
            store.discard_failed(&pending.entry_id).await,
            Err(DomainError::QueueEntryNotFailed(_))
        ));
        assert!(matches!(
            store.discard_failed(&synced.entry_id).await,
            Err(DomainError::QueueEntryNotFailed(_))
        ));

        store.discard_failed(&failed.entry_id).await.unwrap();
        assert_eq!(store.list_entries("outlet-1").await.unwrap().len(), 2);
        assert!(matches!(
            store.discard_failed(&failed.entry_id).await,
            Err(DomainError::QueueEntryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_outlets_with_unsynced() {
        let store = FilePourQueueStore::in_memory();
        store.enqueue(input("outlet-1", "POUR-001", 10.0)).await.unwrap();
        let done = store.enqueue(input("outlet-2", "POUR-002", 20.0)).await.unwrap();
        store.mark_synced(&done.entry_id).await.unwrap();

        let outlets = store.outlets_with_unsynced().await.unwrap();
        assert_eq!(outlets, vec!["outlet-1".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart_with_attempt_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pour_queue.json");

        let entry_id = {
            let store = FilePourQueueStore::load(&path).await.unwrap();
            let entry = store.enqueue(input("outlet-1", "POUR-001", 45.0)).await.unwrap();
            store
                .mark_failed(&entry.entry_id, "device not found: POUR-001")
                .await
                .unwrap();
            store
                .mark_failed(&entry.entry_id, "device not found: POUR-001")
                .await
                .unwrap();
            entry.entry_id
        };

        // New process, same snapshot: attempts are not reset
        let store = FilePourQueueStore::load(&path).await.unwrap();
        let unsynced = store.list_unsynced("outlet-1").await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].entry_id, entry_id);
        assert_eq!(unsynced[0].sync_attempts, 2);
        assert_eq!(
            unsynced[0].sync_error.as_deref(),
            Some("device not found: POUR-001")
        );
    }

    #[tokio::test]
    async fn test_failed_persist_rolls_back_enqueue() {
        let dir = tempfile::tempdir().unwrap();
        // Parent directory of the snapshot does not exist, so every
        // snapshot write fails
        let path = dir.path().join("missing").join("pour_queue.json");

        let store = FilePourQueueStore::load(&path).await.unwrap();
        let result = store.enqueue(input("outlet-1", "POUR-001", 45.0)).await;
        assert!(matches!(result, Err(DomainError::QueuePersistence(_))));

        // The error means "not enqueued": nothing lingers to sync later,
        // so a caller retry cannot double-queue the reading
        assert!(store.list_unsynced("outlet-1").await.unwrap().is_empty());
        assert!(store.list_entries("outlet-1").await.unwrap().is_empty());

        let retry = store.enqueue(input("outlet-1", "POUR-001", 45.0)).await;
        assert!(retry.is_err());
        assert!(store.outlets_with_unsynced().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_surfaced_not_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pour_queue.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let result = FilePourQueueStore::load(&path).await;
        assert!(matches!(result, Err(DomainError::QueuePersistence(_))));
    }

    #[tokio::test]
    async fn test_revision_bumps_on_mutation() {
        let store = FilePourQueueStore::in_memory();
        let rx = store.subscribe();
        let before = *rx.borrow();

        let entry = store.enqueue(input("outlet-1", "POUR-001", 45.0)).await.unwrap();
        store.mark_synced(&entry.entry_id).await.unwrap();

        assert_eq!(*rx.borrow(), before + 2);
    }
}
