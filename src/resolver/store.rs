/// Per-entity cache state
///
/// Every entity ID maps to one stable [`ManagementRecord`] handle. The
/// record's own read/write lock guards its descriptor set and cache windows,
/// so traffic for different entities never contends. Eviction marks the
/// record dead before unmapping it; a task still holding the old handle sees
/// the mark once it gets the lock and starts over with a fresh record.
use crate::{metadata::EntityDescriptor, metrics};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};
use tokio::sync::RwLock;

/// Cached descriptors and windows for one entity ID
#[derive(Debug)]
pub(crate) struct EntityState {
    pub(crate) descriptors: Vec<Arc<EntityDescriptor>>,
    pub(crate) last_update: Option<DateTime<Utc>>,
    pub(crate) expiration: DateTime<Utc>,
    pub(crate) refresh_trigger: DateTime<Utc>,
    pub(crate) evicted: bool,
}

impl EntityState {
    fn new(default_window: DateTime<Utc>) -> Self {
        Self {
            descriptors: Vec::new(),
            last_update: None,
            expiration: default_window,
            refresh_trigger: default_window,
            evicted: false,
        }
    }

    pub(crate) fn has_descriptors(&self) -> bool {
        !self.descriptors.is_empty()
    }

    /// Swap in a freshly accepted descriptor
    pub(crate) fn replace(
        &mut self,
        descriptor: EntityDescriptor,
        now: DateTime<Utc>,
        expiration: DateTime<Utc>,
        refresh_trigger: DateTime<Utc>,
    ) {
        self.descriptors = vec![Arc::new(descriptor)];
        self.last_update = Some(now);
        self.expiration = expiration;
        self.refresh_trigger = refresh_trigger;
    }

    fn clear(&mut self) {
        self.descriptors.clear();
        self.last_update = None;
    }
}

/// Management data for one entity ID
#[derive(Debug)]
pub struct ManagementRecord {
    entity_id: String,
    /// Millisecond timestamp; stamped under the shared lock
    last_accessed: AtomicI64,
    pub(crate) state: RwLock<EntityState>,
}

impl ManagementRecord {
    fn new(entity_id: &str, now: DateTime<Utc>, default_window: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            last_accessed: AtomicI64::new(now.timestamp_millis()),
            state: RwLock::new(EntityState::new(default_window)),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn record_access(&self, now: DateTime<Utc>) {
        self.last_accessed
            .store(now.timestamp_millis(), Ordering::Release);
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_accessed.load(Ordering::Acquire))
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub(crate) fn snapshot(&self, state: &EntityState) -> ManagementSnapshot {
        ManagementSnapshot {
            entity_id: self.entity_id.clone(),
            descriptor_count: state.descriptors.len(),
            last_update: state.last_update,
            expiration: state.expiration,
            refresh_trigger: state.refresh_trigger,
            last_accessed: self.last_accessed(),
        }
    }
}

/// Point-in-time copy of an entity's management data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementSnapshot {
    pub entity_id: String,
    pub descriptor_count: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub expiration: DateTime<Utc>,
    pub refresh_trigger: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Concurrent entity ID to management record map
#[derive(Debug, Default)]
pub(crate) struct EntityBackingStore {
    records: DashMap<String, Arc<ManagementRecord>>,
}

impl EntityBackingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Existing record for `entity_id`, or a new one inserted exactly once
    pub(crate) fn get_or_create(
        &self,
        entity_id: &str,
        now: DateTime<Utc>,
        default_window: DateTime<Utc>,
    ) -> Arc<ManagementRecord> {
        if let Some(existing) = self.records.get(entity_id) {
            return Arc::clone(existing.value());
        }

        let record = Arc::clone(
            self.records
                .entry(entity_id.to_string())
                .or_insert_with(|| Arc::new(ManagementRecord::new(entity_id, now, default_window)))
                .value(),
        );
        metrics::CACHE_ENTRIES.set(self.records.len() as i64);
        record
    }

    pub(crate) fn get(&self, entity_id: &str) -> Option<Arc<ManagementRecord>> {
        self.records.get(entity_id).map(|r| Arc::clone(r.value()))
    }

    /// Handles to every record, taken without holding any shard lock afterwards
    pub(crate) fn records(&self) -> Vec<Arc<ManagementRecord>> {
        self.records.iter().map(|r| Arc::clone(r.value())).collect()
    }

    pub(crate) fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Drop the record's data and unmap it; caller holds the record's write lock
    pub(crate) fn evict(&self, record: &Arc<ManagementRecord>, state: &mut EntityState) -> bool {
        state.clear();
        state.evicted = true;

        let removed = self
            .records
            .remove_if(record.entity_id(), |_, current| Arc::ptr_eq(current, record))
            .is_some();
        metrics::CACHE_ENTRIES.set(self.records.len() as i64);
        removed
    }

    pub(crate) fn clear(&self) {
        self.records.clear();
        metrics::CACHE_ENTRIES.set(0);
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
