//! Shared index of currently-canonical entities, partitioned by blocking key.
//!
//! Each partition sits behind its own async mutex. A batch locks every
//! partition it touches, in sorted key order, and holds the guards from the
//! link decision until its store commit has succeeded. Two batches that could
//! both see "no match" for the same real-world thing therefore serialize on
//! the shared partition.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{MagpieError, MagpieResult};
use crate::traits::GraphStore;
use crate::types::{BlockingKey, Entity};

/// Canonical entities sharing one blocking key.
#[derive(Debug, Default)]
pub struct Partition {
    hydrated: bool,
    entities: BTreeMap<String, Entity>,
}

impl Partition {
    /// Canonical entities in this partition, by id.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Number of canonical entities in this partition.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the partition is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Partition arena shared by every resolver writing to one store.
///
/// Partitions hydrate once. A resolver holding a different index over the
/// same store never sees commits made through this one.
#[derive(Debug)]
pub struct CanonicalIndex {
    partitions: RwLock<HashMap<BlockingKey, Arc<Mutex<Partition>>>>,
    blocking_prefix_len: usize,
}

impl CanonicalIndex {
    /// Create an empty index. Partitions hydrate from the store on first lock.
    pub fn new(blocking_prefix_len: usize) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            blocking_prefix_len,
        }
    }

    /// Prefix length used to derive blocking keys.
    pub fn blocking_prefix_len(&self) -> usize {
        self.blocking_prefix_len
    }

    /// Number of partitions created so far.
    pub fn partition_count(&self) -> usize {
        self.partitions.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Lock every partition in `keys`, in sorted order, hydrating on first use.
    pub async fn lock_partitions<S: GraphStore + ?Sized>(
        &self,
        keys: impl IntoIterator<Item = BlockingKey>,
        store: &S,
    ) -> MagpieResult<PartitionGuards> {
        let sorted: BTreeSet<BlockingKey> = keys.into_iter().collect();
        let mut guards = BTreeMap::new();

        for key in sorted {
            let slot = self.slot(&key)?;
            let mut guard = slot.lock_owned().await;
            if !guard.hydrated {
                let loaded = store.canonical_entities(&key).await?;
                tracing::debug!(key = %key, entities = loaded.len(), "hydrated index partition");
                guard.entities = loaded.into_iter().map(|e| (e.id.clone(), e)).collect();
                guard.hydrated = true;
            }
            guards.insert(key, guard);
        }

        Ok(PartitionGuards {
            guards,
            blocking_prefix_len: self.blocking_prefix_len,
        })
    }

    fn slot(&self, key: &BlockingKey) -> MagpieResult<Arc<Mutex<Partition>>> {
        if let Some(slot) = self
            .partitions
            .read()
            .map_err(|e| MagpieError::internal(format!("Lock error: {}", e)))?
            .get(key)
        {
            return Ok(Arc::clone(slot));
        }

        let mut partitions = self
            .partitions
            .write()
            .map_err(|e| MagpieError::internal(format!("Lock error: {}", e)))?;
        Ok(Arc::clone(partitions.entry(key.clone()).or_default()))
    }
}

/// Exclusive access to a set of partitions. Dropping it releases them.
#[derive(Debug)]
pub struct PartitionGuards {
    guards: BTreeMap<BlockingKey, OwnedMutexGuard<Partition>>,
    blocking_prefix_len: usize,
}

impl PartitionGuards {
    /// Keys held, in lock order.
    pub fn keys(&self) -> impl Iterator<Item = &BlockingKey> {
        self.guards.keys()
    }

    /// Prior canonical entities sharing a blocking key with `entity`, sorted by id.
    ///
    /// Fails if any of the entity's keys is not held.
    pub fn candidates(&self, entity: &Entity) -> MagpieResult<Vec<Entity>> {
        let mut found: BTreeMap<&str, &Entity> = BTreeMap::new();
        for key in entity.blocking_keys(self.blocking_prefix_len) {
            let partition = self.guards.get(&key).ok_or_else(|| not_held(&key, &entity.id))?;
            for candidate in partition.entities.values() {
                found.insert(candidate.id.as_str(), candidate);
            }
        }
        Ok(found.into_values().cloned().collect())
    }

    /// Record `entity` as canonical in every partition it belongs to.
    ///
    /// Fails without touching any partition if one of its keys is not held.
    pub fn register(&mut self, entity: &Entity) -> MagpieResult<()> {
        let keys = entity.blocking_keys(self.blocking_prefix_len);
        if let Some(missing) = keys.iter().find(|key| !self.guards.contains_key(*key)) {
            return Err(not_held(missing, &entity.id));
        }
        for key in keys {
            if let Some(partition) = self.guards.get_mut(&key) {
                partition.entities.insert(entity.id.clone(), entity.clone());
            }
        }
        Ok(())
    }

    /// Drop `entity_id` from every held partition.
    pub fn retire(&mut self, entity_id: &str) {
        for partition in self.guards.values_mut() {
            partition.entities.remove(entity_id);
        }
    }
}

fn not_held(key: &BlockingKey, entity_id: &str) -> MagpieError {
    MagpieError::internal(format!(
        "index partition {} not locked for entity {}",
        key, entity_id
    ))
}
