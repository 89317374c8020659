//! `ContainerRegistry`: process-private map from container name to
//! `ContainerMapping`. No blocking operations are exposed beyond the short
//! critical section a caller holds via `claim`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::mapping::ContainerMapping;

/// An owned lock on one registry entry. Dropping it releases the critical
/// section.
pub struct RegistryClaim {
    entry: Arc<Mutex<Option<ContainerMapping>>>,
}

impl RegistryClaim {
    pub async fn lock(&self) -> MutexGuard<'_, Option<ContainerMapping>> {
        self.entry.lock().await
    }
}

#[derive(Default)]
pub struct ContainerRegistry {
    entries: RwLock<HashMap<String, Arc<Mutex<Option<ContainerMapping>>>>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot_for(&self, container_name: &str) -> Arc<Mutex<Option<ContainerMapping>>> {
        if let Some(slot) = self.entries.read().await.get(container_name) {
            return Arc::clone(slot);
        }
        let mut entries = self.entries.write().await;
        Arc::clone(
            entries
                .entry(container_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }

    /// Claim the entry's mutex for the duration of a critical section. The
    /// slot is created empty (`None`) if this container name hasn't been
    /// seen before; callers insert via the returned guard.
    pub async fn claim(&self, container_name: &str) -> RegistryClaim {
        RegistryClaim {
            entry: self.slot_for(container_name).await,
        }
    }

    /// Inserts or replaces a mapping, claiming its slot for the duration.
    pub async fn insert(&self, mapping: ContainerMapping) {
        let claim = self.claim(&mapping.container_name).await;
        *claim.lock().await = Some(mapping);
    }

    /// A cheap snapshot (clone) of the current mapping, if any.
    pub async fn snapshot(&self, container_name: &str) -> Option<ContainerMapping> {
        let slot = self.entries.read().await.get(container_name).cloned()?;
        slot.lock().await.clone()
    }

    /// Removes the entry entirely (both the mapping and its slot), once
    /// the container is terminated *and* its volumes are released (spec
    /// §3).
    pub async fn remove(&self, container_name: &str) -> Option<ContainerMapping> {
        let claim = self.claim(container_name).await;
        let taken = claim.lock().await.take();
        if taken.is_some() {
            self.entries.write().await.remove(container_name);
        }
        taken
    }

    /// Snapshot of every live mapping, for reconciliation sweeps.
    pub async fn all(&self) -> Vec<ContainerMapping> {
        let slots: Vec<Arc<Mutex<Option<ContainerMapping>>>> =
            self.entries.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(mapping) = slot.lock().await.clone() {
                out.push(mapping);
            }
        }
        out
    }

    pub async fn names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn contains(&self, container_name: &str) -> bool {
        self.snapshot(container_name).await.is_some()
    }
}
