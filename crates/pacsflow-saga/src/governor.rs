//! Resource governor - bounded capacity per resource class
//!
//! One counting semaphore per class. Acquisition is all-or-nothing
//! (`acquire_many_owned`), so a caller either holds every unit it asked for
//! or none of them. Grants release on drop.
//!
//! Callers needing more than one class acquire them in `ResourceClass`
//! order; `try_acquire_all` does that for them.

use dashmap::DashMap;
use pacsflow_core::{Error, PacsflowConfig, ResourceClass, Result, WorkflowId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct Pool {
    class: ResourceClass,
    capacity: usize,
    semaphore: Arc<Semaphore>,
    holders: DashMap<WorkflowId, usize>,
}

impl Pool {
    fn held(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    fn credit(&self, workflow_id: WorkflowId, count: usize) {
        *self.holders.entry(workflow_id).or_insert(0) += count;
    }

    fn debit(&self, workflow_id: WorkflowId, count: usize) {
        let emptied = match self.holders.get_mut(&workflow_id) {
            Some(mut held) => {
                *held = held.saturating_sub(count);
                *held == 0
            }
            None => false,
        };
        if emptied {
            self.holders.remove_if(&workflow_id, |_, held| *held == 0);
        }
    }
}

/// Units of one class held by one workflow. Released exactly once, by
/// `release` or drop.
pub struct ResourceGrant {
    pool: Option<Arc<Pool>>,
    class: ResourceClass,
    count: u32,
    workflow_id: WorkflowId,
    permit: Option<OwnedSemaphorePermit>,
}

impl ResourceGrant {
    fn empty(class: ResourceClass, workflow_id: WorkflowId) -> Self {
        Self {
            pool: None,
            class,
            count: 0,
            workflow_id,
            permit: None,
        }
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ResourceGrant {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.debit(self.workflow_id, self.count as usize);
        }
        // Returning the permit last keeps `held_by` from lagging behind `available`.
        self.permit.take();
    }
}

impl std::fmt::Debug for ResourceGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGrant")
            .field("class", &self.class)
            .field("count", &self.count)
            .field("workflow_id", &self.workflow_id)
            .finish()
    }
}

pub struct ResourceGovernor {
    pools: BTreeMap<ResourceClass, Arc<Pool>>,
}

impl ResourceGovernor {
    /// Classes left out get capacity zero.
    pub fn new(capacities: impl IntoIterator<Item = (ResourceClass, usize)>) -> Self {
        let mut configured: BTreeMap<ResourceClass, usize> = capacities.into_iter().collect();
        let pools = ResourceClass::ALL
            .iter()
            .map(|&class| {
                let capacity = configured.remove(&class).unwrap_or(0);
                let pool = Pool {
                    class,
                    capacity,
                    semaphore: Arc::new(Semaphore::new(capacity)),
                    holders: DashMap::new(),
                };
                (class, Arc::new(pool))
            })
            .collect();
        Self { pools }
    }

    pub fn from_config(config: &PacsflowConfig) -> Self {
        Self::new(
            ResourceClass::ALL
                .iter()
                .map(|&class| (class, config.capacity(class))),
        )
    }

    fn pool(&self, class: ResourceClass) -> Result<&Arc<Pool>> {
        self.pools
            .get(&class)
            .ok_or_else(|| Error::internal(format!("no pool for {}", class)))
    }

    pub fn capacity(&self, class: ResourceClass) -> usize {
        self.pools.get(&class).map_or(0, |p| p.capacity)
    }

    /// Snapshot only; never gate an acquisition on it.
    pub fn available(&self, class: ResourceClass) -> usize {
        self.pools
            .get(&class)
            .map_or(0, |p| p.semaphore.available_permits())
    }

    pub fn held(&self, class: ResourceClass) -> usize {
        self.pools.get(&class).map_or(0, |p| p.held())
    }

    /// Units currently held by one workflow, per class.
    pub fn held_by(&self, workflow_id: WorkflowId) -> BTreeMap<ResourceClass, usize> {
        self.pools
            .values()
            .filter_map(|p| {
                p.holders
                    .get(&workflow_id)
                    .map(|held| (p.class, *held))
                    .filter(|(_, held)| *held > 0)
            })
            .collect()
    }

    /// Wait up to `timeout` for `count` units of `class`.
    ///
    /// `Ok(None)` means the wait timed out. Cancellation wins over a grant
    /// that becomes available at the same instant.
    pub async fn try_acquire(
        &self,
        class: ResourceClass,
        count: u32,
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Option<ResourceGrant>> {
        let pool = self.pool(class)?;
        if count as usize > pool.capacity {
            return Err(Error::ExceedsCapacity {
                class,
                requested: count,
                capacity: pool.capacity,
            });
        }
        if count == 0 {
            return Ok(Some(ResourceGrant::empty(class, workflow_id)));
        }

        let acquire = pool.semaphore.clone().acquire_many_owned(count);
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = tokio::time::timeout(timeout, acquire) => match r {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(Error::internal(format!("{} pool closed", class))),
                Err(_) => {
                    debug!(workflow_id = %workflow_id, class = %class, count, "Resource wait timed out");
                    return Ok(None);
                }
            },
        };

        pool.credit(workflow_id, count as usize);
        debug!(workflow_id = %workflow_id, class = %class, count, "Resource granted");
        Ok(Some(ResourceGrant {
            pool: Some(pool.clone()),
            class,
            count,
            workflow_id,
            permit: Some(permit),
        }))
    }

    /// Like `try_acquire`, with a timeout turned into `Error::ResourceTimeout`.
    pub async fn acquire(
        &self,
        class: ResourceClass,
        count: u32,
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<ResourceGrant> {
        self.try_acquire(class, count, workflow_id, cancel, timeout)
            .await?
            .ok_or(Error::ResourceTimeout {
                class,
                count,
                waited_ms: timeout.as_millis() as u64,
            })
    }

    /// Acquire `count` units of every class in `classes`, in global order,
    /// sharing one deadline. On any failure the grants taken so far drop.
    pub async fn acquire_all(
        &self,
        classes: &[ResourceClass],
        count: u32,
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Vec<ResourceGrant>> {
        let mut ordered = classes.to_vec();
        ordered.sort();
        ordered.dedup();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut grants = Vec::with_capacity(ordered.len());
        for class in ordered {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.try_acquire(class, count, workflow_id, cancel, left).await? {
                Some(grant) => grants.push(grant),
                None => {
                    return Err(Error::ResourceTimeout {
                        class,
                        count,
                        waited_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }
        Ok(grants)
    }

    /// Verify no class reports more held units than its capacity and that
    /// per-workflow accounting matches the semaphores.
    pub fn check_accounting(&self) -> Result<()> {
        for pool in self.pools.values() {
            let held = pool.held();
            let available = pool.semaphore.available_permits();
            if available > pool.capacity {
                warn!(class = %pool.class, available, capacity = pool.capacity, "Pool over-released");
                return Err(Error::Accounting {
                    class: pool.class,
                    held: available,
                    capacity: pool.capacity,
                });
            }
            let attributed: usize = pool.holders.iter().map(|e| *e.value()).sum();
            if attributed != held {
                warn!(class = %pool.class, held, attributed, "Holder accounting mismatch");
                return Err(Error::Accounting {
                    class: pool.class,
                    held: attributed,
                    capacity: pool.capacity,
                });
            }
        }
        Ok(())
    }
}
