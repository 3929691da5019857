//! Container id and address allocation
//!
//! Nothing is cached: every allocation rescans the hypervisor and the
//! workload store. Scans and the insert of the new record happen under one
//! async mutex so concurrent creations cannot pick the same id or address.

mod routes;
mod subnet;

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::Mutex;

use gs_core::config::NetworkConfig;
use gs_core::error::AllocationError;
use gs_core::traits::{Hypervisor, WorkloadStore};
use gs_core::types::Workload;

pub use routes::{render_routes, NginxReloader, RouteRegistrar};
pub use subnet::Subnet;

/// Lowest container id handed out
pub const CONTAINER_ID_FLOOR: u32 = 500;

/// Identifier and address picked for a new workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub container_id: u32,
    pub address: Ipv4Addr,
}

/// Smallest id at or above `floor` not present in `used`
pub fn lowest_free_id(used: impl IntoIterator<Item = u32>, floor: u32) -> Option<u32> {
    let used: HashSet<u32> = used.into_iter().collect();
    (floor..=u32::MAX).find(|id| !used.contains(id))
}

/// Assigns container ids and addresses from live state
pub struct ResourceAllocator {
    hypervisor: Arc<dyn Hypervisor>,
    store: Arc<dyn WorkloadStore>,
    subnet: Subnet,
    start: Ipv4Addr,
    gateway: Ipv4Addr,
    /// Held across scan and commit
    lock: Mutex<()>,
}

impl ResourceAllocator {
    pub fn new(
        config: &NetworkConfig,
        hypervisor: Arc<dyn Hypervisor>,
        store: Arc<dyn WorkloadStore>,
    ) -> Result<Self, AllocationError> {
        let subnet: Subnet = config.subnet.parse()?;
        let start: Ipv4Addr = config
            .ip_start
            .parse()
            .map_err(|_| AllocationError::InvalidSubnet(format!("bad start address {}", config.ip_start)))?;
        let gateway: Ipv4Addr = config
            .gateway
            .parse()
            .map_err(|_| AllocationError::InvalidSubnet(format!("bad gateway {}", config.gateway)))?;

        if !subnet.contains(start) {
            return Err(AllocationError::InvalidSubnet(format!(
                "start address {} is outside {}",
                start, subnet
            )));
        }

        Ok(Self {
            hypervisor,
            store,
            subnet,
            start,
            gateway,
            lock: Mutex::new(()),
        })
    }

    pub fn subnet(&self) -> Subnet {
        self.subnet
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Smallest unused container id at or above [`CONTAINER_ID_FLOOR`].
    ///
    /// Ids come from every guest in the cluster, offline nodes included,
    /// plus the store, since a record is committed before its container
    /// exists.
    pub async fn next_container_id(&self) -> Result<u32, AllocationError> {
        let mut used = self.hypervisor.all_container_ids().await?;
        used.extend(self.store.list().await?.into_iter().map(|w| w.container_id));

        let id = lowest_free_id(used, CONTAINER_ID_FLOOR).ok_or(AllocationError::IdsExhausted {
            floor: CONTAINER_ID_FLOOR,
        })?;
        tracing::debug!("Next container id: {}", id);
        Ok(id)
    }

    /// First host address at or after the start offset not in `excluded`
    pub fn next_address(&self, excluded: &HashSet<Ipv4Addr>) -> Result<Ipv4Addr, AllocationError> {
        let start = u32::from(self.start);
        self.subnet
            .hosts()
            .filter(|addr| u32::from(*addr) >= start)
            .find(|addr| *addr != self.gateway && !excluded.contains(addr))
            .ok_or_else(|| AllocationError::PoolExhausted {
                subnet: self.subnet.to_string(),
            })
    }

    /// Allocate an id and address and commit the record built from them.
    ///
    /// The store insert happens inside the critical section, so the next
    /// caller's scan already sees this record.
    pub async fn reserve<F>(&self, build: F) -> Result<Workload, AllocationError>
    where
        F: FnOnce(Allocation) -> Workload + Send,
    {
        let _guard = self.lock.lock().await;

        let container_id = self.next_container_id().await?;
        let excluded: HashSet<Ipv4Addr> =
            self.store.list().await?.into_iter().map(|w| w.address).collect();
        let address = self.next_address(&excluded)?;

        let workload = build(Allocation {
            container_id,
            address,
        });
        self.store.insert(workload.clone()).await?;

        tracing::info!(
            "Reserved container {} at {} for workload {}",
            container_id,
            address,
            workload.id
        );
        Ok(workload)
    }
}
