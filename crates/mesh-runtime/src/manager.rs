//! Registry of the distributed buses hosted by one process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use shared_bus::LocalDispatcher;
use shared_types::{BroadcastTransport, BusId, MeshError, MeshResult};
use tracing::info;

use crate::bus::DistributedEventBus;
use crate::config::MeshConfig;

/// Creates, looks up and shuts down distributed buses that share one
/// transport and one instance identity.
pub struct MeshManager {
    transport: Arc<dyn BroadcastTransport>,
    defaults: MeshConfig,
    buses: RwLock<HashMap<BusId, Arc<DistributedEventBus>>>,
}

impl MeshManager {
    pub fn new(transport: Arc<dyn BroadcastTransport>, defaults: MeshConfig) -> Self {
        Self {
            transport,
            defaults,
            buses: RwLock::new(HashMap::new()),
        }
    }

    /// Create and start the bus `bus_id` on top of `dispatcher`.
    pub fn create_bus(
        &self,
        bus_id: impl Into<String>,
        dispatcher: Arc<dyn LocalDispatcher>,
    ) -> MeshResult<Arc<DistributedEventBus>> {
        let bus_id = BusId::new(bus_id);
        let mut buses = self.buses.write();
        if buses.contains_key(&bus_id) {
            return Err(MeshError::InvalidConfig(format!(
                "bus {bus_id} already exists"
            )));
        }

        let config = MeshConfig {
            bus_id: bus_id.clone(),
            ..self.defaults.clone()
        };
        let bus = Arc::new(DistributedEventBus::new(
            config,
            Arc::clone(&self.transport),
            dispatcher,
        )?);
        bus.start()?;
        buses.insert(bus_id.clone(), Arc::clone(&bus));

        info!(bus = %bus_id, total = buses.len(), "[mesh] Bus created");
        Ok(bus)
    }

    pub fn get(&self, bus_id: &str) -> Option<Arc<DistributedEventBus>> {
        self.buses.read().get(&BusId::new(bus_id)).cloned()
    }

    pub fn bus_ids(&self) -> Vec<BusId> {
        let mut ids: Vec<BusId> = self.buses.read().keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    /// Returns `false` if no such bus exists.
    pub async fn shutdown_bus(&self, bus_id: &str, timeout: Duration) -> bool {
        let removed = self.buses.write().remove(&BusId::new(bus_id));
        match removed {
            Some(bus) => {
                bus.graceful_shutdown(timeout).await;
                true
            }
            None => false,
        }
    }

    /// Shut down every bus, each within `timeout`.
    pub async fn shutdown_all(&self, timeout: Duration) {
        let buses: Vec<_> = self.buses.write().drain().map(|(_, bus)| bus).collect();
        let count = buses.len();
        let shutdowns = buses.iter().map(|bus| bus.graceful_shutdown(timeout));
        futures::future::join_all(shutdowns).await;
        info!(count, "[mesh] All buses shut down");
    }
}
