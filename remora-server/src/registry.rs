use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::config::ControlConfig;
use crate::control::decision::DecisionLoop;
use crate::pilot::PilotRegistry;
use crate::session::SessionStore;
use crate::vehicle::Vehicle;

/// Every vehicle that has ever been referenced, with its decision loop.
pub struct VehicleRegistry {
    vehicles: Mutex<HashMap<String, Arc<Vehicle>>>,
    pilots: Arc<PilotRegistry>,
    sessions: Arc<dyn SessionStore>,
    control: ControlConfig,
}

impl VehicleRegistry {
    pub fn new(
        pilots: Arc<PilotRegistry>,
        sessions: Arc<dyn SessionStore>,
        control: ControlConfig,
    ) -> Self {
        Self {
            vehicles: Mutex::new(HashMap::new()),
            pilots,
            sessions,
            control,
        }
    }

    /// Returns the vehicle for `id`, creating it and starting its decision
    /// loop on first reference. Must be called from within a tokio runtime.
    pub fn get_or_create(&self, id: &str) -> Result<Arc<Vehicle>> {
        let mut vehicles = self
            .vehicles
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        if let Some(vehicle) = vehicles.get(id) {
            return Ok(vehicle.clone());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .context("Vehicle registry used outside a tokio runtime")?;
        let vehicle = Arc::new(Vehicle::new(id, self.pilots.default_pilot()));
        runtime.spawn(DecisionLoop::new(vehicle.clone(), self.control.publish_timeout()).run());
        vehicles.insert(id.to_string(), vehicle.clone());
        info!("New vehicle {}", id);
        Ok(vehicle)
    }

    /// Looks up a vehicle without creating it.
    pub fn get(&self, id: &str) -> Result<Option<Arc<Vehicle>>> {
        let vehicles = self
            .vehicles
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        Ok(vehicles.get(id).cloned())
    }

    /// All vehicles, ordered by id.
    pub fn list(&self) -> Result<Vec<Arc<Vehicle>>> {
        let vehicles = self
            .vehicles
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        let mut list: Vec<Arc<Vehicle>> = vehicles.values().cloned().collect();
        list.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(list)
    }

    pub fn pilots(&self) -> &PilotRegistry {
        &self.pilots
    }

    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    pub fn control(&self) -> &ControlConfig {
        &self.control
    }

    /// Closes every vehicle's channels so their decision loops exit.
    pub fn shutdown(&self) {
        if let Ok(vehicles) = self.vehicles.lock() {
            for vehicle in vehicles.values() {
                vehicle.channels().close();
            }
            info!("Closed channels for {} vehicles", vehicles.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use remora_common::drive::DriveMode;

    struct NoSessions;

    impl SessionStore for NoSessions {
        fn open(&self) -> Result<Arc<dyn SessionHandle>> {
            Err(anyhow!("recording disabled"))
        }
    }

    fn registry() -> VehicleRegistry {
        VehicleRegistry::new(
            Arc::new(PilotRegistry::new()),
            Arc::new(NoSessions),
            ControlConfig::default(),
        )
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_and_shared() {
        let registry = registry();
        let first = registry.get_or_create("mycar").unwrap();
        let second = registry.get_or_create("mycar").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.status().unwrap(), second.status().unwrap());

        first
            .with_state(|state| state.drive_mode = DriveMode::Auto)
            .unwrap();
        assert_eq!(second.drive_mode(), DriveMode::Auto);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_never_creates() {
        let registry = registry();
        assert!(registry.get("ghost").unwrap().is_none());
        registry.get_or_create("b").unwrap();
        registry.get_or_create("a").unwrap();

        let ids: Vec<String> = registry
            .list()
            .unwrap()
            .iter()
            .map(|v| v.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(registry.get("ghost").unwrap().is_none());
    }

    #[test]
    fn creation_requires_a_runtime() {
        assert!(registry().get_or_create("mycar").is_err());
    }

    #[tokio::test]
    async fn shutdown_closes_channels() {
        let registry = registry();
        let vehicle = registry.get_or_create("mycar").unwrap();
        registry.shutdown();
        assert!(vehicle.channels().request.is_closed());
        assert!(vehicle.channels().response.is_closed());
    }
}
