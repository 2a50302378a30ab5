use std::sync::{Arc, OnceLock};

use anyhow::bail;
use log::info;

use crate::{
    location::LocationService, manager::LocationManager, manager::StateUpdateSender,
    prelude::*, settings::CourseSettings, streets::StreetResolver,
};

/// The process-wide manager, its collaborators are erased so any platform can
/// install one
pub type SharedLocationManager = LocationManager<
    Box<dyn LocationService>,
    Box<dyn StreetResolver>,
    Box<dyn StateUpdateSender>,
>;

static SHARED: OnceLock<Arc<SharedLocationManager>> = OnceLock::new();

/// Install the process-wide manager. Fails if one was already installed.
pub fn init_shared_manager(
    location: impl LocationService + 'static,
    resolver: impl StreetResolver + 'static,
    state_update_sender: impl StateUpdateSender + 'static,
    settings: CourseSettings,
) -> Result<Arc<SharedLocationManager>> {
    let mut installed = false;

    let manager = SHARED.get_or_init(|| {
        installed = true;
        Arc::new(LocationManager::new(
            Box::new(location),
            Box::new(resolver),
            Box::new(state_update_sender),
            settings,
        ))
    });

    if !installed {
        bail!("A shared location manager is already installed");
    }

    info!("Installed shared location manager");
    Ok(manager.clone())
}

/// The manager installed with [init_shared_manager], the same instance every call
pub fn shared_manager() -> Option<Arc<SharedLocationManager>> {
    SHARED.get().cloned()
}
