mod course_state;
mod location;
mod manager;
mod settings;
mod shared;
mod streets;

pub use course_state::CourseUiState;
pub use location::{
    Coordinates, EARTH_RADIUS_METERS, Location, LocationComponent, LocationService,
    heading_delta, normalize_heading,
};
pub use manager::{LocationManager, StateUpdateSender};
pub use settings::CourseSettings;
pub use shared::{SharedLocationManager, init_shared_manager, shared_manager};
pub use streets::{Street, StreetMap, StreetNames, StreetResolver};

/// Convenience alias for UTC DT
pub type UtcDT = chrono::DateTime<chrono::Utc>;

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
