use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Tuning for how course updates are gathered
pub struct CourseSettings {
    /// Milliseconds between polls of the location service
    pub update_interval_ms: u64,
    /// Fixes closer than this (in meters) to the last accepted one are dropped,
    /// unless the heading changed by at least `heading_filter_degrees`
    pub distance_filter_meters: f64,
    /// Heading change that lets a fix through the distance filter
    pub heading_filter_degrees: f64,
    /// Minimum movement (in meters) before streets are looked up again
    pub geocode_min_distance_meters: f64,
    /// Minimum time between street lookups
    pub geocode_min_interval_seconds: u64,
}

impl CourseSettings {
    pub fn update_interval(&self) -> Duration {
        // A zero period would panic in tokio::time::interval
        Duration::from_millis(self.update_interval_ms.max(1))
    }

    pub fn geocode_min_interval(&self) -> Duration {
        Duration::from_secs(self.geocode_min_interval_seconds)
    }
}

impl Default for CourseSettings {
    fn default() -> Self {
        Self {
            update_interval_ms: 1000,
            distance_filter_meters: 5.0,
            heading_filter_degrees: 10.0,
            geocode_min_distance_meters: 25.0,
            geocode_min_interval_seconds: 5,
        }
    }
}
