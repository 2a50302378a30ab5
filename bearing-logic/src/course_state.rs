use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::{
    UtcDT,
    location::{Coordinates, Location, LocationComponent, heading_delta},
    settings::CourseSettings,
    streets::StreetNames,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Snapshot of everything a UI would show about the current course
pub struct CourseUiState {
    /// Last known heading in degrees
    pub direction: Option<LocationComponent>,
    /// Last known speed in m/s
    pub speed: Option<LocationComponent>,
    pub coordinates: Option<Coordinates>,
    pub monitoring: bool,
    pub current_street: Option<String>,
    pub near_street: Option<String>,
    /// When the last fix was accepted
    pub last_update: Option<UtcDT>,
}

#[derive(Debug, Clone)]
/// Last-known-value cache for the course, plus the bookkeeping needed to
/// filter fixes and throttle street lookups
pub struct CourseState {
    settings: CourseSettings,
    monitoring: bool,

    /// Last fix that made it through the filter, used to derive heading/speed
    last_fix: Option<(UtcDT, Location)>,

    direction: Option<LocationComponent>,
    speed: Option<LocationComponent>,
    coordinates: Option<Coordinates>,
    last_update: Option<UtcDT>,

    streets: StreetNames,
    /// When we last asked the resolver, successful or not
    last_geocode_attempt: Option<UtcDT>,
    /// Where the last successful lookup happened
    last_geocode_coords: Option<Coordinates>,
    /// A lookup is running, don't start another
    geocode_in_flight: bool,
}

impl CourseState {
    pub fn new(settings: CourseSettings) -> Self {
        Self {
            settings,
            monitoring: false,
            last_fix: None,
            direction: None,
            speed: None,
            coordinates: None,
            last_update: None,
            streets: StreetNames::default(),
            last_geocode_attempt: None,
            last_geocode_coords: None,
            geocode_in_flight: false,
        }
    }

    pub fn clone_settings(&self) -> CourseSettings {
        self.settings.clone()
    }

    pub fn set_settings(&mut self, settings: CourseSettings) {
        self.settings = settings;
    }

    pub fn direction(&self) -> Option<LocationComponent> {
        self.direction
    }

    pub fn speed(&self) -> Option<LocationComponent> {
        self.speed
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        self.coordinates
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    pub fn current_street(&self) -> Option<&str> {
        self.streets.current.as_deref()
    }

    pub fn near_street(&self) -> Option<&str> {
        self.streets.near.as_deref()
    }

    pub fn start_monitoring(&mut self) {
        self.monitoring = true;
        // Don't derive speed/heading across the gap since the last session
        self.last_fix = None;
        self.geocode_in_flight = false;
    }

    pub fn stop_monitoring(&mut self) {
        self.monitoring = false;
        self.geocode_in_flight = false;
    }

    /// Run a fix through the filters and update the cache.
    /// Returns whether the fix was accepted.
    pub fn accept_fix(&mut self, now: UtcDT, loc: Location) -> bool {
        let reported_heading = loc.valid_heading();
        let prev = self.last_fix.as_ref();
        let moved = prev.map(|(_, prev)| prev.distance_to(&loc));

        if let Some(moved) = moved {
            let turned = match (reported_heading, self.direction) {
                (Some(new), Some(old)) => {
                    heading_delta(new, old) >= self.settings.heading_filter_degrees
                }
                (Some(_), None) => true,
                (None, _) => false,
            };

            if moved < self.settings.distance_filter_meters && !turned {
                return false;
            }
        }

        let derived_heading = prev.zip(moved).and_then(|((_, prev), moved)| {
            (moved >= self.settings.distance_filter_meters.max(1.0))
                .then(|| prev.coordinates().bearing_to(&loc.coordinates()))
        });

        let derived_speed = prev.zip(moved).and_then(|((at, _), moved)| {
            let secs = (now - *at).num_milliseconds() as f64 / 1000.0;
            (secs > 0.0).then(|| moved / secs)
        });

        self.direction = reported_heading.or(derived_heading).or(self.direction);
        self.speed = loc.valid_speed().or(derived_speed).or(self.speed);
        self.coordinates = Some(loc.coordinates());
        self.last_update = Some(now);
        self.last_fix = Some((now, loc));

        true
    }

    /// Whether the streets should be looked up again for the current coordinates
    pub fn should_geocode(&self, now: UtcDT) -> bool {
        let Some(coords) = self.coordinates else {
            return false;
        };

        if self.geocode_in_flight {
            return false;
        }

        let interval = TimeDelta::from_std(self.settings.geocode_min_interval())
            .unwrap_or(TimeDelta::MAX);

        let waited = self
            .last_geocode_attempt
            .is_none_or(|at| now - at >= interval);

        let moved = self.last_geocode_coords.is_none_or(|last| {
            last.distance_to(&coords) >= self.settings.geocode_min_distance_meters
        });

        waited && moved
    }

    pub fn mark_geocode_attempt(&mut self, now: UtcDT) {
        self.last_geocode_attempt = Some(now);
        self.geocode_in_flight = true;
    }

    /// The lookup started by [Self::mark_geocode_attempt] is over, successful or not
    pub fn finish_geocode(&mut self) {
        self.geocode_in_flight = false;
    }

    /// Store a successful lookup made at `coords`, returns whether the names changed
    pub fn set_streets(&mut self, coords: Coordinates, streets: StreetNames) -> bool {
        self.last_geocode_coords = Some(coords);
        let changed = self.streets != streets;
        self.streets = streets;
        changed
    }

    pub fn as_ui_state(&self) -> CourseUiState {
        CourseUiState {
            direction: self.direction,
            speed: self.speed,
            coordinates: self.coordinates,
            monitoring: self.monitoring,
            current_street: self.streets.current.clone(),
            near_street: self.streets.near.clone(),
            last_update: self.last_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn t(secs: i64) -> UtcDT {
        UtcDT::from_timestamp(1_700_000_000 + secs, 0).unwrap_or_else(Utc::now)
    }

    /// About 11 meters north per step at the equator
    fn north(step: u32) -> Location {
        Location::new(step as f64 * 0.0001, 0.0)
    }

    #[test]
    fn test_defaults_before_first_fix() {
        let state = CourseState::new(CourseSettings::default());
        assert_eq!(state.as_ui_state(), CourseUiState::default());
        assert!(!state.should_geocode(t(0)));
    }

    #[test]
    fn test_reported_values_win() {
        let mut state = CourseState::new(CourseSettings::default());
        assert!(state.accept_fix(t(0), north(0).with_heading(45.0).with_speed(3.0)));
        assert_eq!(state.direction(), Some(45.0));
        assert_eq!(state.speed(), Some(3.0));
        assert_eq!(state.coordinates(), Some(Coordinates::new(0.0, 0.0)));
    }

    #[test]
    fn test_derives_heading_and_speed() {
        let mut state = CourseState::new(CourseSettings::default());
        state.accept_fix(t(0), north(0));
        assert_eq!(state.direction(), None);
        assert_eq!(state.speed(), None);

        assert!(state.accept_fix(t(2), north(1)));
        let direction = state.direction().unwrap();
        assert!(direction.abs() < 1e-6, "Expected north, got {direction}");
        let speed = state.speed().unwrap();
        assert!((speed - 5.56).abs() < 0.01, "Unexpected speed {speed}");
    }

    #[test]
    fn test_distance_filter_drops_jitter() {
        let mut state = CourseState::new(CourseSettings::default());
        state.accept_fix(t(0), north(0).with_heading(90.0));
        let jitter = Location::new(0.00001, 0.0).with_heading(92.0);
        assert!(!state.accept_fix(t(1), jitter));
        assert_eq!(state.coordinates(), Some(Coordinates::new(0.0, 0.0)));

        // A real turn gets through even without moving
        let turn = Location::new(0.00001, 0.0).with_heading(180.0);
        assert!(state.accept_fix(t(2), turn));
        assert_eq!(state.direction(), Some(180.0));
    }

    #[test]
    fn test_keeps_previous_heading_when_unknown() {
        let settings = CourseSettings {
            distance_filter_meters: 0.0,
            ..Default::default()
        };
        let mut state = CourseState::new(settings);
        state.accept_fix(t(0), north(0).with_heading(10.0));
        // Barely moved, too little to derive a bearing from
        assert!(state.accept_fix(t(1), Location::new(0.000001, 0.0).with_heading(-1.0)));
        assert_eq!(state.direction(), Some(10.0));
    }

    #[test]
    fn test_restart_forgets_last_fix() {
        let mut state = CourseState::new(CourseSettings::default());
        state.start_monitoring();
        state.accept_fix(t(0), north(0));
        state.stop_monitoring();
        state.start_monitoring();
        state.accept_fix(t(3600), north(1));
        assert_eq!(state.speed(), None, "Speed derived across a restart");
        assert!(state.is_monitoring());
    }

    #[test]
    fn test_geocode_throttle() {
        let mut state = CourseState::new(CourseSettings::default());
        state.accept_fix(t(0), north(0));
        assert!(state.should_geocode(t(0)));

        state.mark_geocode_attempt(t(0));
        state.finish_geocode();
        assert!(state.set_streets(
            Coordinates::new(0.0, 0.0),
            StreetNames::new("Main Street", None)
        ));

        // Moved far enough but too soon
        state.accept_fix(t(1), north(3));
        assert!(!state.should_geocode(t(1)));

        // Waited long enough and moved far enough
        assert!(state.should_geocode(t(10)));

        // Waited long enough but didn't move
        state.accept_fix(t(10), north(0));
        assert!(!state.should_geocode(t(20)));
    }

    #[test]
    fn test_failed_geocode_retries_after_interval() {
        let mut state = CourseState::new(CourseSettings::default());
        state.accept_fix(t(0), north(0));
        state.mark_geocode_attempt(t(0));
        state.finish_geocode();
        assert!(!state.should_geocode(t(1)));
        assert!(state.should_geocode(t(5)));
    }

    #[test]
    fn test_one_geocode_at_a_time() {
        let mut state = CourseState::new(CourseSettings::default());
        state.accept_fix(t(0), north(0));
        state.mark_geocode_attempt(t(0));

        state.accept_fix(t(60), north(10));
        assert!(!state.should_geocode(t(60)), "Started a second lookup");

        state.finish_geocode();
        assert!(state.should_geocode(t(60)));

        // Stopping abandons the lookup
        state.mark_geocode_attempt(t(60));
        state.stop_monitoring();
        assert!(state.should_geocode(t(120)));
    }

    #[test]
    fn test_same_streets_are_not_a_change() {
        let mut state = CourseState::new(CourseSettings::default());
        let names = StreetNames::new("Main Street", Some("First Avenue".into()));
        assert!(state.set_streets(Coordinates::default(), names.clone()));
        assert!(!state.set_streets(Coordinates::default(), names));
        assert_eq!(state.current_street(), Some("Main Street"));
        assert_eq!(state.near_street(), Some("First Avenue"));
    }
}
