use serde::{Deserialize, Serialize};

/// A "part" of a location
pub type LocationComponent = f64;

/// Mean radius of the earth in meters
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
/// A latitude / longitude pair in degrees
pub struct Coordinates {
    /// Latitude
    pub lat: LocationComponent,
    /// Longitude
    pub long: LocationComponent,
}

impl Coordinates {
    pub const fn new(lat: LocationComponent, long: LocationComponent) -> Self {
        Self { lat, long }
    }

    /// Great-circle distance to `other` in meters (haversine)
    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlong = (other.long - self.long).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlong / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
    }

    /// Initial bearing in degrees `[0, 360)` when travelling from this point to `other`
    pub fn bearing_to(&self, other: &Coordinates) -> LocationComponent {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlong = (other.long - self.long).to_radians();

        let y = dlong.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlong.cos();
        normalize_heading(y.atan2(x).to_degrees())
    }

    /// The point reached after travelling `meters` along `bearing` degrees
    pub fn destination(&self, bearing: LocationComponent, meters: f64) -> Coordinates {
        let lat1 = self.lat.to_radians();
        let long1 = self.long.to_radians();
        let theta = bearing.to_radians();
        let delta = meters / EARTH_RADIUS_METERS;

        let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
        let long2 = long1
            + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

        let long = (long2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
        Coordinates::new(lat2.to_degrees(), long)
    }
}

/// Wrap a heading into `[0, 360)`
pub fn normalize_heading(heading: LocationComponent) -> LocationComponent {
    let wrapped = heading.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Smallest absolute angle between two headings, in `[0, 180]`
pub fn heading_delta(a: LocationComponent, b: LocationComponent) -> LocationComponent {
    let diff = (a - b).rem_euclid(360.0);
    diff.min(360.0 - diff)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
/// Some location in the world as gotten from a Geolocation API
pub struct Location {
    /// Latitude
    pub lat: LocationComponent,
    /// Longitude
    pub long: LocationComponent,
    /// The bearing in degrees, optional as GPS can't always determine
    #[serde(default)]
    pub heading: Option<LocationComponent>,
    /// Ground speed in m/s, optional for the same reason
    #[serde(default)]
    pub speed: Option<LocationComponent>,
}

impl Location {
    pub const fn new(lat: LocationComponent, long: LocationComponent) -> Self {
        Self {
            lat,
            long,
            heading: None,
            speed: None,
        }
    }

    pub const fn with_heading(mut self, heading: LocationComponent) -> Self {
        self.heading = Some(heading);
        self
    }

    pub const fn with_speed(mut self, speed: LocationComponent) -> Self {
        self.speed = Some(speed);
        self
    }

    pub const fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.long)
    }

    pub fn distance_to(&self, other: &Location) -> f64 {
        self.coordinates().distance_to(&other.coordinates())
    }

    /// Heading reported by the service, if it's usable. Platforms report a
    /// negative value when the heading is unknown.
    pub fn valid_heading(&self) -> Option<LocationComponent> {
        self.heading
            .filter(|h| h.is_finite() && *h >= 0.0)
            .map(normalize_heading)
    }

    /// Speed reported by the service, if it's usable
    pub fn valid_speed(&self) -> Option<LocationComponent> {
        self.speed.filter(|s| s.is_finite() && *s >= 0.0)
    }
}

/// Source of location fixes, usually backed by the platform's location API
pub trait LocationService: Send + Sync {
    fn get_loc(&self) -> Option<Location>;
}

impl<L: LocationService + ?Sized> LocationService for Box<L> {
    fn get_loc(&self) -> Option<Location> {
        (**self).get_loc()
    }
}
