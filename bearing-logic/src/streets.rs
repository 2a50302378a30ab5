use std::{collections::HashMap, path::Path};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    location::{Coordinates, EARTH_RADIUS_METERS, Location},
    prelude::*,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
/// Street labels derived from a location
pub struct StreetNames {
    /// The street the location is on
    pub current: Option<String>,
    /// The closest street with a different name than `current`
    pub near: Option<String>,
}

impl StreetNames {
    pub fn new(current: impl Into<String>, near: Option<String>) -> Self {
        Self {
            current: Some(current.into()),
            near,
        }
    }
}

/// Turns a location into street names, usually by reverse geocoding
#[async_trait]
pub trait StreetResolver: Send + Sync {
    async fn resolve(&self, location: &Location) -> Result<StreetNames>;
}

#[async_trait]
impl<R: StreetResolver + ?Sized> StreetResolver for Box<R> {
    async fn resolve(&self, location: &Location) -> Result<StreetNames> {
        (**self).resolve(location).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// A named polyline
pub struct Street {
    pub name: String,
    pub points: Vec<Coordinates>,
}

const fn default_max_distance() -> f64 {
    75.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Offline [StreetResolver] backed by a fixed set of streets
pub struct StreetMap {
    /// Streets further than this (in meters) are never reported
    #[serde(default = "default_max_distance")]
    pub max_distance_meters: f64,
    pub streets: Vec<Street>,
}

impl Default for StreetMap {
    fn default() -> Self {
        Self {
            max_distance_meters: default_max_distance(),
            streets: vec![],
        }
    }
}

/// Local flat projection centered on `origin`, in meters. Good enough for the
/// few hundred meters we care about.
fn project(origin: &Coordinates, point: &Coordinates) -> (f64, f64) {
    let dlong = (point.long - origin.long + 540.0).rem_euclid(360.0) - 180.0;
    let x = dlong.to_radians() * origin.lat.to_radians().cos() * EARTH_RADIUS_METERS;
    let y = (point.lat - origin.lat).to_radians() * EARTH_RADIUS_METERS;
    (x, y)
}

/// Distance from the origin to the segment `a`-`b`
fn origin_segment_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (-(a.0 * dx + a.1 * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (px, py) = (a.0 + t * dx, a.1 + t * dy);
    px.hypot(py)
}

impl Street {
    pub fn new(name: impl Into<String>, points: Vec<Coordinates>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    /// Distance in meters from `coords` to the closest point on this street
    pub fn distance_from(&self, coords: &Coordinates) -> Option<f64> {
        let projected = self
            .points
            .iter()
            .map(|p| project(coords, p))
            .collect::<Vec<_>>();

        match projected.as_slice() {
            [] => None,
            [single] => Some(single.0.hypot(single.1)),
            many => many
                .windows(2)
                .map(|w| origin_segment_distance(w[0], w[1]))
                .min_by(f64::total_cmp),
        }
    }
}

impl StreetMap {
    pub fn new(streets: Vec<Street>) -> Self {
        Self {
            streets,
            ..Default::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read street map {}", path.display()))?;
        serde_json::from_str(&raw).context("Failed to parse street map")
    }

    /// Street names within range of `coords`, closest first, one entry per name
    pub fn nearby_streets(&self, coords: &Coordinates) -> Vec<(&str, f64)> {
        let mut closest = HashMap::<&str, f64>::with_capacity(self.streets.len());

        for street in self.streets.iter() {
            let Some(dist) = street.distance_from(coords) else {
                continue;
            };
            if dist > self.max_distance_meters {
                continue;
            }
            closest
                .entry(street.name.as_str())
                .and_modify(|d| *d = d.min(dist))
                .or_insert(dist);
        }

        let mut sorted = closest.into_iter().collect::<Vec<_>>();
        sorted.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        sorted
    }

    pub fn lookup(&self, coords: &Coordinates) -> StreetNames {
        let mut nearby = self
            .nearby_streets(coords)
            .into_iter()
            .map(|(name, _)| name.to_string());

        StreetNames {
            current: nearby.next(),
            near: nearby.next(),
        }
    }
}

#[async_trait]
impl StreetResolver for StreetMap {
    async fn resolve(&self, location: &Location) -> Result<StreetNames> {
        Ok(self.lookup(&location.coordinates()))
    }
}
