use std::{
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use bearing_logic::{CourseSettings, CourseUiState, Location, LocationService};
use interprocess::local_socket::{GenericNamespaced, Name, ToNsName};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

pub use prelude::*;

pub fn get_socket_name(base_name: String) -> Result<Name<'static>> {
    base_name
        .to_ns_name::<GenericNamespaced>()
        .context("Failed to parse socket name")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TestingRequest {
    StartCourseUpdates,
    StopCourseUpdates,
    GetState,
    /// Poll the location service right away instead of waiting for the interval
    NextTick,
    UpdateSettings(CourseSettings),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TestingResponse {
    Complete,
    State(CourseUiState),
    /// Sent unprompted whenever the manager reports a change
    StateChanged,
    Error(String),
}

impl From<CourseUiState> for TestingResponse {
    fn from(val: CourseUiState) -> Self {
        TestingResponse::State(val)
    }
}

impl From<anyhow::Error> for TestingResponse {
    fn from(value: anyhow::Error) -> Self {
        TestingResponse::Error(value.to_string())
    }
}

/// Encode a message as one line of JSON
pub fn encode_line(msg: &impl Serialize) -> Result<Vec<u8>> {
    let mut encoded = serde_json::to_vec(msg).context("Failed to encode")?;
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim_end()).context("Failed to parse")
}

/// Longest line either side will accept
const MAX_LINE_LEN: usize = 64 * 1024;

/// Split a socket into lines. Partial lines stay buffered in the reader, so
/// it's safe to race `next()` against other futures in a `select!`.
pub fn line_reader<R: AsyncRead>(reader: R) -> FramedRead<R, LinesCodec> {
    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LEN))
}

/// [LocationService] that plays back a recorded track one fix per poll,
/// staying on the last fix once it runs out
pub struct ReplayLocation {
    track: Vec<Location>,
    next: AtomicUsize,
}

impl ReplayLocation {
    pub fn new(track: Vec<Location>) -> Self {
        Self {
            track,
            next: AtomicUsize::new(0),
        }
    }

    /// Load a track from a JSON array of locations
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read track {}", path.display()))?;
        let track = serde_json::from_str::<Vec<Location>>(&raw).context("Failed to parse track")?;
        Ok(Self::new(track))
    }

    pub fn len(&self) -> usize {
        self.track.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }
}

impl LocationService for ReplayLocation {
    fn get_loc(&self) -> Option<Location> {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        self.track.get(i).or(self.track.last()).copied()
    }
}
