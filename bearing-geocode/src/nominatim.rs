use std::time::Duration;

use async_trait::async_trait;
use bearing_logic::{Coordinates, Location, StreetNames, StreetResolver, prelude::*};
use log::debug;
use serde::Deserialize;

use crate::server::{GEOCODER_HTTP_URL, USER_AGENT};

/// How far ahead (in meters) to look for the near street
const DEFAULT_LOOKAHEAD_METERS: f64 = 60.0;

/// Give up on a lookup that takes longer than this
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Nominatim zoom level 17 resolves to major and minor streets
const STREET_ZOOM: u8 = 17;

#[derive(Debug, Deserialize, Default)]
struct ReverseAddress {
    road: Option<String>,
    pedestrian: Option<String>,
    footway: Option<String>,
    path: Option<String>,
    cycleway: Option<String>,
}

impl ReverseAddress {
    fn into_street(self) -> Option<String> {
        self.road
            .or(self.pedestrian)
            .or(self.footway)
            .or(self.path)
            .or(self.cycleway)
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Option<ReverseAddress>,
    /// Set when nothing is at the coordinates (middle of a lake, etc.)
    #[serde(default)]
    error: Option<String>,
}

/// Pull the street name out of a `format=jsonv2` reverse response
fn parse_reverse(raw: &str) -> Result<Option<String>> {
    let resp = serde_json::from_str::<ReverseResponse>(raw)
        .context("Failed to parse reverse geocode response")?;

    if let Some(err) = resp.error {
        debug!("Geocoder found nothing: {err}");
        return Ok(None);
    }

    Ok(resp.address.and_then(ReverseAddress::into_street))
}

/// [StreetResolver] backed by a Nominatim compatible reverse geocoding server.
/// The current street is whatever is at the location, the near street is
/// looked up a short distance ahead along the heading.
pub struct NominatimResolver {
    client: reqwest::Client,
    base_url: String,
    lookahead_meters: f64,
    timeout: Duration,
}

impl NominatimResolver {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: GEOCODER_HTTP_URL.to_string(),
            lookahead_meters: DEFAULT_LOOKAHEAD_METERS,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Point at a different server than the one set at build time
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_lookahead_meters(mut self, lookahead_meters: f64) -> Self {
        self.lookahead_meters = lookahead_meters;
        self
    }

    /// Applies to each request, including connecting and reading the body
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn reverse_url(&self, coords: &Coordinates) -> String {
        format!(
            "{}/reverse?format=jsonv2&lat={:.7}&lon={:.7}&zoom={STREET_ZOOM}&addressdetails=1",
            self.base_url, coords.lat, coords.long
        )
    }

    /// Where to look for the near street, north when the heading is unknown
    fn lookahead_point(&self, location: &Location) -> Coordinates {
        let heading = location.valid_heading().unwrap_or(0.0);
        location
            .coordinates()
            .destination(heading, self.lookahead_meters)
    }

    async fn reverse_street(&self, coords: &Coordinates) -> Result<Option<String>> {
        let url = self.reverse_url(coords);
        let body = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .context("Could not send request")?
            .error_for_status()
            .context("Server returned error")?
            .text()
            .await
            .context("Failed to read response")?;

        parse_reverse(&body)
    }
}

#[async_trait]
impl StreetResolver for NominatimResolver {
    async fn resolve(&self, location: &Location) -> Result<StreetNames> {
        let here = location.coordinates();
        let ahead = self.lookahead_point(location);

        let (current, ahead) =
            futures::future::try_join(self.reverse_street(&here), self.reverse_street(&ahead))
                .await?;

        let near = ahead.filter(|name| Some(name) != current.as_ref());

        Ok(StreetNames { current, near })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "place_id": 308329166,
        "licence": "Data © OpenStreetMap contributors, ODbL 1.0. http://osm.org/copyright",
        "osm_type": "way",
        "osm_id": 22855932,
        "lat": "43.0846",
        "lon": "-77.6742",
        "category": "highway",
        "type": "tertiary",
        "place_rank": 26,
        "importance": 0.1,
        "addresstype": "road",
        "name": "Lomb Memorial Drive",
        "display_name": "Lomb Memorial Drive, Henrietta, Monroe County, New York, United States",
        "address": {
            "road": "Lomb Memorial Drive",
            "town": "Henrietta",
            "county": "Monroe County",
            "state": "New York",
            "country": "United States",
            "country_code": "us"
        },
        "boundingbox": ["43.0810", "43.0870", "-77.6800", "-77.6700"]
    }"#;

    #[test]
    fn test_parse_road() {
        assert_eq!(
            parse_reverse(RESPONSE).unwrap().as_deref(),
            Some("Lomb Memorial Drive")
        );
    }

    #[test]
    fn test_parse_falls_back_to_footway() {
        let raw = r#"{"address": {"footway": "Quarter Mile", "city": "Rochester"}}"#;
        assert_eq!(parse_reverse(raw).unwrap().as_deref(), Some("Quarter Mile"));
    }

    #[test]
    fn test_parse_nothing_found() {
        let raw = r#"{"error": "Unable to geocode"}"#;
        assert_eq!(parse_reverse(raw).unwrap(), None);

        let raw = r#"{"address": {"city": "Rochester"}}"#;
        assert_eq!(parse_reverse(raw).unwrap(), None);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_reverse("<html>Bad Gateway</html>").is_err());
    }

    #[test]
    fn test_reverse_url() {
        let resolver = NominatimResolver::new()
            .unwrap()
            .with_base_url("http://localhost:8080/");
        let url = resolver.reverse_url(&Coordinates::new(43.0846, -77.6742));
        assert_eq!(
            url,
            "http://localhost:8080/reverse?format=jsonv2&lat=43.0846000&lon=-77.6742000&zoom=17&addressdetails=1"
        );
    }

    #[test]
    fn test_default_server() {
        assert!(GEOCODER_HTTP_URL.starts_with("http"));
        assert!(USER_AGENT.starts_with("hello-bearing/"));
    }

    #[test]
    fn test_lookahead_follows_heading() {
        let resolver = NominatimResolver::new().unwrap().with_lookahead_meters(100.0);
        let here = Location::new(0.0, 0.0);

        let north = resolver.lookahead_point(&here);
        assert!(north.lat > 0.0 && north.long.abs() < 1e-9);

        let east = resolver.lookahead_point(&here.with_heading(90.0));
        assert!(east.long > 0.0 && east.lat.abs() < 1e-9);
        assert!((here.coordinates().distance_to(&east) - 100.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_unreachable_server_errors() {
        let resolver = NominatimResolver::new()
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        assert!(resolver.resolve(&Location::new(0.0, 0.0)).await.is_err());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let resolver = NominatimResolver::new()
            .unwrap()
            .with_base_url(format!("http://{addr}"))
            .with_timeout(Duration::from_millis(200));

        let res = tokio::time::timeout(
            Duration::from_secs(5),
            resolver.resolve(&Location::new(0.0, 0.0)),
        )
        .await
        .expect("Lookup never gave up");
        assert!(res.is_err());

        server.abort();
    }
}
