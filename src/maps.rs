use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult, LookupError};
use crate::ingestion::{RoutePair, SegmentedAddress};
use crate::secrets::ApiKey;

const USER_AGENT: &str = concat!("distance-extract/", env!("CARGO_PKG_VERSION"));
const ROUTE_LEGS_PATH: &str = "resourceSets[0].resources[0].routeLegs";
const POINT_PATH: &str = "resourceSets[0].resources[0].point.coordinates";

/// One leg of a driving route, exactly as the API reported it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct RouteLeg {
    #[serde(rename = "travelDuration")]
    pub travel_duration: Option<f64>,
    #[serde(rename = "travelDistance")]
    pub travel_distance: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteMetrics {
    pub travel_duration: f64,
    pub travel_distance: f64,
}

impl RouteLeg {
    pub fn metrics(&self) -> Result<RouteMetrics, LookupError> {
        match (self.travel_duration, self.travel_distance) {
            (Some(travel_duration), Some(travel_distance)) => Ok(RouteMetrics {
                travel_duration,
                travel_distance,
            }),
            (None, _) => Err(LookupError::MissingField("routeLegs[].travelDuration")),
            (_, None) => Err(LookupError::MissingField("routeLegs[].travelDistance")),
        }
    }
}

/// First geocoding candidate, coordinates rounded to four decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub country_region: Option<String>,
    pub admin_district: Option<String>,
    pub confidence: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum LocationQuery<'a> {
    FreeForm(&'a str),
    Structured(&'a SegmentedAddress),
    Country(&'a str),
    AdminDistrict {
        country_region: &'a str,
        admin_district: &'a str,
    },
}

#[async_trait]
pub trait MapsApi: Send + Sync {
    /// Driving legs for consecutive waypoints `src0, dst0, src1, dst1, ...`.
    async fn route_legs(&self, pairs: &[RoutePair]) -> Result<Vec<RouteLeg>, LookupError>;

    async fn locate(&self, query: LocationQuery<'_>) -> Result<Location, LookupError>;
}

pub struct BingMapsClient {
    http: Client,
    routes_endpoint: Url,
    locations_endpoint: Url,
    api_key: ApiKey,
}

impl BingMapsClient {
    pub fn new(config: &AppConfig, api_key: ApiKey) -> AppResult<Self> {
        let base = config.api_base_url.trim_end_matches('/');
        let routes_endpoint = parse_endpoint(&format!("{base}/Routes/Driving"))?;
        let locations_endpoint = parse_endpoint(&format!("{base}/Locations"))?;

        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(secs) = config.http_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            routes_endpoint,
            locations_endpoint,
            api_key,
        })
    }

    pub fn route_url(&self, pairs: &[RoutePair]) -> Url {
        let mut url = self.routes_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            for (i, pair) in pairs.iter().enumerate() {
                query
                    .append_pair(&format!("wp.{}", 2 * i), &pair.source)
                    .append_pair(&format!("wp.{}", 2 * i + 1), &pair.destination);
            }
            query.append_pair("key", self.api_key.expose());
        }
        url
    }

    pub fn location_url(&self, query: LocationQuery<'_>) -> Url {
        let mut url = self.locations_endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            match query {
                LocationQuery::FreeForm(address) => {
                    pairs.append_pair("q", address);
                }
                LocationQuery::Structured(address) => {
                    pairs
                        .append_pair("countryRegion", &address.country_region)
                        .append_pair("adminDistrict", &address.admin_district)
                        .append_pair("locality", &address.locality)
                        .append_pair("postalCode", &address.postal_code)
                        .append_pair("addressLine", &address.address_line);
                }
                LocationQuery::Country(country) => {
                    pairs.append_pair("countryRegion", country);
                }
                LocationQuery::AdminDistrict {
                    country_region,
                    admin_district,
                } => {
                    pairs
                        .append_pair("countryRegion", country_region)
                        .append_pair("adminDistrict", admin_district);
                }
            }
            pairs.append_pair("key", self.api_key.expose());
        }
        url
    }

    async fn fetch(&self, url: Url) -> Result<ApiResponse, LookupError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        trace!(target: "maps_client", bytes = body.len(), "received response");
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl MapsApi for BingMapsClient {
    async fn route_legs(&self, pairs: &[RoutePair]) -> Result<Vec<RouteLeg>, LookupError> {
        debug!(target: "maps_client", pairs = pairs.len(), "requesting driving route");
        let response = self.fetch(self.route_url(pairs)).await?;
        response
            .first_resource()
            .and_then(|resource| resource.route_legs)
            .ok_or(LookupError::MissingField(ROUTE_LEGS_PATH))
    }

    async fn locate(&self, query: LocationQuery<'_>) -> Result<Location, LookupError> {
        debug!(target: "maps_client", ?query, "requesting location");
        let response = self.fetch(self.location_url(query)).await?;
        let resource = response
            .first_resource()
            .ok_or(LookupError::MissingField(POINT_PATH))?;
        resource.into_location()
    }
}

fn parse_endpoint(raw: &str) -> AppResult<Url> {
    Url::parse(raw).map_err(|err| AppError::Config(format!("invalid maps API URL {raw}: {err}")))
}

pub fn round_coordinate(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(rename = "resourceSets", default)]
    resource_sets: Vec<ResourceSet>,
}

impl ApiResponse {
    fn first_resource(self) -> Option<Resource> {
        self.resource_sets
            .into_iter()
            .next()
            .and_then(|set| set.resources.into_iter().next())
    }
}

#[derive(Deserialize)]
struct ResourceSet {
    #[serde(default)]
    resources: Vec<Resource>,
}

#[derive(Deserialize)]
struct Resource {
    #[serde(rename = "routeLegs")]
    route_legs: Option<Vec<RouteLeg>>,
    point: Option<ResourcePoint>,
    address: Option<ResourceAddress>,
    confidence: Option<String>,
}

impl Resource {
    fn into_location(self) -> Result<Location, LookupError> {
        let coordinates = self
            .point
            .and_then(|point| point.coordinates)
            .ok_or(LookupError::MissingField(POINT_PATH))?;
        let (latitude, longitude) = match coordinates.as_slice() {
            [lat, lng, ..] => (*lat, *lng),
            _ => return Err(LookupError::MissingField(POINT_PATH)),
        };
        let (country_region, admin_district) = match self.address {
            Some(address) => (address.country_region, address.admin_district),
            None => (None, None),
        };
        Ok(Location {
            latitude: round_coordinate(latitude),
            longitude: round_coordinate(longitude),
            country_region,
            admin_district,
            confidence: self.confidence,
        })
    }
}

#[derive(Deserialize)]
struct ResourcePoint {
    coordinates: Option<Vec<f64>>,
}

#[derive(Deserialize)]
struct ResourceAddress {
    #[serde(rename = "countryRegion")]
    country_region: Option<String>,
    #[serde(rename = "adminDistrict")]
    admin_district: Option<String>,
}

#[cfg(test)]
mod tests {
    use httptest::matchers::{all_of, contains, request, url_decoded};
    use httptest::responders::{json_encoded, status_code};
    use httptest::{Expectation, Server};
    use serde_json::json;

    use super::*;
    use crate::config::DEFAULT_API_BASE_URL;

    fn config(base: &str) -> AppConfig {
        AppConfig {
            database_path: "unused.db".into(),
            api_base_url: base.to_string(),
            api_key_file: "unused.txt".into(),
            route_batch_size: 12,
            http_timeout_secs: Some(5),
        }
    }

    fn client(base: &str) -> BingMapsClient {
        BingMapsClient::new(&config(base), ApiKey::new("test-key").unwrap()).unwrap()
    }

    #[test]
    fn route_url_alternates_waypoints() {
        let client = client(DEFAULT_API_BASE_URL);
        let url = client.route_url(&[
            RoutePair::new("Paris, France", "Lyon"),
            RoutePair::new("Nice", "Marseille"),
        ]);
        assert_eq!(url.path(), "/REST/v1/Routes/Driving");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("wp.0".into(), "Paris, France".into()),
                ("wp.1".into(), "Lyon".into()),
                ("wp.2".into(), "Nice".into()),
                ("wp.3".into(), "Marseille".into()),
                ("key".into(), "test-key".into()),
            ]
        );
    }

    #[test]
    fn structured_location_url_keeps_field_order() {
        let client = client(DEFAULT_API_BASE_URL);
        let address = SegmentedAddress {
            country_region: "United States".into(),
            admin_district: "WA".into(),
            locality: "Redmond".into(),
            postal_code: "98052".into(),
            address_line: "1 Microsoft Way".into(),
        };
        let url = client.location_url(LocationQuery::Structured(&address));
        let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(
            keys,
            vec![
                "countryRegion",
                "adminDistrict",
                "locality",
                "postalCode",
                "addressLine",
                "key"
            ]
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let result = BingMapsClient::new(&config("not a url"), ApiKey::new("k").unwrap());
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn parses_route_legs_from_response() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/REST/v1/Routes/Driving"),
                request::query(url_decoded(contains(("wp.0", "A")))),
                request::query(url_decoded(contains(("key", "test-key")))),
            ])
            .respond_with(json_encoded(json!({
                "resourceSets": [{
                    "resources": [{
                        "routeLegs": [
                            { "travelDuration": 600, "travelDistance": 12.5 },
                            { "travelDuration": 60, "travelDistance": 1.0 },
                            { "travelDuration": 900, "travelDistance": 20.25 }
                        ]
                    }]
                }]
            }))),
        );

        let client = client(&server.url_str("/REST/v1"));
        let legs = client
            .route_legs(&[RoutePair::new("A", "B"), RoutePair::new("C", "D")])
            .await
            .unwrap();
        assert_eq!(legs.len(), 3);
        assert_eq!(
            legs[2].metrics().unwrap(),
            RouteMetrics {
                travel_duration: 900.0,
                travel_distance: 20.25
            }
        );
    }

    #[tokio::test]
    async fn empty_resource_sets_is_missing_field() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/REST/v1/Locations"))
                .respond_with(json_encoded(json!({ "resourceSets": [] }))),
        );

        let client = client(&server.url_str("/REST/v1"));
        let err = client
            .locate(LocationQuery::FreeForm("nowhere"))
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::MissingField(_)));
    }

    #[tokio::test]
    async fn error_status_is_request_failure() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/REST/v1/Locations"))
                .respond_with(status_code(401)),
        );

        let client = client(&server.url_str("/REST/v1"));
        let err = client
            .locate(LocationQuery::Country("France"))
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::Status(401)));
    }

    #[tokio::test]
    async fn transport_error_does_not_carry_the_key() {
        let client = BingMapsClient::new(
            &config("http://127.0.0.1:1/REST/v1"),
            ApiKey::new("SUPERSECRETKEY").unwrap(),
        )
        .unwrap();
        let err = client
            .route_legs(&[RoutePair::new("A", "B")])
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::Transport(_)));
        let failure = crate::errors::ItemFailure::new(0, &err);
        assert!(!failure.detail.contains("SUPERSECRETKEY"));
        assert!(!format!("{err:?}").contains("SUPERSECRETKEY"));
    }

    #[tokio::test]
    async fn rounds_location_coordinates() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/REST/v1/Locations"),
                request::query(url_decoded(contains(("q", "1 Main St")))),
            ])
            .respond_with(json_encoded(json!({
                "resourceSets": [{
                    "resources": [{
                        "point": { "type": "Point", "coordinates": [47.641234567, -122.129876543] },
                        "address": { "countryRegion": "United States", "adminDistrict": "WA" },
                        "confidence": "High"
                    }]
                }]
            }))),
        );

        let client = client(&server.url_str("/REST/v1"));
        let location = client
            .locate(LocationQuery::FreeForm("1 Main St"))
            .await
            .unwrap();
        assert_eq!(location.latitude, 47.6412);
        assert_eq!(location.longitude, -122.1299);
        assert_eq!(location.country_region.as_deref(), Some("United States"));
        assert_eq!(location.confidence.as_deref(), Some("High"));
    }
}
