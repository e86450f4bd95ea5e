use std::ops::Range;
use std::str::FromStr;

use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{ItemFailure, LookupError};
use crate::ingestion::{Address, RoutePair, SegmentedAddress};
use crate::maps::{Location, LocationQuery, MapsApi, RouteLeg, RouteMetrics};

/// Country name for which the admin-district centroid is also resolved.
const ADMIN_CENTROID_COUNTRY: &str = "United States";

pub type Outcome<R> = Result<R, ItemFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Up to `batch_size` pairs per request; a failed request fails the whole batch.
    #[default]
    Batched,
    /// One request per pair.
    Single,
    /// Batched, then items of failed batches are retried one by one.
    BatchedThenSingle,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Batched => "batched",
            Strategy::Single => "single",
            Strategy::BatchedThenSingle => "batched-then-single",
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "batched" => Ok(Strategy::Batched),
            "single" => Ok(Strategy::Single),
            "batched-then-single" => Ok(Strategy::BatchedThenSingle),
            other => Err(format!("unknown lookup strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Centroid {
    pub latitude: f64,
    pub longitude: f64,
}

impl Centroid {
    pub const ZERO: Centroid = Centroid {
        latitude: 0.0,
        longitude: 0.0,
    };

    fn from_location(location: &Location) -> Self {
        Self {
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressGeocode {
    pub latitude: f64,
    pub longitude: f64,
    pub country_check: String,
    pub country_centroid: Centroid,
    pub confidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentedGeocode {
    pub latitude: f64,
    pub longitude: f64,
    pub country_check: String,
    pub admdist_check: String,
    pub country_centroid: Centroid,
    pub admdist_centroid: Centroid,
    pub confidence: String,
}

/// Consecutive index ranges of at most `batch_size` items covering `0..len`.
pub fn plan_batches(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let size = batch_size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Picks the requested pairs out of a chained route.
///
/// Waypoints are `src0, dst0, src1, dst1, ...` so leg `2j` is pair `j`;
/// odd legs run from one destination to the next source and are skipped.
pub fn metrics_for_pairs(legs: &[RouteLeg], pairs: usize) -> Vec<Result<RouteMetrics, LookupError>> {
    (0..pairs)
        .map(|j| {
            legs.get(2 * j)
                .ok_or(LookupError::MissingLeg(2 * j))
                .and_then(RouteLeg::metrics)
        })
        .collect()
}

/// Runs lookups strictly one request at a time.
pub struct LookupExecutor<'a> {
    api: &'a dyn MapsApi,
    progress: ProgressBar,
}

impl<'a> LookupExecutor<'a> {
    pub fn new(api: &'a dyn MapsApi, progress: ProgressBar) -> Self {
        Self { api, progress }
    }

    pub async fn routes(
        &self,
        pending: &[RoutePair],
        strategy: Strategy,
        batch_size: usize,
    ) -> Vec<Outcome<RouteMetrics>> {
        let outcomes = match strategy {
            Strategy::Single => self.routes_single(pending).await,
            Strategy::Batched => self.routes_batched(pending, batch_size).await,
            Strategy::BatchedThenSingle => {
                let mut outcomes = self.routes_batched(pending, batch_size).await;
                self.retry_failed_individually(pending, &mut outcomes).await;
                outcomes
            }
        };
        self.progress.finish();
        outcomes
    }

    pub async fn routes_batched(
        &self,
        pending: &[RoutePair],
        batch_size: usize,
    ) -> Vec<Outcome<RouteMetrics>> {
        let mut outcomes = Vec::with_capacity(pending.len());
        for range in plan_batches(pending.len(), batch_size) {
            let batch = &pending[range.clone()];
            match self.api.route_legs(batch).await {
                Ok(legs) => {
                    for (offset, result) in metrics_for_pairs(&legs, batch.len())
                        .into_iter()
                        .enumerate()
                    {
                        let index = range.start + offset;
                        outcomes.push(result.map_err(|err| ItemFailure::new(index, &err)));
                    }
                }
                Err(err) => {
                    // No way to tell which pair broke the request.
                    warn!(
                        target: "lookup",
                        first = range.start,
                        last = range.end - 1,
                        error = %err,
                        "route batch failed"
                    );
                    outcomes.extend(range.clone().map(|index| Err(ItemFailure::new(index, &err))));
                }
            }
            self.progress.inc(batch.len() as u64);
        }
        outcomes
    }

    pub async fn routes_single(&self, pending: &[RoutePair]) -> Vec<Outcome<RouteMetrics>> {
        let mut outcomes = Vec::with_capacity(pending.len());
        for (index, pair) in pending.iter().enumerate() {
            outcomes.push(self.route_one(index, pair).await);
            self.progress.inc(1);
        }
        outcomes
    }

    async fn route_one(&self, index: usize, pair: &RoutePair) -> Outcome<RouteMetrics> {
        let legs = self
            .api
            .route_legs(std::slice::from_ref(pair))
            .await
            .map_err(|err| ItemFailure::new(index, &err))?;
        legs.first()
            .ok_or(LookupError::MissingLeg(0))
            .and_then(RouteLeg::metrics)
            .map_err(|err| ItemFailure::new(index, &err))
    }

    async fn retry_failed_individually(
        &self,
        pending: &[RoutePair],
        outcomes: &mut [Outcome<RouteMetrics>],
    ) {
        let failed: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| outcome.is_err())
            .map(|(index, _)| index)
            .collect();
        if failed.is_empty() {
            return;
        }
        debug!(target: "lookup", count = failed.len(), "retrying failed pairs one by one");
        if let Some(length) = self.progress.length() {
            self.progress.set_length(length + failed.len() as u64);
        }
        for index in failed {
            outcomes[index] = self.route_one(index, &pending[index]).await;
            self.progress.inc(1);
        }
    }

    pub async fn addresses(&self, pending: &[Address]) -> Vec<Outcome<AddressGeocode>> {
        let mut outcomes = Vec::with_capacity(pending.len());
        for (index, item) in pending.iter().enumerate() {
            outcomes.push(self.geocode_address(index, item).await);
            self.progress.inc(1);
        }
        self.progress.finish();
        outcomes
    }

    pub async fn segmented(&self, pending: &[SegmentedAddress]) -> Vec<Outcome<SegmentedGeocode>> {
        let mut outcomes = Vec::with_capacity(pending.len());
        for (index, item) in pending.iter().enumerate() {
            outcomes.push(self.geocode_segmented(index, item).await);
            self.progress.inc(1);
        }
        self.progress.finish();
        outcomes
    }

    async fn geocode_address(&self, index: usize, item: &Address) -> Outcome<AddressGeocode> {
        let (location, country_check) = self
            .api
            .locate(LocationQuery::FreeForm(&item.address))
            .await
            .and_then(|location| {
                let country = required_country(&location)?;
                Ok((location, country))
            })
            .map_err(|err| ItemFailure::new(index, &err))?;

        let country_centroid = self
            .centroid(index, LocationQuery::Country(&country_check))
            .await;

        Ok(AddressGeocode {
            latitude: location.latitude,
            longitude: location.longitude,
            country_check,
            country_centroid,
            confidence: location.confidence.unwrap_or_default(),
        })
    }

    async fn geocode_segmented(
        &self,
        index: usize,
        item: &SegmentedAddress,
    ) -> Outcome<SegmentedGeocode> {
        let (location, country_check) = self
            .api
            .locate(LocationQuery::Structured(item))
            .await
            .and_then(|location| {
                let country = required_country(&location)?;
                Ok((location, country))
            })
            .map_err(|err| ItemFailure::new(index, &err))?;
        let admdist_check = location.admin_district.clone().unwrap_or_default();

        let country_centroid = self
            .centroid(index, LocationQuery::Country(&country_check))
            .await;

        let admdist_centroid = if item.country_region == ADMIN_CENTROID_COUNTRY {
            self.centroid(
                index,
                LocationQuery::AdminDistrict {
                    country_region: &country_check,
                    admin_district: &admdist_check,
                },
            )
            .await
        } else {
            Centroid::ZERO
        };

        Ok(SegmentedGeocode {
            latitude: location.latitude,
            longitude: location.longitude,
            country_check,
            admdist_check,
            country_centroid,
            admdist_centroid,
            confidence: location.confidence.unwrap_or_default(),
        })
    }

    /// Best-effort follow-up lookup; any failure yields [`Centroid::ZERO`].
    async fn centroid(&self, index: usize, query: LocationQuery<'_>) -> Centroid {
        match self.api.locate(query).await {
            Ok(location) => Centroid::from_location(&location),
            Err(err) => {
                debug!(
                    target: "lookup",
                    index,
                    ?query,
                    error = %err,
                    "centroid lookup failed; defaulting to zero"
                );
                Centroid::ZERO
            }
        }
    }
}

fn required_country(location: &Location) -> Result<String, LookupError> {
    location
        .country_region
        .clone()
        .filter(|country| !country.trim().is_empty())
        .ok_or(LookupError::MissingField(
            "resourceSets[0].resources[0].address.countryRegion",
        ))
}
