//! Proximity & Fog Engine
//!
//! Turns position samples into per-mission distances, reveal state and an
//! overall GPS status.
//!
//! ## Rules
//!
//! - A marker is *revealed* when its distance is within the reveal radius.
//! - Disabling fog makes every marker *visible* without touching distances.
//! - Location-agnostic missions (no target) are always revealed.
//! - `Searching` holds until the first acceptable fix; any sensor failure
//!   moves to `Error`, which sticks until the next acceptable fix.
//! - Failures freeze distances at their last known values.
//!
//! Recomputation is idempotent and side-effect free; implausible jumps
//! are accepted as-is.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::{debug, trace, warn};

use crate::core::config::GameConfig;
use crate::core::geo::GeoPoint;
use crate::game::mission::{MissionCatalog, MissionId};
use crate::game::sampler::{PositionSample, SampleStatus};

/// Overall GPS state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpsStatus {
    /// No acceptable fix yet.
    #[default]
    Searching,
    /// Last accepted sample was a usable fix.
    Locked,
    /// The sensor failed; sticky until the next usable fix.
    Error,
}

/// What a single ingested sample changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleOutcome {
    /// (old, new) when the GPS status changed
    pub status_change: Option<(GpsStatus, GpsStatus)>,
    /// Missions whose distance-derived reveal flipped: (id, now_revealed)
    pub reveal_changes: Vec<(MissionId, bool)>,
    /// Sample was a fix but too inaccurate to use
    pub ignored: bool,
}

/// Per-mission proximity state and GPS status.
#[derive(Clone, Debug)]
pub struct ProximityEngine {
    /// Reveal radius R in meters
    reveal_radius_m: f64,
    /// Accuracy limit for a usable fix
    max_accuracy_m: f64,
    /// Current GPS status
    status: GpsStatus,
    /// Last accepted coordinate
    last_fix: Option<GeoPoint>,
    /// Last sensor failure seen
    last_failure: Option<SampleStatus>,
    /// Rendering override flag
    fog_enabled: bool,
    /// Mission targets (None = location agnostic)
    targets: BTreeMap<MissionId, Option<GeoPoint>>,
    /// Cached distances from the last fix
    distances: BTreeMap<MissionId, f64>,
    /// Inaccurate fixes ignored so far
    ignored_samples: u64,
}

impl ProximityEngine {
    /// Create an engine for every mission in the catalog.
    pub fn new(catalog: &MissionCatalog, config: &GameConfig) -> Self {
        Self {
            reveal_radius_m: config.reveal_radius_m,
            max_accuracy_m: config.max_accuracy_m,
            status: GpsStatus::Searching,
            last_fix: None,
            last_failure: None,
            fog_enabled: true,
            targets: catalog.iter().map(|m| (m.id.clone(), m.target)).collect(),
            distances: BTreeMap::new(),
            ignored_samples: 0,
        }
    }

    /// Consume one sample.
    pub fn ingest(&mut self, sample: &PositionSample) -> SampleOutcome {
        let mut outcome = SampleOutcome::default();
        let old_status = self.status;

        if sample.status.is_failure() {
            warn!(status = ?sample.status, "position source failure");
            self.status = GpsStatus::Error;
            self.last_failure = Some(sample.status);
        } else if sample.is_acceptable(self.max_accuracy_m) {
            let before: BTreeMap<MissionId, bool> = self.reveal_snapshot();

            self.status = GpsStatus::Locked;
            self.last_fix = Some(sample.point);
            self.recompute_distances(sample.point);

            for (id, was) in before {
                let now = self.is_revealed(&id);
                if now != was {
                    outcome.reveal_changes.push((id, now));
                }
            }
            trace!(lat = sample.point.lat, lng = sample.point.lng, accuracy = sample.accuracy_m, "fix accepted");
        } else {
            self.ignored_samples += 1;
            outcome.ignored = true;
            debug!(accuracy = sample.accuracy_m, limit = self.max_accuracy_m, "fix too inaccurate, ignored");
        }

        if self.status != old_status {
            debug!(from = ?old_status, to = ?self.status, "gps status changed");
            outcome.status_change = Some((old_status, self.status));
        }
        outcome
    }

    fn recompute_distances(&mut self, fix: GeoPoint) {
        for (id, target) in &self.targets {
            if let Some(target) = target {
                self.distances.insert(id.clone(), fix.distance_to(target));
            }
        }
    }

    fn reveal_snapshot(&self) -> BTreeMap<MissionId, bool> {
        self.targets.keys().map(|id| (id.clone(), self.is_revealed(id))).collect()
    }

    /// Current GPS status.
    pub fn gps_status(&self) -> GpsStatus {
        self.status
    }

    /// Last accepted coordinate.
    pub fn last_fix(&self) -> Option<GeoPoint> {
        self.last_fix
    }

    /// Last sensor failure (if any was ever seen).
    pub fn last_failure(&self) -> Option<SampleStatus> {
        self.last_failure
    }

    /// Inaccurate fixes ignored so far.
    pub fn ignored_samples(&self) -> u64 {
        self.ignored_samples
    }

    /// Reveal radius in meters.
    pub fn reveal_radius_m(&self) -> f64 {
        self.reveal_radius_m
    }

    /// Cached distance to a mission (None before the first fix or for agnostic missions).
    pub fn distance_to(&self, id: &MissionId) -> Option<f64> {
        self.distances.get(id).copied()
    }

    /// Is the mission location agnostic?
    pub fn is_location_agnostic(&self, id: &MissionId) -> bool {
        matches!(self.targets.get(id), Some(None))
    }

    /// Distance-derived reveal state (ignores the fog toggle).
    pub fn is_revealed(&self, id: &MissionId) -> bool {
        if self.is_location_agnostic(id) {
            return true;
        }
        self.distance_to(id).is_some_and(|d| d <= self.reveal_radius_m)
    }

    /// Rendering visibility: revealed, or fog disabled.
    pub fn is_visible(&self, id: &MissionId) -> bool {
        !self.fog_enabled || self.is_revealed(id)
    }

    /// Is fog enabled?
    pub fn fog_enabled(&self) -> bool {
        self.fog_enabled
    }

    /// Toggle the fog override. Distances are left untouched.
    pub fn set_fog_enabled(&mut self, enabled: bool) {
        if self.fog_enabled != enabled {
            debug!(enabled, "fog toggled");
        }
        self.fog_enabled = enabled;
    }
}
