//! Waypoint navigator
//!
//! Tracks a cursor into the mission and turns the active leg into a
//! [`ControlReference`]:
//!
//! - The leg runs from the previous waypoint (or the position at the first
//!   update) to the active waypoint.
//! - The carrot sits `lookahead` metres past the along-track projection of
//!   the vehicle, capped at the waypoint.
//! - The commanded velocity points at the carrot, at the waypoint's speed
//!   constraint or the cruise speed, never above the envelope limit, and
//!   tapers inside `slowdown_radius`.
//!
//! The cursor only moves forward. Past the last waypoint, or with an empty
//! mission, the navigator latches a position hold.

use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::geo::GeoOrigin;
use super::waypoint::{Mission, Waypoint};
use crate::config::FlightConfig;
use crate::control::ControlReference;
use crate::estimation::StateEstimate;
use crate::math::heading_of;
use crate::Vec3;

/// Fraction of the leg speed kept at the edge of the acceptance radius
const MIN_APPROACH_FRACTION: f64 = 0.2;

/// Navigator result for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavigatorOutput {
    pub reference: ControlReference,
    /// Index of the active waypoint; equals the mission length when complete
    pub cursor: usize,
    /// Every waypoint of a non-empty mission has been reached
    pub mission_complete: bool,
    /// Distance to the active waypoint [m], zero when holding
    pub distance: f64,
}

/// Waypoint navigator
#[derive(Debug, Clone)]
pub struct WaypointNavigator {
    config: Arc<FlightConfig>,
    origin: GeoOrigin,
    cursor: usize,
    segment_start: Option<Vec3>,
    hold: Option<ControlReference>,
    heading: Option<f64>,
}

impl WaypointNavigator {
    pub fn new(config: Arc<FlightConfig>, origin: GeoOrigin) -> Self {
        Self {
            config,
            origin,
            cursor: 0,
            segment_start: None,
            hold: None,
            heading: None,
        }
    }

    /// Start a new mission from its first waypoint
    pub fn load(&mut self, mission: &Mission) {
        self.reset();
        info!("mission loaded with {} waypoints", mission.len());
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn origin(&self) -> &GeoOrigin {
        &self.origin
    }

    /// Local ENU position of a waypoint
    pub fn waypoint_position(&self, waypoint: &Waypoint) -> Vec3 {
        let mut position = self.origin.to_enu(waypoint.latitude, waypoint.longitude, 0.0);
        position.z = waypoint.altitude;
        position
    }

    pub fn update(&mut self, mission: &Mission, estimate: &StateEstimate) -> NavigatorOutput {
        let nav = &self.config.navigation;
        let position = estimate.position;
        let (_, _, yaw) = estimate.euler();

        while let Some(waypoint) = mission.get(self.cursor) {
            let target = self.waypoint_position(waypoint);
            if (target - position).norm() > nav.acceptance_radius {
                break;
            }
            debug!("waypoint {} reached at {:?}", self.cursor, target);
            self.segment_start = Some(target);
            self.cursor += 1;
        }

        let Some(waypoint) = mission.get(self.cursor) else {
            return self.hold_output(mission, position, yaw);
        };
        // A waypoint appended after completion resumes navigation
        self.hold = None;

        let target = self.waypoint_position(waypoint);
        let start = *self.segment_start.get_or_insert(position);

        let leg = target - start;
        let length = leg.norm();
        let carrot = if length > f64::EPSILON {
            let direction = leg / length;
            let along = (position - start).dot(&direction).clamp(0.0, length);
            start + direction * (along + nav.lookahead).min(length)
        } else {
            target
        };

        let distance = (target - position).norm();
        let mut speed = waypoint
            .speed
            .unwrap_or(nav.cruise_speed)
            .min(self.config.envelope.max_speed);
        if distance < nav.slowdown_radius {
            speed *= (distance / nav.slowdown_radius).clamp(MIN_APPROACH_FRACTION, 1.0);
        }

        let to_carrot = carrot - position;
        let velocity = if to_carrot.norm() > f64::EPSILON {
            to_carrot.normalize() * speed
        } else {
            Vec3::zeros()
        };

        // Keep the last heading while directly above or below the waypoint
        let horizontal = (target - position).xy();
        let heading = if horizontal.norm() > nav.acceptance_radius {
            heading_of(&horizontal)
        } else {
            self.heading.unwrap_or(yaw)
        };
        self.heading = Some(heading);

        NavigatorOutput {
            reference: ControlReference::velocity(carrot, velocity, heading),
            cursor: self.cursor,
            mission_complete: false,
            distance,
        }
    }

    fn hold_output(&mut self, mission: &Mission, position: Vec3, yaw: f64) -> NavigatorOutput {
        let heading = self.heading.unwrap_or(yaw);
        let last = mission.waypoints().last().map(|w| self.waypoint_position(w));
        let reference = *self.hold.get_or_insert_with(|| match last {
            Some(target) => {
                info!("mission complete, holding at {:?}", target);
                ControlReference::hold(target, heading)
            }
            None => ControlReference::hold(position, heading),
        });

        NavigatorOutput {
            reference,
            cursor: self.cursor,
            mission_complete: !mission.is_empty(),
            distance: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.segment_start = None;
        self.hold = None;
        self.heading = None;
    }
}
