//! Configuration and mission files
//!
//! Both are JSON. A configuration is parsed strictly (unknown or missing
//! fields are errors) and validated before it is returned, so nothing
//! downstream ever sees an out-of-bounds parameter.
//!
//! Mission file format:
//!
//! ```json
//! { "waypoints": [ { "latitude": 47.3977, "longitude": 8.5456, "altitude": 10.0, "speed": 2.0 } ] }
//! ```

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use skyloop_core::navigation::{Mission, Waypoint};
use skyloop_core::FlightConfig;

use crate::error::RuntimeError;

/// On-disk mission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MissionFile {
    pub waypoints: Vec<Waypoint>,
}

/// Parse and validate a configuration
pub fn parse_config(text: &str) -> Result<FlightConfig, RuntimeError> {
    let config: FlightConfig = serde_json::from_str(text)?;
    config.validate()?;
    Ok(config)
}

/// Parse a mission against the configured altitude envelope
pub fn parse_mission(text: &str, config: &FlightConfig) -> Result<Mission, RuntimeError> {
    let file: MissionFile = serde_json::from_str(text)?;
    Ok(Mission::with_waypoints(config.envelope.max_altitude, file.waypoints)?)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<FlightConfig, RuntimeError> {
    let path = path.as_ref();
    let config = parse_config(&read(path)?)?;
    info!(
        "configuration loaded from {}: {:?} frame at {} Hz",
        path.display(),
        config.mixer.frame,
        config.loop_rate_hz
    );
    Ok(config)
}

pub fn load_mission(path: impl AsRef<Path>, config: &FlightConfig) -> Result<Mission, RuntimeError> {
    let path = path.as_ref();
    let mission = parse_mission(&read(path)?, config)?;
    info!("mission loaded from {}: {} waypoints", path.display(), mission.len());
    Ok(mission)
}

fn read(path: &Path) -> Result<String, RuntimeError> {
    fs::read_to_string(path).map_err(|source| RuntimeError::Read {
        path: path.to_path_buf(),
        source,
    })
}
