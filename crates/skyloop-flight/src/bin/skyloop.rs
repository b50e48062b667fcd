//! Simulated flight with the skyloop flight loop.
//!
//! Loads and validates a flight configuration, loads an optional mission,
//! calibrates the IMU on the ground, arms, and flies the simulated vehicle
//! until it disarms or the time limit is reached. The run summary is
//! printed as JSON on stdout.
//!
//! Usage:
//!   skyloop <config.json> [mission.json] [OPTIONS]
//!
//! Options:
//!   --sim <sim.json>         Simulated vehicle and sensors (default: built in)
//!   --telemetry <out.jsonl>  Record telemetry as JSON lines
//!   --duration <s>           Time limit for the flight (default: 120)
//!   --dropout-at <s>         Cut the sensors this long after arming
//!   --noiseless              Perfect sensors
//!   --realtime               Run against the wall clock with a sensor thread

use std::env;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::{self, ExitCode};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use skyloop_core::estimation::CalibrationLimits;
use skyloop_core::navigation::Mission;
use skyloop_core::supervisor::MissionState;
use skyloop_core::FlightConfig;
use skyloop_flight::sim::{SimConfig, SimWorld, Simulation};
use skyloop_flight::{
    load_config, load_mission, ChannelTelemetry, Clock, FlightLoop, MonotonicClock, RunSummary, RuntimeError, SensorHub,
    SensorProducer, TelemetryRecorder,
};

/// Undelivered telemetry events held before dropping
const TELEMETRY_CAPACITY: usize = 4096;

/// Longest wait for a usable estimate before arming [s]
const SETTLE_TIMEOUT: f64 = 5.0;

struct Args {
    config: PathBuf,
    mission: Option<PathBuf>,
    sim: Option<PathBuf>,
    telemetry: Option<PathBuf>,
    duration: f64,
    dropout_at: Option<f64>,
    noiseless: bool,
    realtime: bool,
}

fn parse_args() -> Args {
    let raw: Vec<String> = env::args().collect();
    let mut positional = Vec::new();
    let mut args = Args {
        config: PathBuf::new(),
        mission: None,
        sim: None,
        telemetry: None,
        duration: 120.0,
        dropout_at: None,
        noiseless: false,
        realtime: false,
    };

    let mut i = 1;
    while i < raw.len() {
        match raw[i].as_str() {
            "--sim" => {
                i += 1;
                args.sim = Some(PathBuf::from(value_arg(&raw, i, "sim")));
            }
            "--telemetry" => {
                i += 1;
                args.telemetry = Some(PathBuf::from(value_arg(&raw, i, "telemetry")));
            }
            "--duration" => {
                i += 1;
                args.duration = parse_seconds(&raw, i, "duration");
            }
            "--dropout-at" => {
                i += 1;
                args.dropout_at = Some(parse_seconds(&raw, i, "dropout-at"));
            }
            "--noiseless" => args.noiseless = true,
            "--realtime" => args.realtime = true,
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown option: {other}");
                print_usage();
                process::exit(1);
            }
            other => positional.push(PathBuf::from(other)),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    match positional.next() {
        Some(config) => args.config = config,
        None => {
            eprintln!("Error: a configuration file is required");
            print_usage();
            process::exit(1);
        }
    }
    args.mission = positional.next();
    if positional.next().is_some() {
        eprintln!("Error: too many arguments");
        print_usage();
        process::exit(1);
    }
    args
}

fn value_arg<'a>(raw: &'a [String], i: usize, name: &str) -> &'a str {
    raw.get(i).map(String::as_str).unwrap_or_else(|| {
        eprintln!("Error: --{name} requires a value");
        process::exit(1);
    })
}

fn parse_seconds(raw: &[String], i: usize, name: &str) -> f64 {
    match value_arg(raw, i, name).parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => value,
        _ => {
            eprintln!("Error: invalid value for --{name}");
            process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!(
        "Usage: skyloop <config.json> [mission.json] [OPTIONS]\n\
         \n\
         Options:\n\
         \x20 --sim <sim.json>         Simulated vehicle and sensors (default: built in)\n\
         \x20 --telemetry <out.jsonl>  Record telemetry as JSON lines\n\
         \x20 --duration <s>           Time limit for the flight (default: 120)\n\
         \x20 --dropout-at <s>         Cut the sensors this long after arming\n\
         \x20 --noiseless              Perfect sensors\n\
         \x20 --realtime               Run against the wall clock with a sensor thread\n\
         \x20 -h, --help               Show this help"
    );
}

fn load_sim_config(args: &Args) -> Result<SimConfig, RuntimeError> {
    let mut sim = match &args.sim {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| RuntimeError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&text)?
        }
        None => SimConfig::default(),
    };
    if args.noiseless {
        sim.sensors = SimConfig::noiseless().sensors;
    }
    sim.validate()?;
    Ok(sim)
}

/// Telemetry channel and the recorder draining it
fn start_telemetry(path: Option<&PathBuf>) -> Result<(ChannelTelemetry, TelemetryRecorder), RuntimeError> {
    let (sink, rx) = ChannelTelemetry::bounded(TELEMETRY_CAPACITY);
    let recorder = match path {
        Some(path) => {
            info!("recording telemetry to {}", path.display());
            TelemetryRecorder::spawn(rx, File::create(path)?)
        }
        None => TelemetryRecorder::spawn(rx, io::sink()),
    };
    Ok((sink, recorder))
}

fn fly_lockstep(
    config: Arc<FlightConfig>,
    sim_config: &SimConfig,
    mission: Mission,
    args: &Args,
    telemetry: ChannelTelemetry,
) -> Result<RunSummary, RuntimeError> {
    let mut sim = Simulation::new(config, sim_config, telemetry)?;
    let world = sim.world().clone();

    sim.calibrate(CalibrationLimits::default())?;
    sim.arm_with(mission, SETTLE_TIMEOUT)?;

    let start = sim.time();
    let outcome = sim.run_until(args.duration, |report| {
        if args.dropout_at.is_some_and(|t| report.time - start >= t) {
            world.set_sensor_dropout(true);
        }
        report.state == MissionState::Disarmed
    });
    if outcome.is_none() {
        warn!("time limit of {:.1} s reached in {}", args.duration, sim.flight().state());
    }
    Ok(sim.summarize())
}

fn fly_realtime(
    config: Arc<FlightConfig>,
    sim_config: &SimConfig,
    mission: Mission,
    args: &Args,
    telemetry: ChannelTelemetry,
) -> Result<RunSummary, RuntimeError> {
    let clock = Arc::new(MonotonicClock::new());
    let world = SimWorld::new(sim_config, &config.mixer.frame)?;
    let hub = Arc::new(SensorHub::new());
    let period = Duration::from_secs_f64(config.loop_period());

    let producer = SensorProducer::spawn(world.sensor(Arc::clone(&clock)), Arc::clone(&hub), period)?;
    let mut flight = FlightLoop::new(config, hub, world.actuator(), Arc::clone(&clock), telemetry)?;

    flight.start_calibration(CalibrationLimits::default())?;
    let mut calibration = None;
    let calibration_end = clock.now() + SETTLE_TIMEOUT;
    flight.run(|report| {
        calibration = report.calibration.clone();
        calibration.is_none() && report.time < calibration_end
    });
    match calibration {
        Some(result) => {
            result?;
        }
        None => warn!("IMU calibration did not finish, flying uncalibrated"),
    }

    let settle_end = clock.now() + SETTLE_TIMEOUT;
    flight.run(|report| !(report.status.is_ok() && report.estimate.valid) && report.time < settle_end);
    flight.load_mission(mission)?;
    flight.arm()?;

    let start = clock.now();
    let end = start + args.duration;
    let summary = flight.run(|report| {
        if args.dropout_at.is_some_and(|t| report.time - start >= t) {
            world.set_sensor_dropout(true);
        }
        report.state != MissionState::Disarmed && report.time < end
    });

    let published = producer.stop()?;
    info!("sensor thread published {published} samples");
    Ok(summary)
}

fn run(args: &Args) -> Result<RunSummary, RuntimeError> {
    // Fatal before anything is armed
    let config = Arc::new(load_config(&args.config)?);
    let mission = match &args.mission {
        Some(path) => load_mission(path, &config)?,
        None => {
            info!("no mission given, taking off and holding");
            Mission::new(config.envelope.max_altitude)
        }
    };
    let sim_config = load_sim_config(args)?;

    let (telemetry, recorder) = start_telemetry(args.telemetry.as_ref())?;
    let summary = if args.realtime {
        fly_realtime(config, &sim_config, mission, args, telemetry)?
    } else {
        fly_lockstep(config, &sim_config, mission, args, telemetry)?
    };

    let written = recorder.join()?;
    info!("{written} telemetry events recorded, {} dropped", summary.telemetry_dropped);
    Ok(summary)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args();

    match run(&args) {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(err) => error!("cannot print summary: {err}"),
            }
            if summary.final_state == Some(MissionState::Disarmed) {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
