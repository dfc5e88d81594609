//! Track locator executable entry point.
//!
//! # Architecture
//!
//! Two loops run on their own threads:
//!
//!     - The navigation loop (main thread) drives the stage machine. Up to the dune crossing it
//!       measures each sensor frame itself, afterwards it measures the images of the vision
//!       collaborator.
//!     - The acquisition loop is idle until the dune crossing, then keeps the ground estimate
//!       up to date and publishes the alignment of every frame to the navigation loop.
//!
//! Operator commands (`advance <stage>`, `stop`) are read from stdin.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fs,
    io::{self, BufRead},
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread,
};

use color_eyre::{eyre::WrapErr, Report};
use log::{info, warn};
use structopt::StructOpt;

use comms_if::{
    eqpt::{
        sensor::ReplaySensor,
        viewer::NullViewer,
        vision::{NullVision, ScriptedFrame, ScriptedVision, Vision},
    },
    nav::SideMode,
};
use loc_lib::{
    acq::{self, Acquisition},
    ground::GroundTracker,
    locator::{Locator, OperatorCmd},
    nav::Stage,
    params::LocParams,
    sync::Shared,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "loc_exec", about = "Depth camera track locator")]
struct Opt {
    /// Side of the course the vehicle runs on (left or right)
    #[structopt(short, long, default_value = "left")]
    side: SideMode,

    /// Directory of JSON point clouds to replay
    #[structopt(short, long, parse(from_os_str))]
    replay: PathBuf,

    /// Restart the replay from the first frame once it ends
    #[structopt(long = "loop")]
    looping: bool,

    /// JSON list of scripted detections to stand in for the image processing
    #[structopt(long, parse(from_os_str))]
    vision: Option<PathBuf>,

    /// Stage to start from, by name or index
    #[structopt(long, default_value = "0")]
    stage: Stage,

    /// Minimum log level (info, debug or trace)
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("loc_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(opt.log_level, &session).wrap_err("Failed to initialise logging")?;

    info!("Track Locator Executable\n");
    info!("Running on: {}", host::describe());
    info!("Session directory: {:?}\n", session.session_root);
    info!("Side: {}, starting stage: {}", opt.side, opt.stage);

    // ---- LOAD PARAMETERS ----

    let params = LocParams::load().wrap_err("Could not load the locator parameters")?;
    session.save("params.json", params.clone());

    info!("Exec parameters loaded");

    // ---- INITIALISE COLLABORATORS ----

    let mut sensor = ReplaySensor::from_dir(&opt.replay)
        .wrap_err("Failed to open the replay directory")?
        .looping(opt.looping);

    let vision: Box<dyn Vision> = match &opt.vision {
        Some(path) => {
            let s = fs::read_to_string(path).wrap_err("Could not read the vision script")?;
            let frames: Vec<ScriptedFrame> =
                serde_json::from_str(&s).wrap_err("Could not parse the vision script")?;
            info!("Loaded {} scripted vision frames", frames.len());
            Box::new(ScriptedVision::new(frames))
        }
        None => {
            warn!("No vision script given, the vision stages will abort every frame");
            Box::new(NullVision::default())
        }
    };

    // ---- GROUND CALIBRATION ----

    let tracker = GroundTracker::calibrate(&mut sensor, params.ground.clone())
        .wrap_err("Ground calibration failed")?;

    // ---- START LOOPS ----

    let sensor = Arc::new(Mutex::new(sensor));
    let shared = Arc::new(Shared::new(opt.stage, params.acq.single_shot));

    let acq_jh = acq::spawn(Acquisition::new(
        sensor.clone(),
        shared.clone(),
        opt.side,
        params.per.bias_angle_deg,
        &params.per.preproc,
        &params.acq,
    ))
    .wrap_err("Failed to start the acquisition loop")?;

    let (op_tx, op_rx) = mpsc::channel();
    thread::Builder::new()
        .name("loc::operator".into())
        .spawn(move || read_operator(op_tx))
        .wrap_err("Failed to start the operator input thread")?;

    let mut locator = Locator::new(
        &params,
        opt.side,
        sensor,
        shared,
        vision,
        NullViewer,
        tracker,
    )
    .starting_at(opt.stage)
    .with_operator(op_rx);

    info!("Initialisation complete, entering navigation loop\n");

    let summary = locator.run().wrap_err("Navigation loop failed")?;
    session.save("summary.json", summary);

    // ---- SHUTDOWN ----

    match acq_jh.join() {
        Ok(Ok(stats)) => info!("Acquisition loop: {:?}", stats),
        Ok(Err(e)) => warn!("Acquisition loop failed: {}", e),
        Err(_) => warn!("Acquisition thread panicked"),
    }

    info!("End of execution");
    session.exit();

    Ok(())
}

/// Forward the operator's commands from stdin until it closes.
fn read_operator(tx: mpsc::Sender<OperatorCmd>) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("Could not read operator input: {}", e);
                return;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match line.parse() {
            Ok(cmd) => {
                if tx.send(cmd).is_err() {
                    return;
                }
            }
            Err(e) => warn!("{}", e),
        }
    }
}
