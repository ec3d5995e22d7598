use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bs_api::{create_engine_from_loader, CreateEngineFromLoaderOptions};
use bs_core::{ScriptError, ScriptValue};
use bs_runtime::{Capability, EngineHandle, ScriptEngine, ScriptListener};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::robot::{LogCapability, MotorCapability, MotorCommand, Pose, RobotSim};
use crate::source_loader::ScriptRef;
use crate::CliError;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Everything the worker thread reports back to the controller.
#[derive(Debug)]
pub(crate) enum Event {
    Started,
    Log(String),
    Suspended(ScriptValue),
    Finished,
    Aborted,
    Failed(ScriptError),
}

struct ChannelListener {
    events: Sender<Event>,
}

impl ChannelListener {
    fn send(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("event dropped; controller is gone");
        }
    }
}

impl ScriptListener for ChannelListener {
    fn on_start(&self, _engine: &EngineHandle) {
        self.send(Event::Started);
    }

    fn on_suspend(&self, _engine: &EngineHandle, request: &ScriptValue) {
        self.send(Event::Suspended(request.clone()));
    }

    fn on_exception(&self, _engine: &EngineHandle, error: &ScriptError) {
        self.send(Event::Failed(error.clone()));
    }

    fn on_abort(&self, _engine: &EngineHandle) {
        self.send(Event::Aborted);
    }

    fn on_finish(&self, _engine: &EngineHandle) {
        self.send(Event::Finished);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunReport {
    pub(crate) script: String,
    pub(crate) lines: Vec<String>,
    pub(crate) runs: u64,
    pub(crate) pose: Pose,
}

/// Runs `script` against a fresh simulated robot until it finishes, fails,
/// is stopped after `max_runs` or times out.
pub(crate) fn run_controller(script: &ScriptRef, config: &RunConfig) -> Result<RunReport, CliError> {
    let (sender, events) = mpsc::channel();
    let robot = Arc::new(Mutex::new(RobotSim::new(config.start)));
    let capabilities: Vec<Arc<dyn Capability>> = vec![
        Arc::new(MotorCapability::new(Arc::clone(&robot))),
        Arc::new(LogCapability::new(sender.clone())),
    ];

    let engine = create_engine_from_loader(CreateEngineFromLoaderOptions {
        loader: script.loader.clone(),
        script: script.name.clone(),
        capabilities,
        listeners: vec![Arc::new(ChannelListener { events: sender })],
        engine: config.engine.clone(),
    })?;
    info!(script = %script.name, looping = config.engine.looping, "script started");

    let deadline = Instant::now() + Duration::from_millis(config.timeout_ms);
    let mut lines = Vec::new();
    let mut ticks = 0_u64;

    loop {
        stop_after_max_runs(&engine, config);

        let now = Instant::now();
        if now >= deadline {
            engine.stop();
            return Err(CliError::new(
                "CLI_RUN_TIMEOUT",
                format!("script did not finish within {} ms", config.timeout_ms),
            ));
        }

        match events.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
            Ok(Event::Started) => lines.push("EVENT:START".to_string()),
            Ok(Event::Log(line)) => lines.push(format!(
                "LOG_JSON:{}",
                serde_json::to_string(&line).unwrap_or_else(|_| "\"\"".to_string())
            )),
            Ok(Event::Suspended(request)) => {
                lines.push(format!("EVENT:SUSPEND:{}", request));
                if stop_after_max_runs(&engine, config) {
                    continue;
                }
                if config.tick_ms > 0 {
                    thread::sleep(Duration::from_millis(config.tick_ms));
                }
                ticks += 1;
                let answer = answer_request(&request, &robot, ticks);
                if !engine.resume(answer) {
                    debug!("resume refused; engine is no longer paused");
                }
            }
            Ok(Event::Finished) => {
                lines.push("EVENT:FINISH".to_string());
                break;
            }
            Ok(Event::Aborted) => {
                lines.push("EVENT:ABORT".to_string());
                break;
            }
            Ok(Event::Failed(error)) => return Err(error.into()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::new(
                    "CLI_RUN_DISCONNECTED",
                    "script worker exited without a terminal event",
                ))
            }
        }
    }

    let runs = engine.completed_runs();
    engine.dispose();
    let pose = robot.lock().pose();
    Ok(RunReport {
        script: script.name.clone(),
        lines,
        runs,
        pose,
    })
}

fn stop_after_max_runs(engine: &ScriptEngine, config: &RunConfig) -> bool {
    if !config.reached_max_runs(engine.completed_runs()) {
        return false;
    }
    if engine.stop() {
        info!(runs = engine.completed_runs(), "looping script stopped after max runs");
    }
    true
}

/// `move`/`turn` requests settle the queued motor command; anything else is
/// answered with the current tick.
pub(crate) fn answer_request(request: &ScriptValue, robot: &Mutex<RobotSim>, tick: u64) -> ScriptValue {
    let is_motion = matches!(
        request.as_array(),
        Some([kind, _]) if matches!(kind.as_str(), Some("move" | "turn"))
    );
    if !is_motion {
        return ScriptValue::Number(tick as f64);
    }

    let mut robot = robot.lock();
    match robot.apply_commanded() {
        Some(MotorCommand::Move(distance)) => ScriptValue::Number(distance),
        Some(MotorCommand::Turn(_)) => ScriptValue::Number(robot.pose().heading),
        None => ScriptValue::Nil,
    }
}

pub(crate) fn emit_report(report: &RunReport) {
    println!("RESULT:OK");
    println!("SCRIPT:{}", report.script);
    for line in &report.lines {
        println!("{}", line);
    }
    println!("RUNS:{}", report.runs);
    println!(
        "POSITION_JSON:{}",
        serde_json::to_string(&report.pose).unwrap_or_else(|_| "{}".to_string())
    );
}
