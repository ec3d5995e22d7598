use std::collections::BTreeMap;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use bs_core::{HostCallError, ScriptValue};
use bs_runtime::{Capability, HostExport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::controller::Event;

const PRECISION: f64 = 1e9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Pose {
    pub(crate) x: f64,
    pub(crate) y: f64,
    /// Degrees counter-clockwise from the x axis, in `[0, 360)`.
    pub(crate) heading: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum MotorCommand {
    Move(f64),
    Turn(f64),
}

/// A point robot on a plane. Motor commands are queued by the script and
/// applied by the controller when it answers the matching suspension.
#[derive(Debug, Default)]
pub(crate) struct RobotSim {
    pose: Pose,
    commanded: Option<MotorCommand>,
    odometer: f64,
}

impl RobotSim {
    pub(crate) fn new(start: Pose) -> Self {
        Self {
            pose: Pose {
                heading: start.heading.rem_euclid(360.0),
                ..start
            },
            ..Self::default()
        }
    }

    pub(crate) fn pose(&self) -> Pose {
        self.pose
    }

    pub(crate) fn odometer(&self) -> f64 {
        self.odometer
    }

    pub(crate) fn command(&mut self, command: MotorCommand) {
        self.commanded = Some(command);
    }

    pub(crate) fn apply_commanded(&mut self) -> Option<MotorCommand> {
        let command = self.commanded.take()?;
        match command {
            MotorCommand::Move(distance) => {
                let radians = self.pose.heading.to_radians();
                self.pose.x = settle(self.pose.x + distance * radians.cos());
                self.pose.y = settle(self.pose.y + distance * radians.sin());
                self.odometer += distance.abs();
            }
            MotorCommand::Turn(degrees) => {
                self.pose.heading = settle((self.pose.heading + degrees).rem_euclid(360.0));
                if self.pose.heading >= 360.0 {
                    self.pose.heading = 0.0;
                }
            }
        }
        debug!(?command, x = self.pose.x, y = self.pose.y, heading = self.pose.heading, "motor command applied");
        Some(command)
    }
}

fn settle(value: f64) -> f64 {
    (value * PRECISION).round() / PRECISION + 0.0
}

fn number_arg(export: &str, args: &[ScriptValue]) -> Result<f64, HostCallError> {
    match args.first().and_then(ScriptValue::as_number) {
        Some(value) if value.is_finite() => Ok(value),
        _ => Err(HostCallError::new(format!(
            "{} expects a finite number",
            export
        ))),
    }
}

/// Exposes the simulated drive train as `motorMove`, `motorTurn`, `position` and `heading`.
pub(crate) struct MotorCapability {
    robot: Arc<Mutex<RobotSim>>,
}

impl MotorCapability {
    pub(crate) fn new(robot: Arc<Mutex<RobotSim>>) -> Self {
        Self { robot }
    }
}

impl Capability for MotorCapability {
    fn name(&self) -> &str {
        "motor"
    }

    fn exports(&self) -> Vec<HostExport> {
        ["motorMove", "motorTurn", "position", "heading"]
            .into_iter()
            .map(HostExport::immediate)
            .collect()
    }

    fn call(&self, export: &str, args: &[ScriptValue]) -> Result<ScriptValue, HostCallError> {
        match export {
            "motorMove" => {
                let distance = number_arg(export, args)?;
                self.robot.lock().command(MotorCommand::Move(distance));
                Ok(ScriptValue::Nil)
            }
            "motorTurn" => {
                let degrees = number_arg(export, args)?;
                self.robot.lock().command(MotorCommand::Turn(degrees));
                Ok(ScriptValue::Nil)
            }
            "position" => {
                let pose = self.robot.lock().pose();
                Ok(ScriptValue::Map(BTreeMap::from([
                    ("x".to_string(), ScriptValue::Number(pose.x)),
                    ("y".to_string(), ScriptValue::Number(pose.y)),
                ])))
            }
            "heading" => Ok(ScriptValue::Number(self.robot.lock().pose().heading)),
            other => Err(HostCallError::new(format!(
                "capability \"motor\" has no export \"{}\"",
                other
            ))),
        }
    }
}

/// Replaces the script's `print` with one that reports to the controller.
pub(crate) struct LogCapability {
    events: Sender<Event>,
}

impl LogCapability {
    pub(crate) fn new(events: Sender<Event>) -> Self {
        Self { events }
    }
}

impl Capability for LogCapability {
    fn name(&self) -> &str {
        "log"
    }

    fn exports(&self) -> Vec<HostExport> {
        vec![HostExport::immediate("print")]
    }

    fn call(&self, export: &str, args: &[ScriptValue]) -> Result<ScriptValue, HostCallError> {
        if export != "print" {
            return Err(HostCallError::new(format!(
                "capability \"log\" has no export \"{}\"",
                export
            )));
        }
        let line = args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        if self.events.send(Event::Log(line)).is_err() {
            debug!("log line dropped; controller is gone");
        }
        Ok(ScriptValue::Nil)
    }
}
