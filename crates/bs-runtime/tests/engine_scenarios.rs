use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bs_core::{ExecutionState, ScriptError, ScriptValue};
use bs_runtime::{
    Capability, EngineHandle, EngineOptions, FnCapability, ScriptEngine, ScriptListener,
};
use parking_lot::Mutex;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|event| event.as_str() == name).count()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

impl ScriptListener for Recorder {
    fn on_start(&self, _engine: &EngineHandle) {
        self.push("start");
    }

    fn on_suspend(&self, _engine: &EngineHandle, request: &ScriptValue) {
        self.push(format!("suspend:{}", request));
    }

    fn on_exception(&self, _engine: &EngineHandle, error: &ScriptError) {
        self.push(format!("exception:{}", error.code()));
    }

    fn on_abort(&self, _engine: &EngineHandle) {
        self.push("abort");
    }

    fn on_finish(&self, _engine: &EngineHandle) {
        self.push("finish");
    }
}

fn engine_with(
    source: &str,
    capabilities: &[Arc<dyn Capability>],
    looping: bool,
) -> (Arc<ScriptEngine>, Arc<Recorder>) {
    let engine = ScriptEngine::new(source, capabilities, looping).expect("engine should build");
    let recorder = Arc::new(Recorder::default());
    assert!(engine.add_listener(recorder.clone()));
    (Arc::new(engine), recorder)
}

/// Runs `action` on a helper thread so a worker that never unwinds fails the
/// test instead of hanging it.
fn within_deadline<T: Send + 'static>(action: impl FnOnce() -> T + Send + 'static) -> T {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let _ = sender.send(action());
    });
    receiver
        .recv_timeout(WAIT)
        .expect("engine call should return once the worker unwinds")
}

fn stop_within_deadline(engine: &Arc<ScriptEngine>) -> bool {
    let engine = Arc::clone(engine);
    within_deadline(move || engine.stop())
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn returning_script_finishes_exactly_once() {
    let (engine, recorder) = engine_with("return 1 + 1", &[], false);
    assert_eq!(engine.state(), ExecutionState::Pending);

    engine.start().expect("start");
    assert_eq!(engine.wait_while_running(WAIT), ExecutionState::Stopped);
    assert!(engine.wait_for_exit(WAIT));

    assert_eq!(recorder.events(), vec!["start", "finish"]);
    assert_eq!(engine.completed_runs(), 1);
    assert!(engine.last_error().is_none());
}

#[test]
fn looping_script_keeps_running_until_stopped() {
    let (engine, recorder) = engine_with("local x = 1 + 1", &[], true);
    engine.start().expect("start");

    assert!(wait_until(|| engine.completed_runs() >= 5));
    assert_eq!(engine.state(), ExecutionState::Running);

    assert!(stop_within_deadline(&engine));
    assert_eq!(engine.state(), ExecutionState::Stopped);
    assert_eq!(recorder.count("abort"), 1);
    assert_eq!(recorder.count("finish"), 0);
}

#[test]
fn wait_for_pauses_and_resume_delivers_the_value() {
    let (engine, recorder) = engine_with("local x = waitFor() return x * 2", &[], false);
    engine.start().expect("start");

    assert_eq!(engine.wait_while_running(WAIT), ExecutionState::Paused);
    assert_eq!(engine.pending_request(), Some(ScriptValue::Nil));

    assert!(engine.resume(10.0));
    assert_eq!(engine.wait_while_running(WAIT), ExecutionState::Stopped);
    assert!(engine.wait_for_exit(WAIT));
    assert_eq!(recorder.events(), vec!["start", "suspend:nil", "finish"]);
}

#[test]
fn resumed_value_is_observed_before_the_next_outcome() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let report: Arc<dyn Capability> = Arc::new(FnCapability::new("report").immediate(
        "report",
        move |args| {
            sink.lock().extend(args.iter().cloned());
            Ok(ScriptValue::Nil)
        },
    ));
    let (engine, _recorder) = engine_with(
        "local echoed = waitFor('echo') report(echoed) waitFor('done')",
        &[report],
        false,
    );
    engine.start().expect("start");

    assert_eq!(engine.wait_while_running(WAIT), ExecutionState::Paused);
    assert!(engine.resume(42.0));
    assert!(wait_until(|| engine.pending_request() == Some(ScriptValue::from("done"))));
    assert_eq!(*seen.lock(), vec![ScriptValue::Number(42.0)]);
    assert!(engine.stop());
}

#[test]
fn resume_outside_paused_changes_nothing() {
    let (engine, _recorder) = engine_with("while true do end", &[], false);
    assert!(!engine.resume(1.0));
    assert_eq!(engine.state(), ExecutionState::Pending);

    engine.start().expect("start");
    assert!(!engine.resume(1.0));
    assert_eq!(engine.state(), ExecutionState::Running);
    assert!(engine.pending_request().is_none());

    assert!(stop_within_deadline(&engine));
    assert!(!engine.resume(1.0));
    assert_eq!(engine.state(), ExecutionState::Stopped);
}

#[test]
fn stop_while_running_blocks_until_worker_exits() {
    let (engine, recorder) = engine_with("while true do end", &[], false);
    engine.start().expect("start");
    thread::sleep(Duration::from_millis(20));

    assert!(stop_within_deadline(&engine));
    assert_eq!(engine.state(), ExecutionState::Stopped);
    assert!(engine.wait_for_exit(Duration::ZERO));
    assert_eq!(recorder.events(), vec!["start", "abort"]);
    assert!(!engine.stop());
}

#[test]
fn stop_reaches_loops_hidden_behind_pcall() {
    let (engine, recorder) = engine_with(
        "while true do pcall(function() while true do end end) end",
        &[],
        false,
    );
    engine.start().expect("start");
    thread::sleep(Duration::from_millis(20));

    assert!(stop_within_deadline(&engine));
    assert_eq!(recorder.count("abort"), 1);
    assert_eq!(recorder.count("exception:ENGINE_RUNTIME"), 0);
}

#[test]
fn stop_reaches_loops_after_a_resume() {
    let (engine, recorder) = engine_with("waitFor('go') while true do end", &[], false);
    engine.start().expect("start");
    assert_eq!(engine.wait_while_running(WAIT), ExecutionState::Paused);
    assert!(engine.resume(1.0));
    thread::sleep(Duration::from_millis(20));

    assert!(stop_within_deadline(&engine));
    assert_eq!(recorder.events(), vec!["start", "suspend:go", "abort"]);
}

#[test]
fn raw_coroutine_yield_is_a_runtime_error() {
    let (engine, recorder) = engine_with("coroutine.yield('not a host call') return 1", &[], false);
    engine.start().expect("start");
    assert!(engine.wait_for_exit(WAIT));

    assert_eq!(recorder.events(), vec!["start", "exception:ENGINE_RUNTIME"]);
    assert!(engine.pending_request().is_none());
    assert_eq!(engine.state(), ExecutionState::Stopped);
}

#[test]
fn wait_for_cannot_be_wrapped_in_a_script_coroutine() {
    let (engine, recorder) = engine_with(
        "local co = coroutine.wrap(function() return waitFor('x') end) return co()",
        &[],
        false,
    );
    engine.start().expect("start");
    assert!(engine.wait_for_exit(WAIT));

    assert_eq!(recorder.events(), vec!["start", "exception:ENGINE_RUNTIME"]);
    assert_eq!(recorder.count("suspend:x"), 0);
}

#[test]
fn stop_while_paused_discards_the_continuation() {
    let (engine, recorder) = engine_with("waitFor('tick') error('unreachable')", &[], false);
    engine.start().expect("start");
    assert_eq!(engine.wait_while_running(WAIT), ExecutionState::Paused);

    assert!(engine.stop());
    assert_eq!(engine.state(), ExecutionState::Stopped);
    assert!(engine.pending_request().is_none());
    assert!(!engine.resume(1.0));

    assert!(engine.wait_for_exit(WAIT));
    assert_eq!(recorder.events(), vec!["start", "suspend:tick", "abort"]);
}

#[test]
fn compile_error_is_reported_once_without_start() {
    let (engine, recorder) = engine_with("return return", &[], false);
    engine.start().expect("start");
    assert!(engine.wait_for_exit(WAIT));

    assert_eq!(recorder.events(), vec!["exception:ENGINE_COMPILE"]);
    assert_eq!(engine.state(), ExecutionState::Stopped);
}

#[test]
fn runtime_error_is_reported_through_listener() {
    let (engine, recorder) = engine_with("local x = nil\nreturn x.field", &[], false);
    engine.start().expect("start");
    assert!(engine.wait_for_exit(WAIT));

    assert_eq!(recorder.events(), vec!["start", "exception:ENGINE_RUNTIME"]);
    let error = engine.last_error().expect("error recorded");
    assert!(error.to_string().contains("nil value"));
}

#[test]
fn yielding_capability_parks_with_its_request() {
    let radar: Arc<dyn Capability> = Arc::new(
        FnCapability::new("radar")
            .yielding("scan", |args| Ok(ScriptValue::Array(vec!["scan".into(), args[0].clone()]))),
    );
    let (engine, recorder) = engine_with("return scan(3) + 1", &[radar], false);
    engine.start().expect("start");

    assert_eq!(engine.wait_while_running(WAIT), ExecutionState::Paused);
    assert_eq!(
        engine.pending_request(),
        Some(ScriptValue::Array(vec!["scan".into(), 3.0.into()]))
    );
    assert!(engine.resume(7.0));
    assert_eq!(engine.wait_while_running(WAIT), ExecutionState::Stopped);
    assert!(engine.wait_for_exit(WAIT));
    assert_eq!(recorder.count("finish"), 1);
}

struct AutoResume {
    answers: Mutex<Vec<f64>>,
}

impl ScriptListener for AutoResume {
    fn on_suspend(&self, engine: &EngineHandle, _request: &ScriptValue) {
        if let Some(answer) = self.answers.lock().pop() {
            assert!(engine.resume(answer));
        }
    }
}

#[test]
fn listener_can_resume_from_the_worker_thread() {
    let result = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&result);
    let report: Arc<dyn Capability> = Arc::new(FnCapability::new("report").immediate(
        "report",
        move |args| {
            *sink.lock() = args.first().cloned();
            Ok(ScriptValue::Nil)
        },
    ));
    let (engine, recorder) = engine_with(
        "report(waitFor('a') + waitFor('b'))",
        &[report],
        false,
    );
    assert!(engine.add_listener(Arc::new(AutoResume {
        answers: Mutex::new(vec![2.0, 40.0]),
    })));

    engine.start().expect("start");
    assert!(engine.wait_for_exit(WAIT));
    assert_eq!(*result.lock(), Some(ScriptValue::Number(42.0)));
    assert_eq!(recorder.count("finish"), 1);
}

#[test]
fn start_and_wait_returns_after_the_worker_exits() {
    let (engine, recorder) = engine_with("return waitFor('a') + waitFor('b')", &[], false);
    assert!(engine.add_listener(Arc::new(AutoResume {
        answers: Mutex::new(vec![1.0, 2.0]),
    })));

    let waiting = Arc::clone(&engine);
    within_deadline(move || waiting.start_and_wait()).expect("start");

    assert_eq!(engine.state(), ExecutionState::Stopped);
    assert!(engine.wait_for_exit(Duration::ZERO));
    assert_eq!(
        recorder.events(),
        vec!["start", "suspend:a", "suspend:b", "finish"]
    );
    assert!(engine.start_and_wait().is_err());
}

#[test]
fn duplicate_exports_fail_construction() {
    let left: Arc<dyn Capability> =
        Arc::new(FnCapability::new("left").immediate("beep", |_| Ok(ScriptValue::Nil)));
    let right: Arc<dyn Capability> =
        Arc::new(FnCapability::new("right").immediate("beep", |_| Ok(ScriptValue::Nil)));

    let error = ScriptEngine::new("beep()", &[left, right], false).expect_err("duplicate");
    assert!(matches!(error, ScriptError::DuplicateExport { ref name, .. } if name == "beep"));
}

#[test]
fn options_name_the_engine_and_its_chunk() {
    let options = EngineOptions {
        chunk_name: "patrol".to_string(),
        ..EngineOptions::default()
    };
    let engine = ScriptEngine::with_options("return 1 +", &[], options).expect("engine");
    assert_eq!(engine.name(), "patrol");

    engine.start().expect("start");
    assert!(engine.wait_for_exit(WAIT));
    let error = engine.last_error().expect("compile error");
    assert!(error.to_string().contains("patrol"));
}

#[test]
fn dispose_is_idempotent_and_listeners_are_closed_after_start() {
    let (engine, recorder) = engine_with("waitFor()", &[], false);
    engine.start().expect("start");
    assert!(!engine.add_listener(Arc::new(Recorder::default())));
    assert_eq!(engine.wait_while_running(WAIT), ExecutionState::Paused);

    engine.dispose();
    engine.dispose();
    assert_eq!(engine.state(), ExecutionState::Stopped);
    assert_eq!(recorder.count("abort"), 1);
}

#[test]
fn dropping_a_running_engine_stops_the_worker() {
    let recorder = Arc::new(Recorder::default());
    let listener = Arc::clone(&recorder);
    within_deadline(move || {
        let engine = ScriptEngine::new("while true do end", &[], false).expect("engine");
        engine.add_listener(listener);
        engine.start().expect("start");
        thread::sleep(Duration::from_millis(10));
    });
    assert_eq!(recorder.events(), vec!["start", "abort"]);
}
