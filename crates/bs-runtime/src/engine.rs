use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use bs_core::{ExecutionState, ScriptError, ScriptValue};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::context::{AbortHandle, CompiledProgram, Continuation, ExecutionContext, Outcome};
use crate::continuation::ContinuationStore;
use crate::listener::ScriptListener;
use crate::options::EngineOptions;
use crate::registry::{Capability, HostFunctionTable};

/// Everything both actors touch, guarded by one lock.
struct Control {
    state: ExecutionState,
    store: ContinuationStore<Continuation>,
    looping: bool,
    abort: AbortHandle,
    completed_runs: u64,
    last_error: Option<ScriptError>,
    worker: Option<ThreadId>,
    worker_exited: bool,
}

struct Shared {
    name: String,
    control: Mutex<Control>,
    changed: Condvar,
}

impl Shared {
    fn transition(&self, control: &mut Control, state: ExecutionState) {
        if control.state != state {
            debug!(engine = %self.name, from = %control.state, to = %state, "state transition");
            control.state = state;
        }
        self.changed.notify_all();
    }

    fn resume(&self, value: ScriptValue) -> bool {
        let mut control = self.control.lock();
        if control.state != ExecutionState::Paused {
            return false;
        }
        if let Err(error) = control.store.set_pending(value) {
            warn!(engine = %self.name, error = %error, "paused engine has no continuation");
            return false;
        }
        self.transition(&mut control, ExecutionState::Running);
        true
    }

    fn state(&self) -> ExecutionState {
        self.control.lock().state
    }

    fn pending_request(&self) -> Option<ScriptValue> {
        self.control
            .lock()
            .store
            .peek()
            .map(|continuation| continuation.request().clone())
    }

    fn completed_runs(&self) -> u64 {
        self.control.lock().completed_runs
    }
}

/// A view of a running engine handed to listeners.
///
/// It can resume but not stop: a stop issued from the worker thread could
/// never wait for that same thread to exit.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ExecutionState {
        self.shared.state()
    }

    pub fn pending_request(&self) -> Option<ScriptValue> {
        self.shared.pending_request()
    }

    pub fn completed_runs(&self) -> u64 {
        self.shared.completed_runs()
    }

    pub fn resume(&self, value: impl Into<ScriptValue>) -> bool {
        self.shared.resume(value.into())
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

struct WorkerSetup {
    source: String,
    table: HostFunctionTable,
    listeners: Vec<Arc<dyn ScriptListener>>,
    options: EngineOptions,
}

/// Runs one script on a dedicated worker thread.
///
/// The controller drives it with [`start`](Self::start),
/// [`resume`](Self::resume), [`stop`](Self::stop) and
/// [`dispose`](Self::dispose) from any thread; listeners observe transitions
/// from the worker thread.
pub struct ScriptEngine {
    shared: Arc<Shared>,
    setup: Mutex<Option<WorkerSetup>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScriptEngine {
    pub fn new(
        source: impl Into<String>,
        capabilities: &[Arc<dyn Capability>],
        looping: bool,
    ) -> Result<Self, ScriptError> {
        Self::with_options(source, capabilities, EngineOptions::looping(looping))
    }

    pub fn with_options(
        source: impl Into<String>,
        capabilities: &[Arc<dyn Capability>],
        options: EngineOptions,
    ) -> Result<Self, ScriptError> {
        let table = HostFunctionTable::build(capabilities)?;
        let shared = Arc::new(Shared {
            name: options.chunk_name.clone(),
            control: Mutex::new(Control {
                state: ExecutionState::Pending,
                store: ContinuationStore::new(),
                looping: options.looping,
                abort: AbortHandle::new(),
                completed_runs: 0,
                last_error: None,
                worker: None,
                worker_exited: false,
            }),
            changed: Condvar::new(),
        });

        Ok(Self {
            shared,
            setup: Mutex::new(Some(WorkerSetup {
                source: source.into(),
                table,
                listeners: Vec::new(),
                options,
            })),
            worker: Mutex::new(None),
        })
    }

    /// Attaches a listener; only possible before `start`.
    pub fn add_listener(&self, listener: Arc<dyn ScriptListener>) -> bool {
        match self.setup.lock().as_mut() {
            Some(setup) => {
                setup.listeners.push(listener);
                true
            }
            None => false,
        }
    }

    pub fn start(&self) -> Result<(), ScriptError> {
        let mut control = self.shared.control.lock();
        if control.state != ExecutionState::Pending {
            return Err(ScriptError::InvalidState {
                operation: "start",
                state: control.state,
            });
        }
        let Some(setup) = self.setup.lock().take() else {
            return Err(ScriptError::InvalidState {
                operation: "start",
                state: control.state,
            });
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(setup.options.thread_name.clone())
            .spawn(move || run_worker(shared, setup));

        match spawned {
            Ok(handle) => {
                control.worker = Some(handle.thread().id());
                self.shared.transition(&mut control, ExecutionState::Running);
                *self.worker.lock() = Some(handle);
                info!(engine = %self.shared.name, "script engine started");
                Ok(())
            }
            Err(error) => {
                self.shared.transition(&mut control, ExecutionState::Stopped);
                Err(ScriptError::context(format!(
                    "failed to spawn worker thread: {}",
                    error
                )))
            }
        }
    }

    /// Starts the engine and blocks until its worker thread has exited.
    ///
    /// A script that parks only comes back if a listener resumes it.
    pub fn start_and_wait(&self) -> Result<(), ScriptError> {
        self.start()?;
        self.reap_worker();
        Ok(())
    }

    /// Hands `value` to the parked script. Fails without side effects unless paused.
    pub fn resume(&self, value: impl Into<ScriptValue>) -> bool {
        self.shared.resume(value.into())
    }

    /// Stops a running or paused engine.
    ///
    /// From `Running` this blocks until the worker thread has exited. From
    /// `Paused` the continuation is discarded and the call returns at once.
    pub fn stop(&self) -> bool {
        let mut control = self.shared.control.lock();
        match control.state {
            ExecutionState::Running => {
                control.looping = false;
                control.abort.abort();
                self.shared.changed.notify_all();
                info!(engine = %self.shared.name, "stop requested while running");

                if control.worker == Some(thread::current().id()) {
                    // Issued from a listener: the worker unwinds after the callback returns.
                    return true;
                }
                while !control.worker_exited {
                    self.shared.changed.wait(&mut control);
                }
                drop(control);
                self.reap_worker();
                true
            }
            ExecutionState::Paused => {
                control.looping = false;
                let discarded = control.store.clear();
                self.shared.transition(&mut control, ExecutionState::Stopped);
                drop(control);
                drop(discarded);
                info!(engine = %self.shared.name, "stopped while paused");
                true
            }
            ExecutionState::Pending | ExecutionState::Stopped => false,
        }
    }

    /// Stops the engine if needed and releases the source, capabilities and
    /// listeners. Safe to call more than once.
    pub fn dispose(&self) {
        self.stop();
        {
            let mut control = self.shared.control.lock();
            if control.state == ExecutionState::Pending {
                self.shared.transition(&mut control, ExecutionState::Stopped);
            }
        }
        self.setup.lock().take();
        self.reap_worker();
        debug!(engine = %self.shared.name, "script engine disposed");
    }

    pub fn state(&self) -> ExecutionState {
        self.shared.state()
    }

    pub fn pending_request(&self) -> Option<ScriptValue> {
        self.shared.pending_request()
    }

    pub fn completed_runs(&self) -> u64 {
        self.shared.completed_runs()
    }

    pub fn last_error(&self) -> Option<ScriptError> {
        self.shared.control.lock().last_error.clone()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Blocks while the engine is `Running`, up to `timeout`, and returns the
    /// state observed last.
    pub fn wait_while_running(&self, timeout: Duration) -> ExecutionState {
        let deadline = Instant::now() + timeout;
        let mut control = self.shared.control.lock();
        while control.state == ExecutionState::Running {
            if self
                .shared
                .changed
                .wait_until(&mut control, deadline)
                .timed_out()
            {
                break;
            }
        }
        control.state
    }

    /// Blocks until the worker thread has run its last listener callback, up to `timeout`.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut control = self.shared.control.lock();
        while control.worker.is_some() && !control.worker_exited {
            if self
                .shared
                .changed
                .wait_until(&mut control, deadline)
                .timed_out()
            {
                break;
            }
        }
        control.worker.is_some() && control.worker_exited
    }

    fn reap_worker(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(engine = %self.shared.name, "script worker panicked");
        }
    }
}

impl fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for ScriptEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

enum Termination {
    Finished,
    Aborted,
    Failed(ScriptError),
}

enum Step {
    Run(Option<(Continuation, ScriptValue)>),
    Exit(Termination),
}

/// Marks the worker as gone even if a listener or capability panics.
struct ExitGuard {
    shared: Arc<Shared>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut control = self.shared.control.lock();
        control.store.clear();
        control.worker_exited = true;
        self.shared.transition(&mut control, ExecutionState::Stopped);
    }
}

fn run_worker(shared: Arc<Shared>, setup: WorkerSetup) {
    let _exit = ExitGuard {
        shared: Arc::clone(&shared),
    };
    let handle = EngineHandle {
        shared: Arc::clone(&shared),
    };
    let WorkerSetup {
        source,
        table,
        listeners,
        options,
    } = setup;
    let abort = shared.control.lock().abort.clone();

    let prepared = ExecutionContext::new(&table, abort, &options).and_then(|context| {
        let program = context.compile(&options.chunk_name, &source)?;
        Ok((context, program))
    });

    let termination = match prepared {
        Ok((context, program)) => {
            debug!(engine = %shared.name, "script compiled");
            for listener in &listeners {
                listener.on_start(&handle);
            }
            run_loop(
                &shared,
                &handle,
                &listeners,
                &context,
                &program,
                options.idle_poll(),
            )
        }
        Err(error) => Termination::Failed(error),
    };

    conclude(&shared, &handle, &listeners, termination);
}

fn run_loop(
    shared: &Shared,
    handle: &EngineHandle,
    listeners: &[Arc<dyn ScriptListener>],
    context: &ExecutionContext,
    program: &CompiledProgram,
    idle_poll: Duration,
) -> Termination {
    loop {
        let resume = match next_step(shared, idle_poll) {
            Step::Run(resume) => resume,
            Step::Exit(termination) => return termination,
        };
        let outcome = context.run_to_suspension_or_completion(program, resume);

        let mut control = shared.control.lock();
        match outcome {
            Outcome::Completed(_) => {
                control.completed_runs += 1;
                if control.abort.is_aborted() {
                    shared.transition(&mut control, ExecutionState::Stopped);
                    return Termination::Aborted;
                }
                if !control.looping {
                    shared.transition(&mut control, ExecutionState::Stopped);
                    return Termination::Finished;
                }
                debug!(engine = %shared.name, runs = control.completed_runs, "run completed, looping");
            }
            Outcome::Suspended(continuation) => {
                if control.abort.is_aborted() || control.state == ExecutionState::Stopped {
                    shared.transition(&mut control, ExecutionState::Stopped);
                    return Termination::Aborted;
                }
                let request = continuation.request().clone();
                if let Err(error) = control.store.put(continuation) {
                    warn!(engine = %shared.name, error = %error, "second suspension rejected");
                    shared.transition(&mut control, ExecutionState::Stopped);
                    return Termination::Failed(error.into());
                }
                shared.transition(&mut control, ExecutionState::Paused);
                drop(control);

                debug!(engine = %shared.name, request = %request, "script suspended");
                for listener in listeners {
                    listener.on_suspend(handle, &request);
                }
            }
            Outcome::Aborted => {
                shared.transition(&mut control, ExecutionState::Stopped);
                return Termination::Aborted;
            }
            Outcome::Failed(error) => {
                shared.transition(&mut control, ExecutionState::Stopped);
                return Termination::Failed(error);
            }
        }
    }
}

fn next_step(shared: &Shared, idle_poll: Duration) -> Step {
    let mut control = shared.control.lock();
    loop {
        match control.state {
            ExecutionState::Stopped => return Step::Exit(Termination::Aborted),
            ExecutionState::Paused => {
                shared.changed.wait_for(&mut control, idle_poll);
            }
            ExecutionState::Pending | ExecutionState::Running => {
                if control.abort.is_aborted() {
                    shared.transition(&mut control, ExecutionState::Stopped);
                    return Step::Exit(Termination::Aborted);
                }
                let resume = control
                    .store
                    .take()
                    .ok()
                    .map(|(continuation, pending)| (continuation, pending.unwrap_or_default()));
                return Step::Run(resume);
            }
        }
    }
}

fn conclude(
    shared: &Shared,
    handle: &EngineHandle,
    listeners: &[Arc<dyn ScriptListener>],
    termination: Termination,
) {
    {
        let mut control = shared.control.lock();
        if let Termination::Failed(error) = &termination {
            control.last_error = Some(error.clone());
        }
        shared.transition(&mut control, ExecutionState::Stopped);
    }

    match termination {
        Termination::Finished => {
            info!(engine = %shared.name, "script finished");
            for listener in listeners {
                listener.on_finish(handle);
            }
        }
        Termination::Aborted => {
            info!(engine = %shared.name, "script aborted");
            for listener in listeners {
                listener.on_abort(handle);
            }
        }
        Termination::Failed(error) => {
            warn!(engine = %shared.name, code = error.code(), error = %error, "script failed");
            for listener in listeners {
                listener.on_exception(handle, &error);
            }
        }
    }
}
