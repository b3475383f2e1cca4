//! Pipeline stage runtime.
//!
//! Every stage implements [`Worker`] and runs on its own thread via
//! [`spawn`]. A stage drains its input queues once per [`Worker::cycle`],
//! republishes everything it collected and reports whether it wants to keep
//! running. When it stops, for whatever reason, the runtime closes its
//! outputs so the next stage can drain and stop in turn.
//!
//! ```text
//! CREATED -> INITIALIZED -> RUNNING -> STOPPING -> STOPPED
//! ```

use crate::{Error, File, Result, WorkQueue};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned, queues not bound yet.
    Created,
    /// Queues bound.
    Initialized,
    /// Inside the cycle loop.
    Running,
    /// Closing outputs and detaching inputs.
    Stopping,
    /// Thread finished.
    Stopped,
}

/// Runtime settings shared by all stages.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorkerConfig {
    /// Sleep after a cycle that processed nothing.
    pub idle_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::from_millis(1),
        }
    }
}

impl WorkerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle backoff.
    #[must_use]
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }
}

/// Outcome of one scheduling quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    /// Items handled during the quantum.
    pub processed: usize,
    /// Whether the stage wants another quantum.
    pub keep_running: bool,
}

impl Cycle {
    #[must_use]
    pub fn new(processed: usize, keep_running: bool) -> Self {
        Self {
            processed,
            keep_running,
        }
    }

    /// Final quantum of a stage.
    #[must_use]
    pub fn stop(processed: usize) -> Self {
        Self::new(processed, false)
    }
}

/// Named queue bindings of one stage.
pub struct Ports<T = File> {
    stage: String,
    inputs: Vec<(String, WorkQueue<T>)>,
    outputs: Vec<(String, WorkQueue<T>)>,
}

impl<T> Default for Ports<T> {
    fn default() -> Self {
        Self {
            stage: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl<T> Ports<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an input queue under `name`.
    #[must_use]
    pub fn with_input(mut self, name: &str, queue: &WorkQueue<T>) -> Self {
        self.inputs.push((name.to_string(), queue.clone()));
        self
    }

    /// Binds an output queue under `name`.
    #[must_use]
    pub fn with_output(mut self, name: &str, queue: &WorkQueue<T>) -> Self {
        self.outputs.push((name.to_string(), queue.clone()));
        self
    }

    /// Looks up an input queue.
    ///
    /// # Errors
    /// Returns [`Error::MissingPort`] if no input is bound under `name`.
    pub fn input(&self, name: &str) -> Result<WorkQueue<T>> {
        self.find(&self.inputs, name)
    }

    /// Looks up an output queue.
    ///
    /// # Errors
    /// Returns [`Error::MissingPort`] if no output is bound under `name`.
    pub fn output(&self, name: &str) -> Result<WorkQueue<T>> {
        self.find(&self.outputs, name)
    }

    fn find(&self, ports: &[(String, WorkQueue<T>)], name: &str) -> Result<WorkQueue<T>> {
        ports
            .iter()
            .find(|(port, _)| port == name)
            .map(|(_, queue)| queue.clone())
            .ok_or_else(|| Error::MissingPort {
                stage: self.stage.clone(),
                port: name.to_string(),
            })
    }

    /// Iterates over all output queues.
    pub fn outputs(&self) -> impl Iterator<Item = &WorkQueue<T>> {
        self.outputs.iter().map(|(_, queue)| queue)
    }

    /// Iterates over all input queues.
    pub fn inputs(&self) -> impl Iterator<Item = &WorkQueue<T>> {
        self.inputs.iter().map(|(_, queue)| queue)
    }

    /// True if the stage has outputs and every consumer has gone away.
    #[must_use]
    pub fn outputs_detached(&self) -> bool {
        !self.outputs.is_empty() && self.outputs().all(WorkQueue::is_detached)
    }

    fn close_outputs(&self) {
        for queue in self.outputs() {
            queue.close();
        }
    }

    fn detach_inputs(&self) {
        for queue in self.inputs() {
            queue.detach();
        }
    }
}

/// A pipeline stage.
pub trait Worker<T = File>: Send {
    /// Stage name used in logs.
    fn name(&self) -> &str;

    /// Binds the stage's queues.
    ///
    /// # Errors
    /// A missing binding is fatal; the stage never runs.
    fn init(&mut self, ports: &Ports<T>) -> Result<()>;

    /// Runs one scheduling quantum.
    ///
    /// # Errors
    /// An error stops the stage.
    fn cycle(&mut self) -> Result<Cycle>;
}

#[derive(Clone)]
struct StateCell(Arc<Mutex<WorkerState>>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(WorkerState::Created)))
    }

    fn set(&self, state: WorkerState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn get(&self) -> WorkerState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running stage.
pub struct StageHandle {
    name: String,
    state: StateCell,
    thread: JoinHandle<Result<()>>,
}

impl StageHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the stage to stop.
    ///
    /// # Errors
    /// Returns the stage's failure, or [`Error::StagePanicked`].
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .unwrap_or_else(|_| Err(Error::StagePanicked(self.name)))
    }
}

/// Starts `worker` on its own thread.
///
/// # Errors
/// Returns an error if the thread cannot be created.
pub fn spawn<T, W>(mut worker: W, mut ports: Ports<T>, config: WorkerConfig) -> Result<StageHandle>
where
    T: Send + 'static,
    W: Worker<T> + 'static,
{
    let name = worker.name().to_string();
    ports.stage.clone_from(&name);
    let state = StateCell::new();
    let thread_state = state.clone();
    let thread_name = name.clone();

    let thread = thread::Builder::new()
        .name(name.to_lowercase())
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                run(&mut worker, &ports, &config, &thread_state)
            }));

            thread_state.set(WorkerState::Stopping);
            ports.close_outputs();
            ports.detach_inputs();
            thread_state.set(WorkerState::Stopped);

            match result {
                Ok(Ok(())) => {
                    info!("{thread_name}: stopped");
                    Ok(())
                }
                Ok(Err(err)) => {
                    error!("{thread_name}: {err}");
                    Err(err)
                }
                Err(_) => {
                    error!("{thread_name}: panicked");
                    Err(Error::StagePanicked(thread_name))
                }
            }
        })?;

    Ok(StageHandle {
        name,
        state,
        thread,
    })
}

fn run<T, W>(worker: &mut W, ports: &Ports<T>, config: &WorkerConfig, state: &StateCell) -> Result<()>
where
    W: Worker<T>,
{
    worker.init(ports)?;
    state.set(WorkerState::Initialized);

    let name = worker.name().to_string();
    info!("{name}: running");
    state.set(WorkerState::Running);

    loop {
        let cycle = worker.cycle()?;
        if !cycle.keep_running {
            break;
        }
        if ports.outputs_detached() {
            warn!("{name}: all consumers gone, stopping");
            break;
        }
        if cycle.processed == 0 {
            thread::sleep(config.idle_backoff);
        }
    }
    debug!("{name}: leaving loop");
    Ok(())
}

/// Drains `input`, hands every item to `process` and republishes it to
/// `output` in the order collected.
///
/// Items are republished whether or not `process` changed them. The
/// returned cycle keeps running until `input` is closed and empty.
pub fn relay<T, F>(input: &WorkQueue<T>, output: &WorkQueue<T>, mut process: F) -> Cycle
where
    F: FnMut(&mut T),
{
    let mut items = VecDeque::new();
    let n = input.collect(&mut items);
    for mut item in items {
        process(&mut item);
        output.push(item);
    }
    Cycle::new(n, !input.is_finished())
}

/// A set of running stages.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<StageHandle>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a stage and adds it to the pipeline.
    ///
    /// # Errors
    /// Returns an error if the stage thread cannot be created.
    pub fn spawn<T, W>(&mut self, worker: W, ports: Ports<T>, config: &WorkerConfig) -> Result<()>
    where
        T: Send + 'static,
        W: Worker<T> + 'static,
    {
        let handle = spawn(worker, ports, config.clone())?;
        self.stages.push(handle);
        Ok(())
    }

    /// Names of the stages in start order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(StageHandle::name).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Waits for every stage.
    ///
    /// # Errors
    /// Returns the first failure in start order after all stages stopped.
    pub fn join(self) -> Result<()> {
        let mut first = None;
        for stage in self.stages {
            if let Err(err) = stage.join() {
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
