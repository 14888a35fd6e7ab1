//! Lifecycle of the per-sensor poll tasks.
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::frame::FrameError;
use crate::publish::PublishError;
use crate::serial::SerialError;

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Task failed: {0}")]
    Task(String),
}

impl From<SerialError> for SensorError {
    fn from(e: SerialError) -> Self {
        SensorError::Frame(FrameError::Channel(e))
    }
}

impl SensorError {
    /// Fatal errors end the owning poll task; the rest skip one cycle.
    pub fn is_fatal(&self) -> bool {
        match self {
            SensorError::Frame(e) => e.is_fatal(),
            SensorError::Publish(PublishError::Closed) => true,
            SensorError::Publish(_) => false,
            SensorError::Task(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, SensorError>;

/// Cooperative stop signal shared by every poll task.
///
/// Checked once at the top of each cycle, so a stop request is observed
/// within one read window.
#[derive(Debug, Clone)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn request(&self) {
        if self.0.swap(false, Ordering::AcqRel) {
            log::info!("Shutdown requested");
        }
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

struct SensorTask {
    name: String,
    handle: JoinHandle<Result<()>>,
}

/// Owns one task per sensor. Tasks never coordinate with each other; a
/// fatal error in one leaves the rest running.
pub struct Supervisor {
    shutdown: ShutdownFlag,
    tasks: Vec<SensorTask>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            shutdown: ShutdownFlag::new(),
            tasks: Vec::new(),
        }
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn a poll loop. The closure receives the shared shutdown flag.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, make_task: F)
    where
        F: FnOnce(ShutdownFlag) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        log::info!("Starting sensor task '{}'", name);
        let handle = tokio::spawn(make_task(self.shutdown.clone()));
        self.tasks.push(SensorTask { name, handle });
    }

    /// Number of tasks that have not finished yet
    pub fn running(&self) -> usize {
        self.tasks.iter().filter(|t| !t.handle.is_finished()).count()
    }

    /// Resolve once every task has ended on its own (e.g. all ports lost)
    pub async fn wait_idle(&self) {
        while self.running() > 0 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Request shutdown and wait for every task to release its channel.
    /// Returns each task's name and final result.
    pub async fn shutdown(self) -> Vec<(String, Result<()>)> {
        self.shutdown.request();

        let mut results = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            let outcome = match task.handle.await {
                Ok(result) => result,
                Err(e) => Err(SensorError::Task(e.to_string())),
            };
            match &outcome {
                Ok(()) => log::info!("Sensor task '{}' stopped", task.name),
                Err(e) => log::error!("Sensor task '{}' ended with error: {}", task.name, e),
            }
            results.push((task.name, outcome));
        }
        results
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
