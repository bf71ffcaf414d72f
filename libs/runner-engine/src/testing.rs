//! Scripted sandbox runtime for tests.
//!
//! Plays back a fixed behavior instead of starting containers, and counts how
//! many sandboxes were launched, killed, disposed of and are still alive.

use crate::classifier::OutputCapture;
use crate::error::LaunchError;
use crate::launcher::{RunningSandbox, SandboxInvocation, SandboxRuntime};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What every sandbox launched by a [`ScriptedRuntime`] does
#[derive(Debug, Clone)]
pub enum Script {
    /// Write the given output and exit with `code`
    Exit {
        stdout: String,
        stderr: String,
        code: i64,
    },
    /// Write the given output, then never exit
    Hang { stdout: String, stderr: String },
    PrepareFails(String),
    LaunchFails(String),
    /// The runtime never answers the launch request
    LaunchHangs,
    /// Starts, then the runtime loses track of it
    WaitFails(String),
    /// Panics while being waited on
    Panic,
}

/// One observed launch
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub invocation: SandboxInvocation,
    /// Contents of the bound workspace file at launch time, if it existed
    pub source: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    launched: AtomicUsize,
    terminated: AtomicUsize,
    disposed: AtomicUsize,
    alive: AtomicUsize,
}

#[derive(Debug)]
pub struct ScriptedRuntime {
    script: Script,
    counters: Arc<Counters>,
    prepared: Mutex<Vec<String>>,
    launches: Mutex<Vec<LaunchRecord>>,
    removed: Mutex<Vec<String>>,
}

impl ScriptedRuntime {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            counters: Arc::new(Counters::default()),
            prepared: Mutex::new(Vec::new()),
            launches: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn launched(&self) -> usize {
        self.counters.launched.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.counters.terminated.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.counters.disposed.load(Ordering::SeqCst)
    }

    /// Sandboxes that were started and have neither exited nor been killed
    pub fn alive(&self) -> usize {
        self.counters.alive.load(Ordering::SeqCst)
    }

    pub fn prepared_images(&self) -> Vec<String> {
        self.prepared.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Names passed to `remove`
    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SandboxRuntime for ScriptedRuntime {
    async fn prepare(&self, image: &str) -> Result<(), LaunchError> {
        if let Script::PrepareFails(reason) = &self.script {
            return Err(LaunchError::Image {
                image: image.to_string(),
                reason: reason.clone(),
            });
        }
        if let Ok(mut prepared) = self.prepared.lock() {
            prepared.push(image.to_string());
        }
        Ok(())
    }

    async fn launch(
        &self,
        invocation: &SandboxInvocation,
    ) -> Result<Box<dyn RunningSandbox>, LaunchError> {
        match &self.script {
            Script::LaunchFails(reason) => return Err(LaunchError::Start(reason.clone())),
            Script::LaunchHangs => return std::future::pending().await,
            _ => {}
        }

        let source = std::fs::read_to_string(&invocation.bind.host_path).ok();
        if let Ok(mut launches) = self.launches.lock() {
            launches.push(LaunchRecord {
                invocation: invocation.clone(),
                source,
            });
        }

        self.counters.launched.fetch_add(1, Ordering::SeqCst);
        self.counters.alive.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedSandbox {
            id: invocation.name.clone(),
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
            running: true,
        }))
    }

    async fn remove(&self, name: &str) -> Result<(), LaunchError> {
        if let Ok(mut removed) = self.removed.lock() {
            removed.push(name.to_string());
        }
        Ok(())
    }
}

struct ScriptedSandbox {
    id: String,
    script: Script,
    counters: Arc<Counters>,
    running: bool,
}

impl ScriptedSandbox {
    fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.counters.alive.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl RunningSandbox for ScriptedSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(&mut self, capture: &mut OutputCapture) -> Result<i64, LaunchError> {
        match self.script.clone() {
            Script::Exit {
                stdout,
                stderr,
                code,
            } => {
                capture.push_stdout(stdout.as_bytes());
                capture.push_stderr(stderr.as_bytes());
                self.stop();
                Ok(code)
            }
            Script::Hang { stdout, stderr } => {
                capture.push_stdout(stdout.as_bytes());
                capture.push_stderr(stderr.as_bytes());
                std::future::pending::<Result<i64, LaunchError>>().await
            }
            Script::WaitFails(reason) => Err(LaunchError::Wait(reason)),
            Script::Panic => panic!("scripted sandbox panicked"),
            Script::PrepareFails(_) | Script::LaunchFails(_) | Script::LaunchHangs => {
                Err(LaunchError::Wait("sandbox should never have started".into()))
            }
        }
    }

    async fn terminate(&mut self) -> Result<(), LaunchError> {
        self.counters.terminated.fetch_add(1, Ordering::SeqCst);
        self.stop();
        Ok(())
    }

    async fn dispose(&mut self) -> Result<(), LaunchError> {
        self.counters.disposed.fetch_add(1, Ordering::SeqCst);
        self.stop();
        Ok(())
    }
}

impl Drop for ScriptedSandbox {
    // Mirrors the Docker guard: an abandoned sandbox is force-removed
    fn drop(&mut self) {
        self.stop();
    }
}
