#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, Response};
use serde_json::Value;
use tokio::sync::mpsc;

use hook_gateway::api::router;
use hook_gateway::auth::QueryParams;
use hook_gateway::interpreter::{Interpreter, InterpreterError, InterpreterPool, PoolConfig};
use hook_gateway::{AppState, HookConfig};

pub const SECRET: &str = "s1";

/// One script run as seen by the fake interpreter.
#[derive(Debug, Clone)]
pub struct Execution {
    pub instance: usize,
    pub script: String,
    pub bindings: HashMap<String, Value>,
    pub params: QueryParams,
}

/// Knobs shared by every interpreter a test pool creates.
#[derive(Clone, Default)]
pub struct FakeOptions {
    /// Exec blocks until the test sends on, or drops, the gate sender.
    pub gate: Option<Arc<Mutex<std_mpsc::Receiver<()>>>>,
    /// Exec sleeps this long before recording.
    pub exec_delay: Option<Duration>,
    /// Close fails with a message naming the instance.
    pub fail_close: bool,
}

struct RecordingInterpreter {
    instance: usize,
    bindings: HashMap<String, Value>,
    busy: AtomicBool,
    overlap: Arc<AtomicBool>,
    options: FakeOptions,
    executions: mpsc::UnboundedSender<Execution>,
}

impl Interpreter for RecordingInterpreter {
    fn init(&mut self, _script_root: &Path) -> Result<(), InterpreterError> {
        Ok(())
    }

    fn bind(&mut self, name: &str, value: &Value) -> Result<(), InterpreterError> {
        self.bindings.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn exec(&mut self, script: &str, params: &QueryParams) -> Result<(), InterpreterError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        if let Some(gate) = &self.options.gate {
            let _ = gate.lock().unwrap().recv();
        }
        if let Some(delay) = self.options.exec_delay {
            thread::sleep(delay);
        }
        self.busy.store(false, Ordering::SeqCst);

        let _ = self.executions.send(Execution {
            instance: self.instance,
            script: script.to_string(),
            bindings: self.bindings.clone(),
            params: params.clone(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), InterpreterError> {
        if self.options.fail_close {
            return Err(InterpreterError::Teardown(format!(
                "instance {} refused to close",
                self.instance
            )));
        }
        Ok(())
    }
}

pub struct FakePool {
    pub pool: Arc<InterpreterPool>,
    pub executions: mpsc::UnboundedReceiver<Execution>,
    pub overlap: Arc<AtomicBool>,
}

pub fn fake_pool(options: FakeOptions) -> FakePool {
    let (tx, rx) = mpsc::unbounded_channel();
    let overlap = Arc::new(AtomicBool::new(false));
    let serial = Arc::new(AtomicUsize::new(0));

    let shared_overlap = Arc::clone(&overlap);
    let pool = InterpreterPool::new(PoolConfig::new("scripts", move || {
        Ok(Box::new(RecordingInterpreter {
            instance: serial.fetch_add(1, Ordering::SeqCst),
            bindings: HashMap::new(),
            busy: AtomicBool::new(false),
            overlap: Arc::clone(&shared_overlap),
            options: options.clone(),
            executions: tx.clone(),
        }) as Box<dyn Interpreter>)
    }));

    FakePool {
        pool,
        executions: rx,
        overlap,
    }
}

/// Gate for [`FakeOptions::gate`] plus the sender that opens it.
pub fn gate() -> (std_mpsc::Sender<()>, Arc<Mutex<std_mpsc::Receiver<()>>>) {
    let (tx, rx) = std_mpsc::channel();
    (tx, Arc::new(Mutex::new(rx)))
}

pub fn test_config() -> HookConfig {
    let mut config = HookConfig::new(SECRET, "scripts");
    config.addr = "127.0.0.1:0".to_string();
    config.default_hosting = "gitlab".to_string();
    config
}

/// Builds the router exactly as the server installs it.
pub fn build_test_app(config: HookConfig, pool: Arc<InterpreterPool>) -> Router {
    router(Arc::new(AppState { config, pool }))
}

pub fn request(method: Method, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(body.into())
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn next_execution(executions: &mut mpsc::UnboundedReceiver<Execution>) -> Execution {
    tokio::time::timeout(Duration::from_secs(5), executions.recv())
        .await
        .expect("script was not executed in time")
        .expect("execution channel closed")
}
