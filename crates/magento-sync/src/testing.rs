//! In-memory stand-in for the remote platform.
//!
//! Answers are keyed by call method (`catalog_category.info`) or REST path
//! (`categories/3`). Answers to one exact argument list are registered with
//! [`FakeMagento::record`] and [`FakeMagento::record_args`] and win over the
//! per-method ones. Every call is kept for assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::remote::{RemoteApi, RemoteCall, RemoteFault};

#[derive(Default)]
struct FakeState {
    /// Sticky answers per method.
    answers: HashMap<String, Result<Value, RemoteFault>>,
    /// One-shot answers per method, used before the sticky ones.
    queued: HashMap<String, VecDeque<Result<Value, RemoteFault>>>,
    /// Answers keyed by `(method, rendered positional arguments)`.
    records: HashMap<(String, String), Value>,
    calls: Vec<RemoteCall>,
}

/// Fake remote API recording every call.
#[derive(Clone, Default)]
pub struct FakeMagento {
    state: Arc<Mutex<FakeState>>,
}

impl FakeMagento {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fake as an injectable transport.
    pub fn api(&self) -> Arc<dyn RemoteApi> {
        Arc::new(self.clone())
    }

    /// Answers every call to `method` with `value`.
    pub fn respond(&self, method: &str, value: Value) {
        self.state
            .lock()
            .unwrap()
            .answers
            .insert(method.to_string(), Ok(value));
    }

    /// Fails every call to `method`.
    pub fn fail(&self, method: &str, fault: RemoteFault) {
        self.state
            .lock()
            .unwrap()
            .answers
            .insert(method.to_string(), Err(fault));
    }

    /// Fails the next `times` calls to `method`, then falls back.
    pub fn fail_times(&self, method: &str, fault: RemoteFault, times: usize) {
        let mut state = self.state.lock().unwrap();
        let queue = state.queued.entry(method.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(Err(fault.clone()));
        }
    }

    /// Answers `method` calls whose only argument is `id`.
    pub fn record(&self, method: &str, id: &str, value: Value) {
        self.record_args(method, vec![json!(id)], value);
    }

    /// Answers `method` calls with exactly these positional arguments.
    pub fn record_args(&self, method: &str, args: Vec<Value>, value: Value) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert((method.to_string(), render_args(&args)), value);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }
}

#[async_trait]
impl RemoteApi for FakeMagento {
    async fn call(&self, call: RemoteCall) -> Result<Value, RemoteFault> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());

        if let Some(answer) = state.queued.get_mut(&call.method).and_then(VecDeque::pop_front) {
            return answer;
        }

        let key = (call.method.clone(), render_args(call.positional_args()));
        if let Some(value) = state.records.get(&key) {
            return Ok(value.clone());
        }

        match state.answers.get(&call.method) {
            Some(answer) => answer.clone(),
            None if call.method.ends_with(".info") => Err(RemoteFault::Fault {
                code: 100,
                message: "Requested record does not exist.".into(),
            }),
            None => Ok(Value::Null),
        }
    }
}

/// Ids may be sent as numbers or strings; both render the same.
fn render_args(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("|")
}
