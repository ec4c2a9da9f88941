// tests/common/mod.rs
//! Active objects shared by the integration scenarios

#![allow(dead_code)]

use proxima_engine::body::no_such_method;
use proxima_engine::fault_tolerance::{Checkpoint, InMemoryRecoveryServer, LogRecord, RecoveryServer, ServerResult};
use proxima_engine::messaging::Request;
use proxima_engine::utils::errors::InvocationError;
use proxima_engine::{ActiveObject, ActiveRef, Argument, Location, ObjectId, RuntimeConfig, ServiceContext, Value};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Counter {
    pub count: i64,
    pub poked: bool,
}

impl ActiveObject for Counter {
    const CLASS: &'static str = "Counter";

    fn create(args: &[Value]) -> Result<Self, InvocationError> {
        let count = match args.first() {
            Some(v) => v.as_i64().ok_or(InvocationError::Construction {
                class: Self::CLASS.to_string(),
                reason: "initial count must be an integer".to_string(),
            })?,
            None => 0,
        };
        Ok(Counter { count, poked: false })
    }

    fn serve(&mut self, call: &Request, ctx: &mut ServiceContext<'_>) -> Result<Value, InvocationError> {
        match call.method() {
            "increment" => {
                self.count += 1;
                Ok(Value::Null)
            }
            "add" => {
                self.count += call.arg_as::<i64>(0)?;
                Ok(json!(self.count))
            }
            "get" => Ok(json!(self.count)),
            "sleep" => {
                std::thread::sleep(Duration::from_millis(call.arg_as::<u64>(0)?));
                Ok(json!(self.count))
            }
            "boom" => panic!("counter exploded"),
            // Spins until poked, serving immediate requests meanwhile.
            "work" => {
                let deadline = Instant::now() + Duration::from_secs(5);
                while !self.poked {
                    ctx.serve_immediates(self);
                    if Instant::now() > deadline {
                        return Err(InvocationError::failed("work", "never poked"));
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                Ok(json!(self.poked))
            }
            "poke" => {
                self.poked = true;
                Ok(json!("poked"))
            }
            other => Err(no_such_method(Self::CLASS, other)),
        }
    }

    fn immediate_services() -> Vec<String> {
        vec!["poke".to_string()]
    }
}

/// Appends what it is sent, to observe serving order.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Journal {
    pub entries: Vec<(String, u64)>,
}

impl ActiveObject for Journal {
    const CLASS: &'static str = "Journal";

    fn create(_args: &[Value]) -> Result<Self, InvocationError> {
        Ok(Journal::default())
    }

    fn serve(&mut self, call: &Request, _ctx: &mut ServiceContext<'_>) -> Result<Value, InvocationError> {
        match call.method() {
            "push" => {
                let tag = call.arg_as::<String>(0)?;
                let n = call.arg_as::<u64>(1)?;
                self.entries.push((tag, n));
                Ok(Value::Null)
            }
            "list" => Ok(json!(self.entries)),
            other => Err(no_such_method(Self::CLASS, other)),
        }
    }
}

/// Adds up what other objects answer, through continuations.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Waiter {
    pub total: i64,
    pub checks: i64,
}

impl ActiveObject for Waiter {
    const CLASS: &'static str = "Waiter";

    fn create(_args: &[Value]) -> Result<Self, InvocationError> {
        Ok(Waiter::default())
    }

    fn serve(&mut self, call: &Request, ctx: &mut ServiceContext<'_>) -> Result<Value, InvocationError> {
        match call.method() {
            // watch(target, method, args...) adds the answer to `total`
            "watch" => {
                let target: ActiveRef = call.arg_as(0)?;
                let method: String = call.arg_as(1)?;
                let args = (2..call.args().len())
                    .map(|i| call.arg(i).map(Argument::from))
                    .collect::<Result<Vec<_>, _>>()?;
                let answer = ctx.invoke(&target, &method, args);
                ctx.when_resolved::<Waiter, _>(&answer, |waiter, outcome, _| {
                    if let Ok(value) = outcome {
                        waiter.total += value.as_i64().unwrap_or(0);
                    }
                })?;
                Ok(Value::Null)
            }
            "total" => Ok(json!(self.total)),
            "check" => {
                self.checks += 1;
                Ok(json!(self.checks))
            }
            "check_twice" => {
                let first = ctx.call_self(self, "check", vec![])?;
                let second = ctx.call_self(self, "check", vec![])?;
                Ok(json!(first.as_i64().unwrap_or(0) + second.as_i64().unwrap_or(0)))
            }
            "total_via_self" => ctx.call_self(self, "total", vec![]),
            other => Err(no_such_method(Self::CLASS, other)),
        }
    }

    fn immediate_services() -> Vec<String> {
        vec!["check".to_string()]
    }
}

/// In-memory recovery server whose checkpoint writes can be slowed down.
#[derive(Default)]
pub struct SlowServer {
    pub inner: InMemoryRecoveryServer,
    pub store_delay_ms: AtomicU64,
}

impl SlowServer {
    pub fn delay_stores(&self, delay: Duration) {
        self.store_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

impl RecoveryServer for SlowServer {
    fn store(&self, checkpoint: Checkpoint) -> ServerResult<()> {
        let delay = self.store_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        self.inner.store(checkpoint)
    }

    fn fetch_latest(&self, id: ObjectId) -> ServerResult<Option<Checkpoint>> {
        self.inner.fetch_latest(id)
    }

    fn append(&self, id: ObjectId, record: LogRecord) -> ServerResult<()> {
        self.inner.append(id, record)
    }

    fn fetch_log(&self, id: ObjectId, after: u64) -> ServerResult<Vec<LogRecord>> {
        self.inner.fetch_log(id, after)
    }

    fn notify_crash(&self, id: ObjectId) -> ServerResult<()> {
        self.inner.notify_crash(id)
    }

    fn forget(&self, id: ObjectId) -> ServerResult<()> {
        self.inner.forget(id)
    }
}

pub fn config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.runtime.idle_tick_ms = 10;
    config.futures.monitor_period_ms = 50;
    config.migration.sweep_interval_ms = 50;
    config
}

pub fn second_node() -> Location {
    Location::new("node-b", 7701)
}

/// Poll `check` until it holds or `timeout` passes.
pub fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}
