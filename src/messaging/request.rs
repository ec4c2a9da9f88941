// src/messaging/request.rs
//! Invocation requests
//!
//! A [`Request`] is immutable once built. Arguments are either plain values
//! or futures; a future argument is only waited on when the serving method
//! reads it ([`Request::arg`]), never at send time.

use crate::future::Future;
use crate::identity::{Location, ObjectId, RequestId};
use crate::messaging::Outcome;
use crate::utils::errors::{ActiveError, InvocationError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One argument of a request
#[derive(Debug, Clone)]
pub enum Argument {
    Value(Value),
    Future(Future),
}

impl Argument {
    /// Wait for the argument's value if it is a future.
    pub fn resolve(&self) -> Outcome {
        match self {
            Argument::Value(v) => Ok(v.clone()),
            Argument::Future(f) => f.wait(),
        }
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Argument::Value(value)
    }
}

impl From<Future> for Argument {
    fn from(future: Future) -> Self {
        Argument::Future(future)
    }
}

/// "Invoke `method` on `target` with `args`"
#[derive(Debug, Clone)]
pub struct Request {
    id: RequestId,
    target: ObjectId,
    method: String,
    args: Vec<Argument>,
    sent_at: DateTime<Utc>,
    one_way: bool,
    reply_to: Location,
}

impl Request {
    /// A request expecting a reply at `reply_to`.
    pub fn call(
        id: RequestId,
        target: ObjectId,
        method: impl Into<String>,
        args: Vec<Argument>,
        reply_to: Location,
    ) -> Result<Self> {
        Self::build(id, target, method.into(), args, false, reply_to)
    }

    /// A fire-and-forget request; no reply is ever produced.
    pub fn one_way(
        id: RequestId,
        target: ObjectId,
        method: impl Into<String>,
        args: Vec<Argument>,
        reply_to: Location,
    ) -> Result<Self> {
        Self::build(id, target, method.into(), args, true, reply_to)
    }

    fn build(
        id: RequestId,
        target: ObjectId,
        method: String,
        args: Vec<Argument>,
        one_way: bool,
        reply_to: Location,
    ) -> Result<Self> {
        if method.trim().is_empty() {
            return Err(ActiveError::InvalidRequest(format!(
                "empty method name in request {}",
                id
            )));
        }
        Ok(Self {
            id,
            target,
            method,
            args,
            sent_at: Utc::now(),
            one_way,
            reply_to,
        })
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn sender(&self) -> ObjectId {
        self.id.sender
    }

    pub fn sequence(&self) -> u64 {
        self.id.sequence
    }

    pub fn target(&self) -> ObjectId {
        self.target
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    pub fn expects_reply(&self) -> bool {
        !self.one_way
    }

    pub fn reply_to(&self) -> &Location {
        &self.reply_to
    }

    /// Value of argument `index`, blocking on it if it is still a future.
    pub fn arg(&self, index: usize) -> std::result::Result<Value, InvocationError> {
        let arg = self.args.get(index).ok_or_else(|| InvocationError::BadArgument {
            index,
            reason: format!("{} takes at least {} argument(s)", self.method, index + 1),
        })?;
        arg.resolve().map_err(|e| InvocationError::BadArgument {
            index,
            reason: e.to_string(),
        })
    }

    /// Typed value of argument `index`.
    pub fn arg_as<T: DeserializeOwned>(&self, index: usize) -> std::result::Result<T, InvocationError> {
        let value = self.arg(index)?;
        serde_json::from_value(value).map_err(|e| InvocationError::BadArgument {
            index,
            reason: e.to_string(),
        })
    }

    /// Resolve every argument and produce a loggable copy.
    pub fn materialize(&self) -> RequestRecord {
        RequestRecord {
            id: self.id,
            target: self.target,
            method: self.method.clone(),
            args: self.args.iter().map(Argument::resolve).collect(),
            sent_at: self.sent_at,
            one_way: self.one_way,
            reply_to: self.reply_to.clone(),
        }
    }

    /// Rebuild a request from its log record.
    pub fn from_record(record: RequestRecord) -> Self {
        let args = record
            .args
            .into_iter()
            .map(|outcome| match outcome {
                Ok(value) => Argument::Value(value),
                Err(error) => Argument::Future(Future::failed(error)),
            })
            .collect();
        Self {
            id: record.id,
            target: record.target,
            method: record.method,
            args,
            sent_at: record.sent_at,
            one_way: record.one_way,
            reply_to: record.reply_to,
        }
    }
}

/// A request with every argument resolved, as stored in message logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub target: ObjectId,
    pub method: String,
    pub args: Vec<Outcome>,
    pub sent_at: DateTime<Utc>,
    pub one_way: bool,
    pub reply_to: Location,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    fn request(args: Vec<Argument>) -> Request {
        Request::call(
            RequestId::new(ObjectId::new(), 1),
            ObjectId::new(),
            "add",
            args,
            Location::new("localhost", 1),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_method_rejected() {
        let result = Request::one_way(
            RequestId::new(ObjectId::new(), 1),
            ObjectId::new(),
            "  ",
            vec![],
            Location::new("localhost", 1),
        );
        assert!(matches!(result, Err(ActiveError::InvalidRequest(_))));
    }

    #[test]
    fn test_typed_arguments() {
        let req = request(vec![json!(3).into(), json!("x").into()]);
        assert_eq!(req.arg_as::<i64>(0).unwrap(), 3);
        assert!(matches!(
            req.arg_as::<i64>(1),
            Err(InvocationError::BadArgument { index: 1, .. })
        ));
        assert!(matches!(req.arg(2), Err(InvocationError::BadArgument { index: 2, .. })));
    }

    #[test]
    fn test_future_argument_resolved_on_access() {
        let future = Future::pending();
        let req = request(vec![future.clone().into()]);
        let resolver = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            future.resolve(Ok(json!(42)));
        });

        assert_eq!(req.arg_as::<u32>(0).unwrap(), 42);
        resolver.join().unwrap();
    }

    #[test]
    fn test_record_keeps_failed_argument() {
        let failed = Future::failed(crate::utils::errors::InvocationError::failed("f", "x"));
        let req = request(vec![json!(1).into(), failed.into()]);
        let rebuilt = Request::from_record(req.materialize());
        assert_eq!(rebuilt.arg(0).unwrap(), json!(1));
        assert!(rebuilt.arg(1).is_err());
        assert_eq!(rebuilt.id(), req.id());
    }
}
