// src/body/context.rs
//! What a serving method can do besides touching its own state
//!
//! A [`ServiceContext`] is lent to [`ActiveObject::serve`] for the
//! duration of one request. Through it the object sends requests of its
//! own, serves queued immediate services from inside a long request, and
//! registers continuations that run later on its serving thread.

use crate::body::active_object::{ActiveObject, ErasedObject};
use crate::body::control::{Continuation, Control};
use crate::body::serving::BodyEnv;
use crate::future::Future;
use crate::identity::{Location, ObjectId, RequestId};
use crate::messaging::{Argument, Outcome, Request};
use crate::runtime::ActiveRef;
use crate::utils::errors::InvocationError;
use serde_json::Value;
use tracing::{error, warn};

pub struct ServiceContext<'a> {
    env: &'a mut BodyEnv,
}

impl<'a> ServiceContext<'a> {
    pub(crate) fn new(env: &'a mut BodyEnv) -> Self {
        Self { env }
    }

    /// Identity of the object being served
    pub fn id(&self) -> ObjectId {
        self.env.id
    }

    /// Where the object currently lives
    pub fn location(&self) -> &Location {
        &self.env.location
    }

    /// A reference others can use to reach this object
    pub fn this(&self) -> ActiveRef {
        ActiveRef::new(self.env.id, self.env.class.clone(), self.env.location.clone())
    }

    /// True while the body re-executes logged requests after a crash.
    /// Outbound messages are suppressed during replay.
    pub fn is_replaying(&self) -> bool {
        self.env.replay.is_some()
    }

    /// Asynchronous call to another active object.
    ///
    /// Calling the object itself this way is legal but waiting on the
    /// returned future from inside a request never completes: the serving
    /// loop is not re-entrant. Use [`call_self`](Self::call_self) for an
    /// immediate service instead.
    pub fn invoke(&mut self, target: &ActiveRef, method: &str, args: Vec<Argument>) -> Future {
        if target.id() == self.env.id {
            warn!(
                "{} invoked {} on itself through its mailbox; waiting on the reply deadlocks",
                self.env.id, method
            );
        }
        self.env.send_request(target, method, args, false)
    }

    /// One-way call to another active object. Failures are only logged.
    pub fn send(&mut self, target: &ActiveRef, method: &str, args: Vec<Argument>) {
        let future = self.env.send_request(target, method, args, true);
        if let Some(Err(e)) = future.outcome() {
            warn!("One-way {} from {} to {} failed: {}", method, self.env.id, target.id(), e);
        }
    }

    /// Serve every queued immediate-service request right now, from inside
    /// the current request. `object` is the object being served (`self`
    /// in the calling method). Returns how many were served.
    pub fn serve_immediates<T: ActiveObject>(&mut self, object: &mut T) -> usize {
        let mut served = 0;
        while let Some(request) = self.env.next_immediate() {
            if let Err(e) = self.env.serve(object as &mut dyn ErasedObject, request) {
                error!("Fatal error while serving an immediate request of {}: {}", self.env.id, e);
                self.env.fatal = Some(e);
                break;
            }
            served += 1;
        }
        served
    }

    /// Re-entrant call of one of the object's own immediate services.
    pub fn call_self<T: ActiveObject>(
        &mut self,
        object: &mut T,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, InvocationError> {
        if !self.env.mailbox().policy().is_immediate(method) {
            return Err(InvocationError::failed(
                method,
                "re-entrant self calls are only allowed for immediate services",
            ));
        }

        let request = Request::call(
            RequestId::new(self.env.id, 0),
            self.env.id,
            method,
            args.into_iter().map(Argument::Value).collect(),
            self.env.location.clone(),
        )
        .map_err(|e| InvocationError::failed(method, e.to_string()))?;

        object.serve(&request, self)
    }

    /// Run `f` on this object's serving thread once `future` resolves.
    ///
    /// The continuation is queued on the control lane, so it never runs
    /// concurrently with a request. Continuations cannot be replayed after
    /// a crash, so fault-tolerant objects are refused and must wait on the
    /// future inside a request instead.
    pub fn when_resolved<T, F>(&mut self, future: &Future, f: F) -> Result<(), InvocationError>
    where
        T: ActiveObject,
        F: FnOnce(&mut T, Outcome, &mut ServiceContext<'_>) + Send + 'static,
    {
        if self.env.ft.is_some() {
            return Err(InvocationError::failed(
                "when_resolved",
                format!("{} is fault tolerant; continuations are not logged", self.env.id),
            ));
        }

        let id = self.env.id;
        let shared = self.env.shared.clone();
        self.env.continuations += 1;
        future.on_resolve(move |outcome| {
            let outcome = outcome.clone();
            let continuation: Continuation = Box::new(move |object: &mut dyn ErasedObject, ctx: &mut ServiceContext<'_>| {
                match object.as_any_mut().downcast_mut::<T>() {
                    Some(object) => f(object, outcome, ctx),
                    None => warn!("Continuation for {} expected class {}", id, T::CLASS),
                }
            });
            if let Some(shared) = shared.upgrade() {
                shared.route_control(id, Control::Continuation(continuation));
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::active_object::no_such_method;
    use crate::body::handle::BodyHandle;
    use crate::body::mailbox::Mailbox;
    use crate::body::policy::ServingPolicy;
    use crate::fault_tolerance::manager::FtManager;
    use crate::fault_tolerance::{FtPolicy, InMemoryRecoveryServer};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::{Arc, Weak};
    use std::time::Duration;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Tally {
        hits: i64,
    }

    impl ActiveObject for Tally {
        const CLASS: &'static str = "Tally";

        fn create(_args: &[Value]) -> Result<Self, InvocationError> {
            Ok(Tally::default())
        }

        fn serve(&mut self, call: &Request, _ctx: &mut ServiceContext<'_>) -> Result<Value, InvocationError> {
            match call.method() {
                "hit" => {
                    self.hits += 1;
                    Ok(json!(self.hits))
                }
                "hits" => Ok(json!(self.hits)),
                other => Err(no_such_method(Self::CLASS, other)),
            }
        }
    }

    fn env() -> BodyEnv {
        let id = ObjectId::new();
        let mailbox = Arc::new(Mailbox::new(id, 8, ServingPolicy::with_immediate(["hit"])));
        let handle = Arc::new(BodyHandle::new(id, Tally::CLASS, mailbox, false));
        BodyEnv::new(
            id,
            Tally::CLASS,
            Location::new("localhost", 9000),
            handle,
            Weak::new(),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_context_describes_the_served_object() {
        let mut env = env();
        let id = env.id;
        let ctx = ServiceContext::new(&mut env);

        assert_eq!(ctx.id(), id);
        assert_eq!(ctx.location(), &Location::new("localhost", 9000));
        assert_eq!(ctx.this(), ActiveRef::new(id, "Tally", Location::new("localhost", 9000)));
        assert!(!ctx.is_replaying());
    }

    #[test]
    fn test_call_self_reaches_immediate_services_only() {
        let mut env = env();
        let mut tally = Tally::default();
        let mut ctx = ServiceContext::new(&mut env);

        assert_eq!(ctx.call_self(&mut tally, "hit", vec![]), Ok(json!(1)));
        assert!(matches!(
            ctx.call_self(&mut tally, "hits", vec![]),
            Err(InvocationError::Failed { .. })
        ));
        assert_eq!(tally.hits, 1);
    }

    #[test]
    fn test_when_resolved_tracks_pending_continuations() {
        let mut env = env();
        let future = Future::pending();
        {
            let mut ctx = ServiceContext::new(&mut env);
            ctx.when_resolved::<Tally, _>(&future, |tally, _, _| tally.hits += 1)
                .unwrap();
        }
        assert_eq!(env.continuations, 1);
        assert_eq!(future.listeners(), 1);

        env.ft = Some(FtManager::new(
            env.id,
            FtPolicy::default(),
            Arc::new(InMemoryRecoveryServer::new()),
        ));
        let mut ctx = ServiceContext::new(&mut env);
        assert!(matches!(
            ctx.when_resolved::<Tally, _>(&future, |tally, _, _| tally.hits += 1),
            Err(InvocationError::Failed { .. })
        ));
        assert_eq!(env.continuations, 1);
        assert_eq!(future.listeners(), 1);
    }
}
