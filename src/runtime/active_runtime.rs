// src/runtime/active_runtime.rs
//! The runtime facade
//!
//! [`ActiveRuntime`] owns the nodes, the location registry, the class
//! registry and the recovery server, and exposes the operations of the
//! model: create, invoke, migrate, checkpoint, crash, recover, terminate.
//!
//! Every operation here blocks the calling thread; do not call them from
//! inside an async task.

use crate::body::active_object::{ActiveObject, ClassRegistry};
use crate::body::control::Control;
use crate::body::handle::{BodyHandle, BodyStatus};
use crate::body::mailbox::Mailbox;
use crate::body::policy::ServingPolicy;
use crate::body::serving::{Body, BodyEnv};
use crate::fault_tolerance::recovery::{self, ReplayReport};
use crate::fault_tolerance::{FtPolicy, InMemoryRecoveryServer, RecoveryServer};
use crate::future::{Future, FutureMonitor, Liveness};
use crate::identity::{Location, LocationRegistry, ObjectId};
use crate::messaging::{Argument, Request};
use crate::migration::manager;
use crate::runtime::maintenance::Maintenance;
use crate::runtime::node::Node;
use crate::runtime::proxy::{ActiveRef, Caller};
use crate::runtime::transport::{LocalTransport, Transport, TransportStats};
use crate::serialization::{JsonCodec, StateCodec};
use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{ActiveError, FutureError, Result, TransportError};
use crossbeam_channel::bounded;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// State shared by the facade, the nodes, the bodies and maintenance
pub(crate) struct RuntimeShared {
    pub(crate) config: RuntimeConfig,
    pub(crate) registry: LocationRegistry,
    pub(crate) classes: ClassRegistry,
    pub(crate) transport: LocalTransport,
    pub(crate) recovery: Arc<dyn RecoveryServer>,
    pub(crate) codec: Arc<dyn StateCodec>,
    pub(crate) maintenance: Maintenance,
    pub(crate) monitor: FutureMonitor,
    pub(crate) ft_policies: DashMap<ObjectId, FtPolicy>,
}

impl RuntimeShared {
    /// Send `request` starting at `hint`; on a dead end, retry once at the
    /// location the registry knows.
    pub(crate) fn dispatch(&self, request: Request, hint: &Location) -> std::result::Result<Location, TransportError> {
        let target = request.target();
        match self.transport.send(request.clone(), hint) {
            Err(
                e @ (TransportError::UnknownObject { .. }
                | TransportError::Unreachable(_)
                | TransportError::TooManyHops(_)),
            ) => match self.registry.lookup(target) {
                Some(record) if record.location != *hint => {
                    debug!("Retrying {} at registered location {}", request.id(), record.location);
                    self.transport.send(request, &record.location)
                }
                _ => Err(e),
            },
            other => other,
        }
    }

    /// Node and live handle of `id`.
    pub(crate) fn locate(&self, id: ObjectId) -> Option<(Arc<Node>, Arc<BodyHandle>)> {
        let registered = self
            .registry
            .lookup(id)
            .and_then(|record| self.transport.node(&record.location))
            .and_then(|node| node.body(id).map(|handle| (node, handle)));
        if let Some((node, handle)) = registered {
            if !matches!(handle.status(), BodyStatus::Moved(_)) {
                return Some((node, handle));
            }
        }
        self.transport.nodes().into_iter().find_map(|node| {
            node.body(id)
                .filter(|h| !matches!(h.status(), BodyStatus::Moved(_)))
                .map(|h| (node, h))
        })
    }

    pub(crate) fn route_control(&self, id: ObjectId, control: Control) {
        match self.locate(id) {
            Some((_, handle)) => {
                if let Err(control) = handle.send_control(control) {
                    debug!("Dropped {:?} for stopped body {}", control, id);
                }
            }
            None => debug!("Dropped {:?} for unknown body {}", control, id),
        }
    }

    pub(crate) fn liveness(&self, id: ObjectId) -> Liveness {
        match self.registry.lookup(id) {
            Some(record) => self.transport.ping(id, &record.location),
            None => Liveness::Dead(TransportError::Terminated(id)),
        }
    }

    pub(crate) fn sweep_forwarders(&self) -> usize {
        self.transport.nodes().iter().map(|n| n.forwarders().sweep()).sum()
    }

    pub(crate) fn monitor_futures(&self) -> usize {
        self.transport
            .nodes()
            .iter()
            .map(|n| self.monitor.scan(n.futures(), |target| self.liveness(target)))
            .sum()
    }

    pub(crate) fn crashed_fault_tolerant(&self) -> Vec<ObjectId> {
        self.transport
            .nodes()
            .iter()
            .flat_map(|n| n.bodies())
            .filter(|h| h.is_fault_tolerant() && h.status() == BodyStatus::Crashed)
            .map(|h| h.id())
            .collect()
    }
}

/// Builder for [`ActiveRuntime`]
pub struct ActiveRuntimeBuilder {
    config: RuntimeConfig,
    recovery: Option<Arc<dyn RecoveryServer>>,
    codec: Option<Arc<dyn StateCodec>>,
}

impl ActiveRuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            recovery: None,
            codec: None,
        }
    }

    /// Stable storage for checkpoints and logs; in memory by default.
    pub fn recovery_server(mut self, server: Arc<dyn RecoveryServer>) -> Self {
        self.recovery = Some(server);
        self
    }

    /// Codec for migration packets and checkpoints; plain JSON by default.
    pub fn codec(mut self, codec: Arc<dyn StateCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn build(self) -> Result<ActiveRuntime> {
        self.config.validate()?;
        let home = self.config.runtime.location();

        let shared = Arc::new(RuntimeShared {
            registry: LocationRegistry::new(),
            classes: ClassRegistry::new(),
            transport: LocalTransport::new(self.config.runtime.max_hops),
            recovery: self
                .recovery
                .unwrap_or_else(|| Arc::new(InMemoryRecoveryServer::new())),
            codec: self.codec.unwrap_or_else(|| Arc::new(JsonCodec)),
            maintenance: Maintenance::new()?,
            monitor: FutureMonitor::new(),
            ft_policies: DashMap::new(),
            config: self.config,
        });

        shared
            .transport
            .add_node(Arc::new(Node::new(home.clone(), Arc::downgrade(&shared))));
        shared.maintenance.start(Arc::downgrade(&shared), &shared.config);
        let caller = Caller::new(home.clone(), Arc::downgrade(&shared));

        info!("Active runtime started at {} (codec {})", home, shared.codec.name());
        Ok(ActiveRuntime { shared, caller })
    }
}

/// Entry point of the active-object runtime
pub struct ActiveRuntime {
    shared: Arc<RuntimeShared>,
    caller: Caller,
}

impl ActiveRuntime {
    /// Runtime with an in-memory recovery server and the JSON codec.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        ActiveRuntimeBuilder::new(config).build()
    }

    pub fn builder(config: RuntimeConfig) -> ActiveRuntimeBuilder {
        ActiveRuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn register_class<T: ActiveObject>(&self) {
        self.shared.classes.register::<T>();
    }

    /// Location of the node created with the runtime
    pub fn default_location(&self) -> &Location {
        self.caller.home()
    }

    /// Add a node; adding an existing location is a no-op.
    pub fn add_node(&self, location: Location) -> Location {
        let node = Arc::new(Node::new(location.clone(), Arc::downgrade(&self.shared)));
        if !self.shared.transport.add_node(node) {
            debug!("Node {} already exists", location);
        }
        location
    }

    pub fn node(&self, location: &Location) -> Option<Arc<Node>> {
        self.shared.transport.node(location)
    }

    pub fn nodes(&self) -> Vec<Location> {
        self.shared
            .transport
            .nodes()
            .iter()
            .map(|n| n.location().clone())
            .collect()
    }

    /// Simulate a partition (or heal one).
    pub fn set_reachable(&self, location: &Location, reachable: bool) -> Result<()> {
        let node = self
            .node(location)
            .ok_or_else(|| ActiveError::UnknownNode(location.clone()))?;
        node.set_reachable(reachable);
        Ok(())
    }

    /// Instantiate `class` at `at` and start serving it.
    pub fn create_active_object(&self, class: &str, args: Vec<Value>, at: &Location) -> Result<ActiveRef> {
        let shared = &self.shared;
        let node = self
            .node(at)
            .filter(|n| n.is_reachable())
            .ok_or_else(|| ActiveError::UnknownNode(at.clone()))?;
        let object = shared
            .classes
            .construct(class, &args)
            .ok_or_else(|| ActiveError::UnknownClass(class.to_string()))??;

        let id = ObjectId::new();
        let policy = ServingPolicy::with_immediate(shared.classes.immediate_services(class));
        let mailbox = Arc::new(Mailbox::new(id, shared.config.mailbox.capacity, policy));
        let handle = Arc::new(BodyHandle::new(id, class, mailbox, false));
        let env = BodyEnv::new(
            id,
            class,
            at.clone(),
            handle.clone(),
            Arc::downgrade(shared),
            shared.config.runtime.idle_tick(),
        );

        shared.registry.register(id, at.clone())?;
        node.host(handle);
        if let Err(e) = Body::new(object, env).spawn() {
            node.evict(id, None);
            shared.registry.remove(id);
            return Err(e);
        }

        info!("Created {} {} at {}", class, id, at);
        Ok(ActiveRef::new(id, class, at.clone()))
    }

    /// Register `T` if needed and create an instance.
    pub fn create<T: ActiveObject>(&self, args: Vec<Value>, at: &Location) -> Result<ActiveRef> {
        if !self.shared.classes.contains(T::CLASS) {
            self.register_class::<T>();
        }
        self.create_active_object(T::CLASS, args, at)
    }

    /// Asynchronous call from the runtime's own caller.
    pub fn invoke(&self, target: &ActiveRef, method: &str, args: Vec<Argument>) -> Future {
        self.caller.invoke(target, method, args)
    }

    /// Invoke and wait for the reply.
    pub fn call(&self, target: &ActiveRef, method: &str, args: Vec<Value>) -> std::result::Result<Value, FutureError> {
        self.invoke(target, method, args.into_iter().map(Argument::Value).collect())
            .wait()
    }

    pub fn send(&self, target: &ActiveRef, method: &str, args: Vec<Argument>) -> std::result::Result<(), TransportError> {
        self.caller.send(target, method, args)
    }

    /// A new independent caller whose replies arrive at `home`.
    pub fn caller(&self, home: &Location) -> Result<Caller> {
        self.node(home).ok_or_else(|| ActiveError::UnknownNode(home.clone()))?;
        Ok(Caller::new(home.clone(), Arc::downgrade(&self.shared)))
    }

    /// Move `target` to `destination`; returns the updated reference.
    pub fn migrate(&self, target: &ActiveRef, destination: &Location) -> Result<ActiveRef> {
        let at = manager::migrate(&self.shared, target.id(), destination)?;
        Ok(target.relocated(at))
    }

    /// Start checkpointing and logging `target`. Returns the epoch of the
    /// initial checkpoint.
    pub fn enable_fault_tolerance(&self, target: &ActiveRef, policy: FtPolicy) -> Result<u64> {
        let (_, handle) = self.live(target)?;
        let wait = self.control_wait(&policy);
        self.shared.ft_policies.insert(target.id(), policy.clone());

        let (respond, answer) = bounded(1);
        handle
            .send_control(Control::EnableFaultTolerance { policy, respond })
            .map_err(|_| TransportError::Terminated(target.id()))?;
        let result = answer
            .recv_timeout(wait)
            .map_err(|e| ActiveError::RuntimeError(format!("no answer from {}: {}", target.id(), e)))?;
        if result.is_err() {
            self.shared.ft_policies.remove(&target.id());
        }
        result
    }

    /// Take a checkpoint now and wait until the server committed it.
    pub fn checkpoint(&self, target: &ActiveRef) -> Result<u64> {
        let (_, handle) = self.live(target)?;
        let wait = self.control_wait(&self.policy_of(target.id()));

        let (respond, answer) = bounded(1);
        handle
            .send_control(Control::Checkpoint(respond))
            .map_err(|_| TransportError::Terminated(target.id()))?;
        answer
            .recv_timeout(wait)
            .map_err(|e| ActiveError::RuntimeError(format!("no answer from {}: {}", target.id(), e)))?
    }

    /// Fault injection: stop `target` abruptly, losing its volatile state.
    pub fn crash(&self, target: &ActiveRef) -> Result<()> {
        let (_, handle) = self.live(target)?;
        handle
            .send_control(Control::Crash)
            .map_err(|_| TransportError::Terminated(target.id()))?;
        handle.join();

        if handle.is_fault_tolerant() {
            let server = self.shared.recovery.clone();
            let id = target.id();
            let notified = self
                .shared
                .maintenance
                .run_bounded(self.policy_of(id).server_timeout, move || server.notify_crash(id));
            if let Err(e) = notified.and_then(|r| r) {
                warn!("Could not record crash of {}: {}", id, e);
            }
        }
        Ok(())
    }

    /// Recover a crashed fault-tolerant object where it was.
    pub fn recover(&self, target: &ActiveRef) -> Result<ReplayReport> {
        recovery::recover(&self.shared, target.id(), None)
    }

    /// Recover a crashed fault-tolerant object at another node.
    pub fn recover_at(&self, target: &ActiveRef, at: &Location) -> Result<ReplayReport> {
        recovery::recover(&self.shared, target.id(), Some(at.clone()))
    }

    /// Serve what is queued, then stop.
    pub fn terminate(&self, target: &ActiveRef) -> Result<()> {
        let (_, handle) = self.live(target)?;
        handle.mailbox().close_gracefully();
        handle.join();
        self.forget(target.id(), handle.is_fault_tolerant());
        Ok(())
    }

    /// Stop now; queued requests fail.
    pub fn terminate_now(&self, target: &ActiveRef) -> Result<()> {
        let (_, handle) = self.live(target)?;
        if handle.send_control(Control::Terminate).is_ok() {
            handle.join();
        }
        self.forget(target.id(), handle.is_fault_tolerant());
        Ok(())
    }

    /// Drop every trace of a terminated object, including what the
    /// recovery server keeps for it.
    fn forget(&self, id: ObjectId, fault_tolerant: bool) {
        self.shared.registry.remove(id);
        let policy = self.shared.ft_policies.remove(&id).map(|(_, p)| p);
        if fault_tolerant {
            let timeout = policy.map_or_else(|| self.policy_of(id).server_timeout, |p| p.server_timeout);
            let server = self.shared.recovery.clone();
            let forgotten = self
                .shared
                .maintenance
                .run_bounded(timeout, move || server.forget(id))
                .and_then(|r| r);
            if let Err(e) = forgotten {
                warn!("Recovery server still holds records of {}: {}", id, e);
            }
        }
        info!("Terminated {}", id);
    }

    pub fn status(&self, target: &ActiveRef) -> Option<BodyStatus> {
        self.shared.locate(target.id()).map(|(_, h)| h.status())
    }

    pub fn location_of(&self, id: ObjectId) -> Option<Location> {
        self.shared.registry.lookup(id).map(|r| r.location)
    }

    /// Mark `method` of `target` as an immediate service (or not).
    pub fn set_immediate_service(&self, target: &ActiveRef, method: &str, enabled: bool) -> Result<bool> {
        let (_, handle) = self.live(target)?;
        Ok(handle.mailbox().set_immediate(method, enabled))
    }

    /// Current state of `target`, captured between two requests.
    pub fn snapshot_state(&self, target: &ActiveRef) -> Result<Value> {
        let (_, handle) = self.live(target)?;
        let (respond, answer) = bounded(1);
        handle
            .send_control(Control::Snapshot(respond))
            .map_err(|_| TransportError::Terminated(target.id()))?;
        let state = answer
            .recv_timeout(self.shared.config.migration.timeout())
            .map_err(|e| ActiveError::RuntimeError(format!("no answer from {}: {}", target.id(), e)))??;
        Ok(state)
    }

    pub fn recovery_server(&self) -> Arc<dyn RecoveryServer> {
        self.shared.recovery.clone()
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.shared.transport.stats()
    }

    /// Run the future monitor once; returns the number of futures failed.
    pub fn monitor_futures(&self) -> usize {
        self.shared.monitor_futures()
    }

    /// Drop expired forwarders now.
    pub fn sweep_forwarders(&self) -> usize {
        self.shared.sweep_forwarders()
    }

    /// Stop every body and the maintenance tasks.
    pub fn shutdown(&self) {
        let bodies: Vec<Arc<BodyHandle>> = self
            .shared
            .transport
            .nodes()
            .iter()
            .flat_map(|n| {
                for target in n.futures().pending_targets() {
                    n.futures()
                        .fail_target(target, &FutureError::Transport(TransportError::Terminated(target)));
                }
                n.bodies()
            })
            .collect();

        for handle in &bodies {
            let _ = handle.send_control(Control::Terminate);
        }
        for handle in &bodies {
            handle.join();
        }
        self.shared.maintenance.shutdown();
        info!("Active runtime stopped ({} bodies)", bodies.len());
    }

    fn live(&self, target: &ActiveRef) -> Result<(Arc<Node>, Arc<BodyHandle>)> {
        self.shared
            .locate(target.id())
            .ok_or_else(|| TransportError::Terminated(target.id()).into())
    }

    fn policy_of(&self, id: ObjectId) -> FtPolicy {
        self.shared
            .ft_policies
            .get(&id)
            .map(|p| p.clone())
            .unwrap_or_else(|| FtPolicy::from_config(&self.shared.config.fault_tolerance))
    }

    /// Bound on a control round trip that involves the recovery server.
    fn control_wait(&self, policy: &FtPolicy) -> Duration {
        policy.server_timeout + self.shared.config.migration.timeout()
    }
}

impl Drop for ActiveRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
