// src/migration/manager.rs
//! Moving a live object between nodes
//!
//! # Protocol
//!
//! ```text
//!   caller                      body thread (origin)              destination
//!   ──────                      ────────────────────              ───────────
//!   migrate() ── Migrate ──►    between two requests:
//!   wait(ticket)                  ticket: Pending -> Committing
//!                                 on_departure, encode state
//!                                 transfer_out (mailbox locked) ─► install packet
//!                                                                  spawn body
//!                                 relocate, install forwarder
//!   ◄── Done(Ok(dest)) ────────   status Moved, thread exits
//! ```
//!
//! A ticket still pending when the caller's timeout expires is cancelled
//! and the body ignores it. Once committing, the caller waits for the
//! outcome: the object is either fully here or fully there.

use crate::body::control::Control;
use crate::body::handle::BodyStatus;
use crate::body::mailbox::Mailbox;
use crate::body::serving::{Body, BodyEnv, Flow};
use crate::body::BodyHandle;
use crate::fault_tolerance::manager::FtManager;
use crate::identity::{Location, ObjectId};
use crate::migration::packet::MigrationPacket;
use crate::observability;
use crate::runtime::active_runtime::RuntimeShared;
use crate::runtime::node::Node;
use crate::runtime::transport::Transport;
use crate::utils::errors::MigrationError;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type MigrationResult<T> = std::result::Result<T, MigrationError>;

#[derive(Debug)]
enum TicketState {
    Pending,
    Committing,
    Cancelled,
    Done(MigrationResult<Location>),
}

#[derive(Debug)]
struct TicketInner {
    destination: Location,
    state: Mutex<TicketState>,
    done: Condvar,
}

/// Handshake between a migration caller and the migrating body
#[derive(Debug, Clone)]
pub(crate) struct MigrationTicket {
    inner: Arc<TicketInner>,
}

enum Phase {
    Finished(MigrationResult<Location>),
    Expired,
    Wait,
}

impl MigrationTicket {
    pub(crate) fn new(destination: Location) -> Self {
        Self {
            inner: Arc::new(TicketInner {
                destination,
                state: Mutex::new(TicketState::Pending),
                done: Condvar::new(),
            }),
        }
    }

    pub(crate) fn destination(&self) -> &Location {
        &self.inner.destination
    }

    /// Claim the ticket for execution; false if the caller gave up.
    pub(crate) fn begin_commit(&self) -> bool {
        let mut state = self.inner.state.lock();
        match *state {
            TicketState::Pending => {
                *state = TicketState::Committing;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn finish(&self, result: MigrationResult<Location>) {
        let mut state = self.inner.state.lock();
        if !matches!(*state, TicketState::Cancelled) {
            *state = TicketState::Done(result);
        }
        drop(state);
        self.inner.done.notify_all();
    }

    /// Wait for the outcome. Only a ticket nobody started can time out.
    pub(crate) fn wait(&self, timeout: Duration) -> MigrationResult<Location> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            let phase = match &*state {
                TicketState::Done(result) => Phase::Finished(result.clone()),
                TicketState::Cancelled => Phase::Finished(Err(MigrationError::Timeout(timeout))),
                TicketState::Pending if Instant::now() >= deadline => Phase::Expired,
                TicketState::Pending | TicketState::Committing => Phase::Wait,
            };
            match phase {
                Phase::Finished(result) => return result,
                Phase::Expired => {
                    *state = TicketState::Cancelled;
                    return Err(MigrationError::Timeout(timeout));
                }
                Phase::Wait => {
                    if matches!(*state, TicketState::Committing) {
                        self.inner.done.wait(&mut state);
                    } else {
                        self.inner.done.wait_until(&mut state, deadline);
                    }
                }
            }
        }
    }
}

/// Move `id` to `destination`, blocking until the move is done or refused.
pub(crate) fn migrate(shared: &Arc<RuntimeShared>, id: ObjectId, destination: &Location) -> MigrationResult<Location> {
    let (node, handle) = shared.locate(id).ok_or(MigrationError::NotLocal(id))?;
    if node.location() == destination {
        debug!("{} already at {}", id, destination);
        return Ok(destination.clone());
    }
    if !shared.transport.node(destination).is_some_and(|n| n.is_reachable()) {
        return Err(MigrationError::DestinationUnreachable(destination.clone()));
    }
    if !handle.begin_migration() {
        return Err(MigrationError::InProgress(id));
    }

    let result = request_departure(shared, &handle, destination);
    handle.end_migration();

    match &result {
        Ok(to) => {
            metrics::counter!(observability::MIGRATIONS).increment(1);
            info!("Migrated {} from {} to {}", id, node.location(), to);
        }
        Err(e) => warn!("Migration of {} to {} failed: {}", id, destination, e),
    }
    result
}

fn request_departure(
    shared: &Arc<RuntimeShared>,
    handle: &Arc<BodyHandle>,
    destination: &Location,
) -> MigrationResult<Location> {
    let id = handle.id();
    if handle.checkpoint_in_flight() {
        return Err(MigrationError::CheckpointInProgress(id));
    }
    if !matches!(handle.status(), BodyStatus::Active | BodyStatus::Checkpointing) {
        return Err(MigrationError::NotActive(id));
    }

    let ticket = MigrationTicket::new(destination.clone());
    handle
        .send_control(Control::Migrate(ticket.clone()))
        .map_err(|_| MigrationError::NotActive(id))?;
    ticket.wait(shared.config.migration.timeout())
}

/// Executed by the body thread when it takes a migrate ticket.
pub(crate) fn depart(body: &mut Body, ticket: MigrationTicket) -> Flow {
    let id = body.env.id;
    if !ticket.begin_commit() {
        debug!("Migration ticket of {} was cancelled", id);
        return Flow::Continue;
    }
    if body.env.handle.checkpoint_in_flight() {
        ticket.finish(Err(MigrationError::CheckpointInProgress(id)));
        return Flow::Continue;
    }
    let Some(shared) = body.env.shared() else {
        ticket.finish(Err(MigrationError::NotActive(id)));
        return Flow::Continue;
    };

    let destination = ticket.destination().clone();
    body.env.handle.set_status(BodyStatus::MigratingOut);
    body.env.mailbox().set_transferring();
    body.object.depart();

    let state = match body
        .object
        .capture()
        .and_then(|value| shared.codec.encode(&value))
    {
        Ok(state) => Bytes::from(state),
        Err(e) => {
            abort(body, ticket, MigrationError::Serialization(e.to_string()));
            return Flow::Continue;
        }
    };

    let seen = shared.registry.lookup(id).map_or(0, |r| r.epoch);
    let env = &body.env;
    let shipped = env.mailbox().transfer_out(|requests, sequencer| {
        let packet = MigrationPacket {
            object_id: id,
            class: env.class.clone(),
            state,
            requests,
            sequencer,
            outbound: env.outbound_snapshot(),
            next_reply_seq: env.next_reply_seq,
            policy: env.mailbox().policy(),
            ft: env.ft.as_ref().map(FtManager::snapshot),
            held: env.held.clone(),
            continuations: env.continuations,
            origin: env.location.clone(),
        };
        debug!(
            "Shipping {} to {} ({} bytes, {} queued requests)",
            id,
            destination,
            packet.state_size(),
            packet.requests.len()
        );
        shared.transport.transfer(packet, &destination).map(|_| destination.clone())
    });

    match shipped {
        Ok(leftover) => {
            if let Err(e) = shared.registry.relocate(id, destination.clone(), seen) {
                warn!("Registry update for {} raced with another writer: {}", id, e);
            }
            if let Some(origin) = shared.transport.node(&body.env.location) {
                origin
                    .forwarders()
                    .insert(id, destination.clone(), shared.config.migration.grace_period());
                origin.evict(id, Some(&body.env.handle));
            }
            body.env.handle.set_status(BodyStatus::Moved(destination.clone()));
            for control in leftover {
                debug!("Forwarding {:?} of {} to {}", control, id, destination);
                shared.route_control(id, control);
            }
            ticket.finish(Ok(destination));
            Flow::Stop
        }
        Err(e) => {
            abort(body, ticket, e);
            Flow::Continue
        }
    }
}

fn abort(body: &mut Body, ticket: MigrationTicket, error: MigrationError) {
    body.object.arrive();
    body.env.mailbox().reopen();
    body.env.handle.set_status(BodyStatus::Active);
    ticket.finish(Err(error));
}

/// Install an arriving object at `node` and start serving it.
pub(crate) fn arrive(shared: &Arc<RuntimeShared>, node: &Arc<Node>, packet: MigrationPacket) -> MigrationResult<()> {
    let id = packet.object_id;
    let state = shared
        .codec
        .decode(&packet.state)
        .map_err(|e| MigrationError::Serialization(e.to_string()))?;
    let mut object = shared
        .classes
        .restore(&packet.class, state)
        .ok_or_else(|| MigrationError::Serialization(format!("class {} is not registered", packet.class)))?
        .map_err(|e| MigrationError::Serialization(e.to_string()))?;
    object.arrive();

    let mailbox = Arc::new(Mailbox::restore(
        id,
        shared.config.mailbox.capacity,
        packet.policy,
        packet.sequencer,
        packet.requests,
    ));
    let handle = Arc::new(BodyHandle::new(id, packet.class.clone(), mailbox, packet.ft.is_some()));

    let mut env = BodyEnv::new(
        id,
        packet.class,
        node.location().clone(),
        handle.clone(),
        Arc::downgrade(shared),
        shared.config.runtime.idle_tick(),
    );
    env.outbound = packet.outbound.into_iter().collect();
    env.next_reply_seq = packet.next_reply_seq;
    env.ft = packet
        .ft
        .map(|snapshot| FtManager::from_snapshot(id, snapshot, shared.recovery.clone()));
    env.held = packet.held;
    env.continuations = packet.continuations;

    node.host(handle);
    Body::new(object, env)
        .spawn()
        .map_err(|e| MigrationError::Serialization(e.to_string()))?;
    debug!("{} arrived at {} from {}", id, node.location(), packet.origin);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_pending_ticket_times_out_and_is_cancelled() {
        let ticket = MigrationTicket::new(Location::new("b", 2));
        let result = ticket.wait(Duration::from_millis(20));
        assert!(matches!(result, Err(MigrationError::Timeout(_))));
        assert!(!ticket.begin_commit());
    }

    #[test]
    fn test_committing_ticket_waits_for_outcome() {
        let ticket = MigrationTicket::new(Location::new("b", 2));
        assert!(ticket.begin_commit());

        let worker = ticket.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            worker.finish(Ok(worker.destination().clone()));
        });
        assert_eq!(ticket.wait(Duration::from_millis(5)), Ok(Location::new("b", 2)));
        t.join().unwrap();
    }
}
