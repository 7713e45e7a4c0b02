//! Session registry for ops and metrics. `SPEC_FULL.md` §3.
//!
//! The engine itself is single-owner and stateless beyond one connection
//! (see `engine::session`'s module doc); nothing in `TunnelEngine` reads
//! this registry. It exists purely so the façade can answer "how many
//! sessions are in which state" for `/metrics` and structured logging,
//! mirroring the split between the teacher's `Monitor` (the shared table)
//! and `MonitorActor` (the cheap per-connection handle that writes into it).

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use ahash::AHashMap;
use engine::{SessionId, State};

#[derive(Debug, Clone, Copy)]
pub struct SessionSnapshot {
    pub client_addr: SocketAddr,
    pub state: State,
}

/// Shared session table. Cloning is cheap; clones share the same map.
#[derive(Clone, Default)]
pub struct Monitor {
    sessions: Arc<RwLock<AHashMap<SessionId, SessionSnapshot>>>,
}

impl Monitor {
    /// Hands out a handle a connection task can use to report its own
    /// lifecycle without holding a reference to the whole registry.
    pub fn get_actor(&self) -> MonitorActor {
        MonitorActor(self.sessions.clone())
    }

    /// Snapshots the registry, grouped by state, for `/metrics` and the
    /// admin surface. Order is not meaningful; callers that need counts
    /// only should prefer [`Monitor::counts_by_state`].
    pub fn get_sessions(&self) -> Vec<(SessionId, SessionSnapshot)> {
        self.sessions
            .read()
            .unwrap()
            .iter()
            .map(|(id, snapshot)| (*id, *snapshot))
            .collect()
    }

    /// Counts sessions per state, in the fixed tunnel-lifecycle order, with
    /// zero-count states included so a caller can always find every key.
    pub fn counts_by_state(&self) -> Vec<(State, usize)> {
        const STATES: [State; 7] = [
            State::Initialized,
            State::Handshake,
            State::TunnelCreate,
            State::TunnelAuthorize,
            State::ChannelCreate,
            State::Opened,
            State::Closed,
        ];

        let sessions = self.sessions.read().unwrap();
        STATES
            .iter()
            .map(|state| {
                let count = sessions.values().filter(|s| s.state == *state).count();
                (*state, count)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}

/// Per-connection handle into the registry. Held by the task driving a
/// single `TunnelEngine`; never shared across connections.
#[derive(Clone)]
pub struct MonitorActor(Arc<RwLock<AHashMap<SessionId, SessionSnapshot>>>);

impl MonitorActor {
    pub fn opened(&self, id: SessionId, client_addr: SocketAddr) {
        self.0.write().unwrap().insert(
            id,
            SessionSnapshot {
                client_addr,
                state: State::Initialized,
            },
        );
    }

    pub fn set_state(&self, id: SessionId, state: State) {
        if let Some(snapshot) = self.0.write().unwrap().get_mut(&id) {
            snapshot.state = state;
        }
    }

    pub fn closed(&self, id: SessionId) {
        self.0.write().unwrap().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_writes_are_visible_through_the_registry() {
        let monitor = Monitor::default();
        let actor = monitor.get_actor();
        let id = SessionId(1);
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        actor.opened(id, addr);
        assert_eq!(monitor.len(), 1);

        actor.set_state(id, State::Opened);
        let counts = monitor.counts_by_state();
        assert_eq!(
            counts.iter().find(|(s, _)| *s == State::Opened),
            Some(&(State::Opened, 1))
        );

        actor.closed(id);
        assert_eq!(monitor.len(), 0);
    }

    #[test]
    fn counts_by_state_groups_multiple_sessions() {
        let monitor = Monitor::default();
        let actor = monitor.get_actor();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        actor.opened(SessionId(1), addr);
        actor.opened(SessionId(2), addr);
        actor.set_state(SessionId(1), State::Opened);
        actor.set_state(SessionId(2), State::Handshake);

        let counts = monitor.counts_by_state();
        assert_eq!(
            counts.iter().find(|(s, _)| *s == State::Opened),
            Some(&(State::Opened, 1))
        );
        assert_eq!(
            counts.iter().find(|(s, _)| *s == State::Handshake),
            Some(&(State::Handshake, 1))
        );
    }
}
