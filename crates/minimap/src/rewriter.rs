//! Keeps overlay carriers out of the passenger updates a client sees.
//!
//! Carriers ride the owner as passengers. The host knows nothing about
//! them, so every SetPassengers it sends for the owner would dismount them,
//! and any passenger list naming a carrier for another vehicle would leak
//! it. The rewriter sits in the owner's outbound pipeline and fixes both,
//! keyed strictly on carrier entity ids.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use protocol::packets::{peek_server_opcode, ServerOpcode, SetPassengers};
use tracing::debug;

use crate::transport::{ConnectionId, OutboundFilter};

/// Pipeline stage name of the rewriter.
pub const REWRITER_NAME: &str = "passenger_rewriter";

/// Lifecycle of a connection's rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriterPhase {
    /// Installed at join; no carriers mounted yet.
    Installed,
    /// At least one carrier is mounted on the owner.
    Active,
    /// Detached at quit; passes everything through.
    Removed,
}

/// Mount bookkeeping shared by the rewriter and the packet sender.
#[derive(Debug)]
pub struct MountState {
    connection: ConnectionId,
    vehicle: i32,
    phase: RewriterPhase,
    carriers: Vec<i32>,
    real_passengers: Vec<i32>,
}

pub type SharedMountState = Arc<Mutex<MountState>>;

impl MountState {
    /// State for the connection whose player entity is `vehicle`.
    pub fn new(connection: ConnectionId, vehicle: i32) -> Self {
        Self {
            connection,
            vehicle,
            phase: RewriterPhase::Installed,
            carriers: Vec::new(),
            real_passengers: Vec::new(),
        }
    }

    pub fn shared(connection: ConnectionId, vehicle: i32) -> SharedMountState {
        Arc::new(Mutex::new(Self::new(connection, vehicle)))
    }

    #[inline]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    #[inline]
    pub fn vehicle(&self) -> i32 {
        self.vehicle
    }

    #[inline]
    pub fn phase(&self) -> RewriterPhase {
        self.phase
    }

    pub fn carriers(&self) -> &[i32] {
        &self.carriers
    }

    pub fn is_carrier(&self, entity_id: i32) -> bool {
        self.carriers.contains(&entity_id)
    }

    pub fn add_carrier(&mut self, entity_id: i32) {
        if self.phase == RewriterPhase::Removed {
            return;
        }
        if !self.carriers.contains(&entity_id) {
            self.carriers.push(entity_id);
        }
        self.phase = RewriterPhase::Active;
    }

    pub fn remove_carrier(&mut self, entity_id: i32) {
        self.carriers.retain(|&id| id != entity_id);
        if self.carriers.is_empty() && self.phase == RewriterPhase::Active {
            self.phase = RewriterPhase::Installed;
        }
    }

    pub fn remove(&mut self) {
        self.phase = RewriterPhase::Removed;
        self.carriers.clear();
    }

    /// What the owner's passenger list should be on the client.
    pub fn passengers(&self) -> Vec<i32> {
        self.real_passengers
            .iter()
            .chain(self.carriers.iter())
            .copied()
            .collect()
    }

    /// Owner passengers as the host last reported them.
    pub fn real_passengers(&self) -> &[i32] {
        &self.real_passengers
    }
}

/// Lock a shared mount state, recovering it if a holder panicked.
pub fn lock(state: &SharedMountState) -> MutexGuard<'_, MountState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outbound filter rewriting SetPassengers packets for one connection.
pub struct PassengerRewriter {
    state: SharedMountState,
}

impl PassengerRewriter {
    pub fn new(state: SharedMountState) -> Self {
        Self { state }
    }

    fn rewrite(&self, packet: Bytes) -> Option<Bytes> {
        let Ok(mut msg) = SetPassengers::decode(&packet) else {
            return Some(packet);
        };
        let mut state = lock(&self.state);
        if state.phase == RewriterPhase::Removed {
            return Some(packet);
        }

        if msg.vehicle == state.vehicle {
            let real: Vec<i32> = msg
                .passengers
                .iter()
                .copied()
                .filter(|id| !state.is_carrier(*id))
                .collect();
            state.real_passengers = real;
            let merged = state.passengers();
            if merged == msg.passengers {
                return Some(packet);
            }
            msg.passengers = merged;
            return Some(msg.encode().finish());
        }

        if state.is_carrier(msg.vehicle) {
            debug!("Dropped passenger update for carrier {} on {}", msg.vehicle, state.connection);
            return None;
        }

        if msg.passengers.iter().any(|id| state.is_carrier(*id)) {
            msg.passengers.retain(|id| !state.carriers.contains(id));
            return Some(msg.encode().finish());
        }

        Some(packet)
    }
}

impl OutboundFilter for PassengerRewriter {
    fn filter(&mut self, packet: Bytes) -> Option<Bytes> {
        match peek_server_opcode(&packet) {
            Ok(op) if op == ServerOpcode::SetPassengers as i32 => self.rewrite(packet),
            _ => Some(packet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::packets::build_system_chat;

    const OWNER: i32 = 10;
    const CARRIER: i32 = 0x7000_0000;

    fn active() -> (PassengerRewriter, SharedMountState) {
        let state = MountState::shared(ConnectionId(1), OWNER);
        lock(&state).add_carrier(CARRIER);
        (PassengerRewriter::new(state.clone()), state)
    }

    fn passengers(vehicle: i32, ids: &[i32]) -> Bytes {
        SetPassengers::new(vehicle, ids.to_vec()).encode().finish()
    }

    #[test]
    fn test_unrelated_packets_are_untouched() {
        let (mut rewriter, _) = active();
        let chat = build_system_chat("hello", false).finish();
        assert_eq!(rewriter.filter(chat.clone()), Some(chat));

        // A real mount that involves no carrier.
        let boat = passengers(77, &[OWNER]);
        assert_eq!(rewriter.filter(boat.clone()), Some(boat));

        // Garbage is passed on for the next stage to deal with.
        let junk = Bytes::from_static(&[0x5D, 0xFF]);
        assert_eq!(rewriter.filter(junk.clone()), Some(junk));
    }

    #[test]
    fn test_owner_update_keeps_carriers_mounted() {
        let (mut rewriter, state) = active();
        let out = rewriter.filter(passengers(OWNER, &[42])).unwrap();
        let msg = SetPassengers::decode(&out).unwrap();
        assert_eq!(msg.passengers, vec![42, CARRIER]);
        assert_eq!(lock(&state).real_passengers(), &[42]);

        // Already merged: passes as is.
        let merged = passengers(OWNER, &[42, CARRIER]);
        assert_eq!(rewriter.filter(merged.clone()), Some(merged));
    }

    #[test]
    fn test_carrier_references_are_stripped_elsewhere() {
        let (mut rewriter, _) = active();
        assert_eq!(rewriter.filter(passengers(CARRIER, &[5])), None);

        let out = rewriter.filter(passengers(99, &[CARRIER, 3])).unwrap();
        assert_eq!(SetPassengers::decode(&out).unwrap(), SetPassengers::new(99, vec![3]));
    }

    #[test]
    fn test_phases() {
        let state = MountState::shared(ConnectionId(1), OWNER);
        let mut rewriter = PassengerRewriter::new(state.clone());
        assert_eq!(lock(&state).phase(), RewriterPhase::Installed);

        let plain = passengers(OWNER, &[4]);
        assert_eq!(rewriter.filter(plain.clone()), Some(plain.clone()));

        lock(&state).add_carrier(CARRIER);
        assert_eq!(lock(&state).phase(), RewriterPhase::Active);
        lock(&state).remove_carrier(CARRIER);
        assert_eq!(lock(&state).phase(), RewriterPhase::Installed);

        lock(&state).add_carrier(CARRIER);
        lock(&state).remove();
        assert_eq!(rewriter.filter(plain.clone()), Some(plain));
        lock(&state).add_carrier(CARRIER);
        assert!(lock(&state).carriers().is_empty());
    }
}
