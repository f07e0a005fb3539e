//! Connection tracking for one room.
//!
//! Maps player identity to transport liveness and handles the
//! reconnection grace window. The broker never touches game state; it
//! only decides whether an outbound payload is delivered now, buffered
//! for a disconnected-in-grace player, or dropped for an expired one.
//! Reconnection resync is a full snapshot, so the buffer is discarded
//! the moment a player returns.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::PlayerId;

/// Default grace period for reconnection (60 seconds).
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Connection status for a single player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Actively connected.
    Connected,

    /// Disconnected, within grace period for reconnection.
    Disconnected {
        since: Instant,
        grace_until: Instant,
    },

    /// Grace period elapsed without a reconnect.
    Expired,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if within the reconnection grace period.
    pub fn is_reconnectable(&self) -> bool {
        match self {
            Self::Connected => true,
            Self::Disconnected { grace_until, .. } => Instant::now() < *grace_until,
            Self::Expired => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self {
            Self::Expired => true,
            Self::Disconnected { grace_until, .. } => Instant::now() >= *grace_until,
            Self::Connected => false,
        }
    }
}

/// A payload addressed to a player who was disconnected when it was
/// produced. Dropped on expiry, superseded by the snapshot on reconnect.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub seq: u64,
    pub payload: Value,
    pub queued_at: Instant,
}

/// An outbound payload the transport should deliver now.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub player_id: PlayerId,
    pub seq: u64,
    pub payload: Value,
}

/// Transport state for a single player.
#[derive(Debug, Clone)]
pub struct Connection {
    pub player_id: PlayerId,
    pub status: ConnectionStatus,
    pub connected_at: Instant,
    pub last_activity: Instant,

    /// Monotonic sequence stamped on every outbound payload.
    send_seq: u64,

    pending: Vec<PendingMessage>,
}

impl Connection {
    pub fn new(player_id: PlayerId) -> Self {
        let now = Instant::now();
        Self {
            player_id,
            status: ConnectionStatus::Connected,
            connected_at: now,
            last_activity: now,
            send_seq: 0,
            pending: Vec::new(),
        }
    }

    /// Mark as disconnected with the given grace period.
    pub fn disconnect_with_grace(&mut self, grace: Duration) {
        let now = Instant::now();
        self.status = ConnectionStatus::Disconnected {
            since: now,
            grace_until: now + grace,
        };
    }

    /// Restore Connected status. Returns the number of buffered payloads
    /// discarded in favour of the snapshot resync.
    pub fn reconnect(&mut self) -> Result<usize, &'static str> {
        match &self.status {
            ConnectionStatus::Connected => {
                self.last_activity = Instant::now();
                Ok(0)
            }
            ConnectionStatus::Disconnected { grace_until, .. } => {
                if Instant::now() < *grace_until {
                    self.status = ConnectionStatus::Connected;
                    self.last_activity = Instant::now();
                    let dropped = self.pending.len();
                    self.pending.clear();
                    Ok(dropped)
                } else {
                    Err("grace period expired")
                }
            }
            ConnectionStatus::Expired => Err("connection expired"),
        }
    }

    pub fn expire(&mut self) {
        self.status = ConnectionStatus::Expired;
        self.pending.clear();
    }

    /// Record activity (any message received).
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn next_seq(&mut self) -> u64 {
        self.send_seq += 1;
        self.send_seq
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }
}

/// Connection broker for one room's roster.
#[derive(Debug)]
pub struct ConnectionBroker {
    connections: HashMap<PlayerId, Connection>,
    grace: Duration,
}

impl ConnectionBroker {
    /// Create a broker over the roster; every player starts Connected.
    pub fn new(roster: &[PlayerId], grace: Duration) -> Self {
        let connections = roster
            .iter()
            .map(|id| (*id, Connection::new(*id)))
            .collect();
        Self { connections, grace }
    }

    pub fn get(&self, player_id: PlayerId) -> Option<&Connection> {
        self.connections.get(&player_id)
    }

    pub fn is_connected(&self, player_id: PlayerId) -> bool {
        self.connections
            .get(&player_id)
            .map(|c| c.status.is_connected())
            .unwrap_or(false)
    }

    pub fn touch(&mut self, player_id: PlayerId) {
        if let Some(conn) = self.connections.get_mut(&player_id) {
            conn.touch();
        }
    }

    /// Mark a player disconnected, starting the grace window.
    pub fn disconnect(&mut self, player_id: PlayerId) {
        if let Some(conn) = self.connections.get_mut(&player_id) {
            conn.disconnect_with_grace(self.grace);
        }
    }

    /// Restore a player inside their grace window.
    pub fn reconnect(&mut self, player_id: PlayerId) -> Result<usize, &'static str> {
        self.connections
            .get_mut(&player_id)
            .ok_or("unknown player")?
            .reconnect()
    }

    /// Replace a seat's connection with a fresh one. Used when a player
    /// returns after their grace window already expired; the game seat
    /// itself is never forfeited by absence.
    pub fn reinstate(&mut self, player_id: PlayerId) {
        if let Some(conn) = self.connections.get_mut(&player_id) {
            *conn = Connection::new(player_id);
        }
    }

    /// Route an outbound payload: deliver if connected, buffer if inside
    /// grace, drop if expired. Returns the delivery for the transport,
    /// if any.
    pub fn dispatch(&mut self, player_id: PlayerId, payload: Value) -> Option<Delivery> {
        let conn = self.connections.get_mut(&player_id)?;
        let seq = conn.next_seq();
        match &conn.status {
            ConnectionStatus::Connected => Some(Delivery {
                player_id,
                seq,
                payload,
            }),
            ConnectionStatus::Disconnected { .. } => {
                conn.pending.push(PendingMessage {
                    seq,
                    payload,
                    queued_at: Instant::now(),
                });
                None
            }
            ConnectionStatus::Expired => None,
        }
    }

    /// Expire connections whose grace window has elapsed. Returns the
    /// players newly expired this sweep.
    pub fn expire_stale(&mut self) -> Vec<PlayerId> {
        let mut expired = Vec::new();
        for (player_id, conn) in &mut self.connections {
            if !matches!(conn.status, ConnectionStatus::Expired) && conn.status.is_expired() {
                conn.expire();
                expired.push(*player_id);
            }
        }
        expired
    }

    pub fn connected_players(&self) -> Vec<PlayerId> {
        self.connections
            .iter()
            .filter(|(_, c)| c.status.is_connected())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.status.is_connected())
            .count()
    }

    /// True when nobody is connected and nobody can come back.
    pub fn all_expired(&self) -> bool {
        self.connections
            .values()
            .all(|c| matches!(c.status, ConnectionStatus::Expired))
    }
}
