//! Room session management.
//!
//! Owns one game plus one connection broker per active room and is the
//! single serialized entry point for everything inbound: actions, ready
//! marks, lifecycle notifications, and timer ticks. State mutation
//! happens first; fan-out to connected players happens after, so no
//! call ever blocks the room on delivery. Rooms are fully independent:
//! a protocol-level failure aborts its own room and nothing else.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::connection::{ConnectionBroker, Delivery};
use super::game::{Action, Game, GameError, GameEvent, Phase};
use super::view::{error_envelope, event_envelope, snapshot_envelope};
use super::{PlayerId, SessionConfig};

/// How long a finished room is kept before the sweep removes it
/// (5 minutes).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

/// One active room: authoritative game state plus transport liveness.
#[derive(Debug)]
pub struct RoomSession {
    pub game: Game,
    pub broker: ConnectionBroker,
}

/// Room-level errors: addressing problems the transport should know
/// about, plus wrapped game rejections from lifecycle calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    RoomNotFound,
    RoomAlreadyExists,
    PlayerNotInRoom,
    PlayerAlreadySeated(PlayerId),
    BadRosterSize(usize),
    Game(GameError),
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoomNotFound => write!(f, "no such room"),
            Self::RoomAlreadyExists => write!(f, "room already exists"),
            Self::PlayerNotInRoom => write!(f, "player is not in this room"),
            Self::PlayerAlreadySeated(id) => {
                write!(f, "player {} is already seated in another room", id)
            }
            Self::BadRosterSize(n) => write!(f, "roster of {} is outside 3-5 players", n),
            Self::Game(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for RoomError {}

/// Tracks all active rooms and routes inbound traffic to the right one.
#[derive(Debug, Default)]
pub struct RoomManager {
    rooms: HashMap<String, RoomSession>,

    /// Player id to room id.
    player_index: HashMap<PlayerId, String>,

    config: SessionConfig,
}

impl RoomManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            rooms: HashMap::new(),
            player_index: HashMap::new(),
            config,
        }
    }

    /// Open a room over a seated roster handed in by the lobby
    /// collaborator. Every player starts connected.
    pub fn open_room(&mut self, room_id: &str, roster: &[PlayerId]) -> Result<(), RoomError> {
        if self.rooms.contains_key(room_id) {
            return Err(RoomError::RoomAlreadyExists);
        }
        if !(super::game::MIN_PLAYERS..=super::game::MAX_PLAYERS).contains(&roster.len()) {
            return Err(RoomError::BadRosterSize(roster.len()));
        }
        for player_id in roster {
            if self.player_index.contains_key(player_id) {
                return Err(RoomError::PlayerAlreadySeated(*player_id));
            }
        }

        let game = Game::new(room_id.to_string(), roster, self.config.clone());
        let broker = ConnectionBroker::new(roster, self.config.grace_period);
        for player_id in roster {
            self.player_index.insert(*player_id, room_id.to_string());
        }
        self.rooms.insert(room_id.to_string(), RoomSession { game, broker });
        log::info!("room {}: opened with {} seats", room_id, roster.len());
        Ok(())
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomSession> {
        self.rooms.get(room_id)
    }

    pub fn count(&self) -> usize {
        self.rooms.len()
    }

    pub fn active_count(&self) -> usize {
        self.rooms
            .values()
            .filter(|s| s.game.phase().is_active())
            .count()
    }

    /// Mark a seat ready during the Lobby phase.
    pub fn mark_ready(&mut self, room_id: &str, player_id: PlayerId) -> Result<(), RoomError> {
        let session = self.session_for(room_id, player_id)?;
        session.broker.touch(player_id);
        session.game.mark_ready(player_id).map_err(RoomError::Game)
    }

    /// Lobby -> Deployment for a ready roster.
    pub fn start_game(&mut self, room_id: &str) -> Result<Vec<Delivery>, RoomError> {
        let session = self.rooms.get_mut(room_id).ok_or(RoomError::RoomNotFound)?;
        let events = session.game.start().map_err(RoomError::Game)?;
        Ok(fan_out(session, &events))
    }

    /// The single serialized entry point for player actions. Applies the
    /// action, then fans out per-player projections; a recoverable
    /// rejection produces one error delivery for the submitter and
    /// mutates nothing.
    pub fn submit(
        &mut self,
        room_id: &str,
        player_id: PlayerId,
        action: &Action,
    ) -> Result<Vec<Delivery>, RoomError> {
        let session = self.session_for(room_id, player_id)?;
        session.broker.touch(player_id);

        match session.game.apply(player_id, action) {
            Ok(events) => Ok(fan_out(session, &events)),
            Err(err) if err.is_protocol() => {
                log::error!("room {}: aborting session: {}", room_id, err);
                Ok(self.abort_room(room_id, &err))
            }
            Err(err) => {
                let payload = error_envelope(&err);
                Ok(session.broker.dispatch(player_id, payload).into_iter().collect())
            }
        }
    }

    /// Transport lost the player's socket; the grace window starts now.
    pub fn player_disconnected(&mut self, player_id: PlayerId) -> Result<(), RoomError> {
        let room_id = self
            .player_index
            .get(&player_id)
            .cloned()
            .ok_or(RoomError::PlayerNotInRoom)?;
        let session = self.rooms.get_mut(&room_id).ok_or(RoomError::RoomNotFound)?;
        session.broker.disconnect(player_id);
        log::debug!("room {}: player {} disconnected", room_id, player_id);
        Ok(())
    }

    /// The player's transport is back. Whether they return inside the
    /// grace window or after it expired, they get a full snapshot of
    /// their own projection and their turns stop auto-passing.
    pub fn player_reconnected(&mut self, player_id: PlayerId) -> Result<Option<Delivery>, RoomError> {
        let room_id = self
            .player_index
            .get(&player_id)
            .cloned()
            .ok_or(RoomError::PlayerNotInRoom)?;
        let session = self.rooms.get_mut(&room_id).ok_or(RoomError::RoomNotFound)?;

        if session.broker.get(player_id).is_none() {
            return Err(RoomError::PlayerNotInRoom);
        }
        if session.broker.reconnect(player_id).is_err() {
            // Grace expired while they were away; reinstate the seat.
            session.broker.reinstate(player_id);
        }
        session.game.set_auto_pass(player_id, false);
        log::debug!("room {}: player {} reconnected", room_id, player_id);

        let snapshot = snapshot_envelope(&session.game, player_id);
        Ok(session.broker.dispatch(player_id, snapshot))
    }

    /// Periodic driver: expire lapsed grace windows (marking those
    /// players auto-pass in running games) and convert an expired or
    /// auto-passing turn into an implicit Pass routed through the same
    /// entry point as any other action. At most one implicit pass per
    /// room per tick, so a fully absent roster cannot spin the engine.
    pub fn tick(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        let room_ids: Vec<String> = self.rooms.keys().cloned().collect();

        for room_id in room_ids {
            let implicit = {
                let Some(session) = self.rooms.get_mut(&room_id) else {
                    continue;
                };
                let expired = session.broker.expire_stale();
                for player_id in &expired {
                    log::warn!("room {}: grace expired for player {}", room_id, player_id);
                    if session.game.phase().is_active() {
                        session.game.set_auto_pass(*player_id, true);
                    }
                }

                if session.game.phase() == Phase::Action {
                    session.game.active_player().filter(|pid| {
                        session.game.is_auto_pass(*pid) || session.game.turn_expired()
                    })
                } else {
                    None
                }
            };

            if let Some(player_id) = implicit {
                log::debug!("room {}: implicit pass for player {}", room_id, player_id);
                if let Ok(mut deliveries) = self.submit(&room_id, player_id, &Action::Pass) {
                    out.append(&mut deliveries);
                }
            }
        }
        out
    }

    /// Sweep rooms that are done: terminal games past the retention
    /// window, and Lobby/Deployment rooms whose whole roster expired.
    /// Returns the removed room ids.
    pub fn cleanup(&mut self) -> Vec<String> {
        let removed: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, session)| {
                let phase = session.game.phase();
                if phase.is_terminal() {
                    past_retention(&session.game, self.config.retention)
                } else {
                    matches!(phase, Phase::Lobby | Phase::Deployment)
                        && session.broker.all_expired()
                }
            })
            .map(|(id, _)| id.clone())
            .collect();

        for room_id in &removed {
            log::info!("room {}: swept", room_id);
            self.close_room(room_id);
        }
        removed
    }

    // ---- internals ----

    fn session_for(
        &mut self,
        room_id: &str,
        player_id: PlayerId,
    ) -> Result<&mut RoomSession, RoomError> {
        if self.player_index.get(&player_id).map(String::as_str) != Some(room_id) {
            return Err(RoomError::PlayerNotInRoom);
        }
        self.rooms.get_mut(room_id).ok_or(RoomError::RoomNotFound)
    }

    fn close_room(&mut self, room_id: &str) {
        if let Some(session) = self.rooms.remove(room_id) {
            for player_id in session.game.seat_order() {
                self.player_index.remove(player_id);
            }
        }
    }

    /// Remove the room and tell every reachable participant why. The
    /// failure stays scoped to this room.
    fn abort_room(&mut self, room_id: &str, err: &GameError) -> Vec<Delivery> {
        let Some(mut session) = self.rooms.remove(room_id) else {
            return Vec::new();
        };
        for player_id in session.game.seat_order() {
            self.player_index.remove(player_id);
        }

        let roster: Vec<PlayerId> = session.game.seat_order().to_vec();
        roster
            .into_iter()
            .filter_map(|pid| session.broker.dispatch(pid, error_envelope(err)))
            .collect()
    }
}

/// Project every event for every seat and route through the broker:
/// connected players get deliveries, in-grace players get buffered,
/// expired players get nothing.
fn fan_out(session: &mut RoomSession, events: &[GameEvent]) -> Vec<Delivery> {
    let roster: Vec<PlayerId> = session.game.seat_order().to_vec();
    let mut out = Vec::new();
    for event in events {
        for player_id in &roster {
            let payload = event_envelope(event, &session.game, *player_id);
            if let Some(delivery) = session.broker.dispatch(*player_id, payload) {
                out.push(delivery);
            }
        }
    }
    out
}

fn past_retention(game: &Game, retention: Duration) -> bool {
    match game.ended_at {
        Some(ended) => chrono::Utc::now()
            .signed_duration_since(ended)
            .to_std()
            .map(|elapsed| elapsed >= retention)
            .unwrap_or(false),
        None => false,
    }
}
