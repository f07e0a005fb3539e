//! Session engine for Mowan.
//!
//! This module contains the whole per-room core:
//!
//! - `board` - per-player hidden sub-boards and the shared common area
//! - `duel` - pure resolution of two opposing digits
//! - `turn` - active-player scheduling over the alive roster
//! - `game` - the phase state machine applying validated actions
//! - `view` - pure per-player visibility projections
//! - `connection` - transport liveness, grace windows, buffering
//! - `room` - one serialized entry point per room, fan-out after apply
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         RoomManager                            │
//! │                                                                │
//! │  room_id → RoomSession                                         │
//! │            ┌──────────────────────────┐  ┌──────────────────┐  │
//! │            │          Game            │  │ ConnectionBroker │  │
//! │            │                          │  │                  │  │
//! │            │  Phase ── TurnScheduler  │  │ player → status  │  │
//! │            │    │                     │  │   Connected      │  │
//! │            │  PlayerBoard ×N          │  │   Disconnected   │  │
//! │            │  CommonArea ── resolve() │  │   Expired        │  │
//! │            └──────────────────────────┘  └──────────────────┘  │
//! │                         │                        ▲             │
//! │                 view::project(game, player) ─────┘             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound `(room_id, player_id, Action)` triples go through
//! [`room::RoomManager::submit`], one at a time per room. The state
//! machine mutates, the projector derives a per-player view, and the
//! broker turns those views into [`connection::Delivery`] values for
//! the transport. Rooms never share state; a failure in one cannot
//! touch another.

pub mod board;
pub mod connection;
pub mod duel;
pub mod game;
pub mod room;
pub mod turn;
pub mod view;

use std::time::Duration;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use board::{CommonArea, CommonPiece, Piece, PlayerBoard, Position};
pub use connection::{Connection, ConnectionBroker, ConnectionStatus, Delivery, PendingMessage};
pub use duel::{resolve, DuelOutcome};
pub use game::{Action, Game, GameError, GameEvent, GamePlayer, Phase, Spot};
pub use room::{RoomError, RoomManager, RoomSession};
pub use turn::{NoPlayersRemain, TurnScheduler};
pub use view::{error_envelope, event_envelope, project, snapshot_envelope};

/// Stable player identity, assigned by the account collaborator.
pub type PlayerId = i64;

/// Per-session tuning. Everything has a sensible default; deployment
/// zone geometry is configurable pending per-room-size rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Rows per player sub-board.
    pub board_rows: usize,

    /// Columns per player sub-board.
    pub board_cols: usize,

    /// How long a disconnected player may reconnect before their turns
    /// start auto-passing.
    pub grace_period: Duration,

    /// Optional per-turn think-time limit. Expiry is an implicit pass
    /// through the ordinary action path.
    pub turn_timeout: Option<Duration>,

    /// How long a finished room is kept before the sweep removes it.
    pub retention: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            board_rows: board::DEFAULT_BOARD_ROWS,
            board_cols: board::DEFAULT_BOARD_COLS,
            grace_period: connection::DEFAULT_GRACE_PERIOD,
            turn_timeout: None,
            retention: room::DEFAULT_RETENTION,
        }
    }
}
