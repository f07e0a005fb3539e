//! Mowan Session Library
//!
//! This crate provides the per-room session engine for Mowan, a 3-5
//! player hidden-information elimination board game.
//!
//! # Overview
//!
//! The session module provides:
//!
//! - **Board Model** - Per-player hidden sub-boards, the shared common
//!   area, and the placement/movement invariants.
//!
//! - **Duel Resolver** - Pure resolution of two opposing digits, with
//!   the inverted rank order and its special pairs.
//!
//! - **Session State Machine** - Phase and turn legality, deployment,
//!   synchronous duel resolution, elimination, and game over.
//!
//! - **Visibility & Connections** - Pure per-player projections of the
//!   authoritative state, plus reconnection with grace periods and
//!   full-snapshot resync.
//!
//! # Design Principles
//!
//! 1. **One authoritative state per room** - Clients observe pure
//!    projections of it; partial views are never stored or mutated.
//!
//! 2. **Serialized rooms, parallel fleet** - All inbound traffic for a
//!    room goes through one entry point, one action at a time. Rooms
//!    are independent and failures stay inside their room.
//!
//! 3. **No networking** - This crate is pure state, no WebSocket or
//!    HTTP. The transport collaborator ships the returned deliveries.
//!
//! 4. **Rejections change nothing** - An illegal action is reported to
//!    its submitter and the turn is not consumed.
//!
//! # Example
//!
//! ```rust
//! use mowan_session::session::{Action, Position, RoomManager, SessionConfig};
//!
//! let mut rooms = RoomManager::new(SessionConfig::default());
//!
//! // The lobby collaborator hands over a seated roster.
//! rooms.open_room("r-7Qx2", &[11, 12, 13]).unwrap();
//! for player in [11, 12, 13] {
//!     rooms.mark_ready("r-7Qx2", player).unwrap();
//! }
//!
//! // Starting fans a game_started envelope out to every seat.
//! let deliveries = rooms.start_game("r-7Qx2").unwrap();
//! assert_eq!(deliveries.len(), 3);
//!
//! // Players deploy concurrently, one digit at a time.
//! rooms
//!     .submit(
//!         "r-7Qx2",
//!         11,
//!         &Action::Place { digit: 0, at: Position::new(0, 0) },
//!     )
//!     .unwrap();
//! ```

pub mod session;

// Re-export everything from session module at crate root
pub use session::*;
