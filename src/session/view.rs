//! Per-player visibility projection.
//!
//! One authoritative state, one pure projection function per viewer:
//! a player sees their own digits, everyone's occupancy, and whatever
//! duels have revealed. The projection is derived from the true state
//! alone every time it is needed, which is what makes full-snapshot
//! reconnection correct: there is no accumulated per-client view.

use serde_json::{json, Value};

use super::game::{Game, GameError, GameEvent, GamePlayer};
use super::PlayerId;

/// Project the full game state as seen by `viewer`.
///
/// Public to everyone: phase, active player, winner, seat order, ready
/// and elimination flags, lost digits, hand counts, occupancy masks,
/// and revealed common-area digits. Private to the viewer: their own
/// grid digits, their hand, and their own unrevealed common digits.
pub fn project(game: &Game, viewer: PlayerId) -> Value {
    let players: Vec<Value> = game
        .players_in_seat_order()
        .map(|p| project_player(p, viewer))
        .collect();

    let common: Vec<Value> = game
        .common()
        .iter()
        .map(|piece| {
            let digit = if piece.revealed || piece.owner == viewer {
                json!(piece.digit)
            } else {
                Value::Null
            };
            json!({
                "owner": piece.owner,
                "revealed": piece.revealed,
                "digit": digit,
            })
        })
        .collect();

    json!({
        "room_id": game.id,
        "phase": game.phase().as_str(),
        "active_player": game.active_player(),
        "winner": game.winner,
        "players": players,
        "common": common,
    })
}

fn project_player(player: &GamePlayer, viewer: PlayerId) -> Value {
    let mut entry = json!({
        "player_id": player.player_id,
        "seat": player.seat,
        "ready": player.is_ready,
        "eliminated": player.eliminated,
        "auto_pass": player.auto_pass,
        "lost": player.board.lost(),
        "hand_count": player.board.hand().len(),
        "board_occupied": player.board.occupied_mask(),
    });

    if player.player_id == viewer {
        let rows: Vec<Value> = player
            .board
            .rows_iter()
            .map(|row| {
                let cells: Vec<Value> = row
                    .iter()
                    .map(|cell| match cell {
                        Some(piece) => json!(piece.digit),
                        None => Value::Null,
                    })
                    .collect();
                Value::Array(cells)
            })
            .collect();
        entry["board"] = Value::Array(rows);
        entry["hand"] = json!(player.board.hand());
    }

    entry
}

/// Wrap a game event as the tagged envelope delivered to `viewer`,
/// carrying a fresh projection of the state after the event.
pub fn event_envelope(event: &GameEvent, game: &Game, viewer: PlayerId) -> Value {
    let mut envelope = json!({
        "type": event.tag(),
        "state": project(game, viewer),
    });

    match event {
        GameEvent::GameStarted => {}
        GameEvent::TurnChanged { active } => {
            envelope["active"] = json!(active);
        }
        GameEvent::Duel {
            first,
            second,
            outcome,
        } => {
            envelope["first"] = json!({"player": first.0, "digit": first.1});
            envelope["second"] = json!({"player": second.0, "digit": second.1});
            envelope["outcome"] = json!(outcome.as_str());
        }
        GameEvent::GameEnded { winner } => {
            envelope["winner"] = json!(winner);
            // Win/loss counter deltas for the leaderboard collaborator.
            let records: Vec<Value> = game
                .seat_order()
                .iter()
                .map(|id| {
                    let wins = if Some(*id) == *winner { 1 } else { 0 };
                    json!({"player": id, "games": 1, "wins": wins})
                })
                .collect();
            envelope["records"] = Value::Array(records);
        }
    }

    envelope
}

/// Full-state resync envelope sent on reconnection.
pub fn snapshot_envelope(game: &Game, viewer: PlayerId) -> Value {
    json!({
        "type": "snapshot",
        "state": project(game, viewer),
    })
}

/// Rejection envelope, delivered to the submitting player only.
pub fn error_envelope(err: &GameError) -> Value {
    json!({
        "type": "error",
        "code": err.code(),
        "message": err.to_string(),
    })
}
