//! Session state machine.
//!
//! Drives one room's game through `Lobby -> Deployment -> Action <->
//! Resolution -> GameOver`, validating every inbound action against the
//! current phase and turn, invoking the duel resolver when opposing
//! pieces meet, and emitting the events the room manager fans out.
//!
//! Only successfully applied actions consume the turn; every rejection
//! leaves the state untouched and is reported to the submitter alone.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::board::{AdvanceTarget, CommonArea, PlayerBoard, Position};
use super::duel::{resolve, DuelOutcome};
use super::turn::TurnScheduler;
use super::{PlayerId, SessionConfig};

/// Smallest roster a game can start with.
pub const MIN_PLAYERS: usize = 3;

/// Largest roster a game can start with.
pub const MAX_PLAYERS: usize = 5;

/// Game phases. `Resolution` is only ever observed transiently: duels
/// resolve synchronously inside the acting player's turn and control
/// returns to `Action` before the call completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Lobby,
    Deployment,
    Action,
    Resolution,
    GameOver,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::Deployment => "deployment",
            Self::Action => "action",
            Self::Resolution => "resolution",
            Self::GameOver => "game_over",
        }
    }

    /// Check if the game is running (can receive play actions).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Deployment | Self::Action | Self::Resolution)
    }

    /// Check if the game is over (cannot change).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::GameOver)
    }
}

/// A piece reference in an inbound action: a cell on the mover's own
/// grid, or a slot index in the shared common area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "zone", rename_all = "snake_case")]
pub enum Spot {
    Grid { at: Position },
    Common { index: usize },
}

/// Inbound player actions, deserialized from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Deployment only: place a digit on one's own grid.
    Place { digit: u8, at: Position },
    /// Move an own piece one step forward, possibly into the common area.
    Advance { from: Position },
    /// Challenge an opposing common-area piece with one's own.
    Duel { from: usize, target: usize },
    /// Withdraw an own piece back to hand.
    Recycle { from: Spot },
    /// Forfeit the turn.
    Pass,
}

/// State changes worth telling every client about. The room manager
/// pairs each event with a per-player visibility projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    GameStarted,
    /// Emitted after every accepted action. `active` is `None` while
    /// deployment is still in progress.
    TurnChanged { active: Option<PlayerId> },
    Duel {
        first: (PlayerId, u8),
        second: (PlayerId, u8),
        outcome: DuelOutcome,
    },
    GameEnded { winner: Option<PlayerId> },
}

impl GameEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::GameStarted => "game_started",
            Self::TurnChanged { .. } => "turn_changed",
            Self::Duel { .. } => "duel",
            Self::GameEnded { .. } => "game_ended",
        }
    }
}

/// Diagnostic log entry: an applied event and who caused it.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub at: chrono::DateTime<chrono::Utc>,
    pub actor: Option<PlayerId>,
    pub event: GameEvent,
}

/// Game errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// Bad deployment placement. Recoverable, reported to the placer only.
    InvalidPlacement(&'static str),
    /// Structurally invalid play action. Recoverable.
    IllegalMove(&'static str),
    /// Action-phase submission by a non-active player. Recoverable.
    NotYourTurn,
    /// Action not legal in the current phase. Recoverable.
    WrongPhase(&'static str),
    /// Internal scheduler signal; converted to game over, never surfaced.
    NoPlayersRemain,
    /// Internal inconsistency. Aborts this room's session only.
    Protocol(String),
}

impl GameError {
    /// Protocol errors terminate the room; everything else is reported
    /// to the submitter and the state stays unchanged.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPlacement(_) => "invalid_placement",
            Self::IllegalMove(_) => "illegal_move",
            Self::NotYourTurn => "not_your_turn",
            Self::WrongPhase(_) => "wrong_phase",
            Self::NoPlayersRemain => "no_players_remain",
            Self::Protocol(_) => "protocol_error",
        }
    }
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPlacement(reason) => write!(f, "invalid placement: {}", reason),
            Self::IllegalMove(reason) => write!(f, "illegal move: {}", reason),
            Self::NotYourTurn => write!(f, "it's not your turn"),
            Self::WrongPhase(reason) => write!(f, "wrong phase: {}", reason),
            Self::NoPlayersRemain => write!(f, "no players remain"),
            Self::Protocol(detail) => write!(f, "protocol error: {}", detail),
        }
    }
}

impl std::error::Error for GameError {}

/// A seated player and their material.
#[derive(Debug, Clone)]
pub struct GamePlayer {
    pub player_id: PlayerId,
    pub seat: u8,
    pub is_ready: bool,
    pub eliminated: bool,
    /// Set when the reconnect grace window expires mid-game; the room
    /// manager then passes this player's turns until they return.
    pub auto_pass: bool,
    pub board: PlayerBoard,
}

impl GamePlayer {
    fn new(player_id: PlayerId, seat: u8, rows: usize, cols: usize) -> Self {
        Self {
            player_id,
            seat,
            is_ready: false,
            eliminated: false,
            auto_pass: false,
            board: PlayerBoard::new(rows, cols),
        }
    }
}

/// One room's authoritative game state.
#[derive(Debug, Clone)]
pub struct Game {
    /// Room identifier.
    pub id: String,

    phase: Phase,

    /// Players indexed by id.
    players: HashMap<PlayerId, GamePlayer>,

    /// Seat order (player ids, turn order).
    seat_order: Vec<PlayerId>,

    scheduler: TurnScheduler,

    /// Shared contest zone.
    common: CommonArea,

    config: SessionConfig,

    /// Applied events since game start. Diagnostics and audit only;
    /// reconnection uses full snapshots, never this log.
    event_log: Vec<EventRecord>,

    /// Set only in GameOver. `None` there means a draw.
    pub winner: Option<PlayerId>,

    /// When the current turn began; drives the optional think-time limit.
    turn_started: Option<Instant>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Game {
    /// Create a game in the Lobby phase over the given roster, in seat
    /// order. Roster size is validated at `start`.
    pub fn new(id: String, roster: &[PlayerId], config: SessionConfig) -> Self {
        let mut players = HashMap::new();
        for (seat, player_id) in roster.iter().enumerate() {
            players.insert(
                *player_id,
                GamePlayer::new(*player_id, seat as u8, config.board_rows, config.board_cols),
            );
        }
        Self {
            id,
            phase: Phase::Lobby,
            players,
            seat_order: roster.to_vec(),
            scheduler: TurnScheduler::new(roster.to_vec()),
            common: CommonArea::new(),
            config,
            event_log: Vec::new(),
            winner: None,
            turn_started: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn seat_order(&self) -> &[PlayerId] {
        &self.seat_order
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&GamePlayer> {
        self.players.get(&player_id)
    }

    /// Players in seat order.
    pub fn players_in_seat_order(&self) -> impl Iterator<Item = &GamePlayer> {
        self.seat_order
            .iter()
            .filter_map(move |id| self.players.get(id))
    }

    pub fn common(&self) -> &CommonArea {
        &self.common
    }

    pub fn event_log(&self) -> &[EventRecord] {
        &self.event_log
    }

    /// Active player, only during the Action phase.
    pub fn active_player(&self) -> Option<PlayerId> {
        if self.phase == Phase::Action {
            self.scheduler.current_player()
        } else {
            None
        }
    }

    pub fn alive_count(&self) -> usize {
        self.scheduler.alive_count()
    }

    /// Mark a seat ready during the Lobby phase.
    pub fn mark_ready(&mut self, player_id: PlayerId) -> Result<(), GameError> {
        if self.phase != Phase::Lobby {
            return Err(GameError::WrongPhase("the game has already started"));
        }
        let player = self.player_mut(player_id)?;
        player.is_ready = true;
        Ok(())
    }

    /// Lobby -> Deployment. Requires a 3-5 player roster, all ready.
    pub fn start(&mut self) -> Result<Vec<GameEvent>, GameError> {
        if self.phase != Phase::Lobby {
            return Err(GameError::WrongPhase("the game has already started"));
        }
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&self.seat_order.len()) {
            return Err(GameError::IllegalMove("roster must have 3 to 5 players"));
        }
        if !self.players.values().all(|p| p.is_ready) {
            return Err(GameError::IllegalMove("not all seats are ready"));
        }

        self.phase = Phase::Deployment;
        self.started_at = Some(chrono::Utc::now());
        log::info!(
            "room {}: game started with {} players",
            self.id,
            self.seat_order.len()
        );

        let events = vec![GameEvent::GameStarted];
        self.record_events(None, &events);
        Ok(events)
    }

    /// Validate and apply one inbound action. On success the returned
    /// events describe every state change; on failure nothing changed.
    pub fn apply(&mut self, player_id: PlayerId, action: &Action) -> Result<Vec<GameEvent>, GameError> {
        if !self.players.contains_key(&player_id) {
            return Err(GameError::IllegalMove("player is not in this game"));
        }

        let mut events = Vec::new();
        match self.phase {
            Phase::Lobby => return Err(GameError::WrongPhase("the game has not started")),
            Phase::GameOver => return Err(GameError::WrongPhase("the game is over")),
            Phase::Resolution => {
                // Resolution never persists across calls.
                return Err(GameError::Protocol("resolution phase at rest".to_string()));
            }
            Phase::Deployment => self.apply_deployment(player_id, action, &mut events)?,
            Phase::Action => self.apply_action(player_id, action, &mut events)?,
        }

        self.verify_invariants()?;
        self.record_events(Some(player_id), &events);
        Ok(events)
    }

    /// Whether the optional per-turn think-time limit has expired.
    pub fn turn_expired(&self) -> bool {
        if self.phase != Phase::Action {
            return false;
        }
        match (self.config.turn_timeout, self.turn_started) {
            (Some(limit), Some(started)) => started.elapsed() >= limit,
            _ => false,
        }
    }

    pub fn set_auto_pass(&mut self, player_id: PlayerId, auto_pass: bool) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.auto_pass = auto_pass;
        }
    }

    pub fn is_auto_pass(&self, player_id: PlayerId) -> bool {
        self.players
            .get(&player_id)
            .map(|p| p.auto_pass)
            .unwrap_or(false)
    }

    // ---- internals ----

    fn player_mut(&mut self, player_id: PlayerId) -> Result<&mut GamePlayer, GameError> {
        self.players
            .get_mut(&player_id)
            .ok_or(GameError::IllegalMove("player is not in this game"))
    }

    fn apply_deployment(
        &mut self,
        player_id: PlayerId,
        action: &Action,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        let Action::Place { digit, at } = action else {
            return Err(GameError::WrongPhase("deployment accepts placements only"));
        };

        let player = self.player_mut(player_id)?;
        if player.board.is_fully_deployed() {
            return Err(GameError::InvalidPlacement("all digits already placed"));
        }
        player
            .board
            .place(*digit, *at)
            .map_err(GameError::InvalidPlacement)?;
        log::debug!("room {}: player {} placed a digit", self.id, player_id);

        if self.players.values().all(|p| p.board.is_fully_deployed()) {
            self.phase = Phase::Action;
            self.turn_started = Some(Instant::now());
            log::info!("room {}: deployment complete", self.id);
            events.push(GameEvent::TurnChanged {
                active: self.scheduler.current_player(),
            });
        } else {
            events.push(GameEvent::TurnChanged { active: None });
        }
        Ok(())
    }

    fn apply_action(
        &mut self,
        player_id: PlayerId,
        action: &Action,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        if !self.scheduler.is_turn(player_id) {
            return Err(GameError::NotYourTurn);
        }

        match action {
            Action::Place { .. } => {
                return Err(GameError::WrongPhase("placements are deployment only"));
            }
            Action::Advance { from } => self.apply_advance(player_id, *from, events)?,
            Action::Duel { from, target } => self.apply_duel(player_id, *from, *target, events)?,
            Action::Recycle { from } => self.apply_recycle(player_id, *from)?,
            Action::Pass => {}
        }

        self.consume_turn(events);
        Ok(())
    }

    fn apply_advance(
        &mut self,
        player_id: PlayerId,
        from: Position,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        let target = self
            .player_mut(player_id)?
            .board
            .advance_target(from)
            .map_err(GameError::IllegalMove)?;

        match target {
            AdvanceTarget::Cell(to) => {
                let board = &mut self.player_mut(player_id)?.board;
                let piece = board.take(from).map_err(GameError::IllegalMove)?;
                board
                    .put(piece, to)
                    .map_err(|e| GameError::Protocol(format!("advance landed badly: {}", e)))?;
            }
            AdvanceTarget::CommonArea => {
                let piece = self
                    .player_mut(player_id)?
                    .board
                    .take(from)
                    .map_err(GameError::IllegalMove)?;
                let own_index = self.common.push(player_id, piece);
                // Entering an occupied contest zone duels the oldest
                // opposing piece immediately.
                if let Some(defender) = self.common.oldest_opponent(player_id) {
                    self.resolve_pair(own_index, defender, events)?;
                }
            }
        }
        Ok(())
    }

    fn apply_duel(
        &mut self,
        player_id: PlayerId,
        from: usize,
        target: usize,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        if from == target {
            return Err(GameError::IllegalMove("cannot duel a piece against itself"));
        }
        let own = self
            .common
            .get(from)
            .ok_or(GameError::IllegalMove("no piece at challenger slot"))?;
        if own.owner != player_id {
            return Err(GameError::IllegalMove("challenger piece is not yours"));
        }
        let other = self
            .common
            .get(target)
            .ok_or(GameError::IllegalMove("no piece at target slot"))?;
        if other.owner == player_id {
            return Err(GameError::IllegalMove("cannot duel your own piece"));
        }
        self.resolve_pair(from, target, events)
    }

    fn apply_recycle(&mut self, player_id: PlayerId, from: Spot) -> Result<(), GameError> {
        match from {
            Spot::Grid { at } => {
                let board = &mut self.player_mut(player_id)?.board;
                let piece = board.take(at).map_err(GameError::IllegalMove)?;
                board.add_to_hand(piece.digit);
            }
            Spot::Common { index } => {
                let piece = self
                    .common
                    .get(index)
                    .copied()
                    .ok_or(GameError::IllegalMove("no piece at that slot"))?;
                if piece.owner != player_id {
                    return Err(GameError::IllegalMove("cannot recycle an opponent's piece"));
                }
                self.common.remove(index);
                self.player_mut(player_id)?.board.add_to_hand(piece.digit);
            }
        }
        Ok(())
    }

    /// Resolve a contested pair synchronously. Both pieces are revealed
    /// whatever the outcome; losers move to their owners' lost lists.
    fn resolve_pair(
        &mut self,
        attacker: usize,
        defender: usize,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), GameError> {
        self.phase = Phase::Resolution;

        self.common.reveal(attacker);
        self.common.reveal(defender);
        let a = *self
            .common
            .get(attacker)
            .ok_or_else(|| GameError::Protocol("attacker slot vanished".to_string()))?;
        let d = *self
            .common
            .get(defender)
            .ok_or_else(|| GameError::Protocol("defender slot vanished".to_string()))?;

        let outcome = resolve(a.digit, d.digit);
        log::debug!(
            "room {}: duel {} vs {} -> {}",
            self.id,
            a.digit,
            d.digit,
            outcome.as_str()
        );

        // Remove higher index first so the lower one stays valid.
        match outcome {
            DuelOutcome::FirstWins => {
                self.common.remove(defender);
                self.player_mut(d.owner)?.board.add_lost(d.digit);
            }
            DuelOutcome::SecondWins => {
                self.common.remove(attacker);
                self.player_mut(a.owner)?.board.add_lost(a.digit);
            }
            DuelOutcome::BothEliminated => {
                let (hi, lo) = if attacker > defender {
                    (attacker, defender)
                } else {
                    (defender, attacker)
                };
                self.common.remove(hi);
                self.common.remove(lo);
                self.player_mut(a.owner)?.board.add_lost(a.digit);
                self.player_mut(d.owner)?.board.add_lost(d.digit);
            }
        }

        events.push(GameEvent::Duel {
            first: (a.owner, a.digit),
            second: (d.owner, d.digit),
            outcome,
        });

        self.check_eliminations(events);
        if !self.phase.is_terminal() {
            self.phase = Phase::Action;
        }
        Ok(())
    }

    /// Consume the acting player's turn after a successfully applied
    /// action: re-check eliminations, then hand the turn to the next
    /// alive seat or finish the game.
    fn consume_turn(&mut self, events: &mut Vec<GameEvent>) {
        if self.phase.is_terminal() {
            return;
        }
        self.check_eliminations(events);
        if self.phase.is_terminal() {
            return;
        }

        match self.scheduler.advance() {
            Ok(next) => {
                self.turn_started = Some(Instant::now());
                events.push(GameEvent::TurnChanged { active: Some(next) });
            }
            Err(_) => self.finish(events),
        }
    }

    /// A player with no material anywhere (grid, hand, common area) is
    /// eliminated. With one or zero alive players left the game ends.
    fn check_eliminations(&mut self, events: &mut Vec<GameEvent>) {
        if !matches!(self.phase, Phase::Action | Phase::Resolution) {
            return;
        }

        let mut eliminated = Vec::new();
        for player in self.players.values() {
            if player.eliminated {
                continue;
            }
            let material =
                player.board.live_digits().len() + self.common.count_for(player.player_id);
            if material == 0 {
                eliminated.push(player.player_id);
            }
        }

        for player_id in eliminated {
            if let Some(player) = self.players.get_mut(&player_id) {
                player.eliminated = true;
            }
            self.scheduler.eliminate(player_id);
            log::info!("room {}: player {} eliminated", self.id, player_id);
        }

        if self.scheduler.alive_count() <= 1 {
            self.finish(events);
        }
    }

    fn finish(&mut self, events: &mut Vec<GameEvent>) {
        self.winner = self.scheduler.alive_players().first().copied();
        self.phase = Phase::GameOver;
        self.ended_at = Some(chrono::Utc::now());
        match self.winner {
            Some(winner) => log::info!("room {}: game over, winner {}", self.id, winner),
            None => log::info!("room {}: game over, draw", self.id),
        }
        events.push(GameEvent::GameEnded {
            winner: self.winner,
        });
    }

    fn record_events(&mut self, actor: Option<PlayerId>, events: &[GameEvent]) {
        let at = chrono::Utc::now();
        for event in events {
            self.event_log.push(EventRecord {
                at,
                actor,
                event: event.clone(),
            });
        }
    }

    /// Cross-check per-player material against the deployment contract.
    /// A violation means the engine itself corrupted state; the room
    /// manager aborts the session on it.
    fn verify_invariants(&self) -> Result<(), GameError> {
        for player in self.players.values() {
            let mut digits = player.board.live_digits();
            digits.extend_from_slice(player.board.lost());
            for piece in self.common.iter().filter(|p| p.owner == player.player_id) {
                digits.push(piece.digit);
            }

            let total = digits.len();
            digits.sort_unstable();
            let before_dedup = digits.len();
            digits.dedup();
            if digits.len() != before_dedup {
                return Err(GameError::Protocol(format!(
                    "player {} holds a duplicate digit",
                    player.player_id
                )));
            }
            if self.phase != Phase::Deployment && self.phase != Phase::Lobby {
                if total != super::board::DIGITS_PER_PLAYER {
                    return Err(GameError::Protocol(format!(
                        "player {} accounts for {} digits",
                        player.player_id, total
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_game(roster: &[PlayerId]) -> Game {
        let mut game = Game::new("room-1".to_string(), roster, SessionConfig::default());
        for id in roster {
            game.mark_ready(*id).unwrap();
        }
        game
    }

    /// Standard deployment: digit d at (d / 6, d % 6), so digits 0-5
    /// fill the front rank and 6-9 the second.
    fn deploy_all(game: &mut Game, roster: &[PlayerId]) {
        for id in roster {
            for digit in 0..10u8 {
                let at = Position::new(digit as usize / 6, digit as usize % 6);
                game.apply(*id, &Action::Place { digit, at }).unwrap();
            }
        }
    }

    fn started_game() -> Game {
        let roster = [1, 2, 3];
        let mut game = make_game(&roster);
        game.start().unwrap();
        deploy_all(&mut game, &roster);
        game
    }

    #[test]
    fn test_start_requires_ready_roster() {
        let mut game = Game::new("room-1".to_string(), &[1, 2, 3], SessionConfig::default());
        assert_eq!(
            game.start(),
            Err(GameError::IllegalMove("not all seats are ready"))
        );

        let mut small = Game::new("room-1".to_string(), &[1, 2], SessionConfig::default());
        small.mark_ready(1).unwrap();
        small.mark_ready(2).unwrap();
        assert_eq!(
            small.start(),
            Err(GameError::IllegalMove("roster must have 3 to 5 players"))
        );

        let mut game = make_game(&[1, 2, 3]);
        let events = game.start().unwrap();
        assert_eq!(events, vec![GameEvent::GameStarted]);
        assert_eq!(game.phase(), Phase::Deployment);
        assert!(game.start().is_err());
    }

    #[test]
    fn test_actions_rejected_before_start() {
        let mut game = make_game(&[1, 2, 3]);
        let err = game
            .apply(
                1,
                &Action::Place {
                    digit: 0,
                    at: Position::new(0, 0),
                },
            )
            .unwrap_err();
        assert_eq!(err, GameError::WrongPhase("the game has not started"));
    }

    #[test]
    fn test_deployment_rejects_duplicate_digit() {
        let mut game = make_game(&[1, 2, 3]);
        game.start().unwrap();
        game.apply(
            1,
            &Action::Place {
                digit: 4,
                at: Position::new(0, 0),
            },
        )
        .unwrap();

        let err = game
            .apply(
                1,
                &Action::Place {
                    digit: 4,
                    at: Position::new(0, 1),
                },
            )
            .unwrap_err();
        assert_eq!(err, GameError::InvalidPlacement("digit already placed"));
    }

    #[test]
    fn test_deployment_is_turn_free_and_completes() {
        let roster = [1, 2, 3];
        let mut game = make_game(&roster);
        game.start().unwrap();

        // Players deploy in any interleaving; phase holds until everyone
        // has all ten digits down.
        for digit in 0..10u8 {
            let at = Position::new(digit as usize / 6, digit as usize % 6);
            for id in [3, 1, 2] {
                let events = game.apply(id, &Action::Place { digit, at }).unwrap();
                if id == 2 && digit == 9 {
                    assert_eq!(
                        events,
                        vec![GameEvent::TurnChanged { active: Some(1) }]
                    );
                } else {
                    assert_eq!(events, vec![GameEvent::TurnChanged { active: None }]);
                    assert_eq!(game.phase(), Phase::Deployment);
                }
            }
        }
        assert_eq!(game.phase(), Phase::Action);
        assert_eq!(game.active_player(), Some(1));
    }

    #[test]
    fn test_play_actions_rejected_during_deployment() {
        let mut game = make_game(&[1, 2, 3]);
        game.start().unwrap();
        let err = game
            .apply(
                1,
                &Action::Advance {
                    from: Position::new(0, 0),
                },
            )
            .unwrap_err();
        assert_eq!(
            err,
            GameError::WrongPhase("deployment accepts placements only")
        );
    }

    #[test]
    fn test_not_your_turn_leaves_state_unchanged() {
        let mut game = started_game();
        assert_eq!(game.active_player(), Some(1));

        let err = game
            .apply(
                2,
                &Action::Advance {
                    from: Position::new(0, 0),
                },
            )
            .unwrap_err();
        assert_eq!(err, GameError::NotYourTurn);
        // Turn pointer and board untouched.
        assert_eq!(game.active_player(), Some(1));
        assert_eq!(game.player(2).unwrap().board.pieces_on_grid(), 10);
        assert!(game.common().is_empty());
    }

    #[test]
    fn test_rejected_action_does_not_consume_turn() {
        let mut game = started_game();

        // Advancing from an empty cell is illegal; P1 keeps the turn.
        let err = game
            .apply(
                1,
                &Action::Advance {
                    from: Position::new(2, 0),
                },
            )
            .unwrap_err();
        assert_eq!(err, GameError::IllegalMove("no piece at source cell"));
        assert_eq!(game.active_player(), Some(1));

        // A legal pass then consumes it.
        let events = game.apply(1, &Action::Pass).unwrap();
        assert_eq!(events, vec![GameEvent::TurnChanged { active: Some(2) }]);
    }

    #[test]
    fn test_advance_within_grid() {
        let mut game = started_game();

        // Digit 6 sits at (1, 0); (0, 0) holds digit 0, so move digit 0
        // out first to free the cell.
        game.apply(
            1,
            &Action::Advance {
                from: Position::new(0, 0),
            },
        )
        .unwrap();
        game.apply(2, &Action::Pass).unwrap();
        game.apply(3, &Action::Pass).unwrap();

        let events = game
            .apply(
                1,
                &Action::Advance {
                    from: Position::new(1, 0),
                },
            )
            .unwrap();
        assert_eq!(events, vec![GameEvent::TurnChanged { active: Some(2) }]);
        let board = &game.player(1).unwrap().board;
        assert_eq!(board.piece_at(Position::new(0, 0)).unwrap().digit, 6);
        assert!(board.piece_at(Position::new(1, 0)).is_none());
    }

    #[test]
    fn test_advance_into_empty_common_area() {
        let mut game = started_game();

        let events = game
            .apply(
                1,
                &Action::Advance {
                    from: Position::new(0, 3),
                },
            )
            .unwrap();
        assert_eq!(events, vec![GameEvent::TurnChanged { active: Some(2) }]);
        assert_eq!(game.common().len(), 1);
        let piece = game.common().get(0).unwrap();
        assert_eq!(piece.owner, 1);
        assert_eq!(piece.digit, 3);
        assert!(!piece.revealed);
    }

    #[test]
    fn test_contested_advance_mutual_elimination() {
        // Equal digits meet in the common area: both fall,
        // both are revealed, and the turn passes on.
        let mut game = started_game();

        game.apply(
            1,
            &Action::Advance {
                from: Position::new(0, 3),
            },
        )
        .unwrap();

        let events = game
            .apply(
                2,
                &Action::Advance {
                    from: Position::new(0, 3),
                },
            )
            .unwrap();
        assert_eq!(
            events,
            vec![
                GameEvent::Duel {
                    first: (2, 3),
                    second: (1, 3),
                    outcome: DuelOutcome::BothEliminated,
                },
                GameEvent::TurnChanged { active: Some(3) },
            ]
        );
        assert!(game.common().is_empty());
        assert_eq!(game.player(1).unwrap().board.lost(), &[3]);
        assert_eq!(game.player(2).unwrap().board.lost(), &[3]);
        assert_eq!(game.active_player(), Some(3));
    }

    #[test]
    fn test_contested_advance_general_rule() {
        let mut game = started_game();

        // P1's 2 enters; P2's 5 follows and loses to it.
        game.apply(
            1,
            &Action::Advance {
                from: Position::new(0, 2),
            },
        )
        .unwrap();
        let events = game
            .apply(
                2,
                &Action::Advance {
                    from: Position::new(0, 5),
                },
            )
            .unwrap();
        assert_eq!(
            events[0],
            GameEvent::Duel {
                first: (2, 5),
                second: (1, 2),
                outcome: DuelOutcome::SecondWins,
            }
        );
        // The survivor stays, revealed.
        assert_eq!(game.common().len(), 1);
        let survivor = game.common().get(0).unwrap();
        assert_eq!((survivor.owner, survivor.digit), (1, 2));
        assert!(survivor.revealed);
        assert_eq!(game.player(2).unwrap().board.lost(), &[5]);
    }

    #[test]
    fn test_explicit_duel_action() {
        let mut game = started_game();

        // P1 parks two pieces in the common area (same-owner pieces
        // never auto-duel). P2's 0 then enters, auto-duels P1's oldest
        // piece and survives, leaving a target P1 can explicitly
        // challenge with the second piece.
        game.apply(
            1,
            &Action::Advance {
                from: Position::new(0, 4),
            },
        )
        .unwrap();
        game.apply(2, &Action::Pass).unwrap();
        game.apply(3, &Action::Pass).unwrap();

        // P1 brings a second piece in; common now holds two P1 pieces.
        game.apply(
            1,
            &Action::Advance {
                from: Position::new(0, 5),
            },
        )
        .unwrap();
        // P2 enters with 0: auto-duel against P1's oldest (the 4); 0 wins.
        game.apply(
            2,
            &Action::Advance {
                from: Position::new(0, 0),
            },
        )
        .unwrap();
        assert_eq!(game.player(1).unwrap().board.lost(), &[4]);
        game.apply(3, &Action::Pass).unwrap();

        // P1's 5 explicitly challenges P2's 0: slots are now [P1:5, P2:0].
        let events = game.apply(1, &Action::Duel { from: 0, target: 1 }).unwrap();
        assert_eq!(
            events[0],
            GameEvent::Duel {
                first: (1, 5),
                second: (2, 0),
                outcome: DuelOutcome::SecondWins,
            }
        );
        assert_eq!(game.player(1).unwrap().board.lost(), &[4, 5]);
    }

    #[test]
    fn test_duel_action_validation() {
        let mut game = started_game();
        game.apply(
            1,
            &Action::Advance {
                from: Position::new(0, 1),
            },
        )
        .unwrap();
        game.apply(2, &Action::Pass).unwrap();
        game.apply(3, &Action::Pass).unwrap();

        assert_eq!(
            game.apply(1, &Action::Duel { from: 0, target: 0 }),
            Err(GameError::IllegalMove("cannot duel a piece against itself"))
        );
        assert_eq!(
            game.apply(1, &Action::Duel { from: 5, target: 0 }),
            Err(GameError::IllegalMove("no piece at challenger slot"))
        );
        assert_eq!(
            game.apply(1, &Action::Duel { from: 0, target: 3 }),
            Err(GameError::IllegalMove("no piece at target slot"))
        );
    }

    #[test]
    fn test_recycle_to_hand() {
        let mut game = started_game();

        let events = game
            .apply(
                1,
                &Action::Recycle {
                    from: Spot::Grid {
                        at: Position::new(0, 0),
                    },
                },
            )
            .unwrap();
        assert_eq!(events, vec![GameEvent::TurnChanged { active: Some(2) }]);
        assert_eq!(game.player(1).unwrap().board.hand(), &[0]);
        assert_eq!(game.player(1).unwrap().board.pieces_on_grid(), 9);
    }

    #[test]
    fn test_recycle_from_common_area() {
        let mut game = started_game();
        game.apply(
            1,
            &Action::Advance {
                from: Position::new(0, 2),
            },
        )
        .unwrap();
        game.apply(2, &Action::Pass).unwrap();
        game.apply(3, &Action::Pass).unwrap();

        game.apply(
            1,
            &Action::Recycle {
                from: Spot::Common { index: 0 },
            },
        )
        .unwrap();
        assert!(game.common().is_empty());
        assert_eq!(game.player(1).unwrap().board.hand(), &[2]);
    }

    #[test]
    fn test_recycle_opponent_piece_rejected() {
        let mut game = started_game();
        game.apply(
            1,
            &Action::Advance {
                from: Position::new(0, 2),
            },
        )
        .unwrap();

        let err = game
            .apply(
                2,
                &Action::Recycle {
                    from: Spot::Common { index: 0 },
                },
            )
            .unwrap_err();
        assert_eq!(
            err,
            GameError::IllegalMove("cannot recycle an opponent's piece")
        );
    }

    #[test]
    fn test_full_game_to_winner() {
        // P2 and P3 mutually annihilate digit by digit while P1 sits
        // tight; the last duel eliminates both and P1 wins.
        let mut game = started_game();

        // Front-rank digits 0-5 go straight in; 6-9 need one step first.
        for digit in 0..10u8 {
            let col = digit as usize % 6;
            if digit >= 6 {
                game.apply(1, &Action::Pass).unwrap();
                game.apply(
                    2,
                    &Action::Advance {
                        from: Position::new(1, col),
                    },
                )
                .unwrap();
                game.apply(
                    3,
                    &Action::Advance {
                        from: Position::new(1, col),
                    },
                )
                .unwrap();
            }
            game.apply(1, &Action::Pass).unwrap();
            game.apply(
                2,
                &Action::Advance {
                    from: Position::new(0, col),
                },
            )
            .unwrap();
            let events = game
                .apply(
                    3,
                    &Action::Advance {
                        from: Position::new(0, col),
                    },
                )
                .unwrap();
            let duel = &events[0];
            assert!(matches!(
                duel,
                GameEvent::Duel {
                    outcome: DuelOutcome::BothEliminated,
                    ..
                }
            ));
            if digit == 9 {
                assert_eq!(
                    events[1],
                    GameEvent::GameEnded { winner: Some(1) }
                );
            }
        }

        assert_eq!(game.phase(), Phase::GameOver);
        assert_eq!(game.winner, Some(1));
        assert!(game.player(2).unwrap().eliminated);
        assert!(game.player(3).unwrap().eliminated);
        assert!(!game.player(1).unwrap().eliminated);

        // Terminal: further actions are rejected.
        assert_eq!(
            game.apply(1, &Action::Pass),
            Err(GameError::WrongPhase("the game is over"))
        );
    }

    #[test]
    fn test_draw_when_last_players_fall_together() {
        let mut game = started_game();

        // Drain material through the back door so only one front-rank
        // piece each remains for P1 and P2, and nothing for P3.
        for digit in 0..10u8 {
            let at = Position::new(digit as usize / 6, digit as usize % 6);
            for id in [1, 2] {
                if digit == 5 {
                    continue;
                }
                let piece = game.player_mut(id).unwrap().board.take(at).unwrap();
                game.player_mut(id).unwrap().board.add_lost(piece.digit);
            }
            let piece = game.player_mut(3).unwrap().board.take(at).unwrap();
            game.player_mut(3).unwrap().board.add_lost(piece.digit);
        }

        // P1's 5 enters the (empty) common area; P3's elimination is
        // noticed as the turn is consumed.
        game.apply(
            1,
            &Action::Advance {
                from: Position::new(0, 5),
            },
        )
        .unwrap();
        assert!(game.player(3).unwrap().eliminated);
        assert_eq!(game.active_player(), Some(2));

        // P2's 5 follows: mutual elimination of the two last pieces.
        let events = game
            .apply(
                2,
                &Action::Advance {
                    from: Position::new(0, 5),
                },
            )
            .unwrap();
        assert_eq!(*events.last().unwrap(), GameEvent::GameEnded { winner: None });
        assert_eq!(game.phase(), Phase::GameOver);
        assert_eq!(game.winner, None);
    }

    #[test]
    fn test_event_log_records_applied_actions() {
        let mut game = started_game();
        game.apply(1, &Action::Pass).unwrap();

        let log = game.event_log();
        assert!(!log.is_empty());
        assert_eq!(log[0].event, GameEvent::GameStarted);
        assert_eq!(log.last().unwrap().actor, Some(1));
    }
}
