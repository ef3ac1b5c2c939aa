use crate::game::board::{Board, Cell, Grid, Move, Seat, BOARD_SIZE};
use crate::game::rules::{run_through, Rule, RuleDescriptor, Violation};
use async_std::channel::{unbounded, Receiver, Sender};
use log::warn;
use std::fmt;

/// Seconds granted per move; refreshed on every accepted placement.
pub const TURN_SECONDS: u32 = 30;

/// Why a placement was refused. Always recoverable; the server reports
/// these privately to the offending session and the game continues.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum PlaceError {
    OutOfBoard,
    AlreadyOccupied,
    NotYourTurn,
    NotStarted,
    Rule(Violation),
}

impl fmt::Display for PlaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceError::OutOfBoard => f.write_str("coordinates are outside the board"),
            PlaceError::AlreadyOccupied => f.write_str("the cell is already occupied"),
            PlaceError::NotYourTurn => f.write_str("it is not your turn"),
            PlaceError::NotStarted => f.write_str("the game has not started"),
            PlaceError::Rule(v) => v.fmt(f),
        }
    }
}

impl std::error::Error for PlaceError {}

/// Notifications for presentation code. The state machine never depends
/// on anyone listening.
#[derive(Clone, Debug, PartialEq)]
pub enum GameEvent {
    Started,
    Reset,
    StonePlaced(Move),
    TurnChanged(Seat),
    TimeUpdated { black: u32, white: u32 },
    Ended { winner: Seat, reason: String },
}

/// The authoritative game state machine: board, history, current turn,
/// per-seat clocks and the active rule set. One instance lives in the
/// server coordinator; each client proxy mirrors one, reconciled only
/// through explicit sync.
pub struct Game {
    board: Board,
    rules: Vec<Box<dyn Rule>>,
    current: Seat,
    black_seconds: u32,
    white_seconds: u32,
    turn_seconds: u32,
    started: bool,
    listeners: Vec<Sender<GameEvent>>,
}

impl Game {
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Game::with_turn_seconds(rules, TURN_SECONDS)
    }

    pub fn with_turn_seconds(rules: Vec<Box<dyn Rule>>, turn_seconds: u32) -> Self {
        Game {
            board: Board::new(),
            rules,
            current: Seat::Black,
            black_seconds: turn_seconds,
            white_seconds: turn_seconds,
            turn_seconds,
            started: false,
            listeners: Vec::new(),
        }
    }

    /// Register a listener. Emission never blocks; closed listeners are
    /// pruned on the next event.
    pub fn subscribe(&mut self) -> Receiver<GameEvent> {
        let (sender, receiver) = unbounded();
        self.listeners.push(sender);
        receiver
    }

    fn emit(&mut self, event: GameEvent) {
        self.listeners.retain(|l| l.try_send(event.clone()).is_ok());
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn current_turn(&self) -> Seat {
        self.current
    }

    pub fn seconds_left(&self, seat: Seat) -> u32 {
        match seat {
            Seat::Black => self.black_seconds,
            Seat::White => self.white_seconds,
            Seat::Observer => 0,
        }
    }

    pub fn stone_at(&self, x: u8, y: u8) -> Option<Cell> {
        self.board.get(x, y)
    }

    pub fn grid(&self) -> &Grid {
        self.board.grid()
    }

    pub fn history(&self) -> &[Move] {
        self.board.history()
    }

    pub fn move_count(&self) -> usize {
        self.board.move_count()
    }

    pub fn rule_descriptors(&self) -> Vec<RuleDescriptor> {
        self.rules.iter().map(|r| r.descriptor()).collect()
    }

    pub fn set_rules(&mut self, rules: Vec<Box<dyn Rule>>) {
        self.rules = rules;
    }

    /// Return to `NotStarted` from any state: clears the board and the
    /// history, restores the clocks.
    pub fn reset(&mut self) {
        self.board.clear();
        self.black_seconds = self.turn_seconds;
        self.white_seconds = self.turn_seconds;
        self.current = Seat::Black;
        self.started = false;
        self.emit(GameEvent::Reset);
    }

    /// Reset and begin a new game; Black moves first.
    pub fn start(&mut self) {
        self.reset();
        self.started = true;
        self.current = Seat::Black;
        self.emit(GameEvent::Started);
    }

    /// Validate and apply one placement. On success the stone is written,
    /// the move appended, the turn flipped and both clocks refreshed.
    /// Win detection is a separate call (`check_win`).
    pub fn try_place(&mut self, x: u8, y: u8, color: Seat) -> Result<Move, PlaceError> {
        if !self.started {
            return Err(PlaceError::NotStarted);
        }
        if x as usize >= BOARD_SIZE || y as usize >= BOARD_SIZE {
            return Err(PlaceError::OutOfBoard);
        }
        if self.board.grid()[x as usize][y as usize] != Cell::Empty {
            return Err(PlaceError::AlreadyOccupied);
        }
        if color != self.current {
            return Err(PlaceError::NotYourTurn);
        }
        let candidate = Move {
            x,
            y,
            seq: self.board.move_count() as u32 + 1,
            color,
        };
        for rule in &self.rules {
            if let Err(violation) = rule.check(self.board.grid(), &candidate) {
                return Err(PlaceError::Rule(violation));
            }
        }
        let mv = self.board.place(x, y, color);
        self.current = color.opponent();
        self.black_seconds = self.turn_seconds;
        self.white_seconds = self.turn_seconds;
        self.emit(GameEvent::StonePlaced(mv));
        self.emit(GameEvent::TurnChanged(self.current));
        Ok(mv)
    }

    /// Scan the four axes from the just-placed stone; five or more in a
    /// row ends the game with that color as the winner.
    pub fn check_win(&mut self, mv: &Move) -> bool {
        let color = mv.color.stone();
        let (x, y) = (mv.x as i32, mv.y as i32);
        let won = [(1, 0), (0, 1), (1, 1), (1, -1)]
            .iter()
            .any(|&dir| run_through(self.board.grid(), x, y, dir, color).0 >= 5);
        if won {
            self.started = false;
            self.emit(GameEvent::Ended {
                winner: mv.color,
                reason: "five in a row".to_string(),
            });
        }
        won
    }

    /// Take one second from `color` iff it holds the turn and the game is
    /// running. Returns the remaining seconds; the caller decides what
    /// happens at zero.
    pub fn tick(&mut self, color: Seat) -> Option<u32> {
        if !self.started || color != self.current {
            return None;
        }
        let left = match color {
            Seat::Black => {
                self.black_seconds = self.black_seconds.saturating_sub(1);
                self.black_seconds
            }
            Seat::White => {
                self.white_seconds = self.white_seconds.saturating_sub(1);
                self.white_seconds
            }
            Seat::Observer => return None,
        };
        self.emit(GameEvent::TimeUpdated {
            black: self.black_seconds,
            white: self.white_seconds,
        });
        Some(left)
    }

    /// End the game by decree (resignation, disconnect, timeout).
    /// Idempotent: a no-op unless a game is in progress.
    pub fn force_end(&mut self, winner: Seat, reason: &str) {
        if !self.started {
            return;
        }
        self.started = false;
        self.emit(GameEvent::Ended {
            winner,
            reason: reason.to_string(),
        });
    }

    /// Replay an authoritative snapshot from a peer. The source state is
    /// trusted: replay failures are logged, never propagated.
    pub fn sync(&mut self, moves: &[Move], current_turn: Seat, rules: &[RuleDescriptor]) {
        self.reset();
        self.rules = rules.iter().map(|d| d.build()).collect();
        if moves.is_empty() {
            return;
        }
        self.start();
        for mv in moves {
            if let Err(e) = self.try_place(mv.x, mv.y, mv.color) {
                warn!("sync replay dropped move ({}, {}): {}", mv.x, mv.y, e);
            }
        }
        self.current = current_turn;
    }

    /// Every empty cell the active rules currently refuse for `color`.
    /// Evaluates hypothetically; the board is not touched.
    pub fn forbidden_cells(&self, color: Seat) -> Vec<(u8, u8)> {
        let mut cells = Vec::new();
        let seq = self.board.move_count() as u32 + 1;
        for x in 0..BOARD_SIZE as u8 {
            for y in 0..BOARD_SIZE as u8 {
                if self.board.grid()[x as usize][y as usize] != Cell::Empty {
                    continue;
                }
                let candidate = Move { x, y, seq, color };
                if self
                    .rules
                    .iter()
                    .any(|r| r.check(self.board.grid(), &candidate).is_err())
                {
                    cells.push((x, y));
                }
            }
        }
        cells
    }
}
