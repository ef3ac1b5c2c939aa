mod board;
mod game;
mod rules;

pub use board::{Board, Cell, Grid, Move, Seat, BOARD_SIZE};
pub use game::{Game, GameEvent, PlaceError, TURN_SECONDS};
pub use rules::{DoubleThreeMode, DoubleThreeRule, Rule, RuleDescriptor, Violation};
