use crate::client::ClientEvent;
use crate::game::{Game, Move, Rule, RuleDescriptor, Seat};
use crate::network::{GameSyncData, Player};
use async_std::channel::{unbounded, Receiver, Sender};

/// Local solo play: the same command and event surface as `GameClient`,
/// with no transport. One game, both seats synthesized, so presentation
/// code stays transport-agnostic.
pub struct SoloClient {
    me: Player,
    game: Game,
    events: Sender<ClientEvent>,
}

impl SoloClient {
    pub fn new(nickname: &str, rules: &[RuleDescriptor]) -> (SoloClient, Receiver<ClientEvent>) {
        let (sender, receiver) = unbounded();
        let built: Vec<Box<dyn Rule>> = rules.iter().map(|d| d.build()).collect();
        (
            SoloClient {
                me: Player::new(nickname),
                game: Game::new(built),
                events: sender,
            },
            receiver,
        )
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.try_send(event);
    }

    /// "Connect": announce the single-entry roster and an empty sync, as
    /// a real server would for the first joiner.
    pub fn connect(&mut self) {
        self.emit(ClientEvent::Connected {
            me: self.me.clone(),
            roster: vec![self.me.clone()],
        });
        self.emit(ClientEvent::SyncReceived(GameSyncData {
            moves: Vec::new(),
            current_turn: Seat::Black,
            rules: self.game.rule_descriptors(),
            black: None,
            white: None,
        }));
    }

    pub fn me(&self) -> &Player {
        &self.me
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn join_seat(&mut self, seat: Seat) {
        if !seat.is_player() {
            return;
        }
        self.me.seat = seat;
        self.emit(ClientEvent::SeatJoined {
            seat,
            player: self.me.clone(),
        });
    }

    pub fn leave_seat(&mut self) {
        if !self.me.seat.is_player() {
            return;
        }
        let seat = self.me.seat;
        self.me.seat = Seat::Observer;
        self.emit(ClientEvent::SeatLeft {
            seat,
            player: self.me.clone(),
        });
    }

    pub fn start_game(&mut self) {
        self.game.start();
        self.emit(ClientEvent::GameStarted);
    }

    /// Place for whichever color holds the turn; the solo player plays
    /// both seats.
    pub fn place(&mut self, x: u8, y: u8) {
        let color = self.game.current_turn();
        match self.game.try_place(x, y, color) {
            Ok(mv) => {
                self.emit(ClientEvent::StonePlaced(mv));
                if self.game.check_win(&mv) {
                    self.emit(ClientEvent::GameEnded {
                        winner: mv.color,
                        reason: "five in a row".to_string(),
                    });
                }
            }
            Err(e) => self.emit(ClientEvent::PlacementRejected {
                mv: Move {
                    x,
                    y,
                    seq: 0,
                    color,
                },
                reason: e.to_string(),
            }),
        }
    }

    pub fn chat(&mut self, text: &str) {
        self.emit(ClientEvent::Chat {
            sender: self.me.clone(),
            text: text.to_string(),
        });
    }
}
