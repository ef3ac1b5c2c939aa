pub mod client;
pub mod game;
pub mod network;
pub mod server;

pub use client::{ClientEvent, GameClient, SoloClient};
pub use game::{
    Board, Cell, DoubleThreeMode, Game, GameEvent, Move, PlaceError, Rule, RuleDescriptor, Seat,
    BOARD_SIZE,
};
pub use network::{
    Envelope, GameSyncData, Message, Player, Record, Session, SessionFactory, TcpSessionFactory,
};
pub use server::{start_server, Server, ServerConfig};

pub(crate) const CHANNEL_SIZE: usize = 20;
