//! Wire protocol and framed session transport.
mod protocol;
mod session;

pub use protocol::{Envelope, GameSyncData, Message, Player, Record};
pub use session::{Session, SessionFactory, TcpSessionFactory};
