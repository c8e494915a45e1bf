// Use cases layer: routing, the authoritative server, the client agent and lobby orchestration.

pub mod agent;
pub mod game;
pub mod ledger;
pub mod lobby;
pub mod router;
pub mod server;
pub mod types;

pub use agent::Agent;
pub use ledger::{LedgerVerdict, RequestLedger};
pub use lobby::{LobbyError, LobbyHandle, LobbyRegistry, LobbySettings};
pub use router::MessageRouter;
pub use server::GameServer;
pub use types::{GameEvent, Outbound, Seat};
