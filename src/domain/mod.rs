// Domain layer: messages, players, world rules and the resync state machine.

pub mod errors;
pub mod latency;
pub mod messages;
pub mod player;
pub mod resync;
pub mod tick;
pub mod world;

pub use errors::RequestError;
pub use latency::{LatencySettings, LatencyTracker};
pub use messages::{Message, MessageKind, MessageTag, PlayerId, TickId, WireMessage};
pub use player::Player;
pub use resync::{AckOutcome, ResyncSettings, ResyncState, ResyncStateMachine};
pub use world::{World, WorldModel, WorldRules, Zone};
