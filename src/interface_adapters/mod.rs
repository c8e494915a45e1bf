// Interface adapters: wire protocol, websocket transport and HTTP routes.

pub mod http;
pub mod net;
pub mod protocol;
pub mod state;
pub mod utils;
