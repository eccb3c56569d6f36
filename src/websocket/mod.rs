mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{close_code, close_message, Outbound, RelayFrame};
