//! ASGI handlers: the glue between the event contract and the internal
//! request/response/websocket state.

pub mod http;
pub mod lifespan;
pub mod websocket;

pub use http::HttpHandler;
pub use lifespan::LifespanHandler;
pub use websocket::{WebSocketHandler, WebSocketState, shake_hand};
