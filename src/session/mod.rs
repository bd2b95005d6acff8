//! Client sessions
//!
//! A session is one connected client: it decodes the client's requests,
//! holds one delivery channel per subscribed stream and turns record
//! payloads into `update_data` messages.

pub mod protocol;
pub mod state;
pub mod stream;

pub use protocol::{DataPoint, Envelope, Request, StreamRequest};
pub use state::{ClientSession, SessionOptions};
pub use stream::SessionSubscriber;
