//! Transport fan-out: one bidirectional text connection per open session.

pub mod connector;
pub mod envelope;
pub mod error;
pub mod link;
pub mod mock;

pub use connector::{connect_with_retry, Connection, Connector, WsConnector};
pub use envelope::Envelope;
pub use error::TransportError;
pub use link::{LinkConfig, LinkEvent, LinkStats, TransportLink};
