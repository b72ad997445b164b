#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Subject-addressed message bus client for the AgentMesh control plane.

mod bus;
mod error;
mod handler;
mod local;
mod nats;

pub use bus::MessageBus;
pub use error::{Error, Result};
pub use handler::{handler, BusHandler};
pub use local::LocalMessageBus;
pub use nats::NatsMessageBus;
