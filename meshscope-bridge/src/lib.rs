//! Meshscope bridge - collects mesh snapshots from a zigbee2mqtt-style bridge
//!
//! `mqtt::connect` feeds a [`Transport`]; [`ProtocolClient`] runs
//! request/response and timed collections over it; [`TelemetrySource`]
//! decodes the results into a `meshscope_core::MeshSnapshot`.

pub mod config;
pub mod error;
pub mod mqtt;
pub mod protocol;
pub mod telemetry;
pub mod transport;

pub use config::{load_config, load_config_from, MeshConfig};
pub use error::{ProtocolError, TransportError};
pub use protocol::{ProtocolClient, Request, ResponseMatch};
pub use telemetry::TelemetrySource;
pub use transport::{Channel, Hub, InboundMessage, Publisher, Transport, TransportEvent};
