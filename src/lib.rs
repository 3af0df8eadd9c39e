//! Rust library for controlling QSC Q-SYS audio DSP cores
//!
//! This library provides an async API for the Q-SYS remote control (QRC)
//! interface: JSON-RPC over TCP port 1710, one NUL-terminated JSON document
//! per frame. It supports:
//!
//! - Reading and writing named controls
//! - Volume control in percent, mapped onto gain controls in dB
//! - Mute control
//! - Engine status, device info and health checks
//! - Pooled, reusable connections per core
//! - A registry of clients for many cores
//!
//! # Quick Start
//!
//! ```no_run
//! use qsc_control::{gain_control, mute_control, QscClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = QscClient::new("10.5.34.20");
//!
//!     client.set_volume(&gain_control("Main"), 35).await?;
//!     client.set_mute(&mute_control("Main"), false).await?;
//!
//!     let volumes = client.volumes(&["MainGain", "LobbyGain"]).await?;
//!     for (name, percent) in &volumes {
//!         println!("{}: {}%", name, percent);
//!     }
//!
//!     let info = client.info().await?;
//!     println!("{} ({}) is {}", info.hostname, info.model_name, info.state);
//!     Ok(())
//! }
//! ```
//!
//! # Many Cores
//!
//! ```no_run
//! use qsc_control::ClientRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ClientRegistry::new();
//!     for address in ["10.5.34.20", "10.5.34.21"] {
//!         registry.healthy(address).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Registry**: One shared client per core address
//! - **Client**: Control, volume, mute and status operations
//! - **Pool**: Connection reuse with TTL and reuse delay
//! - **Connection**: TCP, greeting banner and NUL framing
//! - **Protocol**: JSON-RPC request and response structures
//! - **Types**: Domain types and dB/percent conversions

mod client;
mod connection;
mod error;
mod pool;
mod protocol;
mod registry;
mod types;

// Public exports
pub use client::{ClientOptions, QscClient, QRC_PORT};
pub use connection::{Connection, Connector, TcpConnector, Transport};
pub use error::{QscError, Result};
pub use pool::{ConnectionPool, PooledConnection};
pub use protocol::{
    decode_response, notification_method, trim_frame, ControlGetResponse, ControlSetResponse,
    Method, RemoteError, Request, Response, SetParams, StatusGetResponse, FRAME_DELIMITER,
    JSONRPC_VERSION, REQUEST_ID,
};
pub use registry::ClientRegistry;
pub use types::{
    db_to_percent, gain_control, mute_control, mute_from_value, percent_to_db, ControlValue,
    CoreStatus, DeviceInfo, StatusRecord, GAIN_SUFFIX, MUTED, MUTE_SUFFIX, UNMUTED,
    ZERO_VOLUME_DB,
};
