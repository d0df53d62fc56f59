//! Rust library for controlling LG webOS TVs
//!
//! This library provides an async client for the TV's WebSocket control API
//! on port 3000. It supports:
//!
//! - Pairing with on-screen confirmation and client key persistence
//! - Correlated requests, fire-and-forget commands and subscriptions
//! - A device state snapshot kept current in the background
//! - State observers notified on every change
//! - Remote buttons and pointer input over the secondary input socket
//! - Keepalive supervision and automatic teardown on power off
//!
//! # Quick Start
//!
//! ```no_run
//! use webos_tv::{state_observer, WebOsClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = WebOsClient::new("192.168.1.50");
//!     client.connect().await?;
//!
//!     println!("Foreground app: {:?}", client.current_app_id());
//!     client.volume_up().await?;
//!     client.button("HOME", true).await?;
//!
//!     client
//!         .register_observer(state_observer(|state| async move {
//!             println!("Volume is now {:?}", state.volume);
//!         }))
//!         .await;
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Raw Requests
//!
//! Any endpoint can be reached directly. Targets without a scheme are sent
//! as `ssap://` targets:
//!
//! ```no_run
//! use webos_tv::{subscription_handler, WebOsClient, WebOsError};
//!
//! # async fn example(client: &WebOsClient) -> Result<(), WebOsError> {
//! match client.request("tv/getChannelList", None).await {
//!     Ok(payload) => println!("{payload}"),
//!     Err(WebOsError::ServiceNotFound(_)) => println!("no tuner"),
//!     Err(e) => return Err(e),
//! }
//!
//! let sub = client
//!     .subscribe(
//!         "audio/getVolume",
//!         None,
//!         subscription_handler(|payload| async move { println!("{payload}") }),
//!     )
//!     .await?;
//! client.unsubscribe(sub.id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: Connection lifecycle, pairing, and the public API
//! - **Commands**: High-level device operations
//! - **State**: Snapshot aggregation, dependent subscriptions, observers
//! - **Connection**: Request correlation and subscription dispatch
//! - **Transport**: WebSocket reader/writer tasks and ping tracking
//! - **Protocol**: JSON frame structures
//! - **Types**: Snapshot and domain types

mod buttons;
mod client;
mod commands;
mod config;
mod connection;
pub mod endpoints;
mod error;
mod handshake;
mod input;
mod keepalive;
mod protocol;
mod state;
mod storage;
mod subscription;
mod transport;
mod types;
mod volume;

// Public exports
pub use buttons::{is_known as is_known_button, BUTTONS};
pub use client::{ConnectionPhase, WebOsClient};
pub use commands::ScreenApi;
pub use config::{ClientConfig, DEFAULT_DELAYED_SOUND_OUTPUTS, DEFAULT_PORT};
pub use error::{Result, WebOsError};
pub use protocol::{ExchangeKind, LUNA_SCHEME, SSAP_SCHEME};
pub use state::{observer as state_observer, Observer, ObserverId, StateChannel};
pub use storage::{CredentialStore, FileStore, MemoryStore, KEY_FILE_NAME};
pub use subscription::{
    handler as subscription_handler, Subscription, SubscriptionHandler, SubscriptionId,
};
pub use types::{
    AppId, DeviceState, PowerState, DEFAULT_PICTURE_KEYS, LIVE_TV_APP_ID, POWER_UNKNOWN,
};
