//! wechat-rust: a client for the WeChat Web protocol.
//!
//! Logs in through a QR-code handshake (resuming a cached session when it
//! can), long-polls the server for new messages and contact changes, and
//! republishes them on a path-routed event bus alongside timer events.
//!
//! ## Modules
//!
//! - `types` - Contacts, events and the reserved event paths
//! - `store` - Session credentials, the on-disk cache and the contact roster
//! - `bus` - Source fan-in, prefix routing, timers and daily timings
//! - `protocol` - Endpoints, login state machine, sync loop and keep-alive
//! - `config` - Configuration and config file loading
//! - `logging` - Subscriber bootstrap for binaries
//!
//! ```no_run
//! use wechat_rust::{paths, Client, WechatConfig};
//!
//! # async fn demo() -> Result<(), wechat_rust::ClientError> {
//! let client = Client::new(WechatConfig::default())?;
//! client.handle(paths::MSG, |event| {
//!     if let Some(msg) = event.as_message() {
//!         println!("{}: {}", msg.sender_user_name, msg.content);
//!     }
//! });
//! client.start()?;
//! client.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod logging;
pub mod protocol;
pub mod store;
pub mod types;

mod client;
mod error;

pub use bus::{BusError, EventBus};
pub use client::{Client, SessionContext};
pub use config::{ConfigError, WechatConfig};
pub use error::ClientError;
pub use protocol::{HttpApi, QrPresenter, TerminalQrPresenter, WebApi};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use types::{paths, Contact, Event, EventPayload, MessageData};
