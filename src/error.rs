use thiserror::Error;

use crate::bus::BusError;
use crate::config::ConfigError;
use crate::protocol::{ApiError, LoginError, QrError, SyncError};
use crate::store::StoreError;

/// Errors surfaced by the [`Client`](crate::Client) facade.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not logged in; wait for the /login event before sending")]
    NotLoggedIn,
    #[error("keep-alive already started")]
    AlreadyStarted,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Login(#[from] LoginError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Qr(#[from] QrError),
}
