//! WeChat Web protocol: endpoints, login handshake, sync loop and keep-alive.

pub mod api;
pub mod login;
pub mod qr;
pub mod response;
pub mod supervisor;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, HttpApi, WebApi};
pub use login::{LoginError, LoginFlow, LoginState};
pub use qr::{QrError, QrPresenter, TerminalQrPresenter};
pub use response::ScanStatus;
pub use supervisor::{CycleOutcome, RetryPolicy, RetryState, Supervisor};
pub use sync::{Decoded, SyncError};
