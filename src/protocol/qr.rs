//! QR presentation for the login handshake.
//!
//! The login state machine only knows the two-operation [`QrPresenter`]
//! contract; how the ticket reaches the operator is up to the implementation.

use std::sync::Mutex;

use log::{info, warn};
use qrcode::{render::unicode, QrCode};
use thiserror::Error;

use crate::protocol::LoginError;

/// Prefix of the URL encoded in the login QR code.
pub const LOGIN_QR_PREFIX: &str = "https://login.weixin.qq.com/l/";

#[derive(Debug, Error)]
pub enum QrError {
    #[error("failed to generate QR code: {0}")]
    GenerationFailed(String),
    #[error("presenter unavailable: {0}")]
    Unavailable(String),
}

/// Displays a login ticket to the operator.
pub trait QrPresenter: Send + Sync {
    /// Render the ticket. May hand the rendering off and return immediately.
    fn process_ticket(&self, uuid: &str) -> Result<(), QrError>;

    /// Called exactly once per presented ticket, with the login error if
    /// rendering or the handshake failed.
    fn on_confirmed(&self, error: Option<&LoginError>);
}

/// URL the phone app expects for a ticket.
pub fn login_url(uuid: &str) -> String {
    format!("{LOGIN_QR_PREFIX}{uuid}")
}

/// Render `data` as a terminal QR code using half-height block characters.
pub fn render_qr_unicode(data: &str) -> Result<String, QrError> {
    let code =
        QrCode::new(data.as_bytes()).map_err(|e| QrError::GenerationFailed(e.to_string()))?;

    let image = code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build();

    Ok(image)
}

/// Prints the login QR code to stdout.
#[derive(Debug, Default)]
pub struct TerminalQrPresenter {
    pending: Mutex<Option<String>>,
}

impl TerminalQrPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticket currently on screen, if any.
    pub fn pending_ticket(&self) -> Option<String> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl QrPresenter for TerminalQrPresenter {
    fn process_ticket(&self, uuid: &str) -> Result<(), QrError> {
        let url = login_url(uuid);
        let image = render_qr_unicode(&url)?;
        println!("{image}");
        println!("Scan with the WeChat app to log in: {url}");
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(uuid.to_string());
        Ok(())
    }

    fn on_confirmed(&self, error: Option<&LoginError>) {
        let ticket = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        match error {
            None => info!("QR login confirmed"),
            Some(err) => warn!("QR login for ticket {ticket:?} failed: {err}"),
        }
    }
}
