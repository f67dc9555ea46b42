//! Session storage types for the WeChat Web protocol.
//!
//! Holds the credentials needed by every authenticated request, and the
//! snapshot written to disk so a restarted process can resume silently.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;
use crate::types::Contact;

/// Credential block embedded in every authenticated JSON request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRequest {
    #[serde(rename = "Uin", default)]
    pub uin: i64,
    #[serde(rename = "Sid", default)]
    pub sid: String,
    #[serde(rename = "Skey", default)]
    pub skey: String,
    #[serde(rename = "DeviceID", default)]
    pub device_id: String,
}

impl BaseRequest {
    /// Create an empty credential block with a fresh device identifier.
    pub fn with_new_device() -> Self {
        Self {
            device_id: generate_device_id(),
            ..Default::default()
        }
    }
}

/// Device identifiers are `e` followed by 15 random digits.
pub fn generate_device_id() -> String {
    let mut rng = rand::thread_rng();
    let digits: String = (0..15)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect();
    format!("e{digits}")
}

/// One element of the opaque sync cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncKeyItem {
    #[serde(rename = "Key")]
    pub key: i64,
    #[serde(rename = "Val")]
    pub val: i64,
}

/// Opaque sync cursor handed out by the server on init and on every sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncKey {
    #[serde(rename = "Count", default)]
    pub count: i64,
    #[serde(rename = "List", default)]
    pub list: Vec<SyncKeyItem>,
}

impl SyncKey {
    /// Returns true if the cursor carries no items.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Render the cursor in the `key_val|key_val` form used by the long-poll endpoint.
    pub fn to_query(&self) -> String {
        self.list
            .iter()
            .map(|item| format!("{}_{}", item.key, item.val))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Live authenticated context.
///
/// Owned by the login state machine. Readers take a clone per use and never
/// observe a half-refreshed value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Base URL of the web API, e.g. `https://wx2.qq.com/cgi-bin/mmwebwx-bin`.
    pub base_url: String,
    pub pass_ticket: String,
    pub base_request: BaseRequest,
    /// The authenticated self identity.
    pub myself: Contact,
    pub sync_key: SyncKey,
}

impl Session {
    /// The authenticated user's own user name.
    pub fn user_name(&self) -> &str {
        &self.myself.user_name
    }

    /// Session key used in query strings and media URLs.
    pub fn skey(&self) -> &str {
        &self.base_request.skey
    }
}

/// A cookie as persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Expiry as a unix timestamp in seconds; `None` for session cookies.
    #[serde(default)]
    pub expires: Option<i64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl CookieRecord {
    /// Returns true if the cookie has an expiry in the past.
    pub fn is_expired(&self) -> bool {
        self.expires
            .map(|at| at <= Utc::now().timestamp())
            .unwrap_or(false)
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_set_cookie(&self) -> String {
        let mut header = format!("{}={}", self.name, self.value);
        if let Some(domain) = &self.domain {
            header.push_str(&format!("; Domain={domain}"));
        }
        if let Some(path) = &self.path {
            header.push_str(&format!("; Path={path}"));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header
    }
}

/// The base-info artifact: everything except cookies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseInfo {
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(rename = "passTicket")]
    pub pass_ticket: String,
    #[serde(rename = "baseRequest")]
    pub base_request: BaseRequest,
}

/// Serialized snapshot of a session plus its cookie jar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedSession {
    pub info: BaseInfo,
    pub cookies: Vec<CookieRecord>,
}

impl PersistedSession {
    /// Snapshot the credentials of a live session.
    pub fn from_session(session: &Session, cookies: Vec<CookieRecord>) -> Self {
        Self {
            info: BaseInfo {
                base_url: session.base_url.clone(),
                pass_ticket: session.pass_ticket.clone(),
                base_request: session.base_request.clone(),
            },
            cookies,
        }
    }

    /// Check that every field needed to resume is present.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.info.base_url.is_empty() {
            return Err(StoreError::CacheInvalid("missing base URL".to_string()));
        }
        if self.info.base_request.uin == 0 || self.info.base_request.sid.is_empty() {
            return Err(StoreError::CacheInvalid("missing credentials".to_string()));
        }
        if self.cookies.is_empty() {
            return Err(StoreError::CacheInvalid("no cookies".to_string()));
        }
        Ok(())
    }

    /// Rebuild a session from the snapshot.
    ///
    /// The self identity and sync cursor are not persisted; the init
    /// handshake fills them in.
    pub fn to_session(&self) -> Session {
        let mut base_request = self.info.base_request.clone();
        if base_request.device_id.is_empty() {
            base_request.device_id = generate_device_id();
        }
        Session {
            base_url: self.info.base_url.clone(),
            pass_ticket: self.info.pass_ticket.clone(),
            base_request,
            ..Default::default()
        }
    }

    /// Cookies that have not expired yet.
    pub fn live_cookies(&self) -> Vec<CookieRecord> {
        self.cookies
            .iter()
            .filter(|c| !c.is_expired())
            .cloned()
            .collect()
    }
}
