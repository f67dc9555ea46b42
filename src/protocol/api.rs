//! Typed protocol operations and their HTTP implementation.
//!
//! [`WebApi`] is the seam between the login/sync logic and the network: each
//! method is one endpoint of the WeChat Web protocol returning a decoded
//! response. [`HttpApi`] implements it with `reqwest` and a cookie jar that
//! can be reset between login attempts and restored from a persisted session.

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use rand::Rng;
use reqwest::cookie::Jar;
use reqwest::{Client as HttpClient, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::WechatConfig;
use crate::protocol::response::{
    parse_scan_response, parse_sync_check, parse_uuid_response, BatchContactResponse,
    ContactListResponse, InitResponse, ScanStatus, SendMessageResponse, SyncCheck, SyncResponse,
};
use crate::store::{CookieRecord, Session};

/// Transport and decoding failures of a single protocol call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build HTTP client: {source}")]
    Client { source: reqwest::Error },

    #[error("network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },

    #[error("invalid URL {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("server returned error {ret}: {message}")]
    Server { ret: i64, message: String },
}

/// The protocol endpoints used by login and sync.
///
/// Authenticated calls take the session snapshot they should use; the
/// implementation never holds on to it.
pub trait WebApi: Send + Sync + 'static {
    /// Drop every cookie and start a fresh HTTP session.
    fn reset(&self) -> Result<(), ApiError>;

    /// Install persisted cookies for `base_url`.
    fn restore_cookies(&self, base_url: &str, cookies: &[CookieRecord]) -> Result<(), ApiError>;

    /// Cookies received since the last reset.
    fn cookies(&self) -> Vec<CookieRecord>;

    /// Request a fresh login ticket.
    fn fetch_uuid(&self) -> impl Future<Output = Result<String, ApiError>> + Send;

    /// Poll the scan status of a ticket. `tip` is 1 until a scan has been seen.
    fn poll_scan(
        &self,
        uuid: &str,
        tip: u8,
    ) -> impl Future<Output = Result<ScanStatus, ApiError>> + Send;

    /// GET the redirect target and return its raw XML body.
    fn redirect_login(&self, url: &str) -> impl Future<Output = Result<String, ApiError>> + Send;

    /// Session-init handshake.
    fn init(&self, session: &Session) -> impl Future<Output = Result<InitResponse, ApiError>> + Send;

    /// Long-poll for pending changes.
    fn sync_check(
        &self,
        session: &Session,
    ) -> impl Future<Output = Result<SyncCheck, ApiError>> + Send;

    /// Fetch the pending batch of changes.
    fn sync(&self, session: &Session) -> impl Future<Output = Result<SyncResponse, ApiError>> + Send;

    /// One page of the contact roster, starting at `seq`.
    fn fetch_contacts(
        &self,
        session: &Session,
        seq: i64,
    ) -> impl Future<Output = Result<ContactListResponse, ApiError>> + Send;

    /// Group records including their member lists.
    fn fetch_groups(
        &self,
        session: &Session,
        groups: &[String],
    ) -> impl Future<Output = Result<BatchContactResponse, ApiError>> + Send;

    /// Send a plain-text message.
    fn send_text(
        &self,
        session: &Session,
        content: &str,
        to: &str,
    ) -> impl Future<Output = Result<SendMessageResponse, ApiError>> + Send;
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Host of the long-poll endpoint: `webpush.` in front of the API host.
pub fn sync_check_url(base_url: &str) -> Result<String, ApiError> {
    let url = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl {
        input: base_url.to_string(),
        reason: e.to_string(),
    })?;
    let host = url.host_str().ok_or_else(|| ApiError::InvalidUrl {
        input: base_url.to_string(),
        reason: "no host".to_string(),
    })?;
    Ok(format!(
        "{}://webpush.{}{}/synccheck",
        url.scheme(),
        host,
        url.path().trim_end_matches('/')
    ))
}

/// Strip the final path segment: the API base of a redirect target.
pub fn base_url_of(redirect_url: &str) -> Result<String, ApiError> {
    let mut url = Url::parse(redirect_url).map_err(|e| ApiError::InvalidUrl {
        input: redirect_url.to_string(),
        reason: e.to_string(),
    })?;
    url.set_query(None);
    url.set_fragment(None);
    let path = url.path().to_string();
    let parent = match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    };
    url.set_path(parent);
    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn cookie_record(cookie: &reqwest::cookie::Cookie<'_>, fallback_domain: Option<&str>) -> CookieRecord {
    CookieRecord {
        name: cookie.name().to_string(),
        value: cookie.value().to_string(),
        domain: cookie
            .domain()
            .or(fallback_domain)
            .map(str::to_string),
        path: cookie.path().map(str::to_string),
        expires: cookie
            .expires()
            .map(|at| DateTime::<Utc>::from(at).timestamp()),
        secure: cookie.secure(),
        http_only: cookie.http_only(),
    }
}

struct HttpState {
    client: HttpClient,
    jar: Arc<Jar>,
}

/// [`WebApi`] over HTTPS.
pub struct HttpApi {
    state: RwLock<HttpState>,
    captured: Mutex<Vec<CookieRecord>>,
    user_agent: String,
    timeout: Duration,
    login_host: String,
    app_id: String,
    lang: String,
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("login_host", &self.login_host)
            .field("app_id", &self.app_id)
            .finish()
    }
}

impl HttpApi {
    /// Build a client from the configuration.
    pub fn new(config: &WechatConfig) -> Result<Self, ApiError> {
        let user_agent = config.user_agent.clone();
        let timeout = Duration::from_secs(config.http_timeout_secs.max(1));
        let state = Self::build_state(&user_agent, timeout)?;
        Ok(Self {
            state: RwLock::new(state),
            captured: Mutex::new(Vec::new()),
            user_agent,
            timeout,
            login_host: config.login_host.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            lang: config.lang.clone(),
        })
    }

    fn build_state(user_agent: &str, timeout: Duration) -> Result<HttpState, ApiError> {
        let jar = Arc::new(Jar::default());
        let client = HttpClient::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|source| ApiError::Client { source })?;
        Ok(HttpState { client, jar })
    }

    fn client(&self) -> HttpClient {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .client
            .clone()
    }

    fn capture(&self, response: &reqwest::Response) {
        let host = response.url().host_str().map(str::to_string);
        let fresh: Vec<CookieRecord> = response
            .cookies()
            .map(|c| cookie_record(&c, host.as_deref()))
            .collect();
        if fresh.is_empty() {
            return;
        }
        let mut captured = self.captured.lock().unwrap_or_else(|e| e.into_inner());
        for cookie in fresh {
            captured.retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
            captured.push(cookie);
        }
    }

    async fn read_text(&self, url: &str, response: reqwest::Response) -> Result<String, ApiError> {
        self.capture(&response);
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response.text().await.map_err(|source| ApiError::BodyRead {
            url: url.to_string(),
            source,
        })
    }

    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, ApiError> {
        let response = self
            .client()
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|source| ApiError::Network {
                url: url.to_string(),
                source,
            })?;
        self.read_text(url, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let body = self.get_text(url, &[]).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(format!("{url}: {e}")))
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T, ApiError> {
        let response = self
            .client()
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Network {
                url: url.to_string(),
                source,
            })?;
        let text = self.read_text(url, response).await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(format!("{url}: {e}")))
    }
}

impl WebApi for HttpApi {
    fn reset(&self) -> Result<(), ApiError> {
        let fresh = Self::build_state(&self.user_agent, self.timeout)?;
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        self.captured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        debug!("HTTP session reset");
        Ok(())
    }

    fn restore_cookies(&self, base_url: &str, cookies: &[CookieRecord]) -> Result<(), ApiError> {
        let url = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl {
            input: base_url.to_string(),
            reason: e.to_string(),
        })?;
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            for cookie in cookies {
                state.jar.add_cookie_str(&cookie.to_set_cookie(), &url);
            }
        }
        let mut captured = self.captured.lock().unwrap_or_else(|e| e.into_inner());
        captured.clear();
        captured.extend(cookies.iter().cloned());
        debug!("restored {} cookies for {base_url}", cookies.len());
        Ok(())
    }

    fn cookies(&self) -> Vec<CookieRecord> {
        self.captured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn fetch_uuid(&self) -> Result<String, ApiError> {
        let url = format!("{}/jslogin", self.login_host);
        let form = [
            ("appid", self.app_id.clone()),
            ("fun", "new".to_string()),
            ("lang", self.lang.clone()),
            ("_", now_millis().to_string()),
        ];
        let response = self
            .client()
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|source| ApiError::Network {
                url: url.clone(),
                source,
            })?;
        let body = self.read_text(&url, response).await?;
        parse_uuid_response(&body)
    }

    async fn poll_scan(&self, uuid: &str, tip: u8) -> Result<ScanStatus, ApiError> {
        let url = format!("{}/cgi-bin/mmwebwx-bin/login", self.login_host);
        let query = [
            ("tip", tip.to_string()),
            ("uuid", uuid.to_string()),
            ("_", now_millis().to_string()),
        ];
        let body = self.get_text(&url, &query).await?;
        parse_scan_response(&body)
    }

    async fn redirect_login(&self, url: &str) -> Result<String, ApiError> {
        self.get_text(url, &[]).await
    }

    async fn init(&self, session: &Session) -> Result<InitResponse, ApiError> {
        let url = format!(
            "{}/webwxinit?pass_ticket={}&skey={}&r={}",
            session.base_url,
            session.pass_ticket,
            session.skey(),
            now_millis()
        );
        self.post_json(&url, &json!({ "BaseRequest": session.base_request }))
            .await
    }

    async fn sync_check(&self, session: &Session) -> Result<SyncCheck, ApiError> {
        let url = sync_check_url(&session.base_url)?;
        let request = &session.base_request;
        let query = [
            ("r", now_millis().to_string()),
            ("skey", request.skey.clone()),
            ("sid", request.sid.clone()),
            ("uin", request.uin.to_string()),
            ("deviceid", request.device_id.clone()),
            ("synckey", session.sync_key.to_query()),
            ("_", now_millis().to_string()),
        ];
        let body = self.get_text(&url, &query).await?;
        parse_sync_check(&body)
    }

    async fn sync(&self, session: &Session) -> Result<SyncResponse, ApiError> {
        let url = format!(
            "{}/webwxsync?sid={}&skey={}&pass_ticket={}",
            session.base_url,
            session.base_request.sid,
            session.skey(),
            session.pass_ticket
        );
        let body = json!({
            "BaseRequest": session.base_request,
            "SyncKey": session.sync_key,
            "rr": !Utc::now().timestamp(),
        });
        self.post_json(&url, &body).await
    }

    async fn fetch_contacts(&self, session: &Session, seq: i64) -> Result<ContactListResponse, ApiError> {
        let url = format!(
            "{}/webwxgetcontact?pass_ticket={}&skey={}&r={}&seq={}",
            session.base_url,
            session.pass_ticket,
            session.skey(),
            now_millis(),
            seq
        );
        self.get_json(&url).await
    }

    async fn fetch_groups(
        &self,
        session: &Session,
        groups: &[String],
    ) -> Result<BatchContactResponse, ApiError> {
        let url = format!(
            "{}/webwxbatchgetcontact?type=ex&r={}&pass_ticket={}",
            session.base_url,
            now_millis(),
            session.pass_ticket
        );
        let list: Vec<Value> = groups
            .iter()
            .map(|name| json!({ "UserName": name, "EncryChatRoomId": "" }))
            .collect();
        let body = json!({
            "BaseRequest": session.base_request,
            "Count": list.len(),
            "List": list,
        });
        self.post_json(&url, &body).await
    }

    async fn send_text(
        &self,
        session: &Session,
        content: &str,
        to: &str,
    ) -> Result<SendMessageResponse, ApiError> {
        let url = format!(
            "{}/webwxsendmsg?pass_ticket={}",
            session.base_url, session.pass_ticket
        );
        let local_id = format!(
            "{}{:04}",
            now_millis(),
            rand::thread_rng().gen_range(0..10_000u32)
        );
        let body = json!({
            "BaseRequest": session.base_request,
            "Msg": {
                "Type": 1,
                "Content": content,
                "FromUserName": session.user_name(),
                "ToUserName": to,
                "LocalID": local_id,
                "ClientMsgId": local_id,
            },
            "Scene": 0,
        });
        self.post_json(&url, &body).await
    }
}
