//! Scripted in-memory [`WebApi`] and [`QrPresenter`] for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::protocol::response::{
    BaseResponse, BatchContactResponse, ContactListResponse, InitResponse, ScanStatus,
    SendMessageResponse, SyncCheck, SyncResponse,
};
use crate::protocol::{ApiError, LoginError, QrError, QrPresenter, WebApi};
use crate::store::{CookieRecord, Session, SyncKey, SyncKeyItem};
use crate::types::Contact;

pub const BASE_URL: &str = "https://wx2.qq.com/cgi-bin/mmwebwx-bin";
pub const REDIRECT_URL: &str =
    "https://wx2.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=T&uuid=U&lang=zh_CN&scan=1&fun=new";
pub const SELF_USER: &str = "@self";

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn unexpected(what: &str) -> ApiError {
    ApiError::Unexpected(format!("no scripted {what}"))
}

pub fn sync_key(val: i64) -> SyncKey {
    SyncKey {
        count: 1,
        list: vec![SyncKeyItem { key: 1, val }],
    }
}

/// A successful init response for the self identity.
pub fn init_ok(skey: &str) -> InitResponse {
    InitResponse {
        base_response: BaseResponse::default(),
        user: Contact {
            user_name: SELF_USER.to_string(),
            nick_name: "Me".to_string(),
            ..Default::default()
        },
        skey: skey.to_string(),
        sync_key: sync_key(1),
    }
}

pub fn ticket_xml(ret: i64) -> String {
    format!(
        "<error><ret>{ret}</ret><message>{}</message><skey>@crypt_1</skey><wxsid>sid-1</wxsid><wxuin>42</wxuin><pass_ticket>pt-1</pass_ticket></error>",
        if ret == 0 { "" } else { "rejected" }
    )
}

pub fn session_cookie() -> CookieRecord {
    CookieRecord {
        name: "wxsid".to_string(),
        value: "sid-1".to_string(),
        domain: Some("wx2.qq.com".to_string()),
        path: Some("/".to_string()),
        ..Default::default()
    }
}

/// A logged-in session as the sync loop sees it.
pub fn live_session() -> Session {
    let mut session = Session {
        base_url: BASE_URL.to_string(),
        pass_ticket: "pt-1".to_string(),
        sync_key: sync_key(1),
        ..Default::default()
    };
    session.base_request.uin = 42;
    session.base_request.sid = "sid-1".to_string();
    session.base_request.skey = "@crypt_1".to_string();
    session.base_request.device_id = "e123456789012345".to_string();
    session.myself = Contact {
        user_name: SELF_USER.to_string(),
        nick_name: "Me".to_string(),
        ..Default::default()
    };
    session
}

pub fn empty_sync() -> SyncResponse {
    SyncResponse {
        base_response: BaseResponse::default(),
        add_msg_list: Vec::new(),
        mod_contact_list: Vec::new(),
        del_contact_list: Vec::new(),
        sync_key: sync_key(2),
        skey: String::new(),
    }
}

/// Scripted protocol. Each queue is consumed front to back; an exhausted
/// queue answers with an error so loops terminate.
#[derive(Debug, Default)]
pub struct FakeApi {
    pub uuids: Mutex<VecDeque<Result<String, String>>>,
    pub scans: Mutex<VecDeque<ScanStatus>>,
    pub redirects: Mutex<VecDeque<String>>,
    pub inits: Mutex<VecDeque<Result<InitResponse, String>>>,
    pub sync_checks: Mutex<VecDeque<SyncCheck>>,
    pub syncs: Mutex<VecDeque<SyncResponse>>,
    pub contacts: Mutex<Vec<Contact>>,
    pub groups: Mutex<HashMap<String, Contact>>,
    pub login_cookies: Mutex<Vec<CookieRecord>>,
    jar: Mutex<Vec<CookieRecord>>,
    calls: Mutex<Vec<String>>,
    seen_sessions: Mutex<Vec<Session>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a full interactive login: ticket, one scan, confirm, redirect, init.
    pub fn script_interactive_login(&self) {
        lock(&self.uuids).push_back(Ok("uuid-1".to_string()));
        lock(&self.scans).extend([
            ScanStatus::Waiting,
            ScanStatus::Scanned,
            ScanStatus::Confirmed {
                redirect_url: REDIRECT_URL.to_string(),
            },
        ]);
        lock(&self.redirects).push_back(ticket_xml(0));
        lock(&self.inits).push_back(Ok(init_ok("@crypt_2")));
        lock(&self.login_cookies).push(session_cookie());
    }

    pub fn push_init(&self, result: Result<InitResponse, String>) {
        lock(&self.inits).push_back(result);
    }

    pub fn push_sync(&self, check: SyncCheck, response: Option<SyncResponse>) {
        lock(&self.sync_checks).push_back(check);
        if let Some(response) = response {
            lock(&self.syncs).push_back(response);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn sessions(&self) -> Vec<Session> {
        lock(&self.seen_sessions).clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }

    fn record(&self, call: impl Into<String>) {
        lock(&self.calls).push(call.into());
    }
}

impl WebApi for FakeApi {
    fn reset(&self) -> Result<(), ApiError> {
        self.record("reset");
        lock(&self.jar).clear();
        Ok(())
    }

    fn restore_cookies(&self, _base_url: &str, cookies: &[CookieRecord]) -> Result<(), ApiError> {
        self.record("restore_cookies");
        *lock(&self.jar) = cookies.to_vec();
        Ok(())
    }

    fn cookies(&self) -> Vec<CookieRecord> {
        lock(&self.jar).clone()
    }

    async fn fetch_uuid(&self) -> Result<String, ApiError> {
        self.record("fetch_uuid");
        match lock(&self.uuids).pop_front() {
            Some(Ok(uuid)) => Ok(uuid),
            Some(Err(msg)) => Err(ApiError::Unexpected(msg)),
            None => Err(unexpected("uuid")),
        }
    }

    async fn poll_scan(&self, _uuid: &str, tip: u8) -> Result<ScanStatus, ApiError> {
        self.record(format!("poll_scan:{tip}"));
        Ok(lock(&self.scans).pop_front().unwrap_or(ScanStatus::Rejected {
            code: "400".to_string(),
        }))
    }

    async fn redirect_login(&self, _url: &str) -> Result<String, ApiError> {
        self.record("redirect_login");
        let body = lock(&self.redirects)
            .pop_front()
            .ok_or_else(|| unexpected("redirect"))?;
        let cookies = lock(&self.login_cookies).clone();
        lock(&self.jar).extend(cookies);
        Ok(body)
    }

    async fn init(&self, session: &Session) -> Result<InitResponse, ApiError> {
        self.record("init");
        lock(&self.seen_sessions).push(session.clone());
        match lock(&self.inits).pop_front() {
            Some(Ok(init)) => Ok(init),
            Some(Err(msg)) => Err(ApiError::Server { ret: 1101, message: msg }),
            None => Err(unexpected("init")),
        }
    }

    async fn sync_check(&self, session: &Session) -> Result<SyncCheck, ApiError> {
        self.record("sync_check");
        lock(&self.seen_sessions).push(session.clone());
        lock(&self.sync_checks)
            .pop_front()
            .ok_or_else(|| unexpected("sync check"))
    }

    async fn sync(&self, session: &Session) -> Result<SyncResponse, ApiError> {
        self.record("sync");
        lock(&self.seen_sessions).push(session.clone());
        lock(&self.syncs).pop_front().ok_or_else(|| unexpected("sync"))
    }

    async fn fetch_contacts(&self, _session: &Session, seq: i64) -> Result<ContactListResponse, ApiError> {
        self.record(format!("fetch_contacts:{seq}"));
        Ok(ContactListResponse {
            base_response: BaseResponse::default(),
            member_list: lock(&self.contacts).clone(),
            seq: 0,
        })
    }

    async fn fetch_groups(
        &self,
        _session: &Session,
        groups: &[String],
    ) -> Result<BatchContactResponse, ApiError> {
        self.record(format!("fetch_groups:{}", groups.join(",")));
        let known = lock(&self.groups);
        Ok(BatchContactResponse {
            base_response: BaseResponse::default(),
            contact_list: groups.iter().filter_map(|g| known.get(g).cloned()).collect(),
        })
    }

    async fn send_text(
        &self,
        _session: &Session,
        content: &str,
        to: &str,
    ) -> Result<SendMessageResponse, ApiError> {
        self.record("send_text");
        lock(&self.sent).push((content.to_string(), to.to_string()));
        Ok(SendMessageResponse {
            base_response: BaseResponse::default(),
            msg_id: "1".to_string(),
        })
    }
}

/// Records every presenter call; optionally refuses tickets.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    pub refuse: bool,
    tickets: Mutex<Vec<String>>,
    confirmations: Mutex<Vec<Option<String>>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn tickets(&self) -> Vec<String> {
        lock(&self.tickets).clone()
    }

    pub fn confirmations(&self) -> Vec<Option<String>> {
        lock(&self.confirmations).clone()
    }
}

impl QrPresenter for RecordingPresenter {
    fn process_ticket(&self, uuid: &str) -> Result<(), QrError> {
        lock(&self.tickets).push(uuid.to_string());
        if self.refuse {
            return Err(QrError::Unavailable("no display".to_string()));
        }
        Ok(())
    }

    fn on_confirmed(&self, error: Option<&LoginError>) {
        lock(&self.confirmations).push(error.map(ToString::to_string));
    }
}
