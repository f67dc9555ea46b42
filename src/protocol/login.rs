//! Login state machine.
//!
//! ```text
//! Idle -> ResumeAttempt -> Resumed ------------------------------------------> Initialized
//!                       \-> UuidRequested -> AwaitingScan -> AwaitingConfirm
//!                                         -> Redirected -> LoggedIn -> Initialized
//! ```
//!
//! Any step may end in `Failed`; the keep-alive supervisor restarts the
//! machine from `Idle`. Nothing here retries.

use log::{debug, info, warn};
use thiserror::Error;

use crate::protocol::api::base_url_of;
use crate::protocol::response::{LoginTicket, ScanStatus};
use crate::protocol::{ApiError, QrError, QrPresenter, WebApi};
use crate::store::{BaseRequest, CredentialStore, PersistedSession, Session};

/// Position of the login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Idle,
    ResumeAttempt,
    Resumed,
    UuidRequested,
    AwaitingScan,
    AwaitingConfirm,
    Redirected,
    LoggedIn,
    Initialized,
    Failed,
}

/// Why a login attempt failed. One variant per handshake step.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("failed to fetch login ticket: {0}")]
    TicketFetchFailed(#[source] ApiError),

    #[error("QR presenter failed: {0}")]
    PresenterFailed(#[from] QrError),

    #[error("login ticket was not confirmed: {0}")]
    ScanTimeout(String),

    #[error("failed to decode login redirect: {0}")]
    RedirectDecodeFailed(#[source] ApiError),

    #[error("login rejected by server (ret {ret}): {message}")]
    LoginRejected { ret: i64, message: String },

    #[error("session init failed: {0}")]
    InitFailed(#[source] ApiError),
}

/// One run of the login handshake.
pub struct LoginFlow<'a, A: WebApi> {
    api: &'a A,
    store: &'a dyn CredentialStore,
    presenter: &'a dyn QrPresenter,
    state: LoginState,
}

impl<'a, A: WebApi> LoginFlow<'a, A> {
    pub fn new(api: &'a A, store: &'a dyn CredentialStore, presenter: &'a dyn QrPresenter) -> Self {
        Self {
            api,
            store,
            presenter,
            state: LoginState::Idle,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    fn transition(&mut self, next: LoginState) {
        debug!("login state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Resume from the cached session if possible, otherwise log in interactively.
    pub async fn run(&mut self) -> Result<Session, LoginError> {
        self.transition(LoginState::Idle);
        if let Some(session) = self.try_resume().await {
            return Ok(session);
        }
        match self.interactive().await {
            Ok(session) => Ok(session),
            Err(err) => {
                self.transition(LoginState::Failed);
                Err(err)
            }
        }
    }

    async fn try_resume(&mut self) -> Option<Session> {
        self.transition(LoginState::ResumeAttempt);
        let Some(snapshot) = self.store.load() else {
            debug!("no usable cached session");
            return None;
        };

        info!("resuming cached session");
        let mut session = snapshot.to_session();
        let restored = self
            .api
            .reset()
            .and_then(|()| self.api.restore_cookies(&session.base_url, &snapshot.live_cookies()));
        let result = match restored {
            Ok(()) => self.initialize(&mut session).await,
            Err(err) => Err(LoginError::InitFailed(err)),
        };

        match result {
            Ok(()) => {
                self.transition(LoginState::Resumed);
                self.transition(LoginState::Initialized);
                Some(session)
            }
            Err(err) => {
                warn!("cached session rejected: {err}");
                if let Err(err) = self.store.invalidate() {
                    warn!("failed to invalidate cached session: {err}");
                }
                None
            }
        }
    }

    async fn interactive(&mut self) -> Result<Session, LoginError> {
        self.api.reset().map_err(LoginError::TicketFetchFailed)?;

        self.transition(LoginState::UuidRequested);
        let uuid = self
            .api
            .fetch_uuid()
            .await
            .map_err(LoginError::TicketFetchFailed)?;
        debug!("login ticket {uuid}");

        if let Err(err) = self.presenter.process_ticket(&uuid) {
            let err = LoginError::PresenterFailed(err);
            self.presenter.on_confirmed(Some(&err));
            return Err(err);
        }

        let confirmed = self.await_confirmation(&uuid).await;
        self.presenter.on_confirmed(confirmed.as_ref().err());
        let redirect_url = confirmed?;

        let mut session = self.redirect(&redirect_url).await?;
        self.initialize(&mut session).await?;
        Ok(session)
    }

    async fn await_confirmation(&mut self, uuid: &str) -> Result<String, LoginError> {
        self.transition(LoginState::AwaitingScan);
        let mut tip = 1u8;
        loop {
            let status = self
                .api
                .poll_scan(uuid, tip)
                .await
                .map_err(|err| LoginError::ScanTimeout(err.to_string()))?;
            match status {
                ScanStatus::Waiting => {}
                ScanStatus::Scanned => {
                    if self.state != LoginState::AwaitingConfirm {
                        info!("QR code scanned, waiting for confirmation");
                        self.transition(LoginState::AwaitingConfirm);
                    }
                    tip = 0;
                }
                ScanStatus::Confirmed { redirect_url } => return Ok(redirect_url),
                ScanStatus::Rejected { code } => {
                    return Err(LoginError::ScanTimeout(format!("status {code}")))
                }
            }
        }
    }

    async fn redirect(&mut self, redirect_url: &str) -> Result<Session, LoginError> {
        self.transition(LoginState::Redirected);
        let body = self
            .api
            .redirect_login(redirect_url)
            .await
            .map_err(LoginError::RedirectDecodeFailed)?;
        let ticket = LoginTicket::from_xml(&body).map_err(LoginError::RedirectDecodeFailed)?;
        if !ticket.is_success() {
            return Err(LoginError::LoginRejected {
                ret: ticket.ret,
                message: ticket.message,
            });
        }

        let uin = ticket.wxuin.filter(|uin| *uin != 0);
        let (Some(uin), false) = (uin, ticket.wxsid.is_empty()) else {
            return Err(LoginError::RedirectDecodeFailed(ApiError::Decode(
                "login ticket without credentials".to_string(),
            )));
        };
        let base_url = base_url_of(redirect_url).map_err(LoginError::RedirectDecodeFailed)?;

        let session = Session {
            base_url,
            pass_ticket: ticket.pass_ticket,
            base_request: BaseRequest {
                uin,
                sid: ticket.wxsid,
                skey: ticket.skey,
                ..BaseRequest::with_new_device()
            },
            ..Default::default()
        };
        self.transition(LoginState::LoggedIn);

        let snapshot = PersistedSession::from_session(&session, self.api.cookies());
        if let Err(err) = self.store.save(&snapshot) {
            warn!("failed to persist session: {err}");
        }
        Ok(session)
    }

    async fn initialize(&mut self, session: &mut Session) -> Result<(), LoginError> {
        let init = self
            .api
            .init(session)
            .await
            .map_err(LoginError::InitFailed)?;
        init.base_response.check().map_err(LoginError::InitFailed)?;

        if !init.skey.is_empty() {
            session.base_request.skey = init.skey;
        }
        session.myself = init.user;
        session.sync_key = init.sync_key;
        self.transition(LoginState::Initialized);
        info!("logged in as {} ({})", session.myself.nick_name, session.user_name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::*;
    use crate::store::{BaseInfo, MemoryCredentialStore};

    fn cached_snapshot() -> PersistedSession {
        let session = live_session();
        PersistedSession::from_session(&session, vec![session_cookie()])
    }

    #[tokio::test]
    async fn test_valid_cache_never_presents_qr() {
        let api = FakeApi::new();
        api.push_init(Ok(init_ok("@crypt_resumed")));
        let store = MemoryCredentialStore::with_snapshot(cached_snapshot());
        let presenter = RecordingPresenter::new();

        let mut flow = LoginFlow::new(&api, &store, &presenter);
        let session = flow.run().await.unwrap();

        assert_eq!(flow.state(), LoginState::Initialized);
        assert!(presenter.tickets().is_empty());
        assert!(presenter.confirmations().is_empty());
        assert_eq!(api.calls(), vec!["reset", "restore_cookies", "init"]);
        assert_eq!(session.skey(), "@crypt_resumed");
        assert_eq!(session.user_name(), SELF_USER);
        assert_eq!(session.base_url, BASE_URL);
        assert_eq!(api.cookies(), vec![session_cookie()]);
    }

    #[tokio::test]
    async fn test_absent_cache_presents_qr_and_persists() {
        let api = FakeApi::new();
        api.script_interactive_login();
        let store = MemoryCredentialStore::new();
        let presenter = RecordingPresenter::new();

        let mut flow = LoginFlow::new(&api, &store, &presenter);
        let session = flow.run().await.unwrap();

        assert_eq!(flow.state(), LoginState::Initialized);
        assert_eq!(presenter.tickets(), vec!["uuid-1"]);
        assert_eq!(presenter.confirmations(), vec![None]);
        assert_eq!(api.count("poll_scan"), 3);
        assert_eq!(
            api.calls().into_iter().filter(|c| c.starts_with("poll_scan")).collect::<Vec<_>>(),
            vec!["poll_scan:1", "poll_scan:1", "poll_scan:0"]
        );

        assert_eq!(session.base_url, BASE_URL);
        assert_eq!(session.base_request.uin, 42);
        assert_eq!(session.base_request.sid, "sid-1");
        assert_eq!(session.pass_ticket, "pt-1");
        assert_eq!(session.skey(), "@crypt_2");
        assert!(session.base_request.device_id.starts_with('e'));

        let saved = store.raw().unwrap();
        assert_eq!(saved.info.base_url, BASE_URL);
        assert_eq!(saved.cookies, vec![session_cookie()]);
        assert!(saved.validate().is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_cache_presents_qr() {
        let api = FakeApi::new();
        api.script_interactive_login();
        let corrupt = PersistedSession {
            info: BaseInfo::default(),
            cookies: vec![session_cookie()],
        };
        let store = MemoryCredentialStore::with_snapshot(corrupt);
        let presenter = RecordingPresenter::new();

        LoginFlow::new(&api, &store, &presenter).run().await.unwrap();
        assert_eq!(presenter.tickets().len(), 1);
        assert_eq!(api.count("restore_cookies"), 0);
    }

    #[tokio::test]
    async fn test_rejected_resume_invalidates_then_logs_in() {
        let api = FakeApi::new();
        api.push_init(Err("session expired".to_string()));
        api.script_interactive_login();
        let store = MemoryCredentialStore::with_snapshot(cached_snapshot());
        let presenter = RecordingPresenter::new();

        let session = LoginFlow::new(&api, &store, &presenter).run().await.unwrap();

        assert_eq!(presenter.tickets().len(), 1);
        assert_eq!(api.count("init"), 2);
        assert_eq!(session.skey(), "@crypt_2");
        // The fresh login replaced the invalidated snapshot.
        assert_eq!(store.raw().unwrap().info.base_request.sid, "sid-1");
    }

    #[tokio::test]
    async fn test_scan_rejection_notifies_presenter() {
        let api = FakeApi::new();
        api.uuids.lock().unwrap().push_back(Ok("uuid-x".to_string()));
        api.scans.lock().unwrap().push_back(ScanStatus::Waiting);
        let store = MemoryCredentialStore::new();
        let presenter = RecordingPresenter::new();

        let mut flow = LoginFlow::new(&api, &store, &presenter);
        let err = flow.run().await.unwrap_err();

        assert!(matches!(err, LoginError::ScanTimeout(_)));
        assert_eq!(flow.state(), LoginState::Failed);
        let confirmations = presenter.confirmations();
        assert_eq!(confirmations.len(), 1);
        assert!(confirmations[0].is_some());
        assert_eq!(api.count("redirect_login"), 0);
    }

    #[tokio::test]
    async fn test_ticket_failure_skips_presenter() {
        let api = FakeApi::new();
        api.uuids
            .lock()
            .unwrap()
            .push_back(Err("code 500".to_string()));
        let store = MemoryCredentialStore::new();
        let presenter = RecordingPresenter::new();

        let err = LoginFlow::new(&api, &store, &presenter).run().await.unwrap_err();
        assert!(matches!(err, LoginError::TicketFetchFailed(_)));
        assert!(presenter.tickets().is_empty());
        assert!(presenter.confirmations().is_empty());
    }

    #[tokio::test]
    async fn test_presenter_failure_stops_before_polling() {
        let api = FakeApi::new();
        api.script_interactive_login();
        let store = MemoryCredentialStore::new();
        let presenter = RecordingPresenter::refusing();

        let err = LoginFlow::new(&api, &store, &presenter).run().await.unwrap_err();
        assert!(matches!(err, LoginError::PresenterFailed(_)));
        assert_eq!(api.count("poll_scan"), 0);
        assert_eq!(presenter.tickets().len(), 1);
        let confirmations = presenter.confirmations();
        assert_eq!(confirmations.len(), 1);
        assert!(confirmations[0].as_deref().is_some_and(|e| e.contains("no display")));
    }

    #[tokio::test]
    async fn test_redirect_rejection() {
        let api = FakeApi::new();
        api.script_interactive_login();
        {
            let mut redirects = api.redirects.lock().unwrap();
            redirects.clear();
            redirects.push_back(ticket_xml(1203));
        }
        let store = MemoryCredentialStore::new();
        let presenter = RecordingPresenter::new();

        let err = LoginFlow::new(&api, &store, &presenter).run().await.unwrap_err();
        match err {
            LoginError::LoginRejected { ret, message } => {
                assert_eq!(ret, 1203);
                assert_eq!(message, "rejected");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(presenter.confirmations(), vec![None]);
        assert!(store.raw().is_none());
        assert_eq!(api.count("init"), 0);
    }

    #[tokio::test]
    async fn test_undecodable_redirect() {
        let api = FakeApi::new();
        api.script_interactive_login();
        {
            let mut redirects = api.redirects.lock().unwrap();
            redirects.clear();
            redirects.push_back("<html>oops".to_string());
        }
        let store = MemoryCredentialStore::new();
        let presenter = RecordingPresenter::new();

        let err = LoginFlow::new(&api, &store, &presenter).run().await.unwrap_err();
        assert!(matches!(err, LoginError::RedirectDecodeFailed(_)));
    }

    #[tokio::test]
    async fn test_init_failure_after_interactive_login() {
        let api = FakeApi::new();
        api.script_interactive_login();
        api.inits.lock().unwrap().clear();
        api.push_init(Err("bad init".to_string()));
        let store = MemoryCredentialStore::new();
        let presenter = RecordingPresenter::new();

        let err = LoginFlow::new(&api, &store, &presenter).run().await.unwrap_err();
        assert!(matches!(err, LoginError::InitFailed(_)));
        // Credentials were persisted before init, as the redirect succeeded.
        assert!(store.raw().is_some());
    }
}
