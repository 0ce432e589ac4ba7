//! Session credentials.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tasksync_protocol::CSRF_COOKIE_NAME;

/// Anti-forgery credentials issued by `GET /token/csrf-token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfCredentials {
    /// Header the server expects the token in.
    pub header_name: String,
    /// Token to echo.
    pub token: String,
    /// Cookie value set by the server, sent back with every request.
    pub cookie: Option<String>,
}

/// Supplies credentials to outgoing requests.
pub trait CredentialProvider: Send + Sync {
    /// Bearer token, if logged in.
    fn bearer_token(&self) -> Option<String>;

    /// Anti-forgery credentials, if fetched.
    fn csrf(&self) -> Option<CsrfCredentials>;

    /// Called when the server answered 401.
    fn on_unauthorized(&self);
}

/// Credentials that are never present.
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn bearer_token(&self) -> Option<String> {
        None
    }

    fn csrf(&self) -> Option<CsrfCredentials> {
        None
    }

    fn on_unauthorized(&self) {}
}

/// External side effect run when the session ends.
pub type LogoutHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Default, Clone)]
struct Session {
    user_id: Option<String>,
    token: Option<String>,
    csrf: Option<CsrfCredentials>,
}

/// The credentials of the current user.
///
/// The user id outlives the bearer token: ending the server session keeps
/// the identity so staged work stays attributed to the same user.
#[derive(Default)]
pub struct SessionCredentials {
    session: RwLock<Session>,
    logout_hook: RwLock<Option<LogoutHook>>,
}

impl SessionCredentials {
    /// Creates empty credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hook run when the server session ends.
    pub fn set_logout_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.logout_hook.write() = Some(Arc::new(hook));
    }

    /// Records a successful login.
    pub fn set_session(&self, user_id: impl Into<String>, token: impl Into<String>) {
        let mut session = self.session.write();
        session.user_id = Some(user_id.into());
        session.token = Some(token.into());
    }

    /// Records anti-forgery credentials.
    pub fn set_csrf(&self, csrf: CsrfCredentials) {
        self.session.write().csrf = Some(csrf);
    }

    /// Sets the user without a server session, for working offline.
    pub fn set_user(&self, user_id: impl Into<String>) {
        self.session.write().user_id = Some(user_id.into());
    }

    /// Current user.
    pub fn user_id(&self) -> Option<String> {
        self.session.read().user_id.clone()
    }

    /// Returns true while a bearer token is held.
    pub fn is_authenticated(&self) -> bool {
        self.session.read().token.is_some()
    }

    /// Ends the server session and runs the logout hook.
    ///
    /// Does nothing if no session is held.
    pub fn end_session(&self) {
        let had_token = {
            let mut session = self.session.write();
            session.csrf = None;
            session.token.take().is_some()
        };
        if had_token {
            tracing::info!("session ended");
            let hook = self.logout_hook.read().clone();
            if let Some(hook) = hook {
                hook();
            }
        }
    }

    /// Ends the session and forgets the user.
    pub fn reset(&self) {
        self.end_session();
        *self.session.write() = Session::default();
    }
}

impl CredentialProvider for SessionCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.session.read().token.clone()
    }

    fn csrf(&self) -> Option<CsrfCredentials> {
        self.session.read().csrf.clone()
    }

    fn on_unauthorized(&self) {
        tracing::warn!("server rejected credentials");
        self.end_session();
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.session.read();
        f.debug_struct("SessionCredentials")
            .field("user_id", &session.user_id)
            .field("authenticated", &session.token.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds the `cookie` header value for anti-forgery credentials.
pub(crate) fn csrf_cookie_header(csrf: &CsrfCredentials) -> Option<String> {
    csrf.cookie
        .as_ref()
        .map(|value| format!("{CSRF_COOKIE_NAME}={value}"))
}
