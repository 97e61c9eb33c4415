//! Interactive OAuth via a loopback redirect.
//!
//! Providers that require a registered redirect URI get one pointing at an
//! ephemeral port on 127.0.0.1. The user's browser completes the
//! authorization there, and a short-lived hyper listener hands the result
//! back to this process. Twitch uses the authorization-code flow with PKCE;
//! YouTube uses the implicit flow, where the token arrives in the URL
//! fragment and a small relay page re-submits it as a query so the listener
//! can actually see it.
//!
//! One flow may be in flight per process. Asking to authenticate the same
//! platform again while its flow is pending joins the existing flow; asking
//! for a different platform is an error.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, watch};

use crate::error::AuthError;
use crate::model::{OAuthCredentials, Platform};
use crate::store::CredentialStore;

/// How long we wait for the browser redirect before giving up.
pub const DEFAULT_REDIRECT_TIMEOUT: Duration = Duration::from_secs(300);

const YOUTUBE_SCOPE: &str = "https://www.googleapis.com/auth/youtube.readonly";

const DONE_HTML: &str = "<!DOCTYPE html><html><body>\
<h1>Authentication complete</h1>\
<p>You can close this window and return to the application.</p>\
</body></html>";

// Fragments never reach the server, so the implicit flow's first hit on
// /callback carries nothing useful. This page re-requests with the fragment
// as the query string, which the second hit can parse.
const RELAY_HTML: &str = "<!DOCTYPE html><html><body>\
<p>Completing sign-in&hellip;</p>\
<script>window.location.replace('/callback?' + window.location.hash.substring(1));</script>\
</body></html>";

/// Where the user currently is in an authentication flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Idle,
    /// The listener is bound and the browser has been pointed at the
    /// authorization URL.
    AwaitingRedirect,
    Captured,
    TimedOut,
    Cancelled,
    /// The redirect arrived but was rejected: state mismatch, provider
    /// error, or a failed token exchange.
    Failed,
}

/// The flow a platform's provider supports.
enum FlowKind {
    /// Authorization code with PKCE, exchanged at the token endpoint.
    Code {
        client: ConfiguredCodeClient,
        verifier: PkceCodeVerifier,
    },
    /// Implicit: the access token arrives directly in the redirect fragment.
    Implicit,
}

type ConfiguredCodeClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Shareable outcome of a flow, so a joining caller sees the same result as
/// the one that started it.
#[derive(Debug, Clone)]
enum FlowResult {
    Success,
    TimedOut,
    Cancelled,
    StateMismatch,
    Provider(String),
    Exchange(String),
}

impl FlowResult {
    fn into_result(self) -> Result<(), AuthError> {
        match self {
            FlowResult::Success => Ok(()),
            FlowResult::TimedOut => Err(AuthError::Timeout),
            FlowResult::Cancelled => Err(AuthError::Cancelled),
            FlowResult::StateMismatch => Err(AuthError::StateMismatch),
            FlowResult::Provider(msg) => Err(AuthError::Provider(msg)),
            FlowResult::Exchange(msg) => Err(AuthError::TokenExchange(msg)),
        }
    }
}

/// A flow that is waiting for its redirect.
struct PendingFlow {
    platform: Platform,
    authorize_url: String,
    redirect_uri: String,
    cancel: watch::Sender<bool>,
    outcome: watch::Receiver<Option<FlowResult>>,
}

/// Public view of a pending flow, for hosts that want to re-display the URL.
#[derive(Debug, Clone)]
pub struct PendingAuth {
    pub platform: Platform,
    pub authorize_url: String,
    pub redirect_uri: String,
}

struct Endpoints {
    authorize: String,
    token: String,
}

fn default_endpoints(platform: Platform) -> Option<Endpoints> {
    match platform {
        Platform::Twitch => Some(Endpoints {
            authorize: "https://id.twitch.tv/oauth2/authorize".into(),
            token: "https://id.twitch.tv/oauth2/token".into(),
        }),
        Platform::YouTube => Some(Endpoints {
            authorize: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            // The implicit flow never exchanges, but refresh does.
            token: "https://oauth2.googleapis.com/token".into(),
        }),
        Platform::Kick | Platform::TikTok => None,
    }
}

/// Runs interactive authentication flows and writes the resulting
/// credentials to the [`CredentialStore`].
pub struct LoopbackAuthenticator {
    credentials: CredentialStore,
    timeout: Duration,
    open_browser: bool,
    endpoints: HashMap<Platform, Endpoints>,
    phase: watch::Sender<AuthPhase>,
    pending: Arc<Mutex<Option<PendingFlow>>>,
}

impl LoopbackAuthenticator {
    pub fn new(credentials: CredentialStore) -> Self {
        let mut endpoints = HashMap::new();
        for platform in Platform::ALL {
            if let Some(eps) = default_endpoints(platform) {
                endpoints.insert(platform, eps);
            }
        }
        let (phase, _) = watch::channel(AuthPhase::Idle);
        LoopbackAuthenticator {
            credentials,
            timeout: DEFAULT_REDIRECT_TIMEOUT,
            open_browser: true,
            endpoints,
            phase,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disables opening the system browser. The authorization URL is still
    /// available through [`LoopbackAuthenticator::current_flow`].
    pub fn with_browser(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }

    /// Points a platform's provider at different endpoints, so tests can
    /// drive the flow against a local stub.
    pub fn with_endpoints(mut self, platform: Platform, authorize: &str, token: &str) -> Self {
        self.endpoints.insert(
            platform,
            Endpoints {
                authorize: authorize.to_string(),
                token: token.to_string(),
            },
        );
        self
    }

    /// Observes flow progress.
    pub fn subscribe_phase(&self) -> watch::Receiver<AuthPhase> {
        self.phase.subscribe()
    }

    /// The flow currently awaiting its redirect, if any.
    pub async fn current_flow(&self) -> Option<PendingAuth> {
        self.pending.lock().await.as_ref().map(|flow| PendingAuth {
            platform: flow.platform,
            authorize_url: flow.authorize_url.clone(),
            redirect_uri: flow.redirect_uri.clone(),
        })
    }

    /// Cancels the pending flow, if any. The waiting caller gets
    /// [`AuthError::Cancelled`] and the port is released.
    pub async fn cancel(&self) {
        if let Some(flow) = self.pending.lock().await.as_ref() {
            let _ = flow.cancel.send(true);
        }
    }

    /// Runs the platform's authentication flow to completion, storing the
    /// captured credentials on success.
    ///
    /// While a flow for the same platform is pending this joins it instead
    /// of binding a second listener; a pending flow for a different platform
    /// is [`AuthError::FlowInFlight`].
    #[tracing::instrument(skip(self))]
    pub async fn authenticate(&self, platform: Platform) -> Result<(), AuthError> {
        let mut pending = self.pending.lock().await;
        if let Some(flow) = pending.as_ref() {
            if flow.platform == platform {
                tracing::debug!(%platform, "joining the flow already in progress");
                let outcome = flow.outcome.clone();
                drop(pending);
                return await_outcome(outcome).await;
            }
            return Err(AuthError::FlowInFlight(flow.platform));
        }

        let endpoints = self
            .endpoints
            .get(&platform)
            .ok_or(AuthError::FlowUnsupported(platform))?;
        let creds = self
            .credentials
            .get(platform)
            .unwrap_or_else(|| OAuthCredentials::empty(platform));
        let client_id = creds
            .client_id
            .clone()
            .ok_or(AuthError::MissingCredentials(platform, "client_id"))?;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(AuthError::Listener)?;
        let addr = listener.local_addr().map_err(AuthError::Listener)?;
        let redirect_uri = format!("http://{}:{}/callback", addr.ip(), addr.port());

        let csrf = CsrfToken::new_random();
        let (kind, authorize_url) = match platform {
            Platform::Twitch => {
                let auth_url = AuthUrl::new(endpoints.authorize.clone())
                    .map_err(|e| AuthError::Provider(e.to_string()))?;
                let token_url = TokenUrl::new(endpoints.token.clone())
                    .map_err(|e| AuthError::Provider(e.to_string()))?;
                let redirect_url = RedirectUrl::new(redirect_uri.clone())
                    .map_err(|e| AuthError::Provider(e.to_string()))?;
                let mut client = BasicClient::new(ClientId::new(client_id))
                    .set_auth_uri(auth_url)
                    .set_token_uri(token_url)
                    .set_redirect_uri(redirect_url);
                if let Some(secret) = creds.client_secret.clone() {
                    client = client.set_client_secret(ClientSecret::new(secret));
                }
                let (pkce_challenge, verifier) = PkceCodeChallenge::new_random_sha256();
                let state = csrf.clone();
                let (url, _csrf) = client
                    // The CSRF token is never reused; each flow mints one.
                    .authorize_url(move || state.clone())
                    .add_scope(Scope::new("user:read:email".to_string()))
                    .set_pkce_challenge(pkce_challenge)
                    .url();
                (FlowKind::Code { client, verifier }, url.to_string())
            }
            Platform::YouTube => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("client_id", &client_id)
                    .append_pair("redirect_uri", &redirect_uri)
                    .append_pair("response_type", "token")
                    .append_pair("scope", YOUTUBE_SCOPE)
                    .append_pair("state", csrf.secret())
                    .finish();
                (
                    FlowKind::Implicit,
                    format!("{}?{query}", endpoints.authorize),
                )
            }
            Platform::Kick | Platform::TikTok => {
                return Err(AuthError::FlowUnsupported(platform));
            }
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        *pending = Some(PendingFlow {
            platform,
            authorize_url: authorize_url.clone(),
            redirect_uri,
            cancel: cancel_tx,
            outcome: outcome_rx.clone(),
        });
        drop(pending);

        self.phase.send_replace(AuthPhase::AwaitingRedirect);
        tokio::spawn(drive_flow(FlowDriver {
            platform,
            kind,
            csrf,
            listener,
            credentials: self.credentials.clone(),
            timeout: self.timeout,
            cancel: cancel_rx,
            outcome: outcome_tx,
            phase: self.phase.clone(),
            pending: Arc::clone(&self.pending),
        }));

        tracing::info!(%platform, url = %authorize_url, "asking user to follow OAuth flow");
        if self.open_browser
            && let Err(e) = webbrowser::open(&authorize_url)
        {
            // The flow can still complete if the user opens the URL by hand.
            tracing::warn!(%platform, error = %e, "could not open browser");
        }

        await_outcome(outcome_rx).await
    }
}

async fn await_outcome(
    mut outcome: watch::Receiver<Option<FlowResult>>,
) -> Result<(), AuthError> {
    loop {
        if let Some(result) = outcome.borrow_and_update().clone() {
            return result.into_result();
        }
        if outcome.changed().await.is_err() {
            return Err(AuthError::Cancelled);
        }
    }
}

struct FlowDriver {
    platform: Platform,
    kind: FlowKind,
    csrf: CsrfToken,
    listener: TcpListener,
    credentials: CredentialStore,
    timeout: Duration,
    cancel: watch::Receiver<bool>,
    outcome: watch::Sender<Option<FlowResult>>,
    phase: watch::Sender<AuthPhase>,
    pending: Arc<Mutex<Option<PendingFlow>>>,
}

/// Owns one flow from listener to outcome, then clears the pending slot.
async fn drive_flow(mut driver: FlowDriver) {
    let (captured_tx, mut captured_rx) = mpsc::channel(1);
    let server = tokio::spawn(serve_loopback(driver.listener, captured_tx));

    let result = tokio::select! {
        params = captured_rx.recv() => match params {
            Some(params) => {
                finish_flow(driver.platform, driver.kind, &driver.csrf, params, &driver.credentials).await
            }
            None => FlowResult::Cancelled,
        },
        _ = changed_to_true(&mut driver.cancel) => {
            tracing::info!(platform = %driver.platform, "authentication flow cancelled");
            FlowResult::Cancelled
        }
        _ = tokio::time::sleep(driver.timeout) => {
            tracing::warn!(platform = %driver.platform, "authorization redirect timed out");
            FlowResult::TimedOut
        }
    };
    server.abort();

    driver.phase.send_replace(terminal_phase(&result));
    driver.outcome.send_replace(Some(result));
    *driver.pending.lock().await = None;
    driver.phase.send_replace(AuthPhase::Idle);
}

/// The phase a flow's outcome settles in before returning to `Idle`.
fn terminal_phase(result: &FlowResult) -> AuthPhase {
    match result {
        FlowResult::Success => AuthPhase::Captured,
        FlowResult::TimedOut => AuthPhase::TimedOut,
        FlowResult::Cancelled => AuthPhase::Cancelled,
        FlowResult::StateMismatch | FlowResult::Provider(_) | FlowResult::Exchange(_) => {
            AuthPhase::Failed
        }
    }
}

async fn changed_to_true(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            // Sender dropped without cancelling; wait forever and let the
            // timeout arm win.
            std::future::pending::<()>().await;
        }
    }
}

/// Accepts redirect connections until aborted. Each connection is served
/// http1; the first interesting /callback hit is pushed into `captured`.
async fn serve_loopback(listener: TcpListener, captured: mpsc::Sender<Vec<(String, String)>>) {
    loop {
        let Ok((conn, _)) = listener.accept().await else {
            return;
        };
        let io = hyper_util::rt::TokioIo::new(conn);
        let captured = captured.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<body::Incoming>| {
                let captured = captured.clone();
                async move { Ok::<_, Infallible>(handle_redirect(req, &captured).await) }
            });
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                tracing::debug!(error = %e, "loopback connection error");
            }
        });
    }
}

async fn handle_redirect(
    req: Request<body::Incoming>,
    captured: &mpsc::Sender<Vec<(String, String)>>,
) -> Response<Full<Bytes>> {
    if req.uri().path() != "/callback" {
        // Browsers also request /favicon.ico; keep serving.
        let mut resp = Response::new(Full::from("not found"));
        *resp.status_mut() = StatusCode::NOT_FOUND;
        return resp;
    }
    let query = req.uri().query().unwrap_or("");
    let params: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let interesting = params
        .iter()
        .any(|(k, _)| matches!(k.as_str(), "state" | "code" | "access_token" | "error"));
    if !interesting {
        return html(RELAY_HTML);
    }
    let _ = captured.send(params).await;
    html(DONE_HTML)
}

fn html(page: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .header("content-type", "text/html; charset=utf-8")
        .body(Full::from(page))
        .expect("static response construction cannot fail")
}

/// Validates the redirect and turns it into stored credentials.
async fn finish_flow(
    platform: Platform,
    kind: FlowKind,
    csrf: &CsrfToken,
    params: Vec<(String, String)>,
    credentials: &CredentialStore,
) -> FlowResult {
    let param = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    // The state check comes first; a mismatched redirect is untrusted no
    // matter what else it carries.
    if param("state") != Some(csrf.secret().as_str()) {
        tracing::error!(%platform, "OAuth state mismatch on redirect");
        return FlowResult::StateMismatch;
    }
    if let Some(error) = param("error") {
        return FlowResult::Provider(error.to_string());
    }

    let mut creds = credentials
        .get(platform)
        .unwrap_or_else(|| OAuthCredentials::empty(platform));
    match kind {
        FlowKind::Code { client, verifier } => {
            let Some(code) = param("code") else {
                return FlowResult::Provider("redirect carried no authorization code".into());
            };
            let http_client = match oauth2::reqwest::ClientBuilder::new()
                // SSRF no thank you.
                .redirect(oauth2::reqwest::redirect::Policy::none())
                .build()
            {
                Ok(c) => c,
                Err(e) => return FlowResult::Exchange(e.to_string()),
            };
            let token = match client
                .exchange_code(AuthorizationCode::new(code.to_string()))
                .set_pkce_verifier(verifier)
                .request_async(&http_client)
                .await
            {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(%platform, error = %e, "token exchange failed");
                    return FlowResult::Exchange(e.to_string());
                }
            };
            creds.access_token = Some(token.access_token().secret().clone());
            creds.refresh_token = token.refresh_token().map(|t| t.secret().clone());
            creds.token_expiry = token
                .expires_in()
                .map(|d| OAuthCredentials::expiry_in(d.as_secs()));
        }
        FlowKind::Implicit => {
            let Some(token) = param("access_token") else {
                return FlowResult::Provider("redirect carried no access token".into());
            };
            let expires_in = param("expires_in")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600);
            creds.access_token = Some(token.to_string());
            creds.token_expiry = Some(OAuthCredentials::expiry_in(expires_in));
        }
    }

    credentials.set(platform, creds);
    tracing::info!(%platform, "authentication complete, credentials stored");
    FlowResult::Success
}
