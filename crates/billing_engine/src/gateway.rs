use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use billing_logging::{billing_debug, billing_info, billing_warn};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{ApiError, AtomicFileWriter, CredentialStore, ErrorKind, LogoutHook};

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub base_url: Url,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub login_path: String,
    /// `{id}` is replaced with the url-encoded task id.
    pub task_status_path: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://127.0.0.1:8000/api").expect("static url"),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            login_path: "/auth/login".to_string(),
            task_status_path: "/tasks/{id}".to_string(),
        }
    }
}

impl GatewaySettings {
    pub fn with_base_url(base_url: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| ApiError::new(ErrorKind::InvalidUrl, format!("{base_url}: {err}")))?;
        Ok(Self {
            base_url,
            ..Self::default()
        })
    }
}

/// Single exit point for backend calls.
///
/// Attaches the bearer credential, tears the session down on the first 401
/// since the last sign-in, and turns every non-success status into an
/// [`ApiError`] carrying the server's message.
pub struct ApiGateway {
    client: reqwest::Client,
    settings: GatewaySettings,
    credentials: Arc<dyn CredentialStore>,
    logout_hook: Arc<dyn LogoutHook>,
    session_closed: AtomicBool,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(alias = "token")]
    access_token: String,
}

impl ApiGateway {
    pub fn new(
        settings: GatewaySettings,
        credentials: Arc<dyn CredentialStore>,
        logout: Arc<dyn LogoutHook>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ApiError::new(ErrorKind::Network, err.to_string()))?;
        Ok(Self {
            client,
            settings,
            credentials,
            logout_hook: logout,
            session_closed: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.token().is_some()
    }

    /// Resolves a configured endpoint path under the base url. Absolute urls
    /// are taken as is.
    pub fn url(&self, path: &str, params: &[(String, String)]) -> Result<Url, ApiError> {
        let mut url = match Url::parse(path) {
            Ok(absolute) => absolute,
            Err(_) => {
                let base = self.settings.base_url.as_str().trim_end_matches('/');
                let path = path.trim_start_matches('/');
                Url::parse(&format!("{base}/{path}")).map_err(|err| {
                    ApiError::new(ErrorKind::InvalidUrl, format!("{path}: {err}"))
                })?
            }
        };
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    /// Resolves a link handed out by the server (`download_url`) the way a
    /// browser would: `/x` is relative to the origin, not to the base path.
    pub fn resolve_link(&self, link: &str) -> Result<Url, ApiError> {
        self.settings
            .base_url
            .join(link)
            .map_err(|err| ApiError::new(ErrorKind::InvalidUrl, format!("{link}: {err}")))
    }

    /// Whether `url` belongs to the backend, and so may see the credential.
    fn is_backend(&self, url: &Url) -> bool {
        url.origin() == self.settings.base_url.origin()
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, ApiError> {
        let url = self.url(path, params)?;
        let request = self.client.get(url.clone()).header(ACCEPT, "application/json");
        let response = self.send(&url, request).await?;
        decode_json(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path, &[])?;
        let request = self.json_request(Method::POST, url.clone(), body)?;
        let response = self.send(&url, request).await?;
        decode_json(response).await
    }

    /// Streams a blob (receipt, report, archive) at a server-supplied `link`
    /// into `writer` under `filename`. Links on other hosts get no credential.
    pub async fn download(
        &self,
        link: &str,
        writer: &AtomicFileWriter,
        filename: &str,
    ) -> Result<PathBuf, ApiError> {
        let url = self.resolve_link(link)?;
        let response = self.send(&url, self.client.get(url.clone())).await?;
        let mut pending = writer.begin(filename)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            pending.write_chunk(&chunk)?;
        }
        billing_debug!("Downloaded {} bytes to {}", pending.bytes_written(), filename);
        Ok(pending.commit()?)
    }

    /// Exchanges credentials for a bearer token and stores it.
    ///
    /// A 401 here means wrong credentials, so it is reported as a plain
    /// rejection and does not run the logout hook.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let body = LoginRequest { username, password };
        let url = self.url(&self.settings.login_path, &[])?;
        let request = self.json_request(Method::POST, url, &body)?;
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let mut err = error_from_body(status, &text);
            if status == StatusCode::UNAUTHORIZED {
                err.kind = ErrorKind::Rejected(401);
            }
            return Err(err);
        }
        let login: LoginResponse = decode_json(response).await?;
        self.credentials.store(&login.access_token);
        self.session_closed.store(false, Ordering::SeqCst);
        billing_info!("Signed in as {}", username);
        Ok(())
    }

    /// Ends the session on user request.
    pub fn logout(&self) {
        self.session_closed.store(true, Ordering::SeqCst);
        self.credentials.clear();
        self.logout_hook.on_logout();
    }

    fn json_request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<RequestBuilder, ApiError> {
        let payload = serde_json::to_vec(body)
            .map_err(|err| ApiError::new(ErrorKind::Decode, err.to_string()))?;
        Ok(self
            .client
            .request(method, url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(payload))
    }

    async fn send(&self, url: &Url, request: RequestBuilder) -> Result<Response, ApiError> {
        let backend = self.is_backend(url);
        let request = match self.credentials.token() {
            Some(token) if backend => request.bearer_auth(token),
            _ => request,
        };
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED && backend {
            self.expire_session();
            return Err(ApiError::new(
                ErrorKind::Unauthorized,
                "session expired, please sign in again",
            ));
        }
        if !status.is_success() {
            let url = response.url().path().to_string();
            let text = response.text().await.unwrap_or_default();
            let mut err = error_from_body(status, &text);
            if status == StatusCode::UNAUTHORIZED {
                // Another host refused us; the backend session is unaffected.
                err.kind = ErrorKind::Rejected(401);
            }
            billing_warn!("{} {} failed: {}", url, status.as_u16(), err.message);
            return Err(err);
        }
        Ok(response)
    }

    /// Runs the logout side effect once, however many calls see the 401.
    fn expire_session(&self) {
        if self.session_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        billing_warn!("Received 401; clearing credential and signing out");
        self.credentials.clear();
        self.logout_hook.on_logout();
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await.map_err(map_reqwest_error)?;
    serde_json::from_slice(&bytes).map_err(|err| {
        ApiError::new(
            ErrorKind::Decode,
            format!("unexpected response from server: {err}"),
        )
    })
}

/// Builds the error for a non-success response.
///
/// Message precedence: `detail` (string, or a list of `{msg}` entries), then
/// `error`, then `message`; otherwise the raw body; otherwise the status line.
pub fn error_from_body(status: StatusCode, body: &str) -> ApiError {
    let code = status.as_u16();
    let kind = if status.is_server_error() {
        ErrorKind::Server(code)
    } else if status == StatusCode::UNAUTHORIZED {
        ErrorKind::Unauthorized
    } else {
        ErrorKind::Rejected(code)
    };
    let message = server_message(body)
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| status.to_string());
    ApiError::new(kind, message)
}

fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["detail", "error", "message"]
        .iter()
        .find_map(|key| value.get(key).and_then(message_from_value))
}

fn message_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Value::Array(entries) => {
            let parts: Vec<String> = entries.iter().filter_map(message_from_value).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        Value::Object(map) => ["msg", "message", "detail"]
            .iter()
            .find_map(|key| map.get(*key).and_then(message_from_value)),
        _ => None,
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::new(ErrorKind::Timeout, "the server took too long to respond");
    }
    if err.is_decode() {
        return ApiError::new(ErrorKind::Decode, err.to_string());
    }
    ApiError::new(ErrorKind::Network, format!("network error: {err}"))
}
