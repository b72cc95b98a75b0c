//! Tracker and management-API HTTP calls: basic/bearer auth, token refresh on 401,
//! bounded retries, and partial-batch trimming. See SPEC_FULL.md §4.7.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;

use crate::platform::SafeStderr;
use crate::resolver::ResolvedSite;

const USER_AGENT: &str = "logship/0.1";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub piwik_url: String,
    pub piwik_api_url: Option<String>,
    pub tracker_endpoint_path: String,
    pub auth_user: Option<String>,
    pub auth_password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub max_attempts: u32,
    pub delay_after_failure: Duration,
    pub request_timeout: Duration,
    pub accept_invalid_ssl_certificate: bool,
    /// `-d`/`--debug` repeat count; gates redirect traces and token-refresh notices
    /// (SPEC_FULL.md §4.7, §10.2). Zero means silent.
    pub verbosity: u8,
}

/// Emits `debug: {msg}` on stderr when the configured verbosity is non-zero.
fn debug_log(verbosity: u8, msg: &str) {
    if verbosity > 0 {
        let _ = SafeStderr::new().writeln(&format!("debug: {msg}"));
    }
}

fn redirect_policy(verbosity: u8) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        debug_log(verbosity, &format!("following redirect to {}", attempt.url()));
        if attempt.previous().len() >= 10 {
            attempt.error("too many redirects")
        } else {
            attempt.follow()
        }
    })
}

/// A retryable-exhausted or immediately-fatal tracker/API error (SPEC_FULL.md §7).
#[derive(Debug, Clone)]
pub enum HttpError {
    /// 400 on the tracker endpoint: malformed payload, fatal without retry.
    BadRequest(String),
    /// Retries exhausted. Carries the last observed HTTP status (if any) and message.
    Exhausted { status: Option<u16>, message: String },
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequest(msg) => write!(f, "tracker rejected the request as malformed: {msg}"),
            HttpError::Exhausted { status, message } => match status {
                Some(code) => write!(f, "request failed after retries (status {code}): {message}"),
                None => write!(f, "request failed after retries: {message}"),
            },
        }
    }
}

impl std::error::Error for HttpError {}

#[derive(Clone)]
struct Token {
    token_type: String,
    access_token: String,
}

pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    token: Mutex<Option<Token>>,
}

fn prefix_scheme(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_ssl_certificate)
            .redirect(redirect_policy(config.verbosity))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HttpError::Exhausted {
                status: None,
                message: format!("failed to construct HTTP client: {e}"),
            })?;

        let http_client = Self {
            client,
            config,
            token: Mutex::new(None),
        };

        if http_client.config.client_id.is_some() {
            let token = http_client.acquire_token()?;
            *http_client.token.lock().unwrap() = Some(token);
        }

        Ok(http_client)
    }

    fn tracker_url(&self) -> String {
        format!(
            "{}{}",
            prefix_scheme(&self.config.piwik_url).trim_end_matches('/'),
            self.config.tracker_endpoint_path
        )
    }

    fn api_url(&self, path: &str) -> String {
        let base = self
            .config
            .piwik_api_url
            .as_deref()
            .unwrap_or(&self.config.piwik_url);
        format!("{}{}", prefix_scheme(base).trim_end_matches('/'), path)
    }

    fn apply_basic_auth(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match (&self.config.auth_user, &self.config.auth_password) {
            (Some(user), pass) => builder.basic_auth(user, pass.clone()),
            _ => builder,
        }
    }

    fn acquire_token(&self) -> Result<Token, HttpError> {
        debug_log(self.config.verbosity, "requesting an OAuth access token");
        let url = self.api_url("/auth/token");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_deref().unwrap_or_default()),
            (
                "client_secret",
                self.config.client_secret.as_deref().unwrap_or_default(),
            ),
        ];
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .map_err(|e| HttpError::Exhausted {
                status: None,
                message: format!("token request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(HttpError::Exhausted {
                status: Some(response.status().as_u16()),
                message: "token request did not succeed".to_string(),
            });
        }

        let body: Value = response.json().map_err(|e| HttpError::Exhausted {
            status: None,
            message: format!("token response was not valid JSON: {e}"),
        })?;
        Ok(Token {
            token_type: body["token_type"].as_str().unwrap_or("Bearer").to_string(),
            access_token: body["access_token"].as_str().unwrap_or_default().to_string(),
        })
    }

    fn bearer_header(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| format!("{} {}", t.token_type, t.access_token))
    }

    /// Single-mode tracker request: one URL-encoded form POST per hit.
    pub fn send_single(&self, args: &serde_json::Map<String, Value>) -> Result<(), HttpError> {
        let url = self.tracker_url();
        let form: Vec<(String, String)> = args
            .iter()
            .map(|(k, v)| (k.clone(), value_as_form_string(v)))
            .collect();
        let body = serde_urlencoded::to_string(&form).map_err(|e| HttpError::Exhausted {
            status: None,
            message: format!("failed to urlencode tracker request: {e}"),
        })?;

        self.retrying(|| {
            let builder = self.apply_basic_auth(
                self.client
                    .post(&url)
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(body.clone()),
            );
            let response = builder.send()?;
            Ok(response)
        })
        .map(|_| ())
    }

    /// Bulk-mode tracker request. `requests` is trimmed in place on partial success so
    /// the caller's retry (if any remains at a higher level) only resends the suffix
    /// that was not accepted (SPEC_FULL.md §4.7, §8 invariant 4).
    pub fn send_bulk(&self, requests: &mut Vec<Value>) -> Result<(), HttpError> {
        let url = self.tracker_url();
        let mut attempt = 0;
        let mut last_error = String::new();
        let mut last_status = None;

        while attempt < self.config.max_attempts {
            attempt += 1;
            let body = serde_json::json!({ "requests": requests });
            let builder = self.apply_basic_auth(
                self.client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .json(&body),
            );

            match builder.send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let text = response.text().unwrap_or_default();
                    if status == StatusCode::BAD_REQUEST {
                        return Err(HttpError::BadRequest(text));
                    }
                    last_status = Some(status.as_u16());
                    last_error = text.clone();
                    if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
                        if let Some(tracked) = parsed.get("tracked").and_then(Value::as_u64) {
                            let tracked = tracked as usize;
                            if tracked > 0 && tracked <= requests.len() {
                                requests.drain(0..tracked);
                            }
                        }
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if requests.is_empty() {
                return Ok(());
            }
            thread::sleep(self.config.delay_after_failure);
        }

        Err(HttpError::Exhausted {
            status: last_status,
            message: last_error,
        })
    }

    /// Authenticated API GET, with a single token-refresh-and-retry on 401.
    ///
    /// JSON decoding happens inside the retry loop, not after it: a 2xx response with
    /// a malformed body is a transient failure like any other and is retried up to
    /// `max_attempts`, per SPEC_FULL.md §4.7's "catch ... JSON decoding errors" clause.
    pub fn get_api_json(&self, path_and_query: &str) -> Result<Value, HttpError> {
        let url = self.api_url(path_and_query);
        let mut refreshed_once = false;
        let mut last_error = String::new();
        let mut last_status = None;

        for attempt in 0..self.config.max_attempts {
            let mut builder = self.client.get(&url);
            builder = self.apply_basic_auth(builder);
            if let Some(header) = self.bearer_header() {
                builder = builder.header("Authorization", header);
            }

            let sent = builder.send().map_err(|e| e.to_string()).and_then(|response| {
                if response.status() == StatusCode::UNAUTHORIZED && !refreshed_once {
                    refreshed_once = true;
                    debug_log(self.config.verbosity, "got 401, refreshing access token and retrying once");
                    let token = self.acquire_token().map_err(|e| e.to_string())?;
                    *self.token.lock().unwrap() = Some(token);
                    let mut retry_builder = self.client.get(&url);
                    retry_builder = self.apply_basic_auth(retry_builder);
                    if let Some(header) = self.bearer_header() {
                        retry_builder = retry_builder.header("Authorization", header);
                    }
                    retry_builder.send().map_err(|e| e.to_string())
                } else {
                    Ok(response)
                }
            });

            match sent {
                Ok(response) if response.status().is_success() => match response.json::<Value>() {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        last_status = None;
                        last_error = format!("API response was not valid JSON: {e}");
                    }
                },
                Ok(response) => {
                    last_status = Some(response.status().as_u16());
                    last_error = response.text().unwrap_or_default();
                }
                Err(e) => {
                    last_error = e;
                }
            }

            if attempt + 1 < self.config.max_attempts {
                thread::sleep(self.config.delay_after_failure);
            }
        }

        Err(HttpError::Exhausted {
            status: last_status,
            message: last_error,
        })
    }

    /// Shared retry loop for any single-response call: catches transport errors, sleeps
    /// `delay_after_failure`, and retries up to `max_attempts` total.
    fn retrying<F>(&self, mut call: F) -> Result<reqwest::blocking::Response, HttpError>
    where
        F: FnMut() -> Result<reqwest::blocking::Response, reqwest::Error>,
    {
        let mut last_error = String::new();
        let mut last_status = None;
        for attempt in 0..self.config.max_attempts {
            match call() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    last_status = Some(response.status().as_u16());
                    last_error = response.text().unwrap_or_default();
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            if attempt + 1 < self.config.max_attempts {
                thread::sleep(self.config.delay_after_failure);
            }
        }
        Err(HttpError::Exhausted {
            status: last_status,
            message: last_error,
        })
    }

    pub fn fetch_site_main_url(&self, site_id: &str) -> Result<Option<String>, HttpError> {
        let body = self.get_api_json(&format!("/api/apps/v2/{site_id}"))?;
        Ok(body["data"]["attributes"]["urls"][0].as_str().map(str::to_string))
    }

    pub fn resolve_site_for_host(&self, host: &str) -> Result<Option<ResolvedSite>, HttpError> {
        let body = self.get_api_json(&format!(
            "/api/tracker/v2/settings/app/url?app_url={}",
            urlencoding_query_escape(host)
        ))?;
        let site_id = body["data"]["id"].as_str().map(str::to_string);
        match site_id {
            Some(id) => Ok(Some(ResolvedSite {
                site_id: id,
                main_url: body["data"]["attributes"]["urls"][0].as_str().map(str::to_string),
            })),
            None => Ok(None),
        }
    }
}

fn value_as_form_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn urlencoding_query_escape(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        HttpError::Exhausted {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HttpClientConfig {
        HttpClientConfig {
            piwik_url: "example.com".to_string(),
            piwik_api_url: None,
            tracker_endpoint_path: "/ppms.php".to_string(),
            auth_user: None,
            auth_password: None,
            client_id: None,
            client_secret: None,
            max_attempts: 3,
            delay_after_failure: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
            accept_invalid_ssl_certificate: false,
            verbosity: 0,
        }
    }

    #[test]
    fn prefix_scheme_adds_https_when_missing() {
        assert_eq!(prefix_scheme("example.com"), "https://example.com");
        assert_eq!(prefix_scheme("http://example.com"), "http://example.com");
    }

    #[test]
    fn tracker_url_joins_base_and_endpoint_path() {
        let client = HttpClient::new(test_config()).unwrap();
        assert_eq!(client.tracker_url(), "https://example.com/ppms.php");
    }

    #[test]
    fn deep_array_trim_is_idempotent_on_empty_tracked_count() {
        // SPEC_FULL.md §8 invariant 4: draining 0 leaves the vec untouched, so a
        // zero-`tracked` response safely retries the whole batch again.
        let mut requests = vec![serde_json::json!({"a": 1}), serde_json::json!({"b": 2})];
        requests.drain(0..0usize);
        assert_eq!(requests.len(), 2);
    }
}
