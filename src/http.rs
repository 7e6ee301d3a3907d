use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CoverageError;

const RATE_LIMITED: u16 = 429;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub json: Option<Value>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn json(body: Value) -> Self {
        Self {
            json: Some(body),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, CoverageError> {
        serde_json::from_slice(&self.body).map_err(|err| CoverageError::Decode {
            url: self.url.clone(),
            message: err.to_string(),
        })
    }

    /// Turns a non-2xx response into `CoverageError::Status`, keeping the
    /// first 200 characters of the body.
    pub fn error_for_status(self) -> Result<Self, CoverageError> {
        if self.is_success() {
            return Ok(self);
        }
        let message: String = self.text().chars().take(200).collect();
        Err(CoverageError::Status {
            url: self.url,
            status: self.status,
            message,
        })
    }
}

/// One outbound HTTP exchange. Non-2xx statuses are responses, not errors.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, CoverageError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, CoverageError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("stac-coverage/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CoverageError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| CoverageError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, CoverageError> {
        let method = match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
        };
        let mut request = self.client.request(method, url);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.json {
            request = request.json(body);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .map_err(|err| CoverageError::Http(format!("{url}: {err}")))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| CoverageError::Http(format!("{url}: {err}")))?;
        Ok(HttpResponse {
            url: url.to_string(),
            status,
            body: body.to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one: `max_retries = 3` sends at
    /// most 3 requests, not 4. Zero still sends once.
    pub max_retries: u32,
    /// Unit of the linear backoff; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// HTTP client that retries rate-limited (429) responses with linear backoff.
///
/// Every other status is handed back on the first attempt. When the budget is
/// spent while still rate limited, the last 429 response is returned as-is, so
/// callers always inspect the status themselves.
#[derive(Clone)]
pub struct ResilientClient<T: Transport> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn request(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, CoverageError> {
        let budget = self.policy.max_retries.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let response = self.transport.send(method, url, options)?;
            debug!(method = method.as_str(), url, status = response.status, attempt, "http");
            if response.status != RATE_LIMITED || attempt >= budget {
                if response.status == RATE_LIMITED {
                    warn!(url, attempts = attempt, "still rate limited, giving up");
                }
                return Ok(response);
            }
            let delay = self.policy.backoff * attempt;
            warn!(url, attempt, ?delay, "rate limited, retrying");
            thread::sleep(delay);
        }
    }

    pub fn get(&self, url: &str) -> Result<HttpResponse, CoverageError> {
        self.request(Method::Get, url, &RequestOptions::default())
    }

    pub fn head(&self, url: &str) -> Result<HttpResponse, CoverageError> {
        self.request(Method::Head, url, &RequestOptions::default())
    }

    pub fn post_json(&self, url: &str, body: Value) -> Result<HttpResponse, CoverageError> {
        self.request(Method::Post, url, &RequestOptions::json(body))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone)]
    pub enum Scripted {
        Status(u16),
        Json(u16, Value),
        Fail(String),
    }

    /// Transport answering from per-(method, url) queues; the last entry repeats.
    /// Unscripted requests get a 404.
    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        routes: Arc<Mutex<HashMap<(&'static str, String), VecDeque<Scripted>>>>,
        calls: Arc<Mutex<Vec<(Method, String, Option<Value>)>>>,
    }

    impl ScriptedTransport {
        pub fn on(self, method: Method, url: &str, reply: Scripted) -> Self {
            self.routes
                .lock()
                .unwrap()
                .entry((method.as_str(), url.to_string()))
                .or_default()
                .push_back(reply);
            self
        }

        pub fn calls(&self) -> Vec<(Method, String, Option<Value>)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, method: Method, url: &str) -> usize {
            self.calls()
                .iter()
                .filter(|(m, u, _)| *m == method && u == url)
                .count()
        }
    }

    impl Transport for ScriptedTransport {
        fn send(
            &self,
            method: Method,
            url: &str,
            options: &RequestOptions,
        ) -> Result<HttpResponse, CoverageError> {
            self.calls
                .lock()
                .unwrap()
                .push((method, url.to_string(), options.json.clone()));
            let mut routes = self.routes.lock().unwrap();
            let reply = match routes.get_mut(&(method.as_str(), url.to_string())) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue.front().cloned().unwrap_or(Scripted::Status(404)),
                None => Scripted::Status(404),
            };
            match reply {
                Scripted::Status(status) => Ok(HttpResponse {
                    url: url.to_string(),
                    status,
                    body: Vec::new(),
                }),
                Scripted::Json(status, value) => Ok(HttpResponse {
                    url: url.to_string(),
                    status,
                    body: serde_json::to_vec(&value).unwrap(),
                }),
                Scripted::Fail(message) => Err(CoverageError::Http(message)),
            }
        }
    }

    pub fn client(transport: ScriptedTransport) -> ResilientClient<ScriptedTransport> {
        ResilientClient::new(
            transport,
            RetryPolicy {
                max_retries: 3,
                backoff: Duration::ZERO,
            },
        )
    }
}
