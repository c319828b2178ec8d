use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::rate_limit::TokenBucket;
use super::responses::Envelope;
use super::signing::{canonical_path, canonical_query, signed_headers, Credentials};
use crate::config::ExchangeConfig;
use crate::error::ApiError;

const SUCCESS_CODE: &str = "00000";

/// Request parameters. Owned so every retry sends exactly the same request.
#[derive(Debug, Clone, Default)]
pub enum Params {
    #[default]
    None,
    /// Sent as the query string and signed in sorted order.
    Query(Vec<(String, String)>),
    /// Sent as the JSON body and included in the signature.
    Json(serde_json::Value),
}

impl Params {
    pub fn query<K, V>(pairs: &[(K, V)]) -> Self
    where
        K: ToString,
        V: ToString,
    {
        Params::Query(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Signed, rate-limited REST client for the exchange.
///
/// The HTTP session is created on first use and dropped by [`close`](Self::close);
/// once closed, every request fails with [`ApiError::Closed`] before touching
/// the network. Share it behind an `Arc`.
pub struct BitgetClient {
    base_url: String,
    credentials: Credentials,
    request_timeout: Duration,
    max_retries: u32,
    initial_delay: Duration,
    rate_limiter: TokenBucket,
    session: Mutex<Option<Client>>,
    closed: AtomicBool,
}

impl BitgetClient {
    pub fn new(config: &ExchangeConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials: Credentials {
                api_key: config.api_key.clone(),
                secret_key: config.secret_key.clone(),
                passphrase: config.passphrase.clone(),
            },
            request_timeout: config.request_timeout(),
            max_retries: config.max_retries,
            initial_delay: config.retry_initial_delay(),
            rate_limiter: TokenBucket::new(config.rate_limit_per_sec, config.rate_limit_burst),
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drop the HTTP session. Requests made afterwards fail with `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut session) = self.session.lock() {
            if session.take().is_some() {
                tracing::info!("Exchange client session closed");
            }
        }
    }

    fn session(&self) -> Result<Client, ApiError> {
        if self.is_closed() {
            return Err(ApiError::Closed);
        }

        let mut guard = self
            .session
            .lock()
            .map_err(|e| ApiError::Build(format!("session lock poisoned: {}", e)))?;

        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.request_timeout)
            .build()
            .map_err(|e| ApiError::Build(e.to_string()))?;
        *guard = Some(client.clone());

        Ok(client)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.initial_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Send a signed request and return the decoded JSON body.
    ///
    /// 429, 5xx and transport timeouts are retried up to `max_retries` times
    /// with exponential backoff; each attempt takes a rate-limit token and is
    /// re-signed with a fresh timestamp. Other 4xx responses fail immediately.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &Params,
    ) -> Result<serde_json::Value, ApiError> {
        let (query, body) = match params {
            Params::None => (String::new(), String::new()),
            Params::Query(pairs) => (canonical_query(pairs), String::new()),
            Params::Json(value) => (
                String::new(),
                serde_json::to_string(value).map_err(|e| ApiError::Build(e.to_string()))?,
            ),
        };
        let signed_path = canonical_path(path, &query);
        let url = format!("{}{}", self.base_url, signed_path);

        let mut attempt = 0;
        loop {
            let session = self.session()?;
            if !self.rate_limiter.try_acquire() {
                tracing::debug!(path, "Request budget exhausted, waiting for a token");
                self.rate_limiter.acquire().await;
            }
            if self.is_closed() {
                return Err(ApiError::Closed);
            }

            let timestamp = Utc::now().timestamp_millis().to_string();
            let headers = signed_headers(
                &self.credentials,
                &timestamp,
                method.as_str(),
                &signed_path,
                &body,
            )?;

            let mut request = session.request(method.clone(), &url).headers(headers);
            if !body.is_empty() {
                request = request.body(body.clone());
            }

            let attempts = attempt + 1;
            let exhausted = attempt >= self.max_retries;

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let text = response
                            .text()
                            .await
                            .map_err(|e| ApiError::Decode(e.to_string()))?;
                        return serde_json::from_str(&text)
                            .map_err(|e| ApiError::Decode(format!("{}: {}", e, text)));
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if exhausted {
                            return Err(ApiError::RateLimited { attempts });
                        }
                        let delay = self.retry_delay(attempt);
                        tracing::warn!(
                            path,
                            "Rate limited (429), backing off for {:?} (attempt {}/{})",
                            delay,
                            attempts,
                            self.max_retries + 1
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    if status.is_server_error() {
                        if exhausted {
                            return Err(ApiError::Server {
                                status: status.as_u16(),
                                attempts,
                            });
                        }
                        let delay = self.retry_delay(attempt);
                        tracing::warn!(
                            path,
                            "Server error {}, retrying in {:?} (attempt {}/{})",
                            status,
                            delay,
                            attempts,
                            self.max_retries + 1
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    // Other errors (4xx) - don't retry
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    tracing::error!(path, status = status.as_u16(), "API request rejected: {}", body);
                    return Err(ApiError::Rejected {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    if exhausted {
                        tracing::error!(path, "Request failed after {} attempts: {}", attempts, e);
                        return Err(ApiError::Transient { attempts, source: e });
                    }
                    let delay = self.retry_delay(attempt);
                    tracing::warn!(
                        path,
                        "Network error: {}, retrying in {:?} (attempt {}/{})",
                        e,
                        delay,
                        attempts,
                        self.max_retries + 1
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(ApiError::Build(e.to_string())),
            }
        }
    }

    /// Send a request and unwrap the exchange envelope into `T`.
    pub async fn request_data<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &Params,
    ) -> Result<T, ApiError> {
        let value = self.request(method, path, params).await?;
        let envelope: Envelope<T> = serde_json::from_value(value)
            .map_err(|e| ApiError::Decode(format!("unexpected response shape: {}", e)))?;

        if envelope.code != SUCCESS_CODE {
            return Err(ApiError::Exchange {
                code: envelope.code,
                msg: envelope.msg,
            });
        }

        envelope
            .data
            .ok_or_else(|| ApiError::Decode("response carried no data".to_string()))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, params: &Params) -> Result<T, ApiError> {
        self.request_data(Method::GET, path, params).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        self.request_data(Method::POST, path, &Params::Json(body))
            .await
    }
}
