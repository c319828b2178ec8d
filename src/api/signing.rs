use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use sha2::Sha256;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

pub const ACCESS_KEY: &str = "ACCESS-KEY";
pub const ACCESS_SIGN: &str = "ACCESS-SIGN";
pub const ACCESS_TIMESTAMP: &str = "ACCESS-TIMESTAMP";
pub const ACCESS_PASSPHRASE: &str = "ACCESS-PASSPHRASE";
pub const ACCESS_VERSION: &str = "ACCESS-VERSION";

/// API credentials for the private endpoints.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

/// URL-encode `params` and sort the `key=value` pairs lexicographically.
pub fn canonical_query<K, V>(params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k.as_ref()), encode(v.as_ref())))
        .collect();
    pairs.sort();
    pairs.join("&")
}

/// Request path as it must appear in the signature: any query already in
/// `path` is merged with `query` and the pairs are sorted.
pub fn canonical_path(path: &str, query: &str) -> String {
    let (base, existing) = match path.split_once('?') {
        Some((base, existing)) => (base, existing),
        None => (path, ""),
    };

    let mut pairs: Vec<&str> = existing
        .split('&')
        .chain(query.split('&'))
        .filter(|p| !p.is_empty())
        .collect();

    if pairs.is_empty() {
        return base.to_string();
    }

    pairs.sort_unstable();
    format!("{}?{}", base, pairs.join("&"))
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Base64 HMAC-SHA256 over `timestamp + METHOD + path + body`.
pub fn sign(secret: &str, timestamp: &str, method: &str, path: &str, body: &str) -> String {
    let message = format!("{}{}{}{}", timestamp, method.to_uppercase(), path, body);

    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC can take key of any size"),
    };
    mac.update(message.as_bytes());

    STANDARD.encode(mac.finalize().into_bytes())
}

/// Full authenticated header set for one attempt.
pub fn signed_headers(
    credentials: &Credentials,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> Result<HeaderMap, ApiError> {
    let signature = sign(&credentials.secret_key, timestamp, method, path, body);

    let mut headers = HeaderMap::new();
    insert(&mut headers, ACCESS_KEY, &credentials.api_key)?;
    insert(&mut headers, ACCESS_SIGN, &signature)?;
    insert(&mut headers, ACCESS_TIMESTAMP, timestamp)?;
    insert(&mut headers, ACCESS_PASSPHRASE, &credentials.passphrase)?;
    insert(&mut headers, ACCESS_VERSION, "2")?;
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(headers)
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), ApiError> {
    // from_bytes normalizes the name to lowercase
    let header = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| ApiError::Build(format!("invalid header name {}: {}", name, e)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| ApiError::Build(format!("invalid {} header: {}", name, e)))?;
    headers.insert(header, value);
    Ok(())
}
