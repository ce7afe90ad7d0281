//! API key authentication and per-key rate limiting.
//!
//! Not part of `memoria_core` — spec §1 scopes authentication and rate
//! limiting out of the core as "thin glue"; this expansion (SPEC_FULL §3)
//! supplies the in-process store and axum middleware spec §6.1 implies but
//! doesn't itself specify storage for.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ApiError, AuthError};
use crate::state::AppState;
use memoria_core::Error as CoreError;

/// A scope an API key may hold, drawn from spec §6.1's permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "write")]
    Write,
    #[serde(rename = "vectors:read")]
    VectorsRead,
    #[serde(rename = "vectors:write")]
    VectorsWrite,
    #[serde(rename = "personas:read")]
    PersonasRead,
    #[serde(rename = "personas:write")]
    PersonasWrite,
    #[serde(rename = "admin")]
    Admin,
}

/// A validated, hashed API key.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub name: String,
    pub hashed_key: String,
    pub permissions: Vec<Permission>,
    pub rate_limit_per_minute: u32,
    pub expires_at_ms: Option<u64>,
}

impl ApiKey {
    #[must_use]
    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission) || self.permissions.contains(&Permission::Admin)
    }
}

struct RateWindow {
    window_start_ms: u64,
    count: u32,
}

/// Hashes a raw API key the same way at issuance and at validation time.
#[must_use]
pub fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// In-process API key registry and rate limiter. Not durable across
/// restarts — keys issued by `memoria-cli keygen` must be re-registered, or
/// a real `MetadataStore`-backed implementation substituted, for a
/// production deployment.
#[derive(Default)]
pub struct ApiKeyStore {
    keys: DashMap<String, ApiKey>,
    windows: DashMap<String, Mutex<RateWindow>>,
}

impl ApiKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: ApiKey) {
        self.keys.insert(key.hashed_key.clone(), key);
    }

    #[must_use]
    pub fn get(&self, hashed_key: &str) -> Option<ApiKey> {
        self.keys.get(hashed_key).map(|k| k.clone())
    }

    /// Returns `true` if the request is within the key's per-minute quota.
    pub fn check_rate_limit(&self, hashed_key: &str, limit: u32, now_ms: u64) -> bool {
        let window = self
            .windows
            .entry(hashed_key.to_string())
            .or_insert_with(|| {
                Mutex::new(RateWindow {
                    window_start_ms: now_ms,
                    count: 0,
                })
            });
        let mut window = window.lock();
        if now_ms.saturating_sub(window.window_start_ms) >= 60_000 {
            window.window_start_ms = now_ms;
            window.count = 0;
        }
        if window.count >= limit {
            return false;
        }
        window.count += 1;
        true
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Axum middleware: validates `X-API-Key`, checks expiration and rate
/// limit, and attaches the resolved `ApiKey` to the request for handlers
/// to check permissions against.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let raw_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(raw_key) = raw_key else {
        return Err(AuthError {
            status: StatusCode::UNAUTHORIZED,
            message: "missing X-API-Key header",
        });
    };

    let hashed = hash_key(&raw_key);
    let Some(api_key) = state.api_keys.get(&hashed) else {
        return Err(AuthError {
            status: StatusCode::UNAUTHORIZED,
            message: "unrecognized API key",
        });
    };

    let now = now_ms();
    if let Some(expires_at_ms) = api_key.expires_at_ms {
        if now > expires_at_ms {
            return Err(AuthError {
                status: StatusCode::UNAUTHORIZED,
                message: "API key expired",
            });
        }
    }

    if !state
        .api_keys
        .check_rate_limit(&hashed, api_key.rate_limit_per_minute, now)
    {
        return Err(AuthError {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "rate limit exceeded",
        });
    }

    request.extensions_mut().insert(api_key);
    Ok(next.run(request).await)
}

/// Returns `Err` mapped to 403 if `api_key` lacks `needed`.
pub fn require_permission(api_key: &ApiKey, needed: Permission) -> Result<(), ApiError> {
    if api_key.has(needed) {
        Ok(())
    } else {
        Err(ApiError(CoreError::Permission(format!(
            "key '{}' lacks required permission {needed:?}",
            api_key.name
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_key("secret"), hash_key("secret"));
        assert_ne!(hash_key("secret"), hash_key("other"));
    }

    #[test]
    fn rate_limit_resets_after_window() {
        let store = ApiKeyStore::new();
        let key = "k".to_string();
        assert!(store.check_rate_limit(&key, 2, 0));
        assert!(store.check_rate_limit(&key, 2, 1));
        assert!(!store.check_rate_limit(&key, 2, 2));
        assert!(store.check_rate_limit(&key, 2, 61_000));
    }

    #[test]
    fn admin_permission_satisfies_any_check() {
        let api_key = ApiKey {
            name: "k".into(),
            hashed_key: hash_key("raw"),
            permissions: vec![Permission::Admin],
            rate_limit_per_minute: 60,
            expires_at_ms: None,
        };
        assert!(require_permission(&api_key, Permission::PersonasWrite).is_ok());
    }
}
