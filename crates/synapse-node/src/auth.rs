// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tenant resolution — the single source of request identity.
//!
//! # Credential modes
//!
//! 1. **API key** — `X-API-Key: <key>` or `Authorization: Bearer <key>`.
//!    Only SHA-256 digests are ever stored; the bootstrap key (env
//!    `API_KEY`) is hashed at startup and compared with
//!    [`subtle::ConstantTimeEq`], database keys are looked up by digest.
//! 2. **Signed identity token** — a JWT-shaped bearer (HS256, shared
//!    secret).  `sub` → user id, `org` → tenant id.  An `org` that names
//!    no provisioned tenant is rejected with `UnknownTenant`.
//!
//! Public paths (`/health`, `/ready`, `/health.json`) bypass credentials
//! and resolve to the `_public` tenant, which carries no tool scope.
//!
//! # Tenant override
//!
//! `X-Tenant-Id` is honored only when the authenticated principal has a
//! recorded membership in the named tenant; otherwise it is **silently
//! ignored** — an attacker probing the header learns nothing.
//!
//! # Rate limiting
//!
//! Per-principal token bucket (`governor`, GCRA).  Public paths are
//! exempt.  Overflow surfaces as `RateLimited` → 429 + `Retry-After`.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::http::HeaderMap;
use governor::{
    clock::DefaultClock,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use synapse_core::{HubError, RequestContext};
use synapse_store::MemoryStore;

/// Paths that bypass authentication.
pub const PUBLIC_PATHS: &[&str] = &["/health", "/health.json", "/ready"];

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// The bootstrap key from the environment, pre-hashed.
struct BootstrapKey {
    hash: [u8; 32],
    tenant: String,
}

/// JWT claims the hub cares about.
#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
    org: String,
    #[allow(dead_code)]
    exp: usize,
}

pub struct TenantResolver {
    store: Arc<MemoryStore>,
    bootstrap: Option<BootstrapKey>,
    jwt_key: Option<jsonwebtoken::DecodingKey>,
    limiter: KeyedLimiter,
}

impl TenantResolver {
    /// `rps` / `burst` configure the per-principal token bucket; zero
    /// values are clamped to 1.
    pub fn new(
        store: Arc<MemoryStore>,
        bootstrap_key: Option<&str>,
        bootstrap_tenant: &str,
        jwt_secret: Option<&str>,
        rps: u32,
        burst: u32,
    ) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(rps.max(1)).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst.max(1)).unwrap_or(NonZeroU32::MIN));
        Self {
            store,
            bootstrap: bootstrap_key.map(|raw| BootstrapKey {
                hash: sha256(raw.as_bytes()),
                tenant: bootstrap_tenant.to_string(),
            }),
            jwt_key: jwt_secret.map(|s| jsonwebtoken::DecodingKey::from_secret(s.as_bytes())),
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Resolve one request to a [`RequestContext`].
    pub async fn resolve(
        &self,
        path: &str,
        headers: &HeaderMap,
    ) -> Result<RequestContext, HubError> {
        if PUBLIC_PATHS.contains(&path) {
            return Ok(RequestContext::public());
        }

        let credential = extract_credential(headers)
            .ok_or_else(|| HubError::Unauthorized("missing credential".into()))?;

        let mut ctx = if looks_like_jwt(credential) && self.jwt_key.is_some() {
            self.resolve_jwt(credential).await?
        } else {
            self.resolve_api_key(credential).await?
        };

        // Token bucket per principal; only authenticated traffic counts.
        let principal = ctx
            .api_key_id
            .clone()
            .or_else(|| ctx.user_id.clone())
            .unwrap_or_else(|| ctx.tenant_id.clone());
        if self.limiter.check_key(&principal).is_err() {
            warn!(tenant = %ctx.tenant_id, "rate limit exceeded");
            return Err(HubError::RateLimited);
        }

        // Tenant override: honored only with a recorded membership.
        if let Some(wanted) = header_str(headers, "x-tenant-id") {
            if wanted != ctx.tenant_id {
                if self.store.has_membership(wanted, &principal).await? {
                    debug!(from = %ctx.tenant_id, to = %wanted, "tenant override applied");
                    ctx.tenant_id = wanted.to_string();
                } else {
                    debug!(wanted = %wanted, "tenant override ignored (no membership)");
                }
            }
        }

        if let Some(agent) = header_str(headers, "x-agent-id") {
            ctx.agent_id = Some(agent.to_string());
        }
        Ok(ctx)
    }

    async fn resolve_api_key(&self, raw: &str) -> Result<RequestContext, HubError> {
        let digest = sha256(raw.as_bytes());

        if let Some(bootstrap) = &self.bootstrap {
            if bool::from(digest.ct_eq(&bootstrap.hash)) {
                let mut ctx = RequestContext::new(bootstrap.tenant.clone());
                ctx.api_key_id = Some("bootstrap".to_string());
                return Ok(ctx);
            }
        }

        match self.store.lookup_api_key(&hex::encode(digest)).await? {
            Some(record) => {
                let mut ctx = RequestContext::new(record.tenant_id);
                ctx.api_key_id = Some(record.id);
                ctx.scopes = record.scopes;
                Ok(ctx)
            }
            None => Err(HubError::Unauthorized("unknown API key".into())),
        }
    }

    async fn resolve_jwt(&self, token: &str) -> Result<RequestContext, HubError> {
        let key = self
            .jwt_key
            .as_ref()
            .ok_or_else(|| HubError::Unauthorized("JWT auth not configured".into()))?;
        let validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        let data = jsonwebtoken::decode::<IdentityClaims>(token, key, &validation)
            .map_err(|e| HubError::Unauthorized(format!("invalid identity token: {e}")))?;

        let claims = data.claims;
        if !self.store.tenant_exists(&claims.org).await? {
            return Err(HubError::UnknownTenant(claims.org));
        }
        let mut ctx = RequestContext::new(claims.org);
        ctx.user_id = Some(claims.sub);
        Ok(ctx)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// `X-API-Key` wins over `Authorization: Bearer` when both are present.
fn extract_credential(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = header_str(headers, "x-api-key") {
        return Some(key);
    }
    header_str(headers, "authorization")?.strip_prefix("Bearer ")
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim).filter(|s| !s.is_empty())
}

/// Structural check, not validation: JWTs have exactly two dots.
fn looks_like_jwt(credential: &str) -> bool {
    credential.bytes().filter(|b| *b == b'.').count() == 2
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Hash a raw API key to the hex digest the key table stores.
pub fn api_key_digest(raw: &str) -> String {
    hex::encode(sha256(raw.as_bytes()))
}

/// Generate a raw API key: `syn_` + 256 bits of OS randomness,
/// base64url.  Shown to the operator exactly once; only the digest is
/// persisted.
pub fn generate_api_key() -> String {
    use base64::Engine;
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!(
        "syn_{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut m = HeaderMap::new();
        for (k, v) in pairs {
            m.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        m
    }

    fn resolver(store: Arc<MemoryStore>) -> TenantResolver {
        TenantResolver::new(store, Some("master-key"), "default", Some("test-secret"), 1000, 1000)
    }

    fn jwt(sub: &str, org: &str, secret: &str) -> String {
        #[derive(serde::Serialize)]
        struct Claims<'a> {
            sub: &'a str,
            org: &'a str,
            exp: usize,
        }
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &Claims { sub, org, exp: 4_000_000_000 },
            &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn public_paths_bypass_credentials() {
        let r = resolver(Arc::new(MemoryStore::open_in_memory().unwrap()));
        for path in PUBLIC_PATHS {
            let ctx = r.resolve(path, &HeaderMap::new()).await.unwrap();
            assert!(ctx.is_public());
        }
    }

    #[tokio::test]
    async fn missing_credential_is_unauthorized() {
        let r = resolver(Arc::new(MemoryStore::open_in_memory().unwrap()));
        let err = r.resolve("/mcp", &HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.kind(), "Unauthorized");
    }

    #[tokio::test]
    async fn bootstrap_key_resolves_default_tenant() {
        let r = resolver(Arc::new(MemoryStore::open_in_memory().unwrap()));
        let ctx = r
            .resolve("/mcp", &headers(&[("x-api-key", "master-key")]))
            .await
            .unwrap();
        assert_eq!(ctx.tenant_id, "default");
        assert_eq!(ctx.api_key_id.as_deref(), Some("bootstrap"));
    }

    #[tokio::test]
    async fn bearer_form_is_accepted() {
        let r = resolver(Arc::new(MemoryStore::open_in_memory().unwrap()));
        let ctx = r
            .resolve("/mcp", &headers(&[("authorization", "Bearer master-key")]))
            .await
            .unwrap();
        assert_eq!(ctx.tenant_id, "default");
    }

    #[tokio::test]
    async fn wrong_key_is_unauthorized() {
        let r = resolver(Arc::new(MemoryStore::open_in_memory().unwrap()));
        let err = r
            .resolve("/mcp", &headers(&[("x-api-key", "wrong")]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Unauthorized");
    }

    #[tokio::test]
    async fn database_key_resolves_its_tenant_and_scopes() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        store
            .insert_api_key("t9", &api_key_digest("tenant-nine-key"), &["graph".into()], "ci")
            .await
            .unwrap();
        let r = resolver(store);
        let ctx = r
            .resolve("/mcp", &headers(&[("x-api-key", "tenant-nine-key")]))
            .await
            .unwrap();
        assert_eq!(ctx.tenant_id, "t9");
        assert_eq!(ctx.scopes, vec!["graph"]);
    }

    #[tokio::test]
    async fn jwt_maps_sub_and_org() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        store.ensure_tenant("acme").await.unwrap();
        let r = resolver(store);
        let token = jwt("user-7", "acme", "test-secret");
        let ctx = r
            .resolve("/mcp", &headers(&[("authorization", &format!("Bearer {token}"))]))
            .await
            .unwrap();
        assert_eq!(ctx.tenant_id, "acme");
        assert_eq!(ctx.user_id.as_deref(), Some("user-7"));
    }

    #[tokio::test]
    async fn unknown_org_claim_is_unknown_tenant() {
        let r = resolver(Arc::new(MemoryStore::open_in_memory().unwrap()));
        let token = jwt("user-7", "nobody-provisioned-this", "test-secret");
        let err = r
            .resolve("/mcp", &headers(&[("authorization", &format!("Bearer {token}"))]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UnknownTenant");
    }

    #[tokio::test]
    async fn forged_jwt_signature_is_unauthorized() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        store.ensure_tenant("acme").await.unwrap();
        let r = resolver(store);
        let token = jwt("user-7", "acme", "the-wrong-secret");
        let err = r
            .resolve("/mcp", &headers(&[("authorization", &format!("Bearer {token}"))]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Unauthorized");
    }

    #[tokio::test]
    async fn tenant_override_requires_membership() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        store.ensure_tenant("t2").await.unwrap();
        let r = resolver(store.clone());

        // Without membership: silently retained.
        let ctx = r
            .resolve("/mcp", &headers(&[("x-api-key", "master-key"), ("x-tenant-id", "t2")]))
            .await
            .unwrap();
        assert_eq!(ctx.tenant_id, "default");

        // With membership: applied.
        store.add_membership("t2", "bootstrap").await.unwrap();
        let ctx = r
            .resolve("/mcp", &headers(&[("x-api-key", "master-key"), ("x-tenant-id", "t2")]))
            .await
            .unwrap();
        assert_eq!(ctx.tenant_id, "t2");
    }

    #[tokio::test]
    async fn agent_id_header_lands_in_context() {
        let r = resolver(Arc::new(MemoryStore::open_in_memory().unwrap()));
        let ctx = r
            .resolve("/mcp", &headers(&[("x-api-key", "master-key"), ("x-agent-id", "ide-1")]))
            .await
            .unwrap();
        assert_eq!(ctx.agent_id.as_deref(), Some("ide-1"));
    }

    #[tokio::test]
    async fn rate_limit_trips_after_burst() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let r = TenantResolver::new(store, Some("k"), "default", None, 1, 2);
        let h = headers(&[("x-api-key", "k")]);
        assert!(r.resolve("/mcp", &h).await.is_ok());
        assert!(r.resolve("/mcp", &h).await.is_ok());
        let err = r.resolve("/mcp", &h).await.unwrap_err();
        assert_eq!(err.kind(), "RateLimited");
    }

    #[test]
    fn jwt_shape_detection() {
        assert!(looks_like_jwt("aa.bb.cc"));
        assert!(!looks_like_jwt("plain-api-key"));
        assert!(!looks_like_jwt("a.b"));
    }
}
