//! Bearer-token gate in front of the todo routes.
//!
//! Every request under `/api` must carry `Authorization: Bearer <jwt>`. The
//! token's signature, expiry and issuer (and audience, when configured) are
//! checked against the configured trust material. Nothing is remembered
//! between requests.

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use lambda_http::http::{
    header::{AUTHORIZATION, WWW_AUTHENTICATE},
    HeaderMap, HeaderValue, StatusCode,
};
use lambda_http::{Body, Response};
use serde::Deserialize;
use stack_atoms::responses::error_response;
use stack_atoms::todos::TodoError;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::{IdentitySource, JwtConfig, TrustMaterial};

pub const USER_ID_HEADER: &str = "x-user-id";

const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Unknown kids only trigger a refetch once the cached set is at least this old
const JWKS_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Authorization header is not a bearer token")]
    MalformedHeader,

    #[error("{0}")]
    InvalidToken(String),

    /// Trust material could not be loaded; the caller still sees a 401
    #[error("Signing keys unavailable: {0}")]
    KeyUnavailable(String),
}

impl AuthError {
    fn www_authenticate(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Bearer",
            _ => "Bearer error=\"invalid_token\"",
        }
    }
}

/// Who the request was authenticated as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub subject: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

struct CachedJwks {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

/// RS256 keys fetched from the identity provider, cached by `kid`
struct JwksCache {
    url: String,
    http_client: reqwest::Client,
    cached: RwLock<Option<CachedJwks>>,
    min_refresh_interval: Duration,
}

impl JwksCache {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            http_client: reqwest::Client::new(),
            cached: RwLock::new(None),
            min_refresh_interval: JWKS_MIN_REFRESH_INTERVAL,
        }
    }

    async fn get_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let cached = self.cached.read().await;
            if let Some(jwks) = cached.as_ref() {
                let age = jwks.fetched_at.elapsed();
                if age < JWKS_CACHE_TTL {
                    if let Some(key) = jwks.keys.get(kid) {
                        return Ok(key.clone());
                    }
                    if age < self.min_refresh_interval {
                        tracing::debug!(kid = %kid, "Unknown kid, JWKS fetched too recently to refresh");
                        return Err(unknown_kid(kid));
                    }
                }
            }
        }

        // Expired, empty, or an unknown kid (key rotation) - refetch once
        self.refresh().await?;

        let cached = self.cached.read().await;
        cached
            .as_ref()
            .and_then(|jwks| jwks.keys.get(kid))
            .cloned()
            .ok_or_else(|| unknown_kid(kid))
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        tracing::debug!(jwks_url = %self.url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.url)
            .timeout(JWKS_FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| AuthError::KeyUnavailable(format!("Failed to fetch JWKS: {}", e)))?;

        if !response.status().is_success() {
            return Err(AuthError::KeyUnavailable(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        let jwks: JwksResponse = response
            .json()
            .await
            .map_err(|e| AuthError::KeyUnavailable(format!("Failed to parse JWKS: {}", e)))?;

        let keys = rsa_keys(jwks)?;
        tracing::info!(jwks_url = %self.url, keys_count = keys.len(), "Cached JWKS keys");

        *self.cached.write().await = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}

fn unknown_kid(kid: &str) -> AuthError {
    AuthError::InvalidToken(format!("Unknown key ID: {}", kid))
}

fn rsa_keys(jwks: JwksResponse) -> Result<HashMap<String, DecodingKey>, AuthError> {
    let mut keys = HashMap::new();
    for key in jwks.keys {
        if key.kty != "RSA" {
            continue;
        }
        if let (Some(kid), Some(n), Some(e)) = (key.kid, key.n, key.e) {
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(decoding_key) => {
                    keys.insert(kid, decoding_key);
                }
                Err(err) => tracing::warn!(kid = %kid, error = %err, "Failed to parse JWK"),
            }
        }
    }

    if keys.is_empty() {
        return Err(AuthError::KeyUnavailable("No valid keys found in JWKS".to_string()));
    }
    Ok(keys)
}

enum KeySource {
    Secret(DecodingKey),
    Jwks(JwksCache),
}

/// Verifies bearer tokens against the configured trust material
pub struct TokenVerifier {
    keys: KeySource,
    validation: Validation,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.keys {
            KeySource::Secret(_) => "secret",
            KeySource::Jwks(_) => "jwks",
        };
        f.debug_struct("TokenVerifier")
            .field("keys", &source)
            .field("issuer", &self.validation.iss)
            .finish()
    }
}

impl TokenVerifier {
    pub fn from_config(config: &JwtConfig) -> Self {
        let (keys, algorithm) = match &config.trust {
            TrustMaterial::SharedSecret(secret) => (
                KeySource::Secret(DecodingKey::from_secret(secret.as_bytes())),
                Algorithm::HS256,
            ),
            TrustMaterial::Jwks { url } => (KeySource::Jwks(JwksCache::new(url)), Algorithm::RS256),
        };

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }

        Self { keys, validation }
    }

    /// Validate a raw JWT (no "Bearer " prefix) and return its subject
    pub async fn verify(&self, token: &str) -> Result<AuthContext, AuthError> {
        let key = match &self.keys {
            KeySource::Secret(key) => key.clone(),
            KeySource::Jwks(cache) => {
                let header = decode_header(token)
                    .map_err(|e| AuthError::InvalidToken(format!("Invalid token header: {}", e)))?;
                let kid = header
                    .kid
                    .ok_or_else(|| AuthError::InvalidToken("Token missing key ID (kid)".to_string()))?;
                cache.get_key(&kid).await?
            }
        };

        let token_data = decode::<Claims>(token, &key, &self.validation).map_err(|e| {
            let msg = match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => "Token expired",
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => "Invalid issuer",
                jsonwebtoken::errors::ErrorKind::InvalidAudience => "Invalid audience",
                jsonwebtoken::errors::ErrorKind::InvalidSignature => "Invalid signature",
                jsonwebtoken::errors::ErrorKind::ImmatureSignature => "Token not yet valid",
                jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_) => "Token missing required claim",
                _ => "Token validation failed",
            };
            AuthError::InvalidToken(msg.to_string())
        })?;

        match token_data.claims.sub {
            Some(subject) if !subject.is_empty() => Ok(AuthContext { subject }),
            _ => Err(AuthError::InvalidToken("Token missing subject claim".to_string())),
        }
    }
}

/// Pull the raw token out of `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MalformedHeader)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

/// Stateless request gate: which paths need a token, and who the caller is
#[derive(Debug)]
pub struct SecurityPolicy {
    verifier: TokenVerifier,
    identity_source: IdentitySource,
}

impl SecurityPolicy {
    pub fn new(verifier: TokenVerifier, identity_source: IdentitySource) -> Self {
        Self {
            verifier,
            identity_source,
        }
    }

    /// `/api` and everything below it is protected; anything else is public
    pub fn requires_authentication(path: &str) -> bool {
        path == "/api" || path.starts_with("/api/")
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let token = bearer_token(headers)?;
        self.verifier.verify(token).await
    }

    /// Same as [`authenticate`](Self::authenticate), but a rejection comes back as a ready 401
    pub async fn authenticate_request(&self, headers: &HeaderMap) -> Result<AuthContext, Response<Body>> {
        match self.authenticate(headers).await {
            Ok(ctx) => Ok(ctx),
            Err(err) => {
                match &err {
                    AuthError::KeyUnavailable(detail) => tracing::error!("Token keys unavailable: {}", detail),
                    _ => tracing::warn!("Rejected request: {}", err),
                }
                Err(unauthorized(&err))
            }
        }
    }

    /// Owner identity for the todo routes, per the configured source
    pub fn caller_identity(&self, auth: &AuthContext, headers: &HeaderMap) -> Result<String, TodoError> {
        match self.identity_source {
            IdentitySource::TokenSubject => Ok(auth.subject.clone()),
            IdentitySource::Header => headers
                .get(USER_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| TodoError::Validation("Missing X-User-ID header".to_string())),
        }
    }
}

fn unauthorized(err: &AuthError) -> Response<Body> {
    let message = match err {
        AuthError::KeyUnavailable(_) => "Unable to verify token".to_string(),
        _ => err.to_string(),
    };
    let mut resp = error_response(StatusCode::UNAUTHORIZED, "Unauthenticated", message)
        .unwrap_or_else(|_| fallback_unauthorized());
    resp.headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static(err.www_authenticate()));
    resp
}

fn fallback_unauthorized() -> Response<Body> {
    let mut resp = Response::new(Body::Empty);
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret";
    const ISSUER: &str = "https://issuer.test";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        iss: &'a str,
        exp: u64,
    }

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn token(sub: &str, iss: &str, exp: u64, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &TestClaims { sub, iss, exp },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn verifier() -> TokenVerifier {
        TokenVerifier::from_config(&JwtConfig {
            issuer: ISSUER.to_string(),
            audience: None,
            trust: TrustMaterial::SharedSecret(SECRET.to_string()),
        })
    }

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(authorization).unwrap());
        headers
    }

    #[tokio::test]
    async fn valid_token_yields_subject() {
        let ctx = verifier()
            .verify(&token("user_123", ISSUER, now() + 600, SECRET))
            .await
            .unwrap();
        assert_eq!(ctx.subject, "user_123");
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let err = verifier()
            .verify(&token("user_123", ISSUER, now() - 3600, SECRET))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidToken("Token expired".into()));
    }

    #[tokio::test]
    async fn wrong_issuer_is_rejected() {
        let err = verifier()
            .verify(&token("user_123", "https://evil.test", now() + 600, SECRET))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidToken("Invalid issuer".into()));
    }

    #[tokio::test]
    async fn wrong_signature_is_rejected() {
        let err = verifier()
            .verify(&token("user_123", ISSUER, now() + 600, "other-secret"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidToken("Invalid signature".into()));
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        assert!(matches!(
            verifier().verify("not.a.jwt").await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Ok("abc"));
        assert_eq!(bearer_token(&headers("bearer abc")), Ok("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), Err(AuthError::MalformedHeader));
        assert_eq!(bearer_token(&headers("Bearer ")), Err(AuthError::MalformedHeader));
        assert_eq!(bearer_token(&HeaderMap::new()), Err(AuthError::MissingToken));
    }

    #[test]
    fn only_api_paths_are_protected() {
        assert!(SecurityPolicy::requires_authentication("/api"));
        assert!(SecurityPolicy::requires_authentication("/api/todos"));
        assert!(SecurityPolicy::requires_authentication("/api/todos/1"));
        assert!(!SecurityPolicy::requires_authentication("/"));
        assert!(!SecurityPolicy::requires_authentication("/apiary"));
    }

    #[tokio::test]
    async fn rejection_is_401_with_challenge() {
        let policy = SecurityPolicy::new(verifier(), IdentitySource::TokenSubject);
        let resp = policy.authenticate_request(&HeaderMap::new()).await.unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[WWW_AUTHENTICATE], "Bearer");
    }

    #[test]
    fn identity_comes_from_configured_source() {
        let auth = AuthContext {
            subject: "token-user".to_string(),
        };
        let mut with_header = HeaderMap::new();
        with_header.insert(USER_ID_HEADER, HeaderValue::from_static("header-user"));

        let by_token = SecurityPolicy::new(verifier(), IdentitySource::TokenSubject);
        assert_eq!(by_token.caller_identity(&auth, &with_header).unwrap(), "token-user");

        let by_header = SecurityPolicy::new(verifier(), IdentitySource::Header);
        assert_eq!(by_header.caller_identity(&auth, &with_header).unwrap(), "header-user");
        assert!(matches!(
            by_header.caller_identity(&auth, &HeaderMap::new()),
            Err(TodoError::Validation(_))
        ));
    }

    const SIGNING_KEY_PEM: &str = include_str!("../testdata/jwks_signing_key.pem");
    const SIGNING_KEY_N: &str = "6wZfAlWQyxNpwxOrbWFDB_H7gNLovpvkL1M4ostPc5fWanAlrll2fTIl3OJGC3Y2o1Voa7yOP75WobopK04rWX4SnV3dNMJTx9TgfMGj7m23UZBIpqDv041Ew7H2mk-Wh0fwEdaUW25wyH_jHKOZI19gMlqq2YvvGjbLWz6XsbdgNWOtuMLNylHY06k2_yDDz8oy_bxtiqt5pStBt_iH3BkrWZtIkYsD_XOFs0C19qcnNEbSvscGbduOCdtoaEYFm-YtHvaW609yUIkeJItjbUE-2bK0Dis6K1FsUwp0Wgqc-5NqOTpsBu0yqQuuohB3N0zjL6WllenY1HshF354Dw";
    const SIGNING_KID: &str = "signing-key-1";

    fn rs256_token(sub: &str, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(
            &header,
            &TestClaims {
                sub,
                iss: ISSUER,
                exp: now() + 600,
            },
            &EncodingKey::from_rsa_pem(SIGNING_KEY_PEM.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    fn jwks_body() -> String {
        serde_json::json!({
            "keys": [{
                "kty": "RSA",
                "kid": SIGNING_KID,
                "use": "sig",
                "alg": "RS256",
                "n": SIGNING_KEY_N,
                "e": "AQAB"
            }]
        })
        .to_string()
    }

    fn jwks_verifier(server: &mockito::ServerGuard) -> TokenVerifier {
        TokenVerifier::from_config(&JwtConfig {
            issuer: ISSUER.to_string(),
            audience: None,
            trust: TrustMaterial::Jwks {
                url: format!("{}/.well-known/jwks.json", server.url()),
            },
        })
    }

    fn without_refresh_throttle(mut verifier: TokenVerifier) -> TokenVerifier {
        if let KeySource::Jwks(cache) = &mut verifier.keys {
            cache.min_refresh_interval = Duration::ZERO;
        }
        verifier
    }

    async fn serve_jwks(server: &mut mockito::ServerGuard, fetches: usize) -> mockito::Mock {
        server
            .mock("GET", "/.well-known/jwks.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(jwks_body())
            .expect(fetches)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn rs256_token_with_known_kid_verifies_from_cached_jwks() {
        let mut server = mockito::Server::new_async().await;
        let jwks = serve_jwks(&mut server, 1).await;
        let verifier = jwks_verifier(&server);

        let ctx = verifier.verify(&rs256_token("user_rsa", SIGNING_KID)).await.unwrap();
        assert_eq!(ctx.subject, "user_rsa");

        // Second token is checked against the cached key set
        let ctx = verifier.verify(&rs256_token("user_rsa_2", SIGNING_KID)).await.unwrap();
        assert_eq!(ctx.subject, "user_rsa_2");
        jwks.assert_async().await;
    }

    #[tokio::test]
    async fn unknown_kid_refetches_once_then_fails() {
        let mut server = mockito::Server::new_async().await;
        let jwks = serve_jwks(&mut server, 2).await;
        let verifier = without_refresh_throttle(jwks_verifier(&server));

        verifier.verify(&rs256_token("user_rsa", SIGNING_KID)).await.unwrap();
        let err = verifier
            .verify(&rs256_token("user_rsa", "rotated-away"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidToken("Unknown key ID: rotated-away".into()));
        jwks.assert_async().await;
    }

    #[tokio::test]
    async fn unknown_kid_right_after_a_fetch_does_not_refetch() {
        let mut server = mockito::Server::new_async().await;
        let jwks = serve_jwks(&mut server, 1).await;
        let verifier = jwks_verifier(&server);

        verifier.verify(&rs256_token("user_rsa", SIGNING_KID)).await.unwrap();
        for _ in 0..3 {
            let err = verifier.verify(&rs256_token("user_rsa", "bogus")).await.unwrap_err();
            assert_eq!(err, AuthError::InvalidToken("Unknown key ID: bogus".into()));
        }
        jwks.assert_async().await;
    }

    #[tokio::test]
    async fn rs256_token_without_kid_is_rejected() {
        let server = mockito::Server::new_async().await;
        let verifier = jwks_verifier(&server);

        let token = encode(
            &Header::new(Algorithm::RS256),
            &TestClaims {
                sub: "user_rsa",
                iss: ISSUER,
                exp: now() + 600,
            },
            &EncodingKey::from_rsa_pem(SIGNING_KEY_PEM.as_bytes()).unwrap(),
        )
        .unwrap();
        let err = verifier.verify(&token).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidToken("Token missing key ID (kid)".into()));
    }

    #[tokio::test]
    async fn jwks_outage_is_key_unavailable_and_a_401() {
        let mut server = mockito::Server::new_async().await;
        let jwks = server
            .mock("GET", "/.well-known/jwks.json")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;
        let token = rs256_token("user_rsa", SIGNING_KID);

        let err = jwks_verifier(&server).verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::KeyUnavailable(_)));

        let policy = SecurityPolicy::new(jwks_verifier(&server), IdentitySource::TokenSubject);
        let resp = policy
            .authenticate_request(&headers(&format!("Bearer {}", token)))
            .await
            .unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[WWW_AUTHENTICATE], "Bearer error=\"invalid_token\"");
        jwks.assert_async().await;
    }

    #[test]
    fn jwks_without_usable_rsa_keys_is_unavailable() {
        let jwks: JwksResponse = serde_json::from_value(serde_json::json!({
            "keys": [
                {"kty": "EC", "kid": "ec-1", "crv": "P-256", "x": "a", "y": "b"},
                {"kty": "RSA", "kid": "no-modulus", "e": "AQAB"}
            ]
        }))
        .unwrap();
        assert!(matches!(rsa_keys(jwks), Err(AuthError::KeyUnavailable(_))));
    }
}
