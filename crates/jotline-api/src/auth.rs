use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::AppError;

/// Principal resolved from a bearer credential. `user_id` scopes every
/// sync query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub session_id: Option<String>,
}

/// Resolves a bearer token to a principal.
#[async_trait]
pub trait AuthGuard: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AppError>;
}

/// HS256 JWT verifier with issuer and clock-skew checks.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    issuer: Option<String>,
    clock_skew: Duration,
}

impl JwtVerifier {
    pub fn new(secret: &str, issuer: Option<String>, clock_skew: Duration) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            issuer,
            clock_skew,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            config.jwt_issuer.clone(),
            config.auth_clock_skew,
        )
    }

    /// Sign a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: &str, ttl: Duration) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            exp: Some(now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))),
            iat: Some(now),
            nbf: None,
            jti: None,
            session_id: None,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|error| AppError::internal(format!("Token signing failed: {}", sanitize(&error))))
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }

        let decoded = decode::<Claims>(token, &self.decoding, &validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;

        if decoded.claims.sub.trim().is_empty() {
            return Err(AppError::unauthorized("Token subject is missing"));
        }
        validate_temporal_claims(&decoded.claims, self.clock_skew)?;

        Ok(AuthenticatedUser {
            user_id: decoded.claims.sub,
            session_id: decoded.claims.session_id.or(decoded.claims.jti),
        })
    }
}

#[async_trait]
impl AuthGuard for JwtVerifier {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        self.verify_access_token(token)
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

fn validate_temporal_claims(claims: &Claims, clock_skew: Duration) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    let exp = claims
        .exp
        .ok_or_else(|| AppError::unauthorized("Token missing `exp` claim"))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    let iat = claims
        .iat
        .ok_or_else(|| AppError::unauthorized("Token missing `iat` claim"))?;
    if iat > now.saturating_add(skew) {
        return Err(AppError::unauthorized("Token `iat` is in the future"));
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token is not yet valid"));
        }
    }

    Ok(())
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(SECRET, Some("jotline".to_string()), Duration::from_secs(30))
    }

    fn claims(exp: Option<i64>, iat: Option<i64>) -> Claims {
        Claims {
            sub: "user".to_string(),
            iss: None,
            exp,
            iat,
            nbf: None,
            jti: None,
            session_id: None,
        }
    }

    #[test]
    fn bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );

        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
        assert!(extract_bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn issued_token_verifies() {
        let verifier = verifier();
        let token = verifier.issue("user-1", Duration::from_secs(300)).unwrap();
        let user = verifier.verify_access_token(&token).unwrap();
        assert_eq!(user.user_id, "user-1");
    }

    #[test]
    fn foreign_secret_and_issuer_are_rejected() {
        let other = JwtVerifier::new(
            "fedcba9876543210fedcba9876543210",
            Some("jotline".to_string()),
            Duration::from_secs(30),
        );
        let token = other.issue("user-1", Duration::from_secs(300)).unwrap();
        assert!(verifier().verify_access_token(&token).is_err());

        let wrong_issuer = JwtVerifier::new(SECRET, Some("elsewhere".to_string()), Duration::ZERO);
        let token = wrong_issuer.issue("user-1", Duration::from_secs(300)).unwrap();
        assert!(verifier().verify_access_token(&token).is_err());
    }

    #[test]
    fn temporal_claims_require_exp_and_iat() {
        let err = validate_temporal_claims(&claims(None, None), Duration::from_secs(60))
            .unwrap_err();
        assert!(err.to_string().contains("missing `exp`"));
    }

    #[test]
    fn temporal_claims_reject_expired_and_future_iat() {
        let now = chrono::Utc::now().timestamp();
        let err = validate_temporal_claims(&claims(Some(now - 120), Some(now - 600)), Duration::from_secs(30))
            .unwrap_err();
        assert!(err.to_string().contains("expired"));

        let err = validate_temporal_claims(&claims(Some(now + 300), Some(now + 120)), Duration::from_secs(30))
            .unwrap_err();
        assert!(err.to_string().contains("future"));
    }
}
