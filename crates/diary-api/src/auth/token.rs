//! Session token codec
//!
//! Access and refresh tokens are HMAC-signed JWTs. Each kind is signed with
//! its own secret, so a token of one kind never verifies as the other.
//! Parsing inspects the raw header before verification and refuses any
//! algorithm outside the HMAC family, including `none`.

use axum::http::{header, HeaderMap, Uri};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use diary_core::{AuthConfig, UserId};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Algorithms accepted when parsing
const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Session kind embedded in every token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn secret(self, config: &AuthConfig) -> &str {
        match self {
            TokenKind::Access => &config.access_secret,
            TokenKind::Refresh => &config.refresh_secret,
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// Claims carried by access and refresh tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// Session ID, the key of the session store entry
    pub sid: String,
    /// Session kind
    pub kind: TokenKind,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
}

impl SessionClaims {
    /// Subject parsed as a user ID; only positive IDs identify a user
    pub fn user_id(&self) -> Result<UserId, TokenError> {
        match self.sub.parse::<UserId>() {
            Ok(id) if id > 0 => Ok(id),
            Ok(_) => Err(TokenError::InvalidSubject),
            Err(_) => Err(TokenError::Malformed),
        }
    }
}

/// Token issuance and parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Failed to encode token: {0}")]
    Encoding(String),

    #[error("Malformed token")]
    Malformed,

    #[error("Unexpected signing algorithm: {0}")]
    UnexpectedAlgorithm(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Invalid token issuer")]
    InvalidIssuer,

    #[error("Token has expired")]
    Expired,

    #[error("Expected a {expected} token")]
    WrongKind { expected: TokenKind },

    #[error("Token subject does not identify a live user")]
    InvalidSubject,
}

/// Sign a token for `kind` with the kind-specific secret
pub fn issue_token(
    config: &AuthConfig,
    kind: TokenKind,
    session_id: &str,
    user_id: UserId,
    expires_at: i64,
) -> Result<String, TokenError> {
    let secret = kind.secret(config);
    if secret.is_empty() {
        return Err(TokenError::Encoding(format!("missing {kind} secret")));
    }

    let claims = SessionClaims {
        iss: config.issuer.clone(),
        sub: user_id.to_string(),
        sid: session_id.to_string(),
        kind,
        iat: chrono::Utc::now().timestamp(),
        exp: expires_at,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| TokenError::Encoding(e.to_string()))
}

/// Verify a token of `kind` and return its claims
pub fn parse_token(
    config: &AuthConfig,
    kind: TokenKind,
    token: &str,
) -> Result<SessionClaims, TokenError> {
    check_algorithm(token)?;

    let secret = kind.secret(config);
    if secret.is_empty() {
        return Err(TokenError::InvalidSignature);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = ACCEPTED_ALGORITHMS.to_vec();
    validation.leeway = 0;
    validation.set_issuer(&[&config.issuer]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);

    let claims = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
        ErrorKind::InvalidAlgorithm => TokenError::UnexpectedAlgorithm("mismatch".to_string()),
        _ => TokenError::Malformed,
    })?
    .claims;

    // jsonwebtoken only rejects exp < now; a token is dead at exp itself
    if chrono::Utc::now().timestamp() >= claims.exp {
        return Err(TokenError::Expired);
    }

    if claims.kind != kind {
        return Err(TokenError::WrongKind { expected: kind });
    }

    Ok(claims)
}

/// Read the `alg` field of the unverified header
fn check_algorithm(token: &str) -> Result<(), TokenError> {
    let header_segment = token.split('.').next().ok_or(TokenError::Malformed)?;
    let raw = URL_SAFE_NO_PAD
        .decode(header_segment)
        .map_err(|_| TokenError::Malformed)?;
    let header: serde_json::Value =
        serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)?;

    match header.get("alg").and_then(|v| v.as_str()) {
        Some("HS256" | "HS384" | "HS512") => Ok(()),
        Some(other) => Err(TokenError::UnexpectedAlgorithm(other.to_string())),
        None => Err(TokenError::Malformed),
    }
}

/// Locate a bearer token in a request without verifying it
///
/// The `token` query parameter wins over the `Authorization` header.
pub fn extract_bearer(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    let from_query = uri.query().and_then(|query| {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, value)| *key == "token" && !value.is_empty())
            .map(|(_, value)| value.to_string())
    });
    if from_query.is_some() {
        return from_query;
    }

    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
            Some(token.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use proptest::prelude::*;

    fn config() -> AuthConfig {
        AuthConfig {
            access_secret: "access-secret".to_string(),
            refresh_secret: "refresh-secret".to_string(),
            ..Default::default()
        }
    }

    fn in_five_minutes() -> i64 {
        chrono::Utc::now().timestamp() + 300
    }

    fn sign_raw(claims: &SessionClaims, alg: Algorithm, secret: &str) -> String {
        encode(
            &Header::new(alg),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(kind: TokenKind, exp: i64) -> SessionClaims {
        SessionClaims {
            iss: config().issuer,
            sub: "42".to_string(),
            sid: "sid-1".to_string(),
            kind,
            iat: exp - 300,
            exp,
        }
    }

    #[test]
    fn test_issue_and_parse() {
        let config = config();
        let token = issue_token(&config, TokenKind::Access, "sid-1", 42, in_five_minutes())
            .expect("Failed to issue token");

        let claims = parse_token(&config, TokenKind::Access, &token).expect("Invalid token");
        assert_eq!(claims.sid, "sid-1");
        assert_eq!(claims.user_id(), Ok(42));
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn test_non_positive_subject() {
        let mut zero = claims(TokenKind::Access, in_five_minutes());
        zero.sub = "0".to_string();
        assert_eq!(zero.user_id(), Err(TokenError::InvalidSubject));

        zero.sub = "abc".to_string();
        assert_eq!(zero.user_id(), Err(TokenError::Malformed));
    }

    #[test]
    fn test_missing_secret_fails_issuance() {
        let config = AuthConfig {
            access_secret: String::new(),
            ..config()
        };
        let result = issue_token(&config, TokenKind::Access, "sid", 1, in_five_minutes());
        assert!(matches!(result, Err(TokenError::Encoding(_))));
    }

    #[test]
    fn test_cross_secret_verification_fails() {
        let config = config();
        let access = issue_token(&config, TokenKind::Access, "a", 1, in_five_minutes()).unwrap();
        let refresh = issue_token(&config, TokenKind::Refresh, "r", 1, in_five_minutes()).unwrap();

        assert_eq!(
            parse_token(&config, TokenKind::Refresh, &access),
            Err(TokenError::InvalidSignature)
        );
        assert_eq!(
            parse_token(&config, TokenKind::Access, &refresh),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_expired_token() {
        let config = config();
        let past = chrono::Utc::now().timestamp() - 3600;
        let token = sign_raw(&claims(TokenKind::Access, past), Algorithm::HS256, "access-secret");

        assert_eq!(
            parse_token(&config, TokenKind::Access, &token),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_token_expires_at_exp() {
        let config = config();
        let now = chrono::Utc::now().timestamp();
        let token = sign_raw(&claims(TokenKind::Access, now), Algorithm::HS256, "access-secret");

        assert_eq!(
            parse_token(&config, TokenKind::Access, &token),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_other_hmac_algorithms_accepted() {
        let config = config();
        let token = sign_raw(
            &claims(TokenKind::Access, in_five_minutes()),
            Algorithm::HS512,
            "access-secret",
        );
        assert!(parse_token(&config, TokenKind::Access, &token).is_ok());
    }

    #[test]
    fn test_none_algorithm_rejected() {
        let config = config();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&claims(TokenKind::Access, in_five_minutes())).unwrap());
        let token = format!("{header}.{payload}.");

        assert_eq!(
            parse_token(&config, TokenKind::Access, &token),
            Err(TokenError::UnexpectedAlgorithm("none".to_string()))
        );
    }

    #[test]
    fn test_rsa_algorithm_rejected() {
        let config = config();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let token = format!("{header}.e30.c2ln");

        assert!(matches!(
            parse_token(&config, TokenKind::Access, &token),
            Err(TokenError::UnexpectedAlgorithm(alg)) if alg == "RS256"
        ));
    }

    #[test]
    fn test_wrong_kind_with_matching_secret() {
        let config = config();
        let token = sign_raw(
            &claims(TokenKind::Refresh, in_five_minutes()),
            Algorithm::HS256,
            "access-secret",
        );
        assert_eq!(
            parse_token(&config, TokenKind::Access, &token),
            Err(TokenError::WrongKind {
                expected: TokenKind::Access
            })
        );
    }

    #[test]
    fn test_wrong_issuer() {
        let config = config();
        let mut foreign = claims(TokenKind::Access, in_five_minutes());
        foreign.iss = "someone-else".to_string();
        let token = sign_raw(&foreign, Algorithm::HS256, "access-secret");

        assert_eq!(
            parse_token(&config, TokenKind::Access, &token),
            Err(TokenError::InvalidIssuer)
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        let config = config();
        assert_eq!(
            parse_token(&config, TokenKind::Access, "not-a-token"),
            Err(TokenError::Malformed)
        );
        assert_eq!(
            parse_token(&config, TokenKind::Access, ""),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_extract_prefers_query() {
        let uri: Uri = "/entries?token=from-query".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );

        assert_eq!(
            extract_bearer(&uri, &headers),
            Some("from-query".to_string())
        );
    }

    #[test]
    fn test_extract_header_forms() {
        let uri: Uri = "/entries".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&uri, &headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_bearer(&uri, &headers), Some("abc".to_string()));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&uri, &headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert_eq!(extract_bearer(&uri, &headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer a b"));
        assert_eq!(extract_bearer(&uri, &headers), None);
    }

    #[test]
    fn test_extract_ignores_empty_query_token() {
        let uri: Uri = "/entries?token=&page=2".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_bearer(&uri, &headers), Some("abc".to_string()));
    }

    proptest! {
        #[test]
        fn prop_header_token_extracted_verbatim(token in "[A-Za-z0-9_.-]{1,64}") {
            let uri: Uri = "/users/1".parse().unwrap();
            let mut headers = HeaderMap::new();
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
            );
            prop_assert_eq!(extract_bearer(&uri, &headers), Some(token));
        }

        #[test]
        fn prop_query_token_extracted_verbatim(token in "[A-Za-z0-9_.-]{1,64}") {
            let uri: Uri = format!("/entries?a=1&token={token}").parse().unwrap();
            prop_assert_eq!(extract_bearer(&uri, &HeaderMap::new()), Some(token));
        }

        #[test]
        fn prop_tampered_signature_never_parses(flip in 0usize..20) {
            let config = config();
            let token = issue_token(&config, TokenKind::Access, "sid", 7, in_five_minutes()).unwrap();
            let (body, signature) = token.rsplit_once('.').unwrap();
            let mut sig: Vec<u8> = signature.bytes().collect();
            let idx = flip % sig.len();
            sig[idx] = if sig[idx] == b'A' { b'B' } else { b'A' };
            let tampered = format!("{body}.{}", String::from_utf8(sig).unwrap());
            prop_assert!(parse_token(&config, TokenKind::Access, &tampered).is_err());
        }
    }
}
