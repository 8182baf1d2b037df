//! HS256 JSON Web Tokens for access tokens

use base64::prelude::*;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

use crate::error::{AuthError, AuthResult};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Id of the refresh token the access token was issued from
    pub iss: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expires at (Unix seconds)
    pub exp: i64,
}

fn mac_for(key: &str) -> AuthResult<HmacSha256> {
    HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| AuthError::InvalidToken("bad key"))
}

/// Sign claims with `key`
pub fn encode(claims: &Claims, key: &str) -> AuthResult<String> {
    let header = BASE64_URL_SAFE_NO_PAD.encode(json!({"alg": "HS256", "typ": "JWT"}).to_string());
    let payload = BASE64_URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(claims).map_err(|_| AuthError::InvalidToken("unserializable claims"))?,
    );

    let mut mac = mac_for(key)?;
    mac.update(format!("{}.{}", header, payload).as_bytes());
    let signature = BASE64_URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}.{}", header, payload, signature))
}

/// Read the claims without checking the signature
///
/// Needed to find the refresh token (and so the key) a token claims to
/// come from.
pub fn decode_unverified(token: &str) -> AuthResult<Claims> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken("malformed"));
    };

    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::InvalidToken("bad payload encoding"))?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidToken("bad claims"))
}

/// Check the signature of `token` against `key` and return its claims
pub fn verify(token: &str, key: &str) -> AuthResult<Claims> {
    let claims = decode_unverified(token)?;
    let (signed, signature) = token
        .rsplit_once('.')
        .ok_or(AuthError::InvalidToken("malformed"))?;

    let signature = BASE64_URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| AuthError::InvalidToken("bad signature encoding"))?;

    let mut mac = mac_for(key)?;
    mac.update(signed.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AuthError::InvalidToken("signature mismatch"))?;

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            iss: "token-id".to_string(),
            iat: 1_700_000_000,
            exp: 1_700_001_800,
        }
    }

    #[test]
    fn test_encode_verify() {
        let token = encode(&claims(), "secret").unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(verify(&token, "secret").unwrap(), claims());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = encode(&claims(), "secret").unwrap();
        assert!(matches!(
            verify(&token, "other"),
            Err(AuthError::InvalidToken("signature mismatch"))
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = encode(&claims(), "secret").unwrap();
        let mut forged = claims();
        forged.exp += 3600;
        let forged_payload = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert!(verify(&tampered, "secret").is_err());
        assert_eq!(decode_unverified(&tampered).unwrap(), forged);
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(decode_unverified("abc").is_err());
        assert!(decode_unverified("a.b.c.d").is_err());
        assert!(decode_unverified("a.!!!.c").is_err());
    }
}
