//! Inter-peer request authentication.
//!
//! Peers sign `{host}:{timestamp}` with their node key and send the result
//! in headers. The receiving side recovers the wallet and checks it against
//! the registered peer set, with a bounded clock skew.

use axum::http::HeaderMap;
use chorus_core::signature::{recover_wallet, sign_bytes};
use chorus_core::{AppError, ChorusConfig};
use chrono::Utc;

pub const SIG_HEADER: &str = "x-chorus-signature";
pub const HOST_HEADER: &str = "x-chorus-host";
pub const TS_HEADER: &str = "x-chorus-timestamp";

/// Maximum age of a peer request signature.
const MAX_SKEW_SECS: i64 = 600;

fn message(host: &str, timestamp: i64) -> String {
    format!("{host}:{timestamp}")
}

/// Headers to attach to an outbound peer request.
pub fn signed_headers(config: &ChorusConfig) -> Result<Vec<(&'static str, String)>, AppError> {
    let key = config
        .signing_key()
        .ok_or_else(|| AppError::Internal("node has no signing key".into()))?;
    let timestamp = Utc::now().timestamp();
    let sig = sign_bytes(message(&config.self_peer.host, timestamp).as_bytes(), key)?;
    Ok(vec![
        (SIG_HEADER, hex::encode(sig)),
        (HOST_HEADER, config.self_peer.host.clone()),
        (TS_HEADER, timestamp.to_string()),
    ])
}

/// Verify an inbound peer request. Returns the claimed peer host.
pub fn verify_peer_headers(
    headers: &HeaderMap,
    is_peer_wallet: impl Fn(&str) -> bool,
) -> Result<String, AppError> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::NotAuthorized(format!("missing {name} header")))
    };

    let sig_hex = get(SIG_HEADER)?;
    let host = get(HOST_HEADER)?.to_string();
    let timestamp: i64 = get(TS_HEADER)?
        .parse()
        .map_err(|_| AppError::NotAuthorized("bad timestamp header".into()))?;

    let age = (Utc::now().timestamp() - timestamp).abs();
    if age > MAX_SKEW_SECS {
        return Err(AppError::NotAuthorized(format!(
            "peer signature too old: {age}s"
        )));
    }

    let sig = hex::decode(sig_hex)
        .map_err(|_| AppError::NotAuthorized("signature is not hex".into()))?;
    let wallet = recover_wallet(message(&host, timestamp).as_bytes(), &sig)?;
    if !is_peer_wallet(&wallet) {
        return Err(AppError::NotAuthorized(format!(
            "wallet {wallet} is not a registered peer"
        )));
    }
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chorus_core::signature::wallet_address;
    use k256::ecdsa::SigningKey;

    fn headers_for(key: &SigningKey, host: &str, timestamp: i64) -> HeaderMap {
        let sig = sign_bytes(message(host, timestamp).as_bytes(), key).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(SIG_HEADER, HeaderValue::from_str(&hex::encode(sig)).unwrap());
        headers.insert(HOST_HEADER, HeaderValue::from_str(host).unwrap());
        headers.insert(
            TS_HEADER,
            HeaderValue::from_str(&timestamp.to_string()).unwrap(),
        );
        headers
    }

    #[test]
    fn valid_peer_signature_passes() {
        let key = SigningKey::from_slice(&[3u8; 32]).unwrap();
        let wallet = wallet_address(key.verifying_key());
        let headers = headers_for(&key, "https://node2.example.com", Utc::now().timestamp());
        let host = verify_peer_headers(&headers, |w| w == wallet).unwrap();
        assert_eq!(host, "https://node2.example.com");
    }

    #[test]
    fn unknown_wallet_rejected() {
        let key = SigningKey::from_slice(&[3u8; 32]).unwrap();
        let headers = headers_for(&key, "https://node2.example.com", Utc::now().timestamp());
        assert!(verify_peer_headers(&headers, |_| false).is_err());
    }

    #[test]
    fn stale_timestamp_rejected() {
        let key = SigningKey::from_slice(&[3u8; 32]).unwrap();
        let old = Utc::now().timestamp() - MAX_SKEW_SECS - 5;
        let headers = headers_for(&key, "https://node2.example.com", old);
        assert!(verify_peer_headers(&headers, |_| true).is_err());
    }

    #[test]
    fn missing_headers_rejected() {
        assert!(verify_peer_headers(&HeaderMap::new(), |_| true).is_err());
    }
}
