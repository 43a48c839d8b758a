//! Wallet signatures for inter-node and streaming authentication.
//!
//! Nodes hold secp256k1 keys; identities are Ethereum-style wallet
//! addresses (Keccak-256 of the uncompressed public key, last 20 bytes).
//! Two envelopes exist: signed peer requests (headers) and the signed
//! query-string used by the cidstream route.

use chrono::{DateTime, TimeZone, Utc};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::AppError;

/// Maximum age of a streaming signature.
pub const MAX_SIGNATURE_AGE_HOURS: i64 = 48;

/// Derive the wallet address controlled by a public key.
pub fn wallet_address(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    // skip the 0x04 uncompressed prefix
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}

/// Sign arbitrary bytes, returning the 65-byte `r || s || v` form.
pub fn sign_bytes(data: &[u8], key: &SigningKey) -> Result<Vec<u8>, AppError> {
    let digest = Keccak256::digest(data);
    let (sig, recovery) = key
        .sign_prehash_recoverable(digest.as_slice())
        .map_err(|e| AppError::Internal(format!("signing failed: {e}")))?;
    let mut out = sig.to_vec();
    out.push(recovery.to_byte());
    Ok(out)
}

/// Recover the wallet that signed `data` from a 65-byte signature.
pub fn recover_wallet(data: &[u8], signature: &[u8]) -> Result<String, AppError> {
    if signature.len() != 65 {
        return Err(AppError::Validation(format!(
            "signature must be 65 bytes, got {}",
            signature.len()
        )));
    }
    let digest = Keccak256::digest(data);
    let sig = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|e| AppError::Validation(format!("malformed signature: {e}")))?;
    let recovery = RecoveryId::from_byte(signature[64] & 1)
        .ok_or_else(|| AppError::Validation("bad recovery id".into()))?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, recovery)
        .map_err(|e| AppError::Validation(format!("signature recovery failed: {e}")))?;
    Ok(wallet_address(&key))
}

/// Payload bound into a streaming signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamSignatureData {
    pub cid: String,
    pub timestamp: i64,
}

/// Signed query-string envelope: `base64(json({data, signature}))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub data: StreamSignatureData,
    /// hex-encoded 65-byte signature over the JSON-serialized `data`
    pub signature: String,
}

impl SignatureEnvelope {
    pub fn sign(data: StreamSignatureData, key: &SigningKey) -> Result<Self, AppError> {
        let payload = serde_json::to_vec(&data)
            .map_err(|e| AppError::Internal(format!("serialize signature data: {e}")))?;
        let signature = hex::encode(sign_bytes(&payload, key)?);
        Ok(Self { data, signature })
    }

    pub fn encode(&self) -> Result<String, AppError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AppError::Internal(format!("serialize envelope: {e}")))?;
        Ok(base64_encode(&json))
    }

    pub fn parse(query_value: &str) -> Result<Self, AppError> {
        let json = base64_decode(query_value)
            .map_err(|e| AppError::Validation(format!("signature is not base64: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| AppError::Validation(format!("signature is not a valid envelope: {e}")))
    }

    /// Recover the wallet that produced this envelope.
    pub fn signer_wallet(&self) -> Result<String, AppError> {
        let payload = serde_json::to_vec(&self.data)
            .map_err(|e| AppError::Internal(format!("serialize signature data: {e}")))?;
        let raw = hex::decode(self.signature.trim_start_matches("0x"))
            .map_err(|e| AppError::Validation(format!("signature is not hex: {e}")))?;
        recover_wallet(&payload, &raw)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.data.timestamp, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
    }

    /// Validate the envelope against a CID: signer registration is checked
    /// by the caller, age and CID binding here.
    pub fn validate_for_cid(&self, cid: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let age = now - self.issued_at();
        if age.num_hours() >= MAX_SIGNATURE_AGE_HOURS {
            return Err(AppError::NotAuthorized(format!(
                "signature too old: {} hours",
                age.num_hours()
            )));
        }
        if self.data.cid != cid {
            return Err(AppError::NotAuthorized(format!(
                "signature is for cid {}, requested {}",
                self.data.cid, cid
            )));
        }
        Ok(())
    }
}

fn base64_encode(input: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(input)
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_key() -> SigningKey {
        SigningKey::from_slice(&[11u8; 32]).unwrap()
    }

    #[test]
    fn sign_and_recover_roundtrip() {
        let key = test_key();
        let wallet = wallet_address(key.verifying_key());
        let sig = sign_bytes(b"payload", &key).unwrap();
        assert_eq!(sig.len(), 65);
        assert_eq!(recover_wallet(b"payload", &sig).unwrap(), wallet);
    }

    #[test]
    fn tampered_payload_recovers_different_wallet() {
        let key = test_key();
        let wallet = wallet_address(key.verifying_key());
        let sig = sign_bytes(b"payload", &key).unwrap();
        let recovered = recover_wallet(b"other payload", &sig);
        // recovery either fails or yields a different wallet
        if let Ok(w) = recovered {
            assert_ne!(w, wallet);
        }
    }

    #[test]
    fn envelope_roundtrip_through_query_string() {
        let key = test_key();
        let data = StreamSignatureData {
            cid: "bafytest".into(),
            timestamp: Utc::now().timestamp(),
        };
        let envelope = SignatureEnvelope::sign(data.clone(), &key).unwrap();
        let encoded = envelope.encode().unwrap();
        let parsed = SignatureEnvelope::parse(&encoded).unwrap();
        assert_eq!(parsed.data, data);
        assert_eq!(
            parsed.signer_wallet().unwrap(),
            wallet_address(key.verifying_key())
        );
    }

    #[test]
    fn stale_signature_rejected() {
        let key = test_key();
        let old = Utc::now() - Duration::hours(MAX_SIGNATURE_AGE_HOURS + 1);
        let envelope = SignatureEnvelope::sign(
            StreamSignatureData {
                cid: "bafytest".into(),
                timestamp: old.timestamp(),
            },
            &key,
        )
        .unwrap();
        assert!(envelope.validate_for_cid("bafytest", Utc::now()).is_err());
    }

    #[test]
    fn cid_mismatch_rejected() {
        let key = test_key();
        let envelope = SignatureEnvelope::sign(
            StreamSignatureData {
                cid: "bafyone".into(),
                timestamp: Utc::now().timestamp(),
            },
            &key,
        )
        .unwrap();
        assert!(envelope.validate_for_cid("bafyother", Utc::now()).is_err());
        assert!(envelope.validate_for_cid("bafyone", Utc::now()).is_ok());
    }

    #[test]
    fn wallet_address_shape() {
        let wallet = wallet_address(test_key().verifying_key());
        assert!(wallet.starts_with("0x"));
        assert_eq!(wallet.len(), 42);
    }
}
