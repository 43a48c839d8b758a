//! Environment-driven node configuration.
//!
//! Every option is read from `CHORUS_*` variables with sane dev defaults.
//! Invalid host or private key is a fatal boot error; everything else falls
//! back and logs.

use std::env;

use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::signature::wallet_address;

const DEFAULT_REPLICATION_FACTOR: usize = 3;
const DEFAULT_LISTEN_PORT: u16 = 1991;
const DEFAULT_MIN_FREE_DISK_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// A registered node: public host URL plus its on-chain wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
    pub wallet: String,
}

impl Peer {
    /// Join URL path segments onto this peer's host.
    pub fn api_path(&self, parts: &[&str]) -> String {
        let mut url = self.host.trim_end_matches('/').to_string();
        for part in parts {
            url.push('/');
            url.push_str(part.trim_matches('/'));
        }
        url
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Env {
    Dev,
    Stage,
    Prod,
    Test,
}

impl Env {
    fn parse(s: &str) -> Self {
        match s {
            "stage" => Env::Stage,
            "prod" => Env::Prod,
            "test" => Env::Test,
            _ => Env::Dev,
        }
    }

    /// Redirect scheme for intra-fleet hops.
    pub fn scheme(&self) -> &'static str {
        match self {
            Env::Stage | Env::Prod => "https",
            _ => "http",
        }
    }
}

#[derive(Clone)]
pub struct ChorusConfig {
    pub env: Env,
    pub self_peer: Peer,
    pub peers: Vec<Peer>,
    pub signers: Vec<Peer>,
    pub replication_factor: usize,
    pub dir: String,
    pub blob_store_dsn: String,
    pub postgres_dsn: String,
    pub listen_port: u16,
    pub store_all: bool,
    pub min_free_disk_bytes: u64,
    pub transcode_workers_override: Option<usize>,
    pub wallet_is_registered: bool,
    signing_key: Option<SigningKey>,
}

impl std::fmt::Debug for ChorusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChorusConfig")
            .field("env", &self.env)
            .field("self_peer", &self.self_peer)
            .field("peers", &self.peers.len())
            .field("replication_factor", &self.replication_factor)
            .field("dir", &self.dir)
            .field("store_all", &self.store_all)
            .finish_non_exhaustive()
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_peer_list(key: &str) -> Result<Vec<Peer>, AppError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
            .map_err(|e| AppError::Validation(format!("{key} must be a JSON peer array: {e}"))),
        _ => Ok(Vec::new()),
    }
}

impl ChorusConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let env_name = env_or("CHORUS_ENV", "dev");
        let environment = Env::parse(&env_name);

        let self_host = env::var("CHORUS_SELF_HOST")
            .map_err(|_| AppError::Validation("CHORUS_SELF_HOST is required".into()))?;
        let self_wallet = env_or("CHORUS_SELF_WALLET", "");
        let self_peer = Peer {
            host: self_host.clone(),
            wallet: self_wallet,
        };

        let peers = parse_peer_list("CHORUS_PEERS")?;
        let signers = parse_peer_list("CHORUS_SIGNERS")?;

        let replication_factor = env_or(
            "CHORUS_REPLICATION_FACTOR",
            &DEFAULT_REPLICATION_FACTOR.to_string(),
        )
        .parse::<usize>()
        .unwrap_or(DEFAULT_REPLICATION_FACTOR)
        .max(1);

        let dir = env_or("CHORUS_DIR", "/tmp/chorus");
        let blob_store_dsn = env::var("CHORUS_BLOB_STORE_DSN")
            .unwrap_or_else(|_| format!("file://{dir}/blobs"));
        let postgres_dsn = env::var("CHORUS_POSTGRES_DSN")
            .or_else(|_| env::var("DATABASE_URL"))
            .map_err(|_| {
                AppError::Validation("CHORUS_POSTGRES_DSN or DATABASE_URL is required".into())
            })?;

        // Port defaults from the host URL when one is embedded there.
        let listen_port = env::var("CHORUS_LISTEN_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .or_else(|| port_from_host(&self_host))
            .unwrap_or(DEFAULT_LISTEN_PORT);

        let signing_key = match env::var("CHORUS_PRIVATE_KEY") {
            Ok(hex_key) if !hex_key.trim().is_empty() => Some(parse_private_key(&hex_key)?),
            _ => {
                tracing::warn!("CHORUS_PRIVATE_KEY not set, signed requests disabled");
                None
            }
        };

        let store_all = env_or("CHORUS_STORE_ALL", "false")
            .to_lowercase()
            .parse()
            .unwrap_or(false);

        let min_free_disk_bytes = env_or(
            "CHORUS_MIN_FREE_DISK_BYTES",
            &DEFAULT_MIN_FREE_DISK_BYTES.to_string(),
        )
        .parse()
        .unwrap_or(DEFAULT_MIN_FREE_DISK_BYTES);

        let transcode_workers_override = env::var("TRANSCODE_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok());

        let wallet_is_registered = peers.iter().any(|p| {
            p.host.eq_ignore_ascii_case(&self_peer.host)
                && p.wallet.eq_ignore_ascii_case(&self_peer.wallet)
        });

        Ok(ChorusConfig {
            env: environment,
            self_peer,
            peers,
            signers,
            replication_factor,
            dir,
            blob_store_dsn,
            postgres_dsn,
            listen_port,
            store_all,
            min_free_disk_bytes,
            transcode_workers_override,
            wallet_is_registered,
            signing_key,
        })
    }

    /// Peer hosts excluding this node.
    pub fn other_peers(&self) -> impl Iterator<Item = &Peer> {
        let self_host = &self.self_peer.host;
        self.peers.iter().filter(move |p| &p.host != self_host)
    }

    pub fn signing_key(&self) -> Option<&SigningKey> {
        self.signing_key.as_ref()
    }

    /// Number of transcode workers: `max(2, ncpu - 2)` unless overridden.
    pub fn transcode_workers(&self, ncpu: usize) -> usize {
        self.transcode_workers_override
            .unwrap_or_else(|| ncpu.saturating_sub(2).max(2))
    }

    /// Wallet the signing key controls, when a key is configured.
    pub fn signer_wallet(&self) -> Option<String> {
        self.signing_key
            .as_ref()
            .map(|k| wallet_address(k.verifying_key()))
    }
}

fn port_from_host(host: &str) -> Option<u16> {
    let rest = host.split("://").nth(1).unwrap_or(host);
    let authority = rest.split('/').next()?;
    authority.rsplit_once(':')?.1.parse().ok()
}

fn parse_private_key(hex_key: &str) -> Result<SigningKey, AppError> {
    let raw = hex::decode(hex_key.trim().trim_start_matches("0x"))
        .map_err(|e| AppError::Validation(format!("CHORUS_PRIVATE_KEY is not hex: {e}")))?;
    SigningKey::from_slice(&raw)
        .map_err(|e| AppError::Validation(format!("CHORUS_PRIVATE_KEY invalid: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_parses_from_host_url() {
        assert_eq!(port_from_host("http://node1.example.com:3001"), Some(3001));
        assert_eq!(port_from_host("https://node1.example.com"), None);
        assert_eq!(port_from_host("http://127.0.0.1:8080/x"), Some(8080));
    }

    #[test]
    fn env_scheme_follows_environment() {
        assert_eq!(Env::parse("prod").scheme(), "https");
        assert_eq!(Env::parse("stage").scheme(), "https");
        assert_eq!(Env::parse("dev").scheme(), "http");
        assert_eq!(Env::parse("anything-else").scheme(), "http");
    }

    #[test]
    fn api_path_joins_segments() {
        let peer = Peer {
            host: "https://node1.example.com/".into(),
            wallet: "0xabc".into(),
        };
        assert_eq!(
            peer.api_path(&["internal", "blobs", "xyz"]),
            "https://node1.example.com/internal/blobs/xyz"
        );
    }

    #[test]
    fn private_key_roundtrip() {
        let key = SigningKey::from_slice(&[7u8; 32]).unwrap();
        let hex_key = hex::encode(key.to_bytes());
        let parsed = parse_private_key(&hex_key).unwrap();
        assert_eq!(parsed.to_bytes(), key.to_bytes());
        assert!(parse_private_key("not-hex").is_err());
    }
}
