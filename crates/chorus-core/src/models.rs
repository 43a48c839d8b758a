//! Domain models: holdings rows, upload jobs, probe metadata, peer health.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Variant key of the full 320 kbit/s audio derivative.
pub const VARIANT_AUDIO_320: &str = "320";

/// Prefix of audio preview variant keys: `320_preview|<seconds>`.
pub const VARIANT_AUDIO_PREVIEW_PREFIX: &str = "320_preview";

/// Duration of audio previews in seconds.
pub const AUDIO_PREVIEW_SECONDS: u32 = 30;

/// Build the preview variant key for a start offset.
pub fn preview_variant(start_seconds: u32) -> String {
    format!("{VARIANT_AUDIO_PREVIEW_PREFIX}|{start_seconds}")
}

/// Parse the start offset out of a preview variant key.
pub fn preview_start_seconds(variant: &str) -> Option<u32> {
    let (prefix, seconds) = variant.split_once('|')?;
    if prefix != VARIANT_AUDIO_PREVIEW_PREFIX {
        return None;
    }
    seconds.parse().ok()
}

/// One confirmed local holding. Composite key (host, key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Blob {
    pub host: String,
    pub key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTemplate {
    Audio,
    ImgSquare,
    ImgBackdrop,
}

impl JobTemplate {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(JobTemplate::Audio),
            "img_square" => Some(JobTemplate::ImgSquare),
            "img_backdrop" => Some(JobTemplate::ImgBackdrop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobTemplate::Audio => "audio",
            JobTemplate::ImgSquare => "img_square",
            JobTemplate::ImgBackdrop => "img_backdrop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    New,
    Busy,
    Done,
    Error,
    Retranscode,
    BusyRetranscode,
    ErrorRetranscode,
}

impl JobStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(JobStatus::New),
            "busy" => Some(JobStatus::Busy),
            "done" => Some(JobStatus::Done),
            "error" => Some(JobStatus::Error),
            "retranscode" => Some(JobStatus::Retranscode),
            "busy_retranscode" => Some(JobStatus::BusyRetranscode),
            "error_retranscode" => Some(JobStatus::ErrorRetranscode),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Busy => "busy",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Retranscode => "retranscode",
            JobStatus::BusyRetranscode => "busy_retranscode",
            JobStatus::ErrorRetranscode => "error_retranscode",
        }
    }

    /// Whether this status belongs to the retranscode (preview) arm of the
    /// state machine.
    pub fn is_retranscode(&self) -> bool {
        matches!(
            self,
            JobStatus::Retranscode | JobStatus::BusyRetranscode | JobStatus::ErrorRetranscode
        )
    }

    /// The in-progress status a worker moves this job into.
    pub fn busy_form(&self) -> JobStatus {
        if self.is_retranscode() {
            JobStatus::BusyRetranscode
        } else {
            JobStatus::Busy
        }
    }

    /// The error status for a failure observed while in this status.
    pub fn error_form(&self) -> JobStatus {
        if self.is_retranscode() {
            JobStatus::ErrorRetranscode
        } else {
            JobStatus::Error
        }
    }

    /// Crash-recovery mapping applied at worker start for rows this host
    /// left in progress.
    pub fn reset_form(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Busy => Some(JobStatus::New),
            JobStatus::BusyRetranscode => Some(JobStatus::Retranscode),
            _ => None,
        }
    }
}

/// Container metadata extracted by ffprobe at ingest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfprobeInfo {
    pub format_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

/// A client submission and its transcode lifecycle. Rows are created by the
/// upload orchestrator and mutated only by transcode workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: String,
    pub user_wallet: Option<String>,
    pub template: JobTemplate,
    pub orig_filename: String,
    pub orig_file_cid: String,
    pub selected_preview: Option<String>,
    pub ffprobe: Option<FfprobeInfo>,
    pub mirrors: Vec<String>,
    pub transcoded_mirrors: Vec<String>,
    pub transcode_results: HashMap<String, String>,
    pub status: JobStatus,
    pub error: String,
    pub error_count: i32,
    pub transcode_progress: f64,
    pub created_by: String,
    pub transcoded_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transcoded_at: Option<DateTime<Utc>>,
    pub placement_hosts: Option<Vec<String>>,
}

impl Upload {
    /// The CID a worker must read to process this job: the original, or the
    /// 320 derivative when re-transcoding a preview.
    pub fn source_cid(&self) -> Option<&str> {
        if self.status.is_retranscode() {
            self.transcode_results
                .get(VARIANT_AUDIO_320)
                .map(String::as_str)
        } else {
            Some(self.orig_file_cid.as_str())
        }
    }
}

/// Last observed health of one peer, maintained by the health poller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerHealth {
    pub last_reachable: Option<DateTime<Utc>>,
    pub last_healthy: Option<DateTime<Utc>>,
    /// What that peer reports about its own reachability of others.
    #[serde(default)]
    pub reachable_peers: HashMap<String, DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_variant_roundtrip() {
        assert_eq!(preview_variant(10), "320_preview|10");
        assert_eq!(preview_start_seconds("320_preview|10"), Some(10));
        assert_eq!(preview_start_seconds("320"), None);
        assert_eq!(preview_start_seconds("640x.jpg"), None);
        assert_eq!(preview_start_seconds("320_preview|ten"), None);
    }

    #[test]
    fn status_arms() {
        assert!(!JobStatus::New.is_retranscode());
        assert!(JobStatus::Retranscode.is_retranscode());
        assert_eq!(JobStatus::New.busy_form(), JobStatus::Busy);
        assert_eq!(JobStatus::Retranscode.busy_form(), JobStatus::BusyRetranscode);
        assert_eq!(JobStatus::Busy.error_form(), JobStatus::Error);
        assert_eq!(
            JobStatus::BusyRetranscode.error_form(),
            JobStatus::ErrorRetranscode
        );
    }

    #[test]
    fn crash_reset_mapping() {
        assert_eq!(JobStatus::Busy.reset_form(), Some(JobStatus::New));
        assert_eq!(
            JobStatus::BusyRetranscode.reset_form(),
            Some(JobStatus::Retranscode)
        );
        assert_eq!(JobStatus::Done.reset_form(), None);
        assert_eq!(JobStatus::Error.reset_form(), None);
    }

    #[test]
    fn template_parse() {
        assert_eq!(JobTemplate::parse("audio"), Some(JobTemplate::Audio));
        assert_eq!(JobTemplate::parse("img_square"), Some(JobTemplate::ImgSquare));
        assert_eq!(JobTemplate::parse("img_backdrop"), Some(JobTemplate::ImgBackdrop));
        assert_eq!(JobTemplate::parse("video"), None);
    }

    #[test]
    fn source_cid_depends_on_status_arm() {
        let mut upload = Upload {
            id: "0".into(),
            user_wallet: None,
            template: JobTemplate::Audio,
            orig_filename: "song.wav".into(),
            orig_file_cid: "bafyorig".into(),
            selected_preview: Some(preview_variant(5)),
            ffprobe: None,
            mirrors: vec![],
            transcoded_mirrors: vec![],
            transcode_results: HashMap::from([("320".to_string(), "bafy320".to_string())]),
            status: JobStatus::New,
            error: String::new(),
            error_count: 0,
            transcode_progress: 0.0,
            created_by: String::new(),
            transcoded_by: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            transcoded_at: None,
            placement_hosts: None,
        };
        assert_eq!(upload.source_cid(), Some("bafyorig"));
        upload.status = JobStatus::Retranscode;
        assert_eq!(upload.source_cid(), Some("bafy320"));
    }
}
