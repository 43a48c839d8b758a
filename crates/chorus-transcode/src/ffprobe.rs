//! Container probing via ffprobe.

use std::path::Path;

use chorus_core::models::FfprobeInfo;
use serde::Deserialize;
use tokio::process::Command;

use crate::TranscodeError;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    size: Option<String>,
}

/// Probe a media file. Errors when ffprobe exits non-zero or emits
/// unparseable JSON, which the ingest path treats as "not valid audio".
pub async fn probe(path: &Path) -> Result<FfprobeInfo, TranscodeError> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_format"])
        .arg(path)
        .output()
        .await
        .map_err(|e| TranscodeError::Probe(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TranscodeError::Probe(stderr.trim().to_string()));
    }

    let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| TranscodeError::Probe(format!("unparseable ffprobe output: {e}")))?;

    let format = parsed
        .format
        .ok_or_else(|| TranscodeError::Probe("no format section".into()))?;

    Ok(FfprobeInfo {
        format_name: format.format_name.unwrap_or_default(),
        duration: format.duration.as_deref().and_then(|d| d.parse().ok()),
        bit_rate: format.bit_rate.as_deref().and_then(|b| b.parse().ok()),
        size: format.size.as_deref().and_then(|s| s.parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_json_parses_numeric_strings() {
        let raw = r#"{"format":{"format_name":"wav","duration":"5.000000","size":"882044","bit_rate":"1411288"}}"#;
        let parsed: ProbeOutput = serde_json::from_str(raw).unwrap();
        let format = parsed.format.unwrap();
        assert_eq!(format.format_name.as_deref(), Some("wav"));
        assert_eq!(format.duration.as_deref(), Some("5.000000"));
        let info = FfprobeInfo {
            format_name: format.format_name.unwrap_or_default(),
            duration: format.duration.as_deref().and_then(|d| d.parse().ok()),
            bit_rate: format.bit_rate.as_deref().and_then(|b| b.parse().ok()),
            size: format.size.as_deref().and_then(|s| s.parse().ok()),
        };
        assert_eq!(info.duration, Some(5.0));
        assert_eq!(info.bit_rate, Some(1_411_288));
    }

    #[test]
    fn probe_json_tolerates_missing_fields() {
        let raw = r#"{"format":{"format_name":"mp3"}}"#;
        let parsed: ProbeOutput = serde_json::from_str(raw).unwrap();
        assert!(parsed.format.unwrap().duration.is_none());
    }
}
