//! ffmpeg audio encoding.
//!
//! The full derivative is a 320 kbit/s CBR mp3 at 48 kHz; previews are cut
//! from that derivative, not the original. Progress is parsed from the
//! encoder's `-progress` stream on stderr and reported whenever it advances
//! by at least ten percentage points.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

use chorus_core::models::AUDIO_PREVIEW_SECONDS;

use crate::TranscodeError;

/// Minimum progress advance before a report is emitted.
const PROGRESS_STEP: f64 = 0.1;

/// Tags stamped into every derivative. The upload id tag makes identical
/// source bytes re-uploaded by the same artist yield a distinct CID, so a
/// prior delisting of the old CID does not block the new upload.
fn metadata_args(orig_filename: &str, upload_id: &str) -> Vec<String> {
    vec![
        "-metadata".into(),
        format!("fileName=\"{orig_filename}\""),
        "-metadata".into(),
        format!("uuid=\"{upload_id}\""),
    ]
}

/// Encode the full 320 kbit/s derivative.
pub async fn encode_full(
    src: &Path,
    dest: &Path,
    orig_filename: &str,
    upload_id: &str,
    duration_secs: Option<f64>,
    progress: Option<UnboundedSender<f64>>,
) -> Result<(), TranscodeError> {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y")
        .arg("-i")
        .arg(src)
        .args(["-b:a", "320k"])
        .args(["-ar", "48000"])
        .args(["-f", "mp3"])
        .args(["-c:a", "libmp3lame"])
        .args(metadata_args(orig_filename, upload_id))
        .arg("-vn")
        .args(["-threads", "2"])
        .args(["-progress", "pipe:2"])
        .arg(dest);
    run_encoder(cmd, duration_secs, progress).await
}

/// Encode a 30-second preview starting at `start_seconds`, reading from the
/// already-produced 320 derivative.
pub async fn encode_preview(
    src_320: &Path,
    dest: &Path,
    start_seconds: u32,
    orig_filename: &str,
    upload_id: &str,
    progress: Option<UnboundedSender<f64>>,
) -> Result<(), TranscodeError> {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y")
        .arg("-i")
        .arg(src_320)
        .args(["-ss", &start_seconds.to_string()])
        .args(["-t", &AUDIO_PREVIEW_SECONDS.to_string()])
        .args(["-b:a", "320k"])
        .args(["-ar", "48000"])
        .args(["-f", "mp3"])
        .args(metadata_args(orig_filename, upload_id))
        .arg("-vn")
        .args(["-progress", "pipe:2"])
        .arg(dest);
    run_encoder(cmd, Some(AUDIO_PREVIEW_SECONDS as f64), progress).await
}

async fn run_encoder(
    mut cmd: Command,
    duration_secs: Option<f64>,
    progress: Option<UnboundedSender<f64>>,
) -> Result<(), TranscodeError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .map_err(|e| TranscodeError::Encoder(format!("failed to spawn ffmpeg: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TranscodeError::Encoder("no stdout pipe".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TranscodeError::Encoder("no stderr pipe".into()))?;

    let stdout_task = tokio::spawn(collect_lines(stdout));
    let duration_us = duration_secs.map(|d| d * 1_000_000.0).filter(|d| *d > 0.0);
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut collected = String::new();
        let mut last_reported = 0.0f64;
        while let Ok(Some(line)) = lines.next_line().await {
            if let (Some(duration_us), Some(tx)) = (duration_us, progress.as_ref()) {
                if let Some(us) = parse_out_time_us(&line) {
                    let fraction = (us / duration_us).min(1.0);
                    if fraction - last_reported > PROGRESS_STEP {
                        last_reported = fraction;
                        let _ = tx.send(fraction);
                    }
                }
            }
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    });

    let status = child
        .wait()
        .await
        .map_err(|e| TranscodeError::Encoder(format!("ffmpeg wait: {e}")))?;

    let stdout_buf = stdout_task.await.unwrap_or_default();
    let stderr_buf = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(TranscodeError::Encoder(format!(
            "ffmpeg exited with {status}\nstdout={stdout_buf}\nstderr={stderr_buf}"
        )));
    }
    Ok(())
}

async fn collect_lines<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut collected = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}

fn parse_out_time_us(line: &str) -> Option<f64> {
    line.strip_prefix("out_time_us=")?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_time_parsing() {
        assert_eq!(parse_out_time_us("out_time_us=1500000"), Some(1_500_000.0));
        assert_eq!(parse_out_time_us("out_time_ms=1500"), None);
        assert_eq!(parse_out_time_us("bitrate= 320.0kbits/s"), None);
        assert_eq!(parse_out_time_us("out_time_us=garbage"), None);
    }

    #[tokio::test]
    async fn progress_reports_step_by_at_least_ten_points() {
        // Feed a synthetic progress stream through the same gating logic the
        // encoder uses.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let duration_us = 10_000_000.0; // 10s
        let mut last = 0.0f64;
        for us in (0..=10_000_000).step_by(500_000) {
            let fraction = (us as f64 / duration_us).min(1.0);
            if fraction - last > PROGRESS_STEP {
                last = fraction;
                tx.send(fraction).unwrap();
            }
        }
        drop(tx);
        let mut reports = Vec::new();
        while let Some(p) = rx.recv().await {
            reports.push(p);
        }
        assert!(!reports.is_empty());
        for pair in reports.windows(2) {
            assert!(pair[1] - pair[0] > PROGRESS_STEP);
        }
        assert!(reports.iter().all(|p| *p <= 1.0));
    }

    #[test]
    fn metadata_tags_carry_filename_and_id() {
        let args = metadata_args("song.wav", "0192abc");
        assert!(args.contains(&"fileName=\"song.wav\"".to_string()));
        assert!(args.contains(&"uuid=\"0192abc\"".to_string()));
    }
}
