//! Responder media: loops an IVF file onto the shared outbound track.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::HarnessError;

/// Pause before retrying after a failed pass.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Fail fast at startup if the file is not there.
pub async fn check_media_file(path: &Path) -> Result<(), HarnessError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(media_error(path, "not a regular file")),
        Err(e) => Err(media_error(path, e)),
    }
}

/// Stream the file to every attached session, forever, restarting at EOF.
pub async fn play_forever(track: Arc<TrackLocalStaticSample>, path: PathBuf) {
    loop {
        match play_once(&track, &path).await {
            Ok(frames) => debug!(frames, "media pass complete, rewinding"),
            Err(e) => {
                warn!(error = %e, "media pass failed");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// One pass over the file at the header's frame rate. Returns frames sent.
pub async fn play_once(track: &TrackLocalStaticSample, path: &Path) -> Result<u64, HarnessError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| media_error(path, e))?;
    let (mut ivf, header) = IVFReader::new(Cursor::new(bytes)).map_err(|e| media_error(path, e))?;
    let frame_every = frame_interval(header.timebase_numerator, header.timebase_denominator)
        .ok_or_else(|| media_error(path, "zero timebase"))?;

    let mut ticker = tokio::time::interval(frame_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut frames = 0u64;
    loop {
        ticker.tick().await;
        let frame = match ivf.parse_next_frame() {
            Ok((frame, _)) => frame,
            Err(e) if frames > 0 && is_end_of_stream(&e) => {
                debug!(error = %e, "ivf stream ended");
                return Ok(frames);
            }
            Err(e) => return Err(media_error(path, e)),
        };

        track
            .write_sample(&Sample {
                data: frame.freeze(),
                duration: frame_every,
                ..Default::default()
            })
            .await
            .map_err(|e| media_error(path, e))?;
        frames += 1;
    }
}

/// True when the reader ran out of bytes: a clean EOF, or a trailing frame
/// cut short. Any other parse failure means the file is corrupt.
fn is_end_of_stream(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut cause = Some(err);
    while let Some(e) = cause {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return io.kind() == std::io::ErrorKind::UnexpectedEof;
        }
        cause = e.source();
    }
    false
}

/// Frame period from an IVF timebase (seconds per tick).
pub fn frame_interval(numerator: u32, denominator: u32) -> Option<Duration> {
    if numerator == 0 || denominator == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(numerator as f64 / denominator as f64))
}

fn media_error(path: &Path, reason: impl std::fmt::Display) -> HarnessError {
    HarnessError::Media {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
