//! MP4 output through the system `ffmpeg` binary.

use std::io::Write as _;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};

use image::RgbImage;

use crate::capability::{ensure_same_size, FrameSink};
use crate::error::{Error, Result};

/// `true` if `ffmpeg -version` runs successfully.
#[must_use]
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Validate output geometry for H.264 in a yuv420p MP4.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] for zero or odd sizes, or a zero frame rate.
pub fn validate_output(width: u32, height: u32, fps: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::invalid_parameter("size", "video width/height must be non-zero"));
    }
    if fps == 0 {
        return Err(Error::invalid_parameter("fps", "video fps must be non-zero"));
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(Error::invalid_parameter(
            "size",
            "video width/height must be even (required for yuv420p mp4 output)",
        ));
    }
    Ok(())
}

struct Running {
    width: u32,
    height: u32,
    child: Child,
    stdin: Option<ChildStdin>,
}

/// [`FrameSink`] that pipes raw RGB frames into `ffmpeg` and writes H.264 MP4.
#[derive(Default)]
pub struct FfmpegEncoder {
    running: Option<Running>,
}

impl FfmpegEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSink for FfmpegEncoder {
    fn begin(&mut self, path: &Path, width: u32, height: u32, fps: u32) -> Result<()> {
        validate_output(width, height, fps)?;
        if self.running.is_some() {
            return Err(encoding("an encode is already in progress"));
        }
        if !is_ffmpeg_on_path() {
            return Err(encoding(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .args([
                "-y",
                "-loglevel",
                "error",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                &format!("{width}x{height}"),
                "-r",
                &fps.to_string(),
                "-i",
                "pipe:0",
                "-an",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
            ])
            .arg(path);

        let mut child = cmd
            .spawn()
            .map_err(|e| encoding(format!("failed to spawn ffmpeg: {e}")))?;
        let stdin = child.stdin.take();
        if stdin.is_none() {
            let _ = child.kill();
            return Err(encoding("failed to open ffmpeg stdin"));
        }

        tracing::debug!("Encoding {width}x{height}@{fps} to {}", path.display());
        self.running = Some(Running {
            width,
            height,
            child,
            stdin,
        });
        Ok(())
    }

    fn push(&mut self, frame: &RgbImage) -> Result<()> {
        let Some(running) = self.running.as_mut() else {
            return Err(encoding("no encode in progress"));
        };
        ensure_same_size((running.width, running.height), frame.dimensions())?;

        let Some(stdin) = running.stdin.as_mut() else {
            return Err(encoding("ffmpeg encoder is already finalized"));
        };
        if let Err(e) = stdin.write_all(frame.as_raw()) {
            // ffmpeg is gone or wedged; nothing more can be written to this encode.
            self.abort();
            return Err(encoding(format!("failed to write frame to ffmpeg stdin: {e}")));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut running) = self.running.take() else {
            return Err(encoding("no encode in progress"));
        };
        drop(running.stdin.take());

        let output = running
            .child
            .wait_with_output()
            .map_err(|e| encoding(format!("failed to wait for ffmpeg to finish: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(encoding(format!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(mut running) = self.running.take() {
            tracing::debug!("Aborting ffmpeg encode");
            drop(running.stdin.take());
            let _ = running.child.kill();
            let _ = running.child.wait();
        }
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.abort();
    }
}

fn encoding(message: impl Into<String>) -> Error {
    Error::VideoGeneration {
        message: message.into(),
    }
}
