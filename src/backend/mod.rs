//! ONNX Runtime implementations of the model capabilities.

mod ffmpeg;
mod inpaint;
pub mod mock;
mod scheduler;
mod segment;
mod tensor;
mod text;
mod vae;
mod video;

pub use ffmpeg::{is_ffmpeg_on_path, FfmpegEncoder};
pub use inpaint::OnnxInpainter;
pub use scheduler::{DdimScheduler, EulerScheduler};
pub use segment::OnnxSegmenter;
pub use video::OnnxVideoModel;

/// Progress bar for a denoising loop of `len` steps.
fn denoise_progress(len: usize, label: &str) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new(len as u64);
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template(&format!("{{spinner:.green}} {label} [{{bar:40.cyan/blue}}] {{pos}}/{{len}}"))
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb
}
