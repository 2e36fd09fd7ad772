//! Image-to-scene compositing pipeline.

mod background;
mod config;
mod orchestrator;
mod run;
mod scene;
mod video;

pub use background::remove_background;
pub use config::Config;
pub use orchestrator::{Capabilities, Orchestrator, Stage};
pub use run::{init_run_dir, RunArtifacts, RunId, CANVAS_FILE, MASK_FILE, NO_BACKGROUND_SUFFIX};
pub use scene::{
    build_inpainting_pipeline, generate_scene, truncated_dimensions, SceneOptions, SceneRequest,
    SCENE_FILE,
};
pub use video::{
    build_video_pipeline, build_video_pipeline_with, generate_video, render_frames,
    VideoModelSettings, VideoOptions, DECODE_CHUNK_SIZE, FRAME_HEIGHT, FRAME_WIDTH, VIDEO_FILE,
    VIDEO_FPS, VIDEO_SEED,
};
