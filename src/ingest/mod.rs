//! Video ingestion.
//!
//! This module provides:
//! - `FileSource`: local video files (feature: ingest-ffmpeg) and synthetic
//!   `stub://` sources for tests and UI work
//! - `VideoTrimmer`: physical re-trim of a source to a time window
//!
//! Sources are local-only. Frames carry native-resolution pixels and the
//! container timestamp; nothing in this layer rescales coordinates.

pub mod file;
#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod trim;

pub use file::{FileConfig, FileSource, FileStats, SyntheticSpec, VideoInfo};
pub use trim::{needs_trim, FfmpegCliTrimmer, VideoTrimmer, TRIM_TOLERANCE_S};
