//! Local file frame source using FFmpeg.
//!
//! Frames are decoded in-memory, converted to RGB24 at native resolution and
//! stamped with their presentation timestamp in seconds.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::file::{effective_fps, FileConfig, FileStats, VideoInfo};
use crate::frame::Frame;

const AV_TIME_BASE: f64 = 1_000_000.0;

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: f64,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    info: VideoInfo,
    /// Frames earlier than this are dropped after a keyframe seek.
    skip_until_s: f64,
    eof_sent: bool,
    frames_decoded: u64,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: FileConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", config.path))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", config.path))?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());
        let fps = effective_fps(f64::from(stream.avg_frame_rate()));
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let duration_s = if input.duration() > 0 {
            input.duration() as f64 / AV_TIME_BASE
        } else {
            stream.frames().max(0) as f64 / fps
        };
        let info = VideoInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            duration_s,
        };
        log::info!(
            "FileSource: opened {} (ffmpeg) {}x{} @ {:.3} fps, {:.2}s",
            config.path,
            info.width,
            info.height,
            info.fps,
            info.duration_s
        );

        Ok(Self {
            config,
            input,
            stream_index,
            time_base,
            decoder,
            scaler,
            info,
            skip_until_s: 0.0,
            eof_sent: false,
            frames_decoded: 0,
        })
    }

    pub(crate) fn info(&self) -> VideoInfo {
        self.info.clone()
    }

    pub(crate) fn seek(&mut self, start_s: f64) -> Result<()> {
        if !start_s.is_finite() || start_s < 0.0 {
            return Err(anyhow!("seek target must be a non-negative time"));
        }
        let target = (start_s * AV_TIME_BASE) as i64;
        self.input
            .seek(target, ..target)
            .with_context(|| format!("seek to {start_s:.3}s"))?;
        self.decoder.flush();
        self.skip_until_s = start_s - 0.5 / self.info.fps;
        self.eof_sent = false;
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let timestamp_s = match decoded.timestamp() {
                    Some(pts) => pts as f64 * self.time_base,
                    None => self.frames_decoded as f64 / self.info.fps,
                };
                if timestamp_s < self.skip_until_s {
                    continue;
                }
                return self.convert(&decoded, timestamp_s).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }
            if !self.feed_packet()? {
                self.decoder.send_eof().context("flush ffmpeg decoder")?;
                self.eof_sent = true;
            }
        }
    }

    /// Send the next packet of the video stream. Returns false at end of file.
    fn feed_packet(&mut self) -> Result<bool> {
        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            return Ok(true);
        }
        Ok(false)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video, timestamp_s: f64) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let index = self.frames_decoded;
        self.frames_decoded += 1;
        Ok(Frame::new(pixels, width, height, timestamp_s, index))
    }

    pub(crate) fn stats(&self) -> FileStats {
        FileStats {
            frames_decoded: self.frames_decoded,
            path: self.config.path.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its geometry")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
