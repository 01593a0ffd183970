//! RTSP frame source using FFmpeg.
//!
//! The stream is opened with TCP transport forced. The connect attempt is
//! bounded by the connect timeout and each read by the read timeout, when one
//! is set. Decoded frames are scaled to RGB24 in-memory.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::{FrameSource, StreamOptions};
use crate::frame::Frame;

pub(crate) struct FfmpegRtspSource {
    url: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
}

impl FfmpegRtspSource {
    pub(crate) fn open(url: &str, options: &StreamOptions) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;

        let mut dict = ffmpeg::Dictionary::new();
        for (key, value) in super::rtsp::ffmpeg_options(options) {
            dict.set(key, &value);
        }

        let location = super::rtsp::strip_transport_hints(url)?;
        let input = ffmpeg::format::input_with_dictionary(&location, dict)
            .with_context(|| format!("failed to open stream '{location}' with ffmpeg"))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("stream has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
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

        log::info!("RtspOpener: connected to {location} (ffmpeg)");
        Ok(Self {
            url: location,
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
        })
    }
}

impl FrameSource for FfmpegRtspSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb_frame = ffmpeg::frame::Video::empty();

        loop {
            // Read errors (timeouts, dropped connections) must end the stream.
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(err) => {
                    return Err(err).with_context(|| format!("read packet from {}", self.url))
                }
            }
            if packet.stream() != self.stream_index {
                continue;
            }

            self.decoder
                .send_packet(&packet)
                .with_context(|| format!("decode packet from {}", self.url))?;

            if self.decoder.receive_frame(&mut decoded).is_ok() {
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
                self.frame_count += 1;
                let frame = Frame::from_rgb(width, height, pixels, self.frame_count)
                    .context("decoded frame size mismatch")?;
                return Ok(Some(frame));
            }
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

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
