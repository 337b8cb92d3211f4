#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ffmpeg::util::frame::video::Video;
use ffmpeg_next::{self as ffmpeg, codec, encoder, format, Dictionary, Packet, Rational};
use image::RgbImage;
use vidnarrate::{Captioner, TextGenerator};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// Encodes a gray clip whose brightness steps up every frame.
pub fn write_test_video(path: &Path, seconds: u32, fps: i32) -> anyhow::Result<()> {
    vidnarrate::capture::init()?;

    let mut output = format::output(&path)?;
    let global_header = output
        .format()
        .flags()
        .contains(format::Flags::GLOBAL_HEADER);
    let codec = encoder::find(codec::Id::MPEG4)
        .ok_or(anyhow::anyhow!(ffmpeg::Error::EncoderNotFound))?;
    let encoder_time_base = Rational(1, fps);

    let mut output_stream = output.add_stream(codec)?;
    let mut encoder = codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()?;
    encoder.set_width(WIDTH);
    encoder.set_height(HEIGHT);
    encoder.set_format(format::Pixel::YUV420P);
    encoder.set_time_base(encoder_time_base);
    encoder.set_frame_rate(Some(Rational(fps, 1)));
    if global_header {
        encoder.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    let mut encoder = encoder.open_with(Dictionary::new())?;
    output_stream.set_parameters(&encoder);
    output_stream.set_time_base(encoder_time_base);

    output.write_header()?;
    let stream_time_base = output
        .stream(0)
        .ok_or(anyhow::anyhow!(ffmpeg::Error::StreamNotFound))?
        .time_base();

    let total = i64::from(seconds) * i64::from(fps);
    for index in 0..total {
        let mut frame = Video::new(format::Pixel::YUV420P, WIDTH, HEIGHT);
        let luma = (32 + index * 3 % 192) as u8;
        frame.data_mut(0).fill(luma);
        frame.data_mut(1).fill(128);
        frame.data_mut(2).fill(128);
        frame.set_pts(Some(index));
        encoder.send_frame(&frame)?;
        write_packets(&mut encoder, &mut output, encoder_time_base, stream_time_base)?;
    }
    encoder.send_eof()?;
    write_packets(&mut encoder, &mut output, encoder_time_base, stream_time_base)?;
    output.write_trailer()?;
    Ok(())
}

fn write_packets(
    encoder: &mut encoder::Video,
    output: &mut format::context::Output,
    encoder_time_base: Rational,
    stream_time_base: Rational,
) -> anyhow::Result<()> {
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(0);
        packet.rescale_ts(encoder_time_base, stream_time_base);
        packet.write_interleaved(output)?;
    }
    Ok(())
}

/// Parses `MM:SS.mmm` back into seconds.
pub fn parse_timestamp(timestamp: &str) -> f64 {
    let (minutes, seconds) = timestamp.split_once(':').expect("missing colon");
    assert_eq!(minutes.len(), 2, "minutes not zero padded: {timestamp}");
    let (whole, millis) = seconds.split_once('.').expect("missing millis");
    assert_eq!(whole.len(), 2, "seconds not zero padded: {timestamp}");
    assert_eq!(millis.len(), 3, "millis not zero padded: {timestamp}");
    minutes.parse::<f64>().unwrap() * 60.0 + seconds.parse::<f64>().unwrap()
}

/// Captions every frame with its size and call index; fails on `fail_on`.
#[derive(Default)]
pub struct CountingCaptioner {
    pub calls: AtomicUsize,
    pub fail_on: Option<usize>,
}

#[async_trait]
impl Captioner for CountingCaptioner {
    fn model(&self) -> &str {
        "counting"
    }

    async fn caption(&self, image: &RgbImage) -> anyhow::Result<String> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(index) {
            anyhow::bail!("simulated inference failure");
        }
        Ok(format!(
            "frame {index}: {}x{} gray card",
            image.width(),
            image.height()
        ))
    }
}

pub struct CannedGenerator {
    pub reply: Result<String, String>,
    pub calls: AtomicUsize,
}

impl CannedGenerator {
    pub fn ok(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_owned()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            reply: Err(reason.to_owned()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    fn model(&self) -> &str {
        "canned"
    }

    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().map_err(anyhow::Error::msg)
    }
}
