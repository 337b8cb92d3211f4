use std::path::Path;
use std::sync::OnceLock;

use ffmpeg::util::frame::video::Video;
use ffmpeg::{codec, decoder, format, media, software, Packet};
use ffmpeg_next::{self as ffmpeg};
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::config::SamplingConfig;
use crate::error::PipelineError;

/// Frame rate assumed when the container reports none.
pub const FALLBACK_FRAME_RATE: f64 = 25.0;

static INIT: OnceLock<Result<(), ffmpeg::Error>> = OnceLock::new();

pub fn init() -> Result<(), ffmpeg::Error> {
    INIT.get_or_init(|| {
        ffmpeg::init()?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        Ok(())
    })
    .clone()
}

/// A decoded frame picked by the sampler.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// Presentation time in seconds from the start of the stream.
    pub timestamp: f64,
    pub image: RgbImage,
}

/// Fixed-interval admission of frames by timestamp.
#[derive(Debug, Clone)]
pub struct IntervalGate {
    interval: f64,
    max_frames: usize,
    next_target: f64,
    emitted: usize,
}

impl IntervalGate {
    pub fn new(config: &SamplingConfig) -> Self {
        Self {
            interval: config.frame_interval,
            max_frames: config.max_frames,
            next_target: 0.0,
            emitted: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.emitted >= self.max_frames
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Returns whether a frame at `seconds` should be emitted, advancing the
    /// cursor when it is.
    pub fn admit(&mut self, seconds: f64) -> bool {
        if self.is_full() || seconds < self.next_target {
            return false;
        }
        self.emitted += 1;
        // Jump past every slot the stream skipped so a gap doesn't release a burst.
        let next = ((seconds / self.interval).floor() + 1.0) * self.interval;
        self.next_target = if next > seconds {
            next
        } else {
            seconds + self.interval
        };
        true
    }
}

/// Frame rate used for frames without a timestamp.
fn effective_frame_rate(path: &Path, reported: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        return reported;
    }
    warn!(
        path = %path.display(),
        fallback = FALLBACK_FRAME_RATE,
        "container reports no frame rate, falling back"
    );
    FALLBACK_FRAME_RATE
}

/// Maps decoder timestamps onto seconds from the start of the stream.
#[derive(Debug, Clone, Copy)]
struct Timeline {
    time_base: f64,
    start_pts: i64,
    frame_rate: f64,
}

impl Timeline {
    /// Uses the presentation timestamp when there is one, otherwise the
    /// frame's decode index at the nominal frame rate.
    fn seconds(&self, pts: Option<i64>, decoded_index: u64) -> f64 {
        match pts {
            Some(ts) if self.time_base > 0.0 => {
                ((ts - self.start_pts) as f64 * self.time_base).max(0.0)
            }
            _ => decoded_index as f64 / self.frame_rate,
        }
    }
}

/// Lazily decodes a video and yields one RGB frame per sampling interval.
///
/// The sequence is finite and cannot be restarted; once it returns `None`
/// (or an error) the sampler is spent.
pub struct FrameSampler {
    input: format::context::Input,
    decoder: decoder::Video,
    scaler: Option<software::scaling::Context>,
    stream_index: usize,
    timeline: Timeline,
    gate: IntervalGate,
    decoded: u64,
    eof_sent: bool,
    exhausted: bool,
}

impl FrameSampler {
    pub fn open(path: &Path, config: &SamplingConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        init().map_err(|err| PipelineError::source_unavailable(path, err))?;

        let input =
            format::input(&path).map_err(|err| PipelineError::source_unavailable(path, err))?;

        let (stream_index, time_base, start_pts, avg_frame_rate, decoder) = {
            let video_stream = input
                .streams()
                .best(media::Type::Video)
                .ok_or_else(|| PipelineError::source_unavailable(path, "no video stream found"))?;
            let decoder = codec::context::Context::from_parameters(video_stream.parameters())
                .and_then(|context| context.decoder().video())
                .map_err(|err| PipelineError::source_unavailable(path, err))?;
            let start_time = video_stream.start_time();
            (
                video_stream.index(),
                f64::from(video_stream.time_base()),
                if start_time == ffmpeg::ffi::AV_NOPTS_VALUE {
                    0
                } else {
                    start_time
                },
                f64::from(video_stream.avg_frame_rate()),
                decoder,
            )
        };

        let frame_rate = effective_frame_rate(path, avg_frame_rate);

        info!(
            path = %path.display(),
            width = decoder.width(),
            height = decoder.height(),
            fps = frame_rate,
            interval = config.frame_interval,
            max_frames = config.max_frames,
            "opened video"
        );

        Ok(Self {
            input,
            decoder,
            scaler: None,
            stream_index,
            timeline: Timeline {
                time_base: if time_base.is_finite() { time_base } else { 0.0 },
                start_pts,
                frame_rate,
            },
            gate: IntervalGate::new(config),
            decoded: 0,
            eof_sent: false,
            exhausted: false,
        })
    }

    pub fn frame_rate(&self) -> f64 {
        self.timeline.frame_rate
    }

    pub fn emitted(&self) -> usize {
        self.gate.emitted()
    }

    /// Sends the next packet of the video stream to the decoder, or EOF when
    /// the demuxer has nothing left.
    fn feed_decoder(&mut self) -> Result<(), PipelineError> {
        let mut packet = Packet::empty();
        loop {
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == self.stream_index => {
                    if let Err(err) = self.decoder.send_packet(&packet) {
                        warn!(%err, "skipping undecodable packet");
                        continue;
                    }
                    return Ok(());
                }
                Ok(()) => continue,
                Err(err) => {
                    if err != ffmpeg::Error::Eof {
                        warn!(%err, "demuxer error, treating as end of input");
                    }
                    self.decoder
                        .send_eof()
                        .map_err(|err| PipelineError::Decode(err.to_string()))?;
                    self.eof_sent = true;
                    return Ok(());
                }
            }
        }
    }
}

impl Iterator for FrameSampler {
    type Item = Result<SampledFrame, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut decoded = Video::empty();
        while !self.exhausted && !self.gate.is_full() {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let seconds = self.timeline.seconds(decoded.timestamp(), self.decoded);
                    self.decoded += 1;
                    if !self.gate.admit(seconds) {
                        continue;
                    }
                    debug!(seconds, index = self.gate.emitted(), "sampled frame");
                    let frame = to_rgb_image(&mut self.scaler, &decoded).map(|image| {
                        SampledFrame {
                            timestamp: seconds,
                            image,
                        }
                    });
                    if frame.is_err() {
                        self.exhausted = true;
                    }
                    return Some(frame);
                }
                Err(ffmpeg::Error::Eof) => self.exhausted = true,
                Err(_) if self.eof_sent => self.exhausted = true,
                Err(_) => {
                    if let Err(err) = self.feed_decoder() {
                        self.exhausted = true;
                        return Some(Err(err));
                    }
                }
            }
        }
        None
    }
}

/// Converts a decoded frame to packed RGB24, the channel order the
/// captioning models expect.
fn to_rgb_image(
    scaler: &mut Option<software::scaling::Context>,
    decoded: &Video,
) -> Result<RgbImage, PipelineError> {
    let stale = scaler.as_ref().map_or(true, |context| {
        let input = context.input();
        input.format != decoded.format()
            || input.width != decoded.width()
            || input.height != decoded.height()
    });
    if stale {
        *scaler = Some(
            software::scaling::Context::get(
                decoded.format(),
                decoded.width(),
                decoded.height(),
                format::Pixel::RGB24,
                decoded.width(),
                decoded.height(),
                software::scaling::Flags::BILINEAR,
            )
            .map_err(|err| PipelineError::Decode(err.to_string()))?,
        );
    }
    let Some(context) = scaler.as_mut() else {
        return Err(PipelineError::Decode("scaler unavailable".to_owned()));
    };

    let mut rgb_frame = Video::empty();
    context
        .run(decoded, &mut rgb_frame)
        .map_err(|err| PipelineError::Decode(err.to_string()))?;

    let (width, height) = (rgb_frame.width(), rgb_frame.height());
    let row_len = width as usize * 3;
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in data.chunks(stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_len]);
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| PipelineError::Decode("converted frame has an unexpected size".to_owned()))
}
