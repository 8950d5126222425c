//! ffmpeg-backed media I/O.
//!
//! Implements the source, sink, and audio-encoder seams with ffmpeg-next:
//! an RTMP listener that decodes to RGB24 video and interleaved s16 audio,
//! an RTSP publisher encoding H.264 + Opus, and the standalone Opus
//! encoder used by the transcoder station. PTS values are normalized to
//! microseconds at the demux boundary; the sink rescales them into each
//! output stream's timebase.

#![cfg(feature = "ffmpeg")]

use crate::error::{FaceveilError, Result};
use crate::media::sink::MediaSink;
use crate::media::source::{MediaEvent, MediaSource};
use crate::media::transcode::AudioEncoder;
use crate::pipeline::types::{AudioFrame, EncodedPacket, StreamInfo, StreamKind, VideoPacket};
use ffmpeg_next as ffmpeg;

use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::format::sample::{Sample, Type as SampleType};
use ffmpeg::util::rational::Rational;
use ffmpeg::{codec, format, frame, software, Rescale};
use std::collections::VecDeque;

/// Microsecond timebase used for all in-pipeline PTS values.
const MICROS: Rational = Rational(1, 1_000_000);

/// Initializes ffmpeg's global state. Safe to call more than once.
pub fn init() -> Result<()> {
    ffmpeg::init().map_err(|e| FaceveilError::Other(format!("ffmpeg init: {e}")))
}

fn micros_from(pts: Option<i64>, time_base: Rational, fallback: i64) -> i64 {
    match pts {
        Some(pts) => pts.rescale(time_base, MICROS),
        None => fallback,
    }
}

/// Listening demuxer/decoder for the ingress URL.
pub struct FfmpegMediaSource {
    url: String,
    session: Option<Session>,
}

struct Session {
    ictx: format::context::Input,
    video_index: usize,
    audio_index: Option<usize>,
    video_decoder: codec::decoder::video::Video,
    audio_decoder: Option<codec::decoder::audio::Audio>,
    scaler: Option<software::scaling::Context>,
    audio_repack: Option<software::resampling::Context>,
    video_time_base: Rational,
    audio_time_base: Rational,
    pending: VecDeque<MediaEvent>,
    last_video_micros: i64,
    last_audio_micros: i64,
}

impl FfmpegMediaSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            session: None,
        }
    }
}

impl MediaSource for FfmpegMediaSource {
    fn try_connect(&mut self) -> Result<Option<StreamInfo>> {
        let mut options = ffmpeg::Dictionary::new();
        options.set("listen", "1");
        // Bounded accept and read so the worker keeps heartbeating.
        options.set("timeout", "1");
        options.set("rw_timeout", "1000000");

        let ictx = match format::input_with_dictionary(&self.url, options) {
            Ok(ictx) => ictx,
            Err(e) => {
                // No publisher within the window; retried by the worker.
                log::debug!("ingress accept attempt ended: {e}");
                return Ok(None);
            }
        };

        let video_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| FaceveilError::StreamConnect {
                url: self.url.clone(),
                message: "publisher offers no video track".to_string(),
            })?;
        let video_index = video_stream.index();
        let video_time_base = video_stream.time_base();
        let fps = video_stream.avg_frame_rate();

        let video_decoder = codec::context::Context::from_parameters(video_stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| FaceveilError::Decode {
                stream: "video".to_string(),
                message: format!("decoder init: {e}"),
            })?;

        let audio_stream = ictx.streams().best(ffmpeg::media::Type::Audio);
        let audio_index = audio_stream.as_ref().map(|s| s.index());
        let audio_time_base = audio_stream
            .as_ref()
            .map(|s| s.time_base())
            .unwrap_or(MICROS);
        let audio_decoder = match &audio_stream {
            Some(stream) => Some(
                codec::context::Context::from_parameters(stream.parameters())
                    .and_then(|ctx| ctx.decoder().audio())
                    .map_err(|e| FaceveilError::Decode {
                        stream: "audio".to_string(),
                        message: format!("decoder init: {e}"),
                    })?,
            ),
            None => None,
        };

        let info = StreamInfo {
            width: video_decoder.width(),
            height: video_decoder.height(),
            fps: if fps.denominator() > 0 {
                (fps.numerator() as f64 / fps.denominator() as f64).round() as u32
            } else {
                30
            },
            has_audio: audio_decoder.is_some(),
            audio_sample_rate: audio_decoder.as_ref().map(|d| d.rate()).unwrap_or(48_000),
            audio_channels: audio_decoder
                .as_ref()
                .map(|d| d.channels())
                .unwrap_or(2),
        };

        self.session = Some(Session {
            ictx,
            video_index,
            audio_index,
            video_decoder,
            audio_decoder,
            scaler: None,
            audio_repack: None,
            video_time_base,
            audio_time_base,
            pending: VecDeque::new(),
            last_video_micros: 0,
            last_audio_micros: 0,
        });

        Ok(Some(info))
    }

    fn read_event(&mut self) -> Result<Option<MediaEvent>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };

        if let Some(event) = session.pending.pop_front() {
            return Ok(Some(event));
        }

        let Some((stream, packet)) = session.ictx.packets().next() else {
            return Ok(Some(MediaEvent::EndOfStream));
        };

        let index = stream.index();
        if index == session.video_index {
            session.decode_video(&packet)?;
        } else if Some(index) == session.audio_index {
            session.decode_audio(&packet)?;
        }

        Ok(session.pending.pop_front())
    }

    fn close(&mut self) {
        self.session = None;
    }
}

impl Session {
    fn decode_video(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        if self.video_decoder.send_packet(packet).is_err() {
            // Corrupt unit; skip it and keep the session alive.
            log::debug!("video packet rejected by decoder");
            return Ok(());
        }

        let mut decoded = frame::Video::empty();
        while self.video_decoder.receive_frame(&mut decoded).is_ok() {
            let width = decoded.width();
            let height = decoded.height();

            let scaler = match &mut self.scaler {
                Some(scaler) => scaler,
                None => {
                    let scaler = software::scaling::Context::get(
                        decoded.format(),
                        width,
                        height,
                        format::Pixel::RGB24,
                        width,
                        height,
                        software::scaling::Flags::BILINEAR,
                    )
                    .map_err(|e| FaceveilError::Decode {
                        stream: "video".to_string(),
                        message: format!("scaler init: {e}"),
                    })?;
                    self.scaler.insert(scaler)
                }
            };

            let mut rgb = frame::Video::empty();
            scaler.run(&decoded, &mut rgb).map_err(|e| FaceveilError::Decode {
                stream: "video".to_string(),
                message: format!("scale: {e}"),
            })?;

            // Copy row by row; the scaled frame's stride may exceed w*3.
            let stride = rgb.stride(0);
            let row_len = width as usize * 3;
            let plane = rgb.data(0);
            let mut data = Vec::with_capacity(row_len * height as usize);
            for row in 0..height as usize {
                let start = row * stride;
                data.extend_from_slice(&plane[start..start + row_len]);
            }

            let micros = micros_from(
                decoded.timestamp().or(decoded.pts()),
                self.video_time_base,
                self.last_video_micros,
            );
            self.last_video_micros = micros;

            self.pending.push_back(MediaEvent::Video(VideoPacket::new(
                data, width, height, micros, 0,
            )));
        }
        Ok(())
    }

    fn decode_audio(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        let Some(decoder) = self.audio_decoder.as_mut() else {
            return Ok(());
        };
        if decoder.send_packet(packet).is_err() {
            log::debug!("audio packet rejected by decoder");
            return Ok(());
        }

        let mut decoded = frame::Audio::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let rate = decoded.rate();
            let channels = decoded.channels();

            // Repack whatever the decoder yields into interleaved s16.
            let repack = match &mut self.audio_repack {
                Some(repack) => repack,
                None => {
                    let repack = software::resampling::Context::get(
                        decoded.format(),
                        decoded.channel_layout(),
                        rate,
                        Sample::I16(SampleType::Packed),
                        decoded.channel_layout(),
                        rate,
                    )
                    .map_err(|e| FaceveilError::Decode {
                        stream: "audio".to_string(),
                        message: format!("repack init: {e}"),
                    })?;
                    self.audio_repack.insert(repack)
                }
            };

            let mut packed = frame::Audio::empty();
            repack.run(&decoded, &mut packed).map_err(|e| FaceveilError::Decode {
                stream: "audio".to_string(),
                message: format!("repack: {e}"),
            })?;

            let sample_count = packed.samples() * channels as usize;
            let bytes = packed.data(0);
            let mut samples = Vec::with_capacity(sample_count);
            for chunk in bytes[..sample_count * 2].chunks_exact(2) {
                samples.push(i16::from_le_bytes([chunk[0], chunk[1]]));
            }

            let micros = micros_from(
                decoded.timestamp().or(decoded.pts()),
                self.audio_time_base,
                self.last_audio_micros,
            );
            self.last_audio_micros = micros;

            self.pending.push_back(MediaEvent::Audio(AudioFrame::new(
                samples, rate, channels, micros, 0,
            )));
        }
        Ok(())
    }
}

/// Standalone Opus encoder for the transcoder station.
pub struct FfmpegOpusEncoder {
    encoder: codec::encoder::audio::Encoder,
    resampler: Option<software::resampling::Context>,
    /// Interleaved s16 samples at 48kHz awaiting a full codec frame.
    buffer: Vec<i16>,
    channels: u16,
    frame_size: usize,
    /// Egress PTS base in microseconds, fixed at the first input frame.
    base_micros: Option<i64>,
    samples_encoded: i64,
}

impl FfmpegOpusEncoder {
    pub fn new(bitrate: usize, channels: u16) -> Result<Self> {
        let codec = ffmpeg::encoder::find(codec::Id::OPUS).ok_or_else(|| {
            FaceveilError::Encode {
                stream: "audio".to_string(),
                message: "libopus encoder not available".to_string(),
            }
        })?;

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|e| FaceveilError::Encode {
                stream: "audio".to_string(),
                message: format!("encoder init: {e}"),
            })?;

        let layout = ChannelLayout::default(channels as i32);
        encoder.set_rate(48_000);
        encoder.set_channel_layout(layout);
        encoder.set_format(Sample::I16(SampleType::Packed));
        encoder.set_bit_rate(bitrate);
        encoder.set_time_base(Rational(1, 48_000));

        let encoder = encoder.open_as(codec).map_err(|e| FaceveilError::Encode {
            stream: "audio".to_string(),
            message: format!("encoder open: {e}"),
        })?;

        let frame_size = encoder.frame_size().max(1) as usize;

        Ok(Self {
            encoder,
            resampler: None,
            buffer: Vec::new(),
            channels,
            frame_size,
            base_micros: None,
            samples_encoded: 0,
        })
    }

    fn drain_packets(&mut self, out: &mut Vec<EncodedPacket>) {
        let base = self.base_micros.unwrap_or(0);
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            let pts_samples = packet.pts().unwrap_or(self.samples_encoded);
            let micros = base + pts_samples.rescale(Rational(1, 48_000), MICROS);
            out.push(EncodedPacket::new(
                StreamKind::Audio,
                packet.data().map(|d| d.to_vec()).unwrap_or_default(),
                micros,
                micros,
                false,
            ));
        }
    }

    fn encode_buffered(&mut self, out: &mut Vec<EncodedPacket>) -> Result<()> {
        let samples_per_frame = self.frame_size * self.channels as usize;
        while self.buffer.len() >= samples_per_frame {
            let chunk: Vec<i16> = self.buffer.drain(..samples_per_frame).collect();

            let mut af = frame::Audio::new(
                Sample::I16(SampleType::Packed),
                self.frame_size,
                ChannelLayout::default(self.channels as i32),
            );
            af.set_rate(48_000);
            af.set_pts(Some(self.samples_encoded));
            {
                let plane = af.data_mut(0);
                for (i, sample) in chunk.iter().enumerate() {
                    let bytes = sample.to_le_bytes();
                    plane[i * 2] = bytes[0];
                    plane[i * 2 + 1] = bytes[1];
                }
            }

            self.encoder
                .send_frame(&af)
                .map_err(|e| FaceveilError::Encode {
                    stream: "audio".to_string(),
                    message: format!("send frame: {e}"),
                })?;
            self.samples_encoded += self.frame_size as i64;
            self.drain_packets(out);
        }
        Ok(())
    }
}

impl AudioEncoder for FfmpegOpusEncoder {
    fn encode(&mut self, input: &AudioFrame) -> Result<Vec<EncodedPacket>> {
        if input.samples.is_empty() {
            return Ok(Vec::new());
        }
        // The egress clock is anchored to the first frame's timestamp,
        // exactly once per stream.
        self.base_micros.get_or_insert(input.pts);

        if input.sample_rate != 48_000 || input.channels != self.channels {
            let in_layout = ChannelLayout::default(input.channels as i32);
            let out_layout = ChannelLayout::default(self.channels as i32);
            if self.resampler.is_none() {
                let resampler = software::resampling::Context::get(
                    Sample::I16(SampleType::Packed),
                    in_layout,
                    input.sample_rate,
                    Sample::I16(SampleType::Packed),
                    out_layout,
                    48_000,
                )
                .map_err(|e| FaceveilError::Encode {
                    stream: "audio".to_string(),
                    message: format!("resampler init: {e}"),
                })?;
                log::info!(
                    "egress audio resampler configured: {}Hz/{}ch -> 48000Hz/{}ch",
                    input.sample_rate,
                    input.channels,
                    self.channels
                );
                self.resampler = Some(resampler);
            }

            let in_samples = input.samples.len() / input.channels.max(1) as usize;
            let mut in_frame =
                frame::Audio::new(Sample::I16(SampleType::Packed), in_samples, in_layout);
            in_frame.set_rate(input.sample_rate);
            {
                let plane = in_frame.data_mut(0);
                for (i, sample) in input.samples.iter().enumerate() {
                    let bytes = sample.to_le_bytes();
                    plane[i * 2] = bytes[0];
                    plane[i * 2 + 1] = bytes[1];
                }
            }

            let mut out_frame = frame::Audio::empty();
            self.resampler
                .as_mut()
                .unwrap()
                .run(&in_frame, &mut out_frame)
                .map_err(|e| FaceveilError::Encode {
                    stream: "audio".to_string(),
                    message: format!("resample: {e}"),
                })?;

            let count = out_frame.samples() * self.channels as usize;
            let bytes = out_frame.data(0);
            for chunk in bytes[..count * 2].chunks_exact(2) {
                self.buffer.push(i16::from_le_bytes([chunk[0], chunk[1]]));
            }
        } else {
            self.buffer.extend_from_slice(&input.samples);
        }

        let mut out = Vec::new();
        self.encode_buffered(&mut out)?;
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<EncodedPacket>> {
        let mut out = Vec::new();
        self.encode_buffered(&mut out)?;
        if self.encoder.send_eof().is_ok() {
            self.drain_packets(&mut out);
        }
        Ok(out)
    }
}

/// RTSP publisher: encodes processed frames to H.264 and muxes them with
/// the pre-encoded Opus packets.
pub struct FfmpegMediaSink {
    url: String,
    bitrate: usize,
    channels: u16,
    output: Option<Output>,
}

struct Output {
    octx: format::context::Output,
    video_encoder: codec::encoder::video::Encoder,
    scaler: Option<software::scaling::Context>,
    video_stream: usize,
    audio_stream: Option<usize>,
}

impl FfmpegMediaSink {
    pub fn new(url: &str, bitrate: usize, channels: u16) -> Self {
        Self {
            url: url.to_string(),
            bitrate,
            channels,
            output: None,
        }
    }

    fn write_encoder_packets(output: &mut Output) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while output.video_encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(output.video_stream);
            let stream_tb = output
                .octx
                .stream(output.video_stream)
                .map(|s| s.time_base())
                .unwrap_or(MICROS);
            packet.rescale_ts(MICROS, stream_tb);
            packet
                .write_interleaved(&mut output.octx)
                .map_err(|e| FaceveilError::StreamWrite {
                    message: format!("mux video: {e}"),
                })?;
        }
        Ok(())
    }
}

impl MediaSink for FfmpegMediaSink {
    fn open(&mut self, info: &StreamInfo) -> Result<()> {
        let mut options = ffmpeg::Dictionary::new();
        options.set("rtsp_transport", "tcp");

        let mut octx = format::output_as_with(&self.url, "rtsp", options).map_err(|e| {
            FaceveilError::StreamConnect {
                url: self.url.clone(),
                message: format!("open egress: {e}"),
            }
        })?;

        // H.264 video encoder, tuned for live relay.
        let video_codec = ffmpeg::encoder::find(codec::Id::H264).ok_or_else(|| {
            FaceveilError::Encode {
                stream: "video".to_string(),
                message: "libx264 encoder not available".to_string(),
            }
        })?;
        let mut venc = codec::context::Context::new_with_codec(video_codec)
            .encoder()
            .video()
            .map_err(|e| FaceveilError::Encode {
                stream: "video".to_string(),
                message: format!("encoder init: {e}"),
            })?;
        venc.set_width(info.width);
        venc.set_height(info.height);
        venc.set_format(format::Pixel::YUV420P);
        venc.set_time_base(MICROS);
        venc.set_frame_rate(Some(Rational(info.fps.max(1) as i32, 1)));

        let mut vopts = ffmpeg::Dictionary::new();
        vopts.set("preset", "veryfast");
        vopts.set("tune", "zerolatency");
        let video_encoder = venc
            .open_as_with(video_codec, vopts)
            .map_err(|e| FaceveilError::Encode {
                stream: "video".to_string(),
                message: format!("encoder open: {e}"),
            })?;

        let video_stream = {
            let mut stream =
                octx.add_stream(video_codec)
                    .map_err(|e| FaceveilError::StreamConnect {
                        url: self.url.clone(),
                        message: format!("add video stream: {e}"),
                    })?;
            stream.set_parameters(&video_encoder);
            stream.index()
        };

        // Opus audio stream; parameters come from a scratch encoder with
        // the same settings the transcoder uses, so extradata matches.
        let audio_stream = if info.has_audio {
            let audio_codec = ffmpeg::encoder::find(codec::Id::OPUS).ok_or_else(|| {
                FaceveilError::Encode {
                    stream: "audio".to_string(),
                    message: "libopus encoder not available".to_string(),
                }
            })?;
            let mut aenc = codec::context::Context::new_with_codec(audio_codec)
                .encoder()
                .audio()
                .map_err(|e| FaceveilError::Encode {
                    stream: "audio".to_string(),
                    message: format!("encoder init: {e}"),
                })?;
            aenc.set_rate(48_000);
            aenc.set_channel_layout(ChannelLayout::default(self.channels as i32));
            aenc.set_format(Sample::I16(SampleType::Packed));
            aenc.set_bit_rate(self.bitrate);
            aenc.set_time_base(Rational(1, 48_000));
            let aenc = aenc
                .open_as(audio_codec)
                .map_err(|e| FaceveilError::Encode {
                    stream: "audio".to_string(),
                    message: format!("encoder open: {e}"),
                })?;

            let mut stream =
                octx.add_stream(audio_codec)
                    .map_err(|e| FaceveilError::StreamConnect {
                        url: self.url.clone(),
                        message: format!("add audio stream: {e}"),
                    })?;
            stream.set_parameters(&aenc);
            Some(stream.index())
        } else {
            None
        };

        octx.write_header().map_err(|e| FaceveilError::StreamConnect {
            url: self.url.clone(),
            message: format!("write header: {e}"),
        })?;

        log::info!(
            "egress configured: {}x{}@{}fps H.264 + Opus",
            info.width,
            info.height,
            info.fps
        );

        self.output = Some(Output {
            octx,
            video_encoder,
            scaler: None,
            video_stream,
            audio_stream,
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.output.is_some()
    }

    fn write_video(&mut self, packet: &VideoPacket) -> Result<()> {
        let output = self.output.as_mut().ok_or_else(|| FaceveilError::StreamWrite {
            message: "egress not open".to_string(),
        })?;

        // Wrap the RGB24 buffer into an ffmpeg frame, respecting stride.
        let mut rgb = frame::Video::new(format::Pixel::RGB24, packet.width, packet.height);
        {
            let stride = rgb.stride(0);
            let row_len = packet.width as usize * 3;
            let plane = rgb.data_mut(0);
            for row in 0..packet.height as usize {
                let src = row * row_len;
                let dst = row * stride;
                plane[dst..dst + row_len].copy_from_slice(&packet.data[src..src + row_len]);
            }
        }

        let scaler = match &mut output.scaler {
            Some(scaler) => scaler,
            None => {
                let scaler = software::scaling::Context::get(
                    format::Pixel::RGB24,
                    packet.width,
                    packet.height,
                    format::Pixel::YUV420P,
                    packet.width,
                    packet.height,
                    software::scaling::Flags::BILINEAR,
                )
                .map_err(|e| FaceveilError::Encode {
                    stream: "video".to_string(),
                    message: format!("scaler init: {e}"),
                })?;
                output.scaler.insert(scaler)
            }
        };

        let mut yuv = frame::Video::empty();
        scaler.run(&rgb, &mut yuv).map_err(|e| FaceveilError::Encode {
            stream: "video".to_string(),
            message: format!("scale: {e}"),
        })?;
        yuv.set_pts(Some(packet.pts));

        output
            .video_encoder
            .send_frame(&yuv)
            .map_err(|e| FaceveilError::Encode {
                stream: "video".to_string(),
                message: format!("send frame: {e}"),
            })?;

        Self::write_encoder_packets(output)
    }

    fn write_audio(&mut self, packet: &EncodedPacket) -> Result<()> {
        let output = self.output.as_mut().ok_or_else(|| FaceveilError::StreamWrite {
            message: "egress not open".to_string(),
        })?;
        let Some(audio_stream) = output.audio_stream else {
            return Ok(());
        };

        let mut av_packet = ffmpeg::Packet::copy(&packet.data);
        av_packet.set_stream(audio_stream);
        av_packet.set_pts(Some(packet.pts));
        av_packet.set_dts(Some(packet.dts));
        let stream_tb = output
            .octx
            .stream(audio_stream)
            .map(|s| s.time_base())
            .unwrap_or(MICROS);
        av_packet.rescale_ts(MICROS, stream_tb);

        av_packet
            .write_interleaved(&mut output.octx)
            .map_err(|e| FaceveilError::StreamWrite {
                message: format!("mux audio: {e}"),
            })
    }

    fn close(&mut self) {
        let Some(mut output) = self.output.take() else {
            return;
        };

        // Flush the video encoder, then finalize the container.
        if output.video_encoder.send_eof().is_ok() {
            if let Err(e) = Self::write_encoder_packets(&mut output) {
                log::debug!("egress flush: {e}");
            }
        }
        if let Err(e) = output.octx.write_trailer() {
            log::debug!("egress trailer: {e}");
        }
    }
}
