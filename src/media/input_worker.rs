//! Input worker: ingress connect loop, demux/decode, and fanout.
//!
//! Owns the media source. Connect attempts are bounded so heartbeats keep
//! flowing while waiting for a publisher. Decoded audio frames fan out to
//! the transcoder and VAD queues; both consumers see the same sequence.
//! Ingest never blocks on a slow consumer: a full queue drops the unit and
//! logs it.

use crate::defaults;
use crate::media::source::{ConnectionState, MediaEvent, MediaSource};
use crate::pipeline::health::{bump, PipelineMetrics};
use crate::pipeline::station::WorkerContext;
use crate::pipeline::types::{AudioFrame, VideoPacket};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct InputWorkerChannels {
    pub video_tx: Sender<VideoPacket>,
    pub audio_transcode_tx: Sender<AudioFrame>,
    pub audio_vad_tx: Sender<AudioFrame>,
    /// Receiver clones of every downstream queue, drained on disconnect so
    /// no stale media survives into the next session.
    pub drain_video: Receiver<VideoPacket>,
    pub drain_audio_transcode: Receiver<AudioFrame>,
    pub drain_audio_vad: Receiver<AudioFrame>,
}

pub struct InputWorker {
    handle: Option<JoinHandle<()>>,
}

impl InputWorker {
    pub fn spawn(
        mut source: Box<dyn MediaSource>,
        channels: InputWorkerChannels,
        connection: ConnectionState,
        metrics: Arc<PipelineMetrics>,
        ctx: WorkerContext,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("input-demuxer".to_string())
            .spawn(move || {
                run(&mut *source, &channels, &connection, &metrics, &ctx);
            })
            .expect("failed to spawn input worker");

        Self {
            handle: Some(handle),
        }
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn into_handle(mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }
}

fn run(
    source: &mut dyn MediaSource,
    channels: &InputWorkerChannels,
    connection: &ConnectionState,
    metrics: &PipelineMetrics,
    ctx: &WorkerContext,
) {
    let mut video_sequence: u64 = 0;
    let mut audio_sequence: u64 = 0;

    log::info!("input worker started, waiting for publisher");

    while !ctx.stopping() {
        ctx.heartbeat.beat();

        if !connection.is_connected() {
            match source.try_connect() {
                Ok(Some(info)) => {
                    video_sequence = 0;
                    audio_sequence = 0;
                    log::info!(
                        "publisher connected: {}x{}@{}fps audio={}",
                        info.width,
                        info.height,
                        info.fps,
                        info.has_audio
                    );
                    connection.set_connected(info);
                }
                Ok(None) => {
                    // No publisher yet; the attempt itself was bounded.
                    thread::sleep(defaults::CONNECT_BACKOFF.min(defaults::QUEUE_TIMEOUT));
                }
                Err(e) => {
                    log::warn!("ingress connect failed: {e}");
                    thread::sleep(defaults::CONNECT_BACKOFF);
                }
            }
            continue;
        }

        match source.read_event() {
            Ok(Some(MediaEvent::Video(mut packet))) => {
                packet.sequence = video_sequence;
                video_sequence += 1;
                if channels.video_tx.try_send(packet).is_err() {
                    bump(&metrics.frames_dropped);
                    log::debug!("video queue full, dropped frame {}", video_sequence - 1);
                }
            }
            Ok(Some(MediaEvent::Audio(mut frame))) => {
                frame.sequence = audio_sequence;
                audio_sequence += 1;
                // Fanout: both consumers get an independent copy, in the
                // same order.
                if channels.audio_transcode_tx.try_send(frame.clone()).is_err() {
                    log::debug!("audio transcode queue full, dropped frame");
                }
                if channels.audio_vad_tx.try_send(frame).is_err() {
                    log::debug!("audio vad queue full, dropped frame");
                }
            }
            Ok(Some(MediaEvent::EndOfStream)) => {
                log::info!("publisher ended the stream");
                disconnect(source, channels, connection);
            }
            Ok(None) => {
                // Bounded read produced nothing; loop to beat and re-check.
            }
            Err(e) => {
                log::warn!("ingress read error: {e}");
                disconnect(source, channels, connection);
                thread::sleep(defaults::CONNECT_BACKOFF);
            }
        }
    }

    disconnect(source, channels, connection);
    log::info!("input worker stopped");
}

/// Closes the session and clears stale downstream media so nothing from a
/// dead session is ever published.
fn disconnect(
    source: &mut dyn MediaSource,
    channels: &InputWorkerChannels,
    connection: &ConnectionState,
) {
    source.close();
    connection.set_disconnected();

    let mut cleared = 0usize;
    while channels.drain_video.try_recv().is_ok() {
        cleared += 1;
    }
    while channels.drain_audio_transcode.try_recv().is_ok() {
        cleared += 1;
    }
    while channels.drain_audio_vad.try_recv().is_ok() {
        cleared += 1;
    }
    if cleared > 0 {
        log::debug!("cleared {cleared} stale queued media units on disconnect");
    }
}
