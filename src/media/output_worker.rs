//! Output worker: muxes processed video and encoded audio to the egress.
//!
//! Waits on the video queue with a short timeout and opportunistically
//! drains the audio queue each round, so one empty upstream never starves
//! the other. On write error the output is closed, the upstreams drained
//! for a short grace period, and the sink reopened.

use crate::media::sink::MediaSink;
use crate::media::source::ConnectionState;
use crate::pipeline::station::WorkerContext;
use crate::pipeline::types::{EncodedPacket, VideoPacket};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Short timed wait on the video side of the mux.
const MUX_WAIT: Duration = Duration::from_millis(20);

/// How long upstreams are drained after a write error before reopening.
const REOPEN_GRACE: Duration = Duration::from_millis(300);

pub struct OutputWorker {
    handle: Option<JoinHandle<()>>,
}

impl OutputWorker {
    pub fn spawn(
        mut sink: Box<dyn MediaSink>,
        video_rx: Receiver<VideoPacket>,
        audio_rx: Receiver<EncodedPacket>,
        connection: ConnectionState,
        ctx: WorkerContext,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("output-muxer".to_string())
            .spawn(move || {
                run(&mut *sink, &video_rx, &audio_rx, &connection, &ctx);
            })
            .expect("failed to spawn output worker");

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
    sink: &mut dyn MediaSink,
    video_rx: &Receiver<VideoPacket>,
    audio_rx: &Receiver<EncodedPacket>,
    connection: &ConnectionState,
    ctx: &WorkerContext,
) {
    let mut frames_written: u64 = 0;
    let mut audio_written: u64 = 0;

    log::info!("output worker started");

    while !ctx.stopping() {
        ctx.heartbeat.beat();

        // No ingress: close the egress so downstream viewers see a stopped
        // stream instead of stale frames.
        if !connection.is_connected() {
            if sink.is_open() {
                log::info!(
                    "closing egress after ingress loss ({frames_written} frames, {audio_written} audio packets written)"
                );
                sink.close();
            }
            thread::sleep(MUX_WAIT);
            continue;
        }

        if !sink.is_open() {
            let Some(info) = connection.info() else {
                continue;
            };
            match sink.open(&info) {
                Ok(()) => {
                    frames_written = 0;
                    audio_written = 0;
                    log::info!("egress opened");
                }
                Err(e) => {
                    log::warn!("egress open failed: {e}");
                    thread::sleep(REOPEN_GRACE);
                    continue;
                }
            }
        }

        // Timed wait on video; audio is drained opportunistically below so
        // an empty video queue never blocks audio (and vice versa).
        let wrote_error = match video_rx.recv_timeout(MUX_WAIT) {
            Ok(frame) => match sink.write_video(&frame) {
                Ok(()) => {
                    frames_written += 1;
                    false
                }
                Err(e) => {
                    log::warn!("video write failed: {e}");
                    true
                }
            },
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut audio_error = false;
        if !wrote_error {
            while let Ok(packet) = audio_rx.try_recv() {
                match sink.write_audio(&packet) {
                    Ok(()) => audio_written += 1,
                    Err(e) => {
                        log::warn!("audio write failed: {e}");
                        audio_error = true;
                        break;
                    }
                }
            }
        }

        if wrote_error || audio_error {
            sink.close();
            drain_for_grace(video_rx, audio_rx, ctx);
        }
    }

    sink.close();
    log::info!(
        "output worker stopped ({frames_written} frames, {audio_written} audio packets written)"
    );
}

/// Discards upstream media for a short period so the reopened output
/// starts from fresh packets.
fn drain_for_grace(
    video_rx: &Receiver<VideoPacket>,
    audio_rx: &Receiver<EncodedPacket>,
    ctx: &WorkerContext,
) {
    let deadline = Instant::now() + REOPEN_GRACE;
    let mut discarded = 0usize;
    while Instant::now() < deadline && !ctx.stopping() {
        let mut idle = true;
        if video_rx.try_recv().is_ok() {
            discarded += 1;
            idle = false;
        }
        if audio_rx.try_recv().is_ok() {
            discarded += 1;
            idle = false;
        }
        if idle {
            thread::sleep(Duration::from_millis(5));
        }
    }
    log::debug!("discarded {discarded} media units while egress was down");
}
