//! Media ingest seam.
//!
//! The production source opens the ingress URL in listen mode through
//! ffmpeg and decodes packets; the trait seam lets tests feed scripted
//! frames through the same input worker.

use crate::error::Result;
use crate::pipeline::types::{AudioFrame, StreamInfo, VideoPacket};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// One decoded unit from the ingress stream.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    Video(VideoPacket),
    Audio(AudioFrame),
    /// Publisher went away; the worker closes and reconnects.
    EndOfStream,
}

/// Trait for the ingress demuxer/decoder.
pub trait MediaSource: Send {
    /// One bounded connect attempt (on the order of a second).
    /// `Ok(Some(info))` when a publisher connected, `Ok(None)` when the
    /// attempt timed out and should simply be retried.
    fn try_connect(&mut self) -> Result<Option<StreamInfo>>;

    /// Reads the next decoded unit. `Ok(None)` means a bounded read
    /// produced nothing yet; an error means the session is broken and the
    /// worker should disconnect.
    fn read_event(&mut self) -> Result<Option<MediaEvent>>;

    /// Tears down the current session.
    fn close(&mut self);
}

/// Connection status shared between the input worker and the rest of the
/// pipeline. Downstream workers idle while no publisher is connected, and
/// the output muxer configures its egress streams from the stored metadata.
#[derive(Clone, Default)]
pub struct ConnectionState {
    inner: Arc<RwLock<Option<StreamInfo>>>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, info: StreamInfo) {
        *self.inner.write().unwrap() = Some(info);
        log::info!("ingress connected");
    }

    pub fn set_disconnected(&self) {
        let mut slot = self.inner.write().unwrap();
        if slot.is_some() {
            *slot = None;
            log::info!("ingress disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.read().unwrap().is_some()
    }

    pub fn info(&self) -> Option<StreamInfo> {
        self.inner.read().unwrap().clone()
    }
}

/// Scripted source for tests: connects after a configurable number of
/// attempts, then replays its event list and signals end of stream.
pub struct MockMediaSource {
    info: StreamInfo,
    connect_delays: usize,
    remaining_delays: usize,
    sessions: VecDeque<VecDeque<MediaEvent>>,
    current: Option<VecDeque<MediaEvent>>,
    interval: Option<std::time::Duration>,
    pub connects: usize,
    pub closes: usize,
}

impl MockMediaSource {
    /// A source with a single session of events.
    pub fn with_events(info: StreamInfo, events: Vec<MediaEvent>) -> Self {
        Self {
            info,
            connect_delays: 0,
            remaining_delays: 0,
            sessions: VecDeque::from(vec![VecDeque::from(events)]),
            current: None,
            interval: None,
            connects: 0,
            closes: 0,
        }
    }

    /// A source that replays several publisher sessions in turn, modeling
    /// disconnect/reconnect.
    pub fn with_sessions(info: StreamInfo, sessions: Vec<Vec<MediaEvent>>) -> Self {
        Self {
            info,
            connect_delays: 0,
            remaining_delays: 0,
            sessions: sessions.into_iter().map(VecDeque::from).collect(),
            current: None,
            interval: None,
            connects: 0,
            closes: 0,
        }
    }

    /// Makes `n` connect attempts time out before each session.
    pub fn with_connect_delays(mut self, n: usize) -> Self {
        self.connect_delays = n;
        self.remaining_delays = n;
        self
    }

    /// Paces event delivery like a real-time publisher.
    pub fn with_event_interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

impl MediaSource for MockMediaSource {
    fn try_connect(&mut self) -> Result<Option<StreamInfo>> {
        if self.remaining_delays > 0 {
            self.remaining_delays -= 1;
            return Ok(None);
        }
        match self.sessions.pop_front() {
            Some(session) => {
                self.current = Some(session);
                self.remaining_delays = self.connect_delays;
                self.connects += 1;
                Ok(Some(self.info.clone()))
            }
            None => Ok(None),
        }
    }

    fn read_event(&mut self) -> Result<Option<MediaEvent>> {
        match self.current.as_mut() {
            Some(session) => match session.pop_front() {
                Some(event) => {
                    if let Some(interval) = self.interval {
                        std::thread::sleep(interval);
                    }
                    Ok(Some(event))
                }
                None => Ok(Some(MediaEvent::EndOfStream)),
            },
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        if self.current.take().is_some() {
            self.closes += 1;
        }
    }
}
