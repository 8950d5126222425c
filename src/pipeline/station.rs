//! Core station abstraction and runner.
//!
//! Each station runs in its own thread, pulling from a bounded input channel
//! and pushing to a bounded output channel. Receives are timed so every
//! station observes the shared stop flag at least once per timeout interval.

use crate::defaults;
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::health::Heartbeat;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A processing station in the pipeline.
///
/// Stations receive one input and produce zero or more outputs. An empty
/// output vector means the input was consumed without producing anything
/// (buffered or filtered).
pub trait Station: Send + 'static {
    /// The input type this station receives.
    type Input: Send + 'static;
    /// The output type this station produces.
    type Output: Send + 'static;

    /// Processes a single input item.
    fn process(&mut self, input: Self::Input) -> Result<Vec<Self::Output>, StationError>;

    /// Returns the name of this station for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Called once when the station is shutting down; any returned outputs
    /// are sent best-effort before the thread exits.
    fn flush(&mut self) -> Vec<Self::Output> {
        Vec::new()
    }

    /// Final cleanup hook after flush.
    fn shutdown(&mut self) {}
}

/// How a runner delivers outputs to a full downstream channel.
#[derive(Clone)]
pub enum SendMode<T> {
    /// Retry with a bounded timeout until the channel accepts the item or
    /// the pipeline stops. Applies back-pressure to this station.
    Block,
    /// Discard the oldest queued item to make room, never blocking the
    /// producer. Holds a receiver clone so the head can be popped; each
    /// discard bumps the counter.
    DropOldest {
        rx: Receiver<T>,
        dropped: Arc<std::sync::atomic::AtomicU64>,
    },
}

/// Shared context handed to every worker thread.
#[derive(Clone)]
pub struct WorkerContext {
    pub stop: Arc<AtomicBool>,
    pub heartbeat: Heartbeat,
    pub reporter: Arc<dyn ErrorReporter>,
}

impl WorkerContext {
    pub fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Runs a station in a dedicated thread.
pub struct StationRunner {
    handle: Option<JoinHandle<()>>,
    station_name: &'static str,
}

impl StationRunner {
    /// Spawns a station thread wired between the given channels.
    pub fn spawn<S: Station>(
        mut station: S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        send_mode: SendMode<S::Output>,
        ctx: WorkerContext,
    ) -> Self {
        let station_name = station.name();

        let handle = thread::Builder::new()
            .name(station_name.to_string())
            .spawn(move || {
                run_station(&mut station, input_rx, output_tx, send_mode, ctx);
            })
            .expect("failed to spawn station thread");

        Self {
            handle: Some(handle),
            station_name,
        }
    }

    /// Waits for the station thread to complete.
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| format!("station '{}' thread panicked", self.station_name))
        } else {
            Ok(())
        }
    }

    pub fn name(&self) -> &'static str {
        self.station_name
    }

    /// Takes the underlying join handle, for deadline-based joining.
    pub fn into_handle(mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }
}

fn run_station<S: Station>(
    station: &mut S,
    input_rx: Receiver<S::Input>,
    output_tx: Sender<S::Output>,
    send_mode: SendMode<S::Output>,
    ctx: WorkerContext,
) {
    let name = station.name();
    log::debug!("station '{}' started", name);

    loop {
        if ctx.stopping() {
            break;
        }
        ctx.heartbeat.beat();

        let input = match input_rx.recv_timeout(defaults::QUEUE_TIMEOUT) {
            Ok(input) => input,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match station.process(input) {
            Ok(outputs) => {
                let mut disconnected = false;
                for output in outputs {
                    if !send_output(&output_tx, output, &send_mode, &ctx) {
                        disconnected = true;
                        break;
                    }
                }
                if disconnected {
                    break;
                }
            }
            Err(StationError::Recoverable(msg)) => {
                ctx.reporter.report(name, &StationError::Recoverable(msg));
            }
            Err(StationError::Fatal(msg)) => {
                ctx.reporter.report(name, &StationError::Fatal(msg));
                break;
            }
        }
    }

    for output in station.flush() {
        if output_tx.try_send(output).is_err() {
            break;
        }
    }

    station.shutdown();
    log::debug!("station '{}' stopped", name);
}

/// Delivers one output. Returns false when the downstream is gone.
fn send_output<T>(tx: &Sender<T>, item: T, mode: &SendMode<T>, ctx: &WorkerContext) -> bool {
    match mode {
        SendMode::Block => {
            let mut item = item;
            loop {
                if ctx.stopping() {
                    return false;
                }
                match tx.send_timeout(item, defaults::QUEUE_TIMEOUT) {
                    Ok(()) => return true,
                    Err(crossbeam_channel::SendTimeoutError::Timeout(returned)) => {
                        item = returned;
                    }
                    Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => return false,
                }
            }
        }
        SendMode::DropOldest { rx, dropped } => match tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(item)) => {
                // Make room by discarding the head, then retry once.
                if rx.try_recv().is_ok() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                match tx.try_send(item) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => true,
                    Err(TrySendError::Disconnected(_)) => false,
                }
            }
            Err(TrySendError::Disconnected(_)) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::health::HeartbeatRegistry;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;
    use std::time::Duration;

    fn test_ctx(stop: Arc<AtomicBool>) -> WorkerContext {
        let registry = HeartbeatRegistry::new();
        WorkerContext {
            stop,
            heartbeat: registry.register("test"),
            reporter: Arc::new(crate::pipeline::error::LogReporter),
        }
    }

    // Station that doubles integers
    struct DoublerStation {
        shutdown_called: Arc<AtomicBool>,
    }

    impl Station for DoublerStation {
        type Input = i32;
        type Output = i32;

        fn process(&mut self, input: i32) -> Result<Vec<i32>, StationError> {
            Ok(vec![input * 2])
        }

        fn name(&self) -> &'static str {
            "doubler"
        }

        fn shutdown(&mut self) {
            self.shutdown_called.store(true, Ordering::SeqCst);
        }
    }

    // Station that filters even numbers
    struct OddFilterStation;

    impl Station for OddFilterStation {
        type Input = i32;
        type Output = i32;

        fn process(&mut self, input: i32) -> Result<Vec<i32>, StationError> {
            if input % 2 == 0 {
                Ok(Vec::new())
            } else {
                Ok(vec![input])
            }
        }

        fn name(&self) -> &'static str {
            "odd-filter"
        }
    }

    // Station that fails on a specific input
    struct FailingStation {
        fail_on: i32,
    }

    impl Station for FailingStation {
        type Input = i32;
        type Output = i32;

        fn process(&mut self, input: i32) -> Result<Vec<i32>, StationError> {
            if input == self.fail_on {
                Err(StationError::Recoverable(format!("failed on {}", input)))
            } else {
                Ok(vec![input])
            }
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    // Station whose flush emits a sentinel
    struct FlushingStation;

    impl Station for FlushingStation {
        type Input = i32;
        type Output = i32;

        fn process(&mut self, input: i32) -> Result<Vec<i32>, StationError> {
            Ok(vec![input])
        }

        fn name(&self) -> &'static str {
            "flushing"
        }

        fn flush(&mut self) -> Vec<i32> {
            vec![-1]
        }
    }

    #[derive(Default)]
    struct MockReporter {
        errors: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl ErrorReporter for MockReporter {
        fn report(&self, station: &str, error: &StationError) {
            self.errors
                .lock()
                .unwrap()
                .push((station.to_string(), error.to_string()));
        }
    }

    #[test]
    fn test_runner_basic_processing() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let stop = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let runner = StationRunner::spawn(
            DoublerStation {
                shutdown_called: shutdown_flag.clone(),
            },
            input_rx,
            output_tx,
            SendMode::Block,
            test_ctx(stop.clone()),
        );

        assert_eq!(runner.name(), "doubler");

        input_tx.send(1).unwrap();
        input_tx.send(2).unwrap();
        input_tx.send(3).unwrap();
        drop(input_tx);

        let mut outputs = Vec::new();
        while let Ok(output) = output_rx.recv_timeout(Duration::from_secs(1)) {
            outputs.push(output);
            if outputs.len() == 3 {
                break;
            }
        }

        assert_eq!(outputs, vec![2, 4, 6]);
        runner.join().unwrap();
        assert!(shutdown_flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_runner_filtering() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let stop = Arc::new(AtomicBool::new(false));

        let runner = StationRunner::spawn(
            OddFilterStation,
            input_rx,
            output_tx,
            SendMode::Block,
            test_ctx(stop),
        );

        for i in 1..=5 {
            input_tx.send(i).unwrap();
        }
        drop(input_tx);

        let mut outputs = Vec::new();
        while let Ok(output) = output_rx.recv_timeout(Duration::from_secs(1)) {
            outputs.push(output);
            if outputs.len() == 3 {
                break;
            }
        }

        assert_eq!(outputs, vec![1, 3, 5]);
        runner.join().unwrap();
    }

    #[test]
    fn test_runner_reports_recoverable_and_continues() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let stop = Arc::new(AtomicBool::new(false));

        let reporter = Arc::new(MockReporter::default());
        let errors = reporter.errors.clone();
        let registry = HeartbeatRegistry::new();
        let ctx = WorkerContext {
            stop,
            heartbeat: registry.register("failing"),
            reporter,
        };

        let runner = StationRunner::spawn(
            FailingStation { fail_on: 2 },
            input_rx,
            output_tx,
            SendMode::Block,
            ctx,
        );

        input_tx.send(1).unwrap();
        input_tx.send(2).unwrap();
        input_tx.send(3).unwrap();
        drop(input_tx);

        let mut outputs = Vec::new();
        while let Ok(output) = output_rx.recv_timeout(Duration::from_secs(1)) {
            outputs.push(output);
            if outputs.len() == 2 {
                break;
            }
        }

        assert_eq!(outputs, vec![1, 3]);
        runner.join().unwrap();

        let reported = errors.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].0, "failing");
        assert!(reported[0].1.contains("failed on 2"));
    }

    #[test]
    fn test_runner_stops_on_stop_flag() {
        let (_input_tx, input_rx) = bounded::<i32>(10);
        let (output_tx, _output_rx) = bounded(10);
        let stop = Arc::new(AtomicBool::new(false));

        let runner = StationRunner::spawn(
            OddFilterStation,
            input_rx,
            output_tx,
            SendMode::Block,
            test_ctx(stop.clone()),
        );

        // The input channel stays open; only the stop flag ends the loop.
        stop.store(true, Ordering::SeqCst);
        runner.join().unwrap();
    }

    #[test]
    fn test_runner_flush_on_shutdown() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let stop = Arc::new(AtomicBool::new(false));

        let runner = StationRunner::spawn(
            FlushingStation,
            input_rx,
            output_tx,
            SendMode::Block,
            test_ctx(stop),
        );

        input_tx.send(42).unwrap();
        drop(input_tx);

        runner.join().unwrap();

        let mut outputs = Vec::new();
        while let Ok(output) = output_rx.try_recv() {
            outputs.push(output);
        }
        assert_eq!(outputs, vec![42, -1]);
    }

    #[test]
    fn test_drop_oldest_discards_head() {
        let (tx, rx) = bounded::<i32>(2);
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = test_ctx(stop);
        let dropped = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let mode = SendMode::DropOldest {
            rx: rx.clone(),
            dropped: dropped.clone(),
        };

        assert!(send_output(&tx, 1, &mode, &ctx));
        assert!(send_output(&tx, 2, &mode, &ctx));
        // Channel full: 1 is discarded to make room for 3.
        assert!(send_output(&tx, 3, &mode, &ctx));

        assert_eq!(rx.try_recv().unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap(), 3);
        assert!(rx.try_recv().is_err());
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_drop_oldest_never_exceeds_capacity() {
        let (tx, rx) = bounded::<i32>(4);
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = test_ctx(stop);
        let dropped = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let mode = SendMode::DropOldest {
            rx: rx.clone(),
            dropped: dropped.clone(),
        };

        for i in 0..100 {
            assert!(send_output(&tx, i, &mode, &ctx));
            assert!(rx.len() <= 4);
        }

        // The most recent items survive; everything else was discarded.
        let remaining: Vec<i32> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(remaining, vec![96, 97, 98, 99]);
        assert_eq!(dropped.load(Ordering::Relaxed), 96);
    }

    #[test]
    fn test_block_send_gives_up_on_stop() {
        let (tx, _rx) = bounded::<i32>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = test_ctx(stop.clone());

        tx.send(0).unwrap();
        stop.store(true, Ordering::SeqCst);
        // Channel is full and never drained; the stop flag unblocks the send.
        assert!(!send_output(&tx, 1, &SendMode::Block, &ctx));
    }
}
