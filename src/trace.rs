use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};

use crate::error::Result;
use crate::timing::Tick;

const CAPACITY: usize = 16 * 1024;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const HEADING: &str = "ticks;timestamp ms;expected ts ms;lag ms;actual delta ms;\
                       expected delta ms;delta diff ms;measure;message";

/// Timing of one dispatched event, relative to the start of its session.
#[derive(Debug, Clone)]
pub struct TraceSample {
    pub ticks: Tick,
    pub elapsed: Duration,
    pub expected: Duration,
    pub expected_delta: Duration,
    pub measure: u32,
    pub message: String,
}

/// Scheduler side of the trace. Never blocks: samples are dropped when the
/// flusher falls behind.
pub struct TraceProducer(HeapProd<TraceSample>);

impl TraceProducer {
    pub fn record(&mut self, sample: TraceSample) {
        let _ = self.0.try_push(sample);
    }
}

/// Background writer appending trace samples to a CSV file.
pub struct TimingTrace {
    running: Arc<AtomicBool>,
    flusher: Option<JoinHandle<()>>,
}

impl TimingTrace {
    pub fn create(path: &Path) -> Result<(Self, TraceProducer)> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{HEADING}")?;

        let (producer, consumer) = HeapRb::<TraceSample>::new(CAPACITY).split();
        let running = Arc::new(AtomicBool::new(true));

        let flusher = thread::Builder::new().name("barloop-trace".into()).spawn({
            let running = running.clone();
            move || flush_loop(consumer, writer, running)
        })?;

        tracing::info!("writing timing trace to {}", path.display());
        Ok((
            Self {
                running,
                flusher: Some(flusher),
            },
            TraceProducer(producer),
        ))
    }
}

impl Drop for TimingTrace {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(flusher) = self.flusher.take() {
            let _ = flusher.join();
        }
    }
}

fn flush_loop<W: Write>(
    mut consumer: HeapCons<TraceSample>,
    mut writer: W,
    running: Arc<AtomicBool>,
) {
    let mut rows = Rows::default();
    let mut last_flush = Instant::now();

    loop {
        let stopping = !running.load(Ordering::Acquire);
        if stopping || last_flush.elapsed() >= FLUSH_INTERVAL {
            let written = consumer
                .pop_iter()
                .try_for_each(|sample| writeln!(writer, "{}", rows.format(&sample)))
                .and_then(|_| writer.flush());
            if let Err(e) = written {
                tracing::warn!("timing trace stopped: {}", e);
                return;
            }
            last_flush = Instant::now();
        }
        if stopping {
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Formats samples as CSV rows; deltas are taken against the previous row.
#[derive(Default)]
struct Rows {
    previous: Option<(Duration, Duration)>,
}

impl Rows {
    fn format(&mut self, sample: &TraceSample) -> String {
        let actual_delta = match self.previous {
            Some((elapsed, _)) => millis(sample.elapsed) - millis(elapsed),
            None => 0.0,
        };
        self.previous = Some((sample.elapsed, sample.expected));

        let expected_delta = millis(sample.expected_delta);
        format!(
            "{};{:.3};{:.3};{:.3};{:.3};{:.3};{:.3};{};{}",
            sample.ticks,
            millis(sample.elapsed),
            millis(sample.expected),
            millis(sample.elapsed) - millis(sample.expected),
            actual_delta,
            expected_delta,
            actual_delta - expected_delta,
            sample.measure,
            sample.message,
        )
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
