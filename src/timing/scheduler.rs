use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};

use super::{Tempo, TempoModifier, Tick};
use crate::events::{EngineEvent, EventBus, PlaybackEvent};
use crate::midi::{MessageKind, MidiMessage, OutputPort};
use crate::mixer::{self, Gains};
use crate::song::{Measure, SongStructure};
use crate::trace::{TraceProducer, TraceSample};

/// Transport state guarded by [`SharedState::transport`].
#[derive(Debug)]
pub(crate) struct Transport {
    pub playing: bool,
    pub quit: bool,
    /// Bumped whenever playback is interrupted, so the scheduler can tell
    /// a fresh `play` apart from the session it was running.
    pub session: u64,
    pub current_measure: u32,
    pub start: u32,
    pub end: u32,
}

impl Transport {
    fn is_running(&self, session: u64) -> bool {
        self.playing && !self.quit && self.session == session
    }

    /// Ends the running session. Callers notify [`SharedState::wakeup`].
    pub fn interrupt(&mut self) {
        self.playing = false;
        self.session += 1;
    }
}

/// State shared between the scheduler thread and the control facade.
pub(crate) struct SharedState {
    pub transport: Mutex<Transport>,
    pub wakeup: Condvar,
    tempo: AtomicU64,
    pub tempo_modifier: ArcSwap<TempoModifier>,
    pub gains: ArcSwap<Gains>,
}

impl SharedState {
    pub fn new(start: u32, end: u32, tempo: Tempo) -> Self {
        Self {
            transport: Mutex::new(Transport {
                playing: false,
                quit: false,
                session: 0,
                current_measure: start,
                start,
                end,
            }),
            wakeup: Condvar::new(),
            tempo: AtomicU64::new(tempo.bpm().to_bits()),
            tempo_modifier: ArcSwap::from_pointee(TempoModifier::identity()),
            gains: ArcSwap::from_pointee(mixer::unity_gains()),
        }
    }

    /// Tempo as authored in the song at the current position.
    pub fn tempo(&self) -> Tempo {
        Tempo::new(f64::from_bits(self.tempo.load(Ordering::Relaxed)))
    }

    fn set_tempo(&self, tempo: Tempo) {
        self.tempo.store(tempo.bpm().to_bits(), Ordering::Relaxed);
    }

    pub fn adjusted_tempo(&self) -> Tempo {
        self.tempo_modifier.load().apply(self.tempo())
    }
}

/// Drives playback of a song on its own thread.
pub(crate) struct MidiPlayer {
    song: Arc<SongStructure>,
    port: OutputPort,
    shared: Arc<SharedState>,
    events: Arc<EventBus>,
    trace: Option<TraceProducer>,
}

/// Timing bookkeeping of one play session.
struct Session {
    id: u64,
    clock: Instant,
    expected: Duration,
    previous: Option<Tick>,
}

impl MidiPlayer {
    pub fn new(
        song: Arc<SongStructure>,
        port: OutputPort,
        shared: Arc<SharedState>,
        events: Arc<EventBus>,
        trace: Option<TraceProducer>,
    ) -> Self {
        Self {
            song,
            port,
            shared,
            events,
            trace,
        }
    }

    pub fn run(mut self) {
        while let Some(id) = self.wait_for_play() {
            tracing::info!(session = id, "playback started");
            self.play_session(id);
            if let Err(e) = self.port.panic() {
                tracing::warn!("panic failed: {}", e);
            }
            tracing::info!(session = id, "playback stopped");
        }
        tracing::debug!("scheduler finished");
    }

    /// Blocks while idle. Returns the session to play, `None` on quit.
    fn wait_for_play(&self) -> Option<u64> {
        let mut transport = self.shared.transport.lock();
        while !transport.playing && !transport.quit {
            self.shared.wakeup.wait(&mut transport);
        }
        (!transport.quit).then_some(transport.session)
    }

    fn play_session(&mut self, id: u64) {
        let mut session = Session {
            id,
            clock: Instant::now(),
            expected: Duration::ZERO,
            previous: None,
        };
        let mut number = self.shared.transport.lock().current_measure;
        let mut include_adjustments = true;

        loop {
            let song = self.song.clone();
            let Some(measure) = song.measure(number) else {
                tracing::warn!(measure = number, "no such measure");
                return;
            };
            if !self.enter_measure(&session, measure) {
                return;
            }

            let mut silent = true;
            for (tick, chunk) in measure.chunked(include_adjustments) {
                silent = false;
                let delta = session
                    .previous
                    .map_or(Tick::ZERO, |previous| tick - previous);
                let expected_delta = self.wait(&mut session, delta);
                if !self.sleep_until(session.id, session.clock + session.expected) {
                    return;
                }
                for event in chunk {
                    self.dispatch(event);
                    self.record(&session, measure.number, expected_delta, event);
                }
                session.previous = Some(tick);
            }

            // A bar without events still lasts its full length.
            if silent {
                let from = session.previous.unwrap_or(measure.start);
                self.wait(&mut session, measure.end() - from);
                if !self.sleep_until(session.id, session.clock + session.expected) {
                    return;
                }
                session.previous = Some(measure.end());
            }

            let Some((next, wrapped)) = self.next_measure(session.id, number) else {
                return;
            };
            include_adjustments = wrapped;
            if wrapped {
                tracing::debug!(from = number, to = next, "loop");
            }

            // Keep the time left in this measure when playback jumps
            // elsewhere instead of continuing with the following bar.
            if next != number + 1 {
                if let (Some(previous), Some(following)) =
                    (session.previous, self.song.measure(next))
                {
                    session.previous = Some(following.start - (measure.end() - previous));
                }
            }
            number = next;
        }
    }

    /// Adds the length of `delta` at the current tempo to the session's
    /// expected elapsed time.
    fn wait(&self, session: &mut Session, delta: Tick) -> Duration {
        let tempo = self.shared.adjusted_tempo();
        let expected_delta = delta.to_duration(self.song.ticks_per_beat(), tempo);
        session.expected += expected_delta;
        expected_delta
    }

    /// Publishes the measure unless the session was interrupted meanwhile.
    fn enter_measure(&self, session: &Session, measure: &Measure) -> bool {
        let mut transport = self.shared.transport.lock();
        if !transport.is_running(session.id) {
            return false;
        }
        transport.current_measure = measure.number;

        tracing::debug!(
            measure = measure.number,
            time_signature = %measure.time_signature,
            "measure"
        );
        self.shared.set_tempo(measure.initial_tempo);
        // Under the lock, so a concurrent stop cannot be followed by this.
        self.events.publish(PlaybackEvent::Measure {
            measure: measure.number,
            time_signature: measure.time_signature,
        });
        self.publish_tempo();
        true
    }

    /// Measure following `current` in the loop range, with whether it wrapped.
    fn next_measure(&self, session: u64, current: u32) -> Option<(u32, bool)> {
        let transport = self.shared.transport.lock();
        if !transport.is_running(session) {
            return None;
        }
        if current >= transport.end || current < transport.start {
            Some((transport.start, true))
        } else {
            Some((current + 1, false))
        }
    }

    /// Returns false when the session was interrupted before `deadline`.
    fn sleep_until(&self, session: u64, deadline: Instant) -> bool {
        let mut transport = self.shared.transport.lock();
        loop {
            if !transport.is_running(session) {
                return false;
            }
            if Instant::now() >= deadline {
                return true;
            }
            self.shared.wakeup.wait_until(&mut transport, deadline);
        }
    }

    fn dispatch(&self, event: &EngineEvent) {
        let message = match event {
            EngineEvent::Message(message) => {
                if let MessageKind::Tempo(tempo) = message.kind() {
                    self.shared.set_tempo(*tempo);
                    tracing::debug!("tempo {}", tempo);
                    self.publish_tempo();
                }
                Cow::Borrowed(message)
            }
            EngineEvent::Click { ticks, click } => {
                Cow::Owned(MidiMessage::note(*ticks, click.note()))
            }
        };

        let gains = self.shared.gains.load();
        let scaled = event
            .track()
            .and_then(|track| mixer::apply_gain(&message, track, &gains));

        if let Err(e) = self.port.send(scaled.as_ref().unwrap_or(&*message)) {
            tracing::warn!("send failed: {}", e);
        }
    }

    fn record(
        &mut self,
        session: &Session,
        measure: u32,
        expected_delta: Duration,
        event: &EngineEvent,
    ) {
        if let Some(trace) = self.trace.as_mut() {
            let message = match event {
                EngineEvent::Message(message) => format!("{:?}", message.kind()),
                EngineEvent::Click { click, .. } => format!("click {:?}", click),
            };
            trace.record(TraceSample {
                ticks: event.ticks(),
                elapsed: session.clock.elapsed(),
                expected: session.expected,
                expected_delta,
                measure,
                message,
            });
        }
    }

    fn publish_tempo(&self) {
        self.events.publish(PlaybackEvent::Tempo {
            tempo: self.shared.tempo(),
            adjusted: self.shared.adjusted_tempo(),
        });
    }
}
