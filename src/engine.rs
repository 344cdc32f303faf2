use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::events::{EngineTrack, EventBus, PlaybackEvent};
use crate::midi::{MidiFile, OutputPort};
use crate::mixer::{Mixer, MixerChannel};
use crate::song::SongStructure;
use crate::timing::{MidiPlayer, SharedState, Tempo, TempoModifier};
use crate::trace::TimingTrace;
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Owns the process-wide output port and hands out players for songs.
pub struct PlaybackEngine {
    port: OutputPort,
    config: PlayerConfig,
}

impl PlaybackEngine {
    pub fn new(port: OutputPort, config: PlayerConfig) -> Self {
        Self { port, config }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Loads a song and loops over all of its measures.
    pub fn load(&self, path: &Path) -> Result<PlayerControl> {
        let file = MidiFile::open(path)?;
        tracing::info!("loaded {}", path.display());
        self.create_player(&file, 1, None)
    }

    /// Loops measures `from..=to`, up to the last measure when `to` is unset.
    pub fn create_player(
        &self,
        file: &MidiFile,
        from: u32,
        to: Option<u32>,
    ) -> Result<PlayerControl> {
        let song = SongStructure::with_click(file)?;
        let last = song.last_measure();
        let end = to.unwrap_or(last);
        check_range(from, end, last)?;

        let trace = self
            .config
            .trace
            .as_deref()
            .map(TimingTrace::create)
            .transpose()?;
        let (trace, producer) = match trace {
            Some((trace, producer)) => (Some(trace), Some(producer)),
            None => (None, None),
        };

        let initial_tempo = song
            .measure(from)
            .map_or(Tempo::new(120.0), |m| m.initial_tempo);
        let song = Arc::new(song);
        let shared = Arc::new(SharedState::new(from, end, initial_tempo));
        let events = Arc::new(EventBus::default());

        let player = MidiPlayer::new(
            song.clone(),
            self.port.clone(),
            shared.clone(),
            events.clone(),
            producer,
        );
        let scheduler = std::thread::Builder::new()
            .name("barloop-scheduler".into())
            .spawn(move || player.run())?;

        tracing::info!(measures = last, from, to = end, "player ready");

        let control = PlayerControl {
            song,
            shared,
            events,
            mixer: Mutex::new(Mixer::new()),
            scheduler: Mutex::new(Some(scheduler)),
            _trace: trace,
        };
        control.set_tempo_modifier(TempoModifier::multiplier(self.config.tempo_multiplier));
        let click = &self.config.click;
        control.update_mixer_channel(EngineTrack::Click, |c| {
            c.with_muted(click.muted).with_volume(click.volume)
        });
        Ok(control)
    }
}

fn check_range(start: u32, end: u32, last: u32) -> Result<()> {
    if start < 1 || start > end || end > last {
        return Err(Error::InvalidMeasureRange { start, end, last });
    }
    Ok(())
}

/// Transport and mixer controls of one loaded song.
///
/// Every method may be called from any thread while the scheduler plays.
/// Dropping the control stops playback and joins the scheduler thread.
pub struct PlayerControl {
    song: Arc<SongStructure>,
    shared: Arc<SharedState>,
    events: Arc<EventBus>,
    mixer: Mutex<Mixer>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    _trace: Option<TimingTrace>,
}

impl PlayerControl {
    pub fn song(&self) -> &SongStructure {
        &self.song
    }

    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.transport.lock().playing
    }

    pub fn play(&self) {
        let mut transport = self.shared.transport.lock();
        if transport.playing || transport.quit {
            return;
        }
        transport.playing = true;
        // Published under the lock so it precedes the first measure event.
        self.events.publish(PlaybackEvent::Play { playing: true });
        self.shared.wakeup.notify_all();
    }

    pub fn stop(&self) {
        let mut transport = self.shared.transport.lock();
        if !transport.playing {
            return;
        }
        transport.interrupt();
        self.events.publish(PlaybackEvent::Play { playing: false });
        self.shared.wakeup.notify_all();
    }

    /// Stops playback for good and waits for the scheduler to exit.
    pub fn quit(&self) {
        self.stop();
        {
            let mut transport = self.shared.transport.lock();
            transport.quit = true;
            transport.session += 1;
        }
        self.shared.wakeup.notify_all();

        if let Some(scheduler) = self.scheduler.lock().take() {
            if scheduler.join().is_err() {
                tracing::error!("scheduler thread panicked");
            }
        }
    }

    pub fn set_tempo_modifier(&self, modifier: TempoModifier) {
        self.shared.tempo_modifier.store(Arc::new(modifier));
        self.events.publish(PlaybackEvent::Tempo {
            tempo: self.shared.tempo(),
            adjusted: self.shared.adjusted_tempo(),
        });
    }

    /// Moves to the measure computed from the current one, clamped into the
    /// loop range. Playback resumes there if it was running.
    pub fn jump_to_bar<F>(&self, f: F)
    where
        F: FnOnce(u32) -> u32,
    {
        let was_playing = self.is_playing();
        self.stop();
        {
            let mut transport = self.shared.transport.lock();
            let target = f(transport.current_measure);
            transport.current_measure = target.clamp(transport.start, transport.end);
            tracing::debug!(measure = transport.current_measure, "jump");
        }
        if was_playing {
            self.play();
        }
    }

    /// Sets the loop range and moves to its start. An invalid range is
    /// rejected and the previous one stays in effect.
    pub fn reset_measure_range(&self, start: u32, end: u32) -> Result<()> {
        check_range(start, end, self.song.last_measure())?;

        let was_playing = self.is_playing();
        self.stop();
        {
            let mut transport = self.shared.transport.lock();
            transport.start = start;
            transport.end = end;
            transport.current_measure = start;
        }
        tracing::info!(start, end, "measure range");
        if was_playing {
            self.play();
        }
        Ok(())
    }

    pub fn current_measure(&self) -> u32 {
        self.shared.transport.lock().current_measure
    }

    pub fn measure_range(&self) -> (u32, u32) {
        let transport = self.shared.transport.lock();
        (transport.start, transport.end)
    }

    pub fn current_tempo(&self) -> Tempo {
        self.shared.tempo()
    }

    pub fn adjusted_tempo(&self) -> Tempo {
        self.shared.adjusted_tempo()
    }

    /// Merges the given channels into the mixer.
    pub fn update_mixer<I>(&self, channels: I)
    where
        I: IntoIterator<Item = MixerChannel>,
    {
        let mut mixer = self.mixer.lock();
        for channel in channels {
            mixer.update_channel(channel.track, |_| channel);
        }
        self.shared.gains.store(Arc::new(mixer.gains()));
    }

    pub fn update_mixer_channel<F>(&self, track: EngineTrack, update: F) -> MixerChannel
    where
        F: FnOnce(MixerChannel) -> MixerChannel,
    {
        let mut mixer = self.mixer.lock();
        let channel = mixer.update_channel(track, update);
        self.shared.gains.store(Arc::new(mixer.gains()));
        channel
    }

    pub fn mixer_channel(&self, track: EngineTrack) -> MixerChannel {
        self.mixer.lock().channel(track)
    }
}

impl Drop for PlayerControl {
    fn drop(&mut self) {
        self.quit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::testing::{RecordingPort, Sent};
    use crate::midi::{Adjustment, MidiMessage, Note, OnOff};
    use crate::song::fixtures::{self, adjust, note, tempo, ts};
    use crate::timing::TimeSignature;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn engine() -> (PlaybackEngine, RecordingPort) {
        let port = RecordingPort::default();
        let engine = PlaybackEngine::new(OutputPort::new(port.clone()), PlayerConfig::default());
        (engine, port)
    }

    fn player(engine: &PlaybackEngine, from: u32, to: Option<u32>) -> PlayerControl {
        let file = fixtures::changing_signatures();
        engine.create_player(&file, from, to).unwrap()
    }

    /// A measure of 4/4 at 480 ticks per beat lasts 4ms.
    fn fast(control: &PlayerControl) {
        control.set_tempo_modifier(TempoModifier::constant(Tempo::new(60_000.0)));
    }

    fn measures(rx: &Receiver<PlaybackEvent>, count: usize) -> Vec<u32> {
        let deadline = Instant::now() + TIMEOUT;
        let mut seen = Vec::new();
        while seen.len() < count {
            if let PlaybackEvent::Measure { measure, .. } = rx.recv_deadline(deadline).unwrap() {
                seen.push(measure);
            }
        }
        seen
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + TIMEOUT;
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn sent_messages(port: &RecordingPort) -> Vec<MidiMessage> {
        port.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Message(m) => Some(m),
                Sent::Panic => None,
            })
            .collect()
    }

    fn sounding(message: &MidiMessage, channel: u8, key: u8) -> bool {
        message
            .as_note()
            .is_some_and(|n| n.is_sounding() && n.channel == channel && n.key == key)
    }

    #[test]
    fn loops_within_range() {
        let (engine, _port) = engine();
        let control = player(&engine, 1, None);
        fast(&control);
        control.reset_measure_range(3, 5).unwrap();

        let rx = control.subscribe();
        control.play();
        assert_eq!(measures(&rx, 7), vec![3, 4, 5, 3, 4, 5, 3]);
        control.stop();
    }

    #[test]
    fn starts_playing_and_reports_state() {
        let (engine, _port) = engine();
        let control = player(&engine, 2, Some(3));
        fast(&control);
        let rx = control.subscribe();

        assert!(!control.is_playing());
        control.play();
        assert!(control.is_playing());
        assert_eq!(
            rx.recv_timeout(TIMEOUT).unwrap(),
            PlaybackEvent::Play { playing: true }
        );

        control.stop();
        assert!(!control.is_playing());
        let stopped = rx
            .iter()
            .position(|e| e == PlaybackEvent::Play { playing: false });
        assert!(stopped.is_some());
        assert!(rx.try_iter().all(|e| !matches!(e, PlaybackEvent::Measure { .. })));
    }

    #[test]
    fn stop_silences_output() {
        let (engine, port) = engine();
        let control = player(&engine, 1, None);
        fast(&control);
        let rx = control.subscribe();
        control.play();
        measures(&rx, 2);

        control.stop();
        wait_for(|| port.panics() >= 1);
        assert!(port.sent().iter().any(|s| matches!(s, Sent::Message(_))));
    }

    #[test]
    fn stop_interrupts_long_sleep() {
        let (engine, port) = engine();
        let control = player(&engine, 1, None);
        control.set_tempo_modifier(TempoModifier::constant(Tempo::new(0.5)));
        let rx = control.subscribe();
        control.play();
        measures(&rx, 1);

        let stopped_at = Instant::now();
        control.stop();
        wait_for(|| port.panics() >= 1);
        assert!(stopped_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn invalid_range_keeps_previous_range() {
        let (engine, _port) = engine();
        let control = player(&engine, 1, None);
        control.reset_measure_range(2, 4).unwrap();
        control.jump_to_bar(|_| 3);

        for (start, end) in [(5, 4), (0, 3), (3, 8)] {
            assert!(matches!(
                control.reset_measure_range(start, end),
                Err(Error::InvalidMeasureRange { last: 7, .. })
            ));
        }
        assert_eq!(control.measure_range(), (2, 4));
        assert_eq!(control.current_measure(), 3);
    }

    #[test]
    fn jump_clamps_into_range() {
        let (engine, _port) = engine();
        let control = player(&engine, 1, None);

        for (start, end) in [(1, 7), (2, 5), (4, 4), (6, 7)] {
            control.reset_measure_range(start, end).unwrap();
            control.jump_to_bar(|m| m);
            assert!((start..=end).contains(&control.current_measure()));
            control.jump_to_bar(|m| m + 10);
            assert_eq!(control.current_measure(), end);
            control.jump_to_bar(|m| m.saturating_sub(10));
            assert_eq!(control.current_measure(), start);
        }
    }

    #[test]
    fn jump_while_playing_resumes_at_target() {
        let (engine, _port) = engine();
        let control = player(&engine, 1, None);
        control.set_tempo_modifier(TempoModifier::constant(Tempo::new(1.0)));
        let rx = control.subscribe();
        control.play();
        assert_eq!(measures(&rx, 1), vec![1]);

        control.jump_to_bar(|_| 6);
        assert!(control.is_playing());
        assert_eq!(measures(&rx, 1), vec![6]);
    }

    #[test]
    fn load_reports_missing_file() {
        let (engine, _port) = engine();
        let result = engine.load(Path::new("/nonexistent/song.mid"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn rejects_invalid_initial_range() {
        let (engine, _port) = engine();
        let file = fixtures::changing_signatures();
        assert!(engine.create_player(&file, 0, None).is_err());
        assert!(engine.create_player(&file, 4, Some(3)).is_err());
        assert!(engine.create_player(&file, 1, Some(8)).is_err());
    }

    #[test]
    fn rejects_zero_resolution() {
        let (engine, _port) = engine();
        let mut messages = vec![ts(0, 4, 4), tempo(0, 120.0)];
        messages.extend(note(0, 1, 60, 5));
        let file = MidiFile::new(0, messages);
        assert!(matches!(
            engine.create_player(&file, 1, None),
            Err(Error::ZeroTicksPerBeat)
        ));
    }

    #[test]
    fn tempo_modifier_changes_adjusted_tempo() {
        let (engine, _port) = engine();
        let control = player(&engine, 1, None);
        let rx = control.subscribe();
        assert_eq!(control.current_tempo(), Tempo::new(120.0));

        control.set_tempo_modifier(TempoModifier::multiplier(0.5));
        assert_eq!(control.adjusted_tempo(), Tempo::new(60.0));
        assert_eq!(
            rx.try_recv().unwrap(),
            PlaybackEvent::Tempo {
                tempo: Tempo::new(120.0),
                adjusted: Tempo::new(60.0),
            }
        );
    }

    #[test]
    fn tempo_change_inside_measure_is_published() {
        let mut messages = vec![ts(0, 4, 4), tempo(0, 120.0), tempo(960, 60.0)];
        messages.extend(note(0, 1, 60, 240));
        messages.extend(note(960, 1, 62, 240));
        messages.extend(note(1440, 1, 64, 240));
        let file = MidiFile::new(480, messages);

        let (engine, _port) = engine();
        let control = engine.create_player(&file, 1, None).unwrap();
        // Fast until the change, then slow enough to stay put.
        control.set_tempo_modifier(TempoModifier::new(|tempo| {
            if tempo.bpm() > 100.0 {
                Tempo::new(60_000.0)
            } else {
                Tempo::new(0.5)
            }
        }));
        let rx = control.subscribe();
        control.play();

        let deadline = Instant::now() + TIMEOUT;
        let adjusted = loop {
            match rx.recv_deadline(deadline).unwrap() {
                PlaybackEvent::Tempo { tempo, adjusted } if tempo == Tempo::new(60.0) => {
                    break adjusted;
                }
                _ => {}
            }
        };
        assert_eq!(adjusted, Tempo::new(0.5));
        assert_eq!(control.current_tempo(), Tempo::new(60.0));
        assert_eq!(control.adjusted_tempo(), Tempo::new(0.5));
        assert_eq!(control.current_measure(), 1);
    }

    #[test]
    fn starting_mid_song_announces_measure_and_its_tempo() {
        let (engine, port) = engine();
        let control = player(&engine, 5, Some(5));
        fast(&control);
        let rx = control.subscribe();
        control.play();

        let first: Vec<PlaybackEvent> = (0..3)
            .map(|_| rx.recv_timeout(TIMEOUT).unwrap())
            .collect();
        assert_eq!(
            first,
            vec![
                PlaybackEvent::Play { playing: true },
                PlaybackEvent::Measure {
                    measure: 5,
                    time_signature: TimeSignature::new(5, 8),
                },
                PlaybackEvent::Tempo {
                    tempo: Tempo::new(90.0),
                    adjusted: Tempo::new(60_000.0),
                },
            ]
        );
        measures(&rx, 1);
        control.quit();

        let sent = port.sent();
        assert_eq!(sent.last(), Some(&Sent::Panic));
        assert!(sent_messages(&port).iter().any(|m| sounding(m, 2, 40)));
    }

    #[test]
    fn adjustments_precede_notes_on_start_and_wrap() {
        let program = Adjustment::program(1, 5);
        let pan = Adjustment::controller(1, 10, 20);
        let wheel = Adjustment::pitch_wheel(1, 9000);
        let mut messages = vec![
            ts(0, 4, 4),
            tempo(0, 120.0),
            adjust(0, program),
            adjust(0, pan),
        ];
        messages.extend(note(0, 1, 60, 240));
        messages.push(adjust(960, wheel));
        messages.extend(note(1920, 1, 62, 240));
        messages.extend(note(3840, 1, 64, 240));
        let file = MidiFile::new(480, messages);

        let (engine, port) = engine();
        let control = engine.create_player(&file, 2, Some(3)).unwrap();
        fast(&control);
        let rx = control.subscribe();
        control.play();
        assert_eq!(measures(&rx, 4), vec![2, 3, 2, 3]);
        control.stop();
        wait_for(|| port.panics() >= 1);

        let sent = sent_messages(&port);
        let bar_two: Vec<usize> = sent
            .iter()
            .enumerate()
            .filter(|(_, m)| sounding(m, 1, 62))
            .map(|(i, _)| i)
            .collect();
        assert!(bar_two.len() >= 2);

        // Before the first pass over measure 2 and again after the wrap.
        for (from, to) in [(0, bar_two[0]), (bar_two[0] + 1, bar_two[1])] {
            let replayed: Vec<Adjustment> = sent[from..to]
                .iter()
                .filter_map(MidiMessage::as_adjustment)
                .collect();
            for expected in [program, pan, wheel] {
                assert!(
                    replayed.contains(&expected),
                    "{expected:?} missing in {from}..{to}"
                );
            }
        }
    }

    #[test]
    fn silent_measures_take_their_length() {
        // 1/16 bars have no clicks, so measures 2 to 5 are empty.
        let mut messages = vec![ts(0, 1, 16), tempo(0, 120.0)];
        messages.extend(note(0, 1, 60, 60));
        messages.extend(note(600, 1, 62, 60));
        let file = MidiFile::new(480, messages);

        let (engine, _port) = engine();
        let control = engine.create_player(&file, 2, Some(4)).unwrap();
        assert_eq!(control.song().last_measure(), 6);
        control.set_tempo_modifier(TempoModifier::constant(Tempo::new(1.0)));
        let rx = control.subscribe();
        control.play();
        std::thread::sleep(Duration::from_millis(100));
        control.stop();

        let entered = rx
            .try_iter()
            .filter(|e| matches!(e, PlaybackEvent::Measure { .. }))
            .count();
        assert!(entered <= 2, "{entered} measures in 100ms");
    }

    #[test]
    fn muted_click_plays_silent() {
        let port = RecordingPort::default();
        let config = PlayerConfig {
            click: crate::config::ClickConfig {
                muted: true,
                volume: 1.0,
            },
            ..PlayerConfig::default()
        };
        let engine = PlaybackEngine::new(OutputPort::new(port.clone()), config);
        let control = player(&engine, 1, Some(1));
        assert!(control.mixer_channel(EngineTrack::Click).muted);
        fast(&control);

        let rx = control.subscribe();
        control.play();
        measures(&rx, 2);
        control.stop();
        wait_for(|| port.panics() >= 1);

        let clicks: Vec<u8> = sent_messages(&port)
            .iter()
            .filter_map(MidiMessage::as_note)
            .filter(|n| n.channel == 10)
            .map(|n| n.velocity)
            .collect();
        assert!(!clicks.is_empty());
        assert!(clicks.iter().all(|v| *v == 0));
    }

    #[test]
    fn mixer_gain_scales_channel_notes() {
        let (engine, port) = engine();
        let control = player(&engine, 1, Some(1));
        control.update_mixer_channel(EngineTrack::Midi(1), |c| c.with_volume(0.5));
        fast(&control);

        let rx = control.subscribe();
        control.play();
        measures(&rx, 2);
        control.stop();
        wait_for(|| port.panics() >= 1);

        let notes: Vec<Note> = sent_messages(&port)
            .iter()
            .filter_map(MidiMessage::as_note)
            .collect();
        let melody: Vec<&Note> = notes.iter().filter(|n| n.channel == 1).collect();
        assert!(melody.iter().any(|n| n.is_sounding()));
        for played in melody {
            match played.on_off {
                OnOff::On => assert_eq!(played.velocity, 50),
                OnOff::Off => assert_eq!(played.velocity, 0),
            }
        }
        assert!(notes.iter().any(|n| n.channel == 10 && n.velocity == 100));
    }

    #[test]
    fn mixer_updates_merge_by_track() {
        let (engine, _port) = engine();
        let control = player(&engine, 1, None);
        control.update_mixer([
            MixerChannel::new(EngineTrack::Midi(1)).with_volume(2.0),
            MixerChannel::new(EngineTrack::Midi(2)).with_solo(true),
        ]);
        control.update_mixer_channel(EngineTrack::Midi(1), |c| c.with_solo(true));

        let first = control.mixer_channel(EngineTrack::Midi(1));
        assert_eq!((first.volume_adjustment, first.solo), (2.0, true));
        assert!(control.mixer_channel(EngineTrack::Midi(2)).solo);
        assert!(!control.mixer_channel(EngineTrack::Midi(3)).solo);
    }

    #[test]
    fn quit_joins_scheduler() {
        let (engine, _port) = engine();
        let control = player(&engine, 1, None);
        fast(&control);
        control.play();
        control.quit();
        assert!(!control.is_playing());
        assert!(control.scheduler.lock().is_none());

        control.play();
        assert!(!control.is_playing());
    }
}
