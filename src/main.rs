use std::path::PathBuf;
use std::time::Duration;

use barloop::midi::{MidiFile, MidirPort, OutputPort};
use barloop::{
    EngineTrack, PlaybackEngine, PlaybackEvent, PlayerConfig, PlayerControl, Result, TempoModifier,
};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: barloop <file.mid> [config.ron] [from] [to]";
const TEMPO_STEP: f64 = 0.05;

struct Args {
    song: PathBuf,
    config: Option<PathBuf>,
    from: u32,
    to: Option<u32>,
}

fn parse_args() -> Option<Args> {
    let mut args = std::env::args().skip(1);
    let song = PathBuf::from(args.next()?);
    let mut config = None;
    let mut bounds = Vec::new();
    for arg in args {
        match arg.parse::<u32>() {
            Ok(measure) => bounds.push(measure),
            Err(_) => config = Some(PathBuf::from(arg)),
        }
    }
    Some(Args {
        song,
        config,
        from: bounds.first().copied().unwrap_or(1),
        to: bounds.get(1).copied(),
    })
}

fn main() {
    let Some(args) = parse_args() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    if let Err(e) = run(args) {
        eprintln!("barloop: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let port = MidirPort::connect(&config.client_name, config.output_port.as_deref())?;
    let engine = PlaybackEngine::new(OutputPort::new(port), config);

    let file = MidiFile::open(&args.song)?;
    let control = engine.create_player(&file, args.from, args.to)?;
    for (track, instruments) in control.song().track_instruments() {
        for (program, name) in instruments {
            tracing::info!("{:?}: {} {}", track, program, name);
        }
    }

    let events = control.subscribe();
    std::thread::spawn(move || {
        for event in events {
            match event {
                PlaybackEvent::Play { playing } => tracing::info!(playing, "transport"),
                PlaybackEvent::Measure { measure, time_signature } => {
                    tracing::info!("measure {} ({})", measure, time_signature)
                }
                PlaybackEvent::Tempo { tempo, adjusted } => {
                    tracing::info!("tempo {} -> {}", tempo, adjusted)
                }
            }
        }
    });

    terminal::enable_raw_mode()?;
    let result = key_loop(&control, engine.config().tempo_multiplier);
    terminal::disable_raw_mode()?;
    control.quit();
    result
}

fn key_loop(control: &PlayerControl, mut multiplier: f64) -> Result<()> {
    loop {
        if !event::poll(Duration::from_millis(200))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Ok(());
        }

        match key.code {
            KeyCode::Char(' ') => {
                if control.is_playing() {
                    control.stop();
                } else {
                    control.play();
                }
            }
            KeyCode::Left => control.jump_to_bar(|m| m.saturating_sub(1)),
            KeyCode::Right => control.jump_to_bar(|m| m + 1),
            KeyCode::Home => {
                let (start, _) = control.measure_range();
                control.jump_to_bar(|_| start);
            }
            KeyCode::Up | KeyCode::Down => {
                let step = if key.code == KeyCode::Up {
                    TEMPO_STEP
                } else {
                    -TEMPO_STEP
                };
                multiplier = (multiplier + step)
                    .clamp(TempoModifier::MIN_MULTIPLIER, TempoModifier::MAX_MULTIPLIER);
                control.set_tempo_modifier(TempoModifier::multiplier(multiplier));
            }
            KeyCode::Char('c') => {
                let click =
                    control.update_mixer_channel(EngineTrack::Click, |c| c.with_muted(!c.muted));
                tracing::info!(muted = click.muted, "click");
            }
            KeyCode::Char(digit @ '1'..='9') => {
                let channel = digit as u8 - b'0';
                let mixed = control
                    .update_mixer_channel(EngineTrack::Midi(channel), |c| c.with_solo(!c.solo));
                tracing::info!(channel, solo = mixed.solo, "solo");
            }
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            _ => {}
        }
    }
}
