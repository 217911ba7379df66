//! keytutor binary
//!
//! Plays a reference file, records and scores a performance against it,
//! walks through it chord by chord, or just exports what was played.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use keyconf::TutorConfig;
use keytutor::{
    list_input_ports, list_output_ports, load_reference, parse_tempo, score_with,
    ActiveMidiInput, ActiveMidiOutput, CaptureMode, LearningState, LoggingSynth, NoteOutput,
    PlaybackScheduler, PlaybackState, RawMessage, RecordedNote, RecordingOutcome, ReferenceSong,
    ScoreReport, Session, SystemClock, Tolerances,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Piano practice tutor
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file used in place of ./keytutor.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (overrides the configured level; RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List MIDI input and output ports
    Ports,

    /// Show the notes of a MIDI file
    Inspect {
        file: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Play a MIDI file
    Play {
        file: PathBuf,

        /// Tempo multiplier (1.0 = file tempo)
        #[arg(long)]
        tempo: Option<String>,

        /// Output port name pattern
        #[arg(long, env = "KEYTUTOR_MIDI_OUTPUT")]
        output: Option<String>,
    },

    /// Play a MIDI file while recording, then score the take
    Test {
        file: PathBuf,

        /// Input port name pattern
        #[arg(long, env = "KEYTUTOR_MIDI_INPUT")]
        input: Option<String>,

        /// Output port name pattern
        #[arg(long, env = "KEYTUTOR_MIDI_OUTPUT")]
        output: Option<String>,

        /// Tempo multiplier (1.0 = file tempo)
        #[arg(long)]
        tempo: Option<String>,

        /// Print the score report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record until Ctrl-C and write the take as a MIDI file
    Record {
        /// Input port name pattern
        #[arg(long, env = "KEYTUTOR_MIDI_INPUT")]
        input: Option<String>,

        /// Directory for the exported file
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Step through a MIDI file one chord at a time
    Learn {
        file: PathBuf,

        /// Input port name pattern
        #[arg(long, env = "KEYTUTOR_MIDI_INPUT")]
        input: Option<String>,

        /// Output port name pattern (key lights / cue sounds)
        #[arg(long, env = "KEYTUTOR_MIDI_OUTPUT")]
        output: Option<String>,
    },

    /// Score a previously exported take against a reference
    Score {
        reference: PathBuf,
        take: PathBuf,

        /// Print the score report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = TutorConfig::load_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.telemetry.log_level = level.clone();
    }
    init_tracing(&config.telemetry.log_level)?;

    match cli.command {
        Commands::Ports => show_ports(),
        Commands::Inspect { file, json } => inspect(&file, json),
        Commands::Play {
            file,
            tempo,
            output,
        } => play(&config, &file, tempo.as_deref(), output.or(config.midi.output.clone())).await,
        Commands::Test {
            file,
            input,
            output,
            tempo,
            json,
        } => {
            let input = require_port(input.or(config.midi.input.clone()), "--input")?;
            let output = output.or(config.midi.output.clone());
            test(&config, &file, &input, output, tempo.as_deref(), json).await
        }
        Commands::Record { input, out_dir } => {
            let input = require_port(input.or(config.midi.input.clone()), "--input")?;
            let out_dir = out_dir.unwrap_or_else(|| config.paths.export_dir.clone());
            record(&config, &input, &out_dir).await
        }
        Commands::Learn {
            file,
            input,
            output,
        } => {
            let input = require_port(input.or(config.midi.input.clone()), "--input")?;
            let output = require_port(output.or(config.midi.output.clone()), "--output")?;
            learn(&config, &file, &input, &output).await
        }
        Commands::Score {
            reference,
            take,
            json,
        } => score_file(&config, &reference, &take, json),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log filter: {}", level))?;

    // Logs go to stderr so JSON output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn require_port(port: Option<String>, flag: &str) -> Result<String> {
    match port {
        Some(p) => Ok(p),
        None => bail!("No MIDI port given: pass {} or set it in [midi] config", flag),
    }
}

fn read_song(path: &Path) -> Result<ReferenceSong> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    load_reference(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

fn open_output(pattern: Option<&str>) -> Result<Option<Arc<dyn NoteOutput>>> {
    let Some(pattern) = pattern else {
        return Ok(None);
    };
    let output: Arc<dyn NoteOutput> = Arc::new(
        ActiveMidiOutput::open(pattern)
            .with_context(|| format!("Failed to open MIDI output '{}'", pattern))?,
    );
    Ok(Some(output))
}

/// Open an input whose messages land on a channel, in arrival order.
fn open_input(pattern: &str) -> Result<(ActiveMidiInput, mpsc::UnboundedReceiver<RawMessage>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let input = ActiveMidiInput::open(
        pattern,
        Box::new(move |_timestamp_us, msg| {
            let _ = tx.send(msg);
        }),
    )
    .with_context(|| format!("Failed to open MIDI input '{}'", pattern))?;
    Ok((input, rx))
}

fn resolve_tempo(config: &TutorConfig, input: Option<&str>) -> f64 {
    match input {
        Some(text) => parse_tempo(text).unwrap_or_else(|| {
            warn!(input = text, "ignoring invalid tempo");
            config.playback.tempo
        }),
        None => config.playback.tempo,
    }
}

fn scheduler(config: &TutorConfig, output: Option<Arc<dyn NoteOutput>>) -> PlaybackScheduler {
    PlaybackScheduler::new(
        output,
        Arc::new(LoggingSynth::new()),
        config.timing.song_delay_ms(),
        Duration::from_millis(config.playback.settle_ms),
    )
}

fn show_ports() -> Result<()> {
    let inputs = list_input_ports().context("Failed to list MIDI inputs")?;
    let outputs = list_output_ports().context("Failed to list MIDI outputs")?;

    println!("Inputs:");
    for port in &inputs {
        println!("  {:>2}: {}", port.index, port.name);
    }
    println!("Outputs:");
    for port in &outputs {
        println!("  {:>2}: {}", port.index, port.name);
    }
    Ok(())
}

fn inspect(file: &Path, json: bool) -> Result<()> {
    let song = read_song(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&song)?);
        return Ok(());
    }

    println!(
        "{}: {} tracks, {} notes, {:.1} BPM, {:.2}s",
        file.display(),
        song.tracks.len(),
        song.note_count(),
        song.header.bpm,
        song.duration_seconds()
    );
    for track in song.tracks.iter().filter(|t| !t.notes.is_empty()) {
        println!(
            "track {} {}",
            track.index,
            track.name.as_deref().unwrap_or("(unnamed)")
        );
        for note in &track.notes {
            println!(
                "  {:<4} {:>3}  {:>8.3}s  {:>6.3}s  vel {:.2}",
                note.name, note.pitch, note.time_seconds, note.duration_seconds, note.velocity
            );
        }
    }
    Ok(())
}

async fn play(
    config: &TutorConfig,
    file: &Path,
    tempo: Option<&str>,
    output: Option<String>,
) -> Result<()> {
    let mut song = read_song(file)?;
    let output = open_output(output.as_deref())?;
    let mut playback = scheduler(config, output);
    playback.configure(song.header_mut(), resolve_tempo(config, tempo));

    playback.play(&song.merged_notes());
    let interrupted = tokio::select! {
        _ = playback.wait_stopped() => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        info!("Interrupted, stopping playback");
        playback.stop();
    }
    Ok(())
}

async fn test(
    config: &TutorConfig,
    file: &Path,
    input: &str,
    output: Option<String>,
    tempo: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut song = read_song(file)?;
    let output = open_output(output.as_deref())?;
    let (_input, mut rx) = open_input(input)?;

    let mut playback = scheduler(config, output.clone());
    playback.configure(song.header_mut(), resolve_tempo(config, tempo));
    let notes = song.merged_notes();

    let mut session = Session::from_config(config, Arc::new(SystemClock), output);
    session.set_reference(song);

    session.start_recording(CaptureMode::Test);
    playback.play(&notes);
    let mut state = playback.subscribe();
    eprintln!("Recording. Play along; Ctrl-C to finish early.");

    loop {
        tokio::select! {
            Some(msg) = rx.recv() => {
                session.handle_raw(msg);
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == PlaybackState::Stopped {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
        }
    }
    playback.stop();

    match session.stop_recording()? {
        RecordingOutcome::Scored(report) => print_report(&report, json),
        RecordingOutcome::Exported { .. } => bail!("test capture produced an export"),
    }
}

async fn record(config: &TutorConfig, input: &str, out_dir: &Path) -> Result<()> {
    let (_input, mut rx) = open_input(input)?;
    let mut session = Session::from_config(config, Arc::new(SystemClock), None);

    session.start_recording(CaptureMode::Export);
    eprintln!("Recording. Ctrl-C to stop and save.");

    loop {
        tokio::select! {
            Some(msg) = rx.recv() => {
                session.handle_raw(msg);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let RecordingOutcome::Exported {
        file_name,
        bytes,
        notes,
    } = session.stop_recording()?
    else {
        bail!("export capture produced a score");
    };

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let path = out_dir.join(file_name);
    std::fs::write(&path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {} notes to {}", notes.len(), path.display());
    Ok(())
}

async fn learn(config: &TutorConfig, file: &Path, input: &str, output: &str) -> Result<()> {
    let song = read_song(file)?;
    let output = open_output(Some(output))?;
    let (_input, mut rx) = open_input(input)?;

    let mut session = Session::from_config(config, Arc::new(SystemClock), output);
    session.set_reference(song);
    session.start_learning()?;
    report_cursor(&session);

    loop {
        tokio::select! {
            Some(msg) = rx.recv() => {
                let before = session.learning_cursor().map(|c| c.group_index);
                session.handle_raw(msg);
                if session.learning_state() == LearningState::Completed {
                    println!("Done!");
                    break;
                }
                if session.learning_cursor().map(|c| c.group_index) != before {
                    report_cursor(&session);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.stop_learning();
    Ok(())
}

fn report_cursor(session: &Session) {
    if let Some(cursor) = session.learning_cursor() {
        let names: Vec<String> = cursor
            .required
            .iter()
            .map(|p| keytutor::pitch_name(*p))
            .collect();
        println!(
            "[{}/{}] {}",
            cursor.group_index + 1,
            cursor.group_count,
            names.join(" ")
        );
    }
}

fn score_file(config: &TutorConfig, reference: &Path, take: &Path, json: bool) -> Result<()> {
    let reference = read_song(reference)?;
    let take = read_song(take)?;

    let played: Vec<RecordedNote> = take
        .first_track_notes()
        .iter()
        .map(RecordedNote::from)
        .collect();
    let report = score_with(
        reference.first_track_notes(),
        &played,
        &Tolerances::from(&config.scoring),
    );
    print_report(&report, json)
}

fn print_report(report: &ScoreReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for note in &report.notes {
        println!(
            "{:<4} {:>8.3}s  timing {:<7}  duration {:<7}  {}",
            note.name,
            note.time_seconds,
            format!("{:?}", note.timing_result).to_lowercase(),
            format!("{:?}", note.duration_result).to_lowercase(),
            note.score
        );
    }

    let summary = &report.summary;
    println!(
        "perfect {}  early {}  late {}  miss {}",
        summary.perfect, summary.early, summary.late, summary.miss
    );
    println!("TOTAL: {} / {}", summary.total_score, summary.max_score());
    Ok(())
}
