//! Soundboard - real-time audio pass-through
//!
//! Captures from an input device, runs each block through the spectral
//! stage and renders it to an output device, logging the detected peaks.

use std::io::{self, BufRead};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing_subscriber::EnvFilter;

use soundboard_audio::device::cpal_backend::{self, CpalConfig};
use soundboard_audio::device::mock::{mock_input, mock_output};
use soundboard_audio::{AudioProcessor, AudioResult, ProcessorConfig, ProcessorEvent, StreamFormat};

/// Polling interval of the controlling loop
const EVENT_POLL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "soundboard")]
#[command(about = "Real-time audio pass-through with spectral peak logging", long_about = None)]
struct Cli {
    /// List capture and render devices and exit
    #[arg(short, long)]
    list: bool,

    /// Capture device name (default input device if omitted)
    #[arg(short, long)]
    input: Option<String>,

    /// Render device name (default output device if omitted)
    #[arg(short, long)]
    output: Option<String>,

    /// Stop after this many seconds instead of waiting for Enter
    #[arg(short, long)]
    seconds: Option<f64>,

    /// Pitch scale handed to the spectral stage
    #[arg(short, long, default_value = "1.0")]
    pitch: f64,

    /// Ring buffer capacity in processing blocks
    #[arg(long, default_value = "8")]
    ring_blocks: usize,

    /// Run against a generated 440 Hz tone instead of real devices
    #[arg(long)]
    simulate: bool,

    /// Log every processed block
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.list {
        return list_devices();
    }

    if !(cli.pitch.is_finite() && cli.pitch > 0.0) {
        bail!("pitch scale must be a positive number, got {}", cli.pitch);
    }

    let mut processor = AudioProcessor::new(ProcessorConfig::default());
    if cli.simulate {
        configure_simulated(&mut processor)?;
    } else {
        configure_devices(&mut processor, &cli)?;
    }
    processor.set_pitch_scale(cli.pitch);

    let events = processor.events();
    processor.start().context("Failed to start audio processing")?;

    match cli.seconds {
        Some(seconds) => tracing::info!(seconds, "processing"),
        None => tracing::info!("processing, press Enter to stop"),
    }

    let session = run_session(&events, cli.seconds.map(Duration::from_secs_f64));

    let stopped = processor.stop();
    tracing::info!(blocks = processor.blocks_processed(), "stopped");

    finish(session, stopped)
}

/// Combine the session outcome with the outcome of stopping the processor
///
/// A failed session is reported over a failed stop; the stop error is logged.
fn finish(session: anyhow::Result<()>, stopped: AudioResult<()>) -> anyhow::Result<()> {
    match (session, stopped) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(e)) => Err(anyhow::Error::new(e).context("Audio processing ended with an error")),
        (Err(session), Ok(())) => Err(session),
        (Err(session), Err(e)) => {
            tracing::error!(error = %e, "stopping the processor also failed");
            Err(session)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn list_devices() -> anyhow::Result<()> {
    let inputs = cpal_backend::input_devices().context("Failed to enumerate input devices")?;
    let outputs = cpal_backend::output_devices().context("Failed to enumerate output devices")?;

    println!("Input devices:");
    for name in inputs {
        println!("  {}", name);
    }
    println!("Output devices:");
    for name in outputs {
        println!("  {}", name);
    }
    Ok(())
}

fn configure_devices(processor: &mut AudioProcessor, cli: &Cli) -> anyhow::Result<()> {
    let config = CpalConfig {
        ring_blocks: cli.ring_blocks,
        block_frames: processor.config().block_size,
    };

    let input = cpal_backend::open_input(cli.input.as_deref(), &config).context("Failed to open input device")?;
    processor
        .configure_input(input)
        .context("Failed to configure input device")?;

    let output =
        cpal_backend::open_output(cli.output.as_deref(), &config).context("Failed to open output device")?;
    processor
        .configure_output(output)
        .context("Failed to configure output device")?;
    Ok(())
}

fn configure_simulated(processor: &mut AudioProcessor) -> anyhow::Result<()> {
    let (input, tone) = mock_input("simulated tone", StreamFormat::float32(1, 44100));
    tone.loop_tone(440.0, 0.5, 441, true);
    let (output, _) = mock_output("simulated sink", StreamFormat::float32(2, 44100), false);

    processor.configure_input(input)?;
    processor.configure_output(output)?;
    Ok(())
}

/// Wait for Enter, the duration, or the worker to stop on its own
fn run_session(events: &Receiver<ProcessorEvent>, duration: Option<Duration>) -> anyhow::Result<()> {
    let enter = spawn_enter_listener();
    let started = Instant::now();

    loop {
        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            return Ok(());
        }
        if duration.is_none() && enter.try_recv().is_ok() {
            return Ok(());
        }

        match events.recv_timeout(EVENT_POLL) {
            Ok(ProcessorEvent::Peaks(report)) => match report.strongest() {
                Some(peak) => tracing::info!(
                    peaks = report.peaks.len(),
                    strongest_hz = peak.frequency_hz,
                    magnitude = peak.magnitude,
                    "spectrum"
                ),
                None => tracing::debug!("no peaks"),
            },
            Ok(ProcessorEvent::Stopped { error: Some(message) }) => {
                bail!("audio processing stopped: {}", message)
            }
            Ok(ProcessorEvent::Stopped { error: None }) => return Ok(()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

fn spawn_enter_listener() -> Receiver<()> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let mut line = String::new();
        if matches!(io::stdin().lock().read_line(&mut line), Ok(n) if n > 0) {
            let _ = tx.send(());
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use soundboard_audio::AudioError;

    #[test]
    fn test_finish_prefers_session_error() {
        let err = finish(
            Err(anyhow::anyhow!("audio processing stopped: unplugged")),
            Err(AudioError::Device("unplugged".into())),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "audio processing stopped: unplugged");
    }

    #[test]
    fn test_finish_reports_stop_error() {
        let err = finish(Ok(()), Err(AudioError::WorkerPanicked)).unwrap_err();
        assert_eq!(err.to_string(), "Audio processing ended with an error");
        assert!(err.root_cause().to_string().contains("panicked"));
        assert!(finish(Ok(()), Ok(())).is_ok());
    }
}
