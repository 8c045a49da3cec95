//! Sonolith spike - hardware bring-up tool
//!
//! Renders a simple test pattern through the full audio pipeline so the
//! galvo deflection and laser gating can be checked on a scope or resin tank
//! without slicing a model. Output goes to the default audio device, or to a
//! WAV file for offline inspection.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::info;

use sonolith::audio::{
    AudioWriter, CarrierModulator, CpalOutputStream, OutputStream, PathTranslator,
    WavOutputStream,
};
use sonolith::config::AudioOutputConfig;
use sonolith::control::LayerWriter;
use sonolith::geometry::{Command, Layer, Position2};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Pattern {
    /// Draw the perimeter of a square
    Square,
    /// Sweep a horizontal line back and forth
    Line,
    /// Hold the beam at the center, laser off
    Center,
}

#[derive(Parser, Debug)]
#[command(name = "sonolith-spike")]
#[command(about = "Render a galvo test pattern through the audio pipeline")]
struct Cli {
    /// Test pattern to render
    #[arg(long, value_enum, default_value_t = Pattern::Square)]
    pattern: Pattern,

    /// Pattern half-extent in mm
    #[arg(long, default_value_t = 20.0)]
    size_mm: f64,

    /// Draw speed in mm/s
    #[arg(long, default_value_t = 100.0)]
    speed: f64,

    /// Times the pattern is repeated
    #[arg(long, default_value_t = 10)]
    repeats: u32,

    /// Output sample rate in Hz (44100 or 48000)
    #[arg(long, default_value_t = 48000)]
    sample_rate: u32,

    /// Output bit depth (8, 16, or 32)
    #[arg(long, default_value_t = 16)]
    bit_depth: u16,

    /// Build-area half-extent in mm
    #[arg(long, default_value_t = 40.0)]
    max_deflection_mm: f64,

    /// Write to a WAV file instead of the audio device
    #[arg(long)]
    wav: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("Sonolith spike v{}", env!("CARGO_PKG_VERSION"));

    let config = AudioOutputConfig {
        sample_rate: cli.sample_rate,
        bit_depth: cli.bit_depth,
    };
    let stream: Box<dyn OutputStream> = match &cli.wav {
        Some(path) => {
            info!("Writing to {}", path.display());
            Box::new(WavOutputStream::create(path, config)?)
        }
        None => {
            info!("Opening default output device at {} Hz", config.sample_rate);
            Box::new(CpalOutputStream::open(config)?)
        }
    };

    let modulator = CarrierModulator::new(
        config.sample_rate,
        config.on_frequency()?,
        config.off_frequency()?,
    )?;
    let translator = PathTranslator::new(modulator.samples_per_second(), cli.max_deflection_mm)?;
    let audio_writer = AudioWriter::new(stream, config.bit_depth)?;
    let writer = LayerWriter::new(
        audio_writer,
        modulator,
        translator,
        Default::default(),
    );

    let layer = Layer::new(0.0, pattern_commands(cli.pattern, cli.size_mm, cli.speed));
    for repeat in 0..cli.repeats {
        info!("Pass {}/{}", repeat + 1, cli.repeats);
        writer
            .process_layer(&layer)
            .context("test pattern write failed")?;
    }
    writer.terminate();
    info!("Done");
    Ok(())
}

fn pattern_commands(pattern: Pattern, size_mm: f64, speed: f64) -> Vec<Command> {
    let s = size_mm;
    let draw = |sx: f64, sy: f64, ex: f64, ey: f64| Command::LateralDraw {
        start: Position2::new(sx, sy),
        end: Position2::new(ex, ey),
        speed,
    };
    match pattern {
        Pattern::Square => vec![
            draw(-s, -s, s, -s),
            draw(s, -s, s, s),
            draw(s, s, -s, s),
            draw(-s, s, -s, -s),
        ],
        Pattern::Line => vec![draw(-s, 0.0, s, 0.0), draw(s, 0.0, -s, 0.0)],
        Pattern::Center => vec![Command::LateralMove {
            to: Position2::new(0.0, 0.0),
            speed,
        }],
    }
}
