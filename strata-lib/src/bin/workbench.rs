// Copyright 2026 The Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Workbench
//!
//! Engineering tool for the band stack.  Look at a band's pass band, check what a stack reports
//! for a tone, or run a stack live against an emulated audio host to watch the two clocks work
//! together.
//!
//! ## Usage
//!
//! ```text
//! workbench response --cutoff 0.5 --q 4
//! workbench levels --bands 8 --tones 110,880
//! RUST_LOG=debug workbench live --bands 6 --tick-rate 60
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use ringbuf::{HeapRb, traits::*};

use strata_lib::{
    StrataError,
    bands::{
        self, BandParams, BandStack, MAX_CUTOFF_HZ, MIN_DB, REF_LEVEL, StackConfig, ZERO_OFFSET,
        cutoff_to_hz,
    },
    dsp::{self, SineSweeper},
};

#[derive(Parser, Debug)]
#[command(name = "workbench")]
#[command(about = "Engineering tools for the band-pass level stack.", long_about = None)]
#[command(arg_required_else_help = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, thiserror::Error)]
enum WorkbenchError {
    #[error("{0}")]
    Strata(#[from] StrataError),
    #[error("Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("{0} thread panicked")]
    Thread(&'static str),
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show constants and default settings
    Config,
    /// Sweep a tone across the spectrum through a single band
    Response(ResponseArgs),
    /// Measure every band of a stack against fixed tones
    Levels(LevelsArgs),
    /// Run a stack against an emulated audio host until Ctrl-C
    Live(LiveArgs),
}

#[derive(clap::Args, Debug, Clone)]
struct StackArgs {
    /// Sample rate in Hz
    #[arg(long, default_value_t = 48_000.0)]
    sample_rate: f32,

    /// Resonance of every band
    #[arg(long, default_value_t = 1.0)]
    q: f32,

    /// Gain of every band
    #[arg(long, default_value_t = 1.0)]
    gain: f32,

    /// Interleaved channel count
    #[arg(long, default_value_t = 2)]
    channels: usize,

    /// Frames per audio block
    #[arg(long, default_value_t = 512)]
    block: usize,

    /// Lowest level to report, in dB
    #[arg(long)]
    floor: Option<f32>,
}

impl StackArgs {
    fn config(&self) -> StackConfig {
        StackConfig {
            sample_rate: self.sample_rate,
            mute: true,
            level_floor: self.floor,
        }
    }

    fn template(&self) -> BandParams {
        BandParams {
            q: self.q,
            gain: self.gain,
            ..Default::default()
        }
    }

    fn stack(&self, bands: usize) -> Result<BandStack, StrataError> {
        BandStack::builder(self.config())
            .spread(bands, 0.0, 1.0, self.template())
            .build()
    }
}

#[derive(clap::Args, Debug)]
struct ResponseArgs {
    /// Normalized cutoff of the band
    #[arg(long, default_value_t = 0.5)]
    cutoff: f32,

    /// Sweep resolution
    #[arg(long, default_value_t = 3)]
    steps_per_octave: usize,

    #[command(flatten)]
    stack: StackArgs,
}

#[derive(clap::Args, Debug)]
struct LevelsArgs {
    /// Number of bands, cutoffs spread evenly over the whole range
    #[arg(long, default_value_t = 8)]
    bands: usize,

    /// Tone frequencies in Hz, mixed at equal amplitude
    #[arg(long, value_delimiter = ',', default_value = "440")]
    tones: Vec<f64>,

    /// Seconds of audio to measure
    #[arg(long, default_value_t = 1.0)]
    seconds: f64,

    #[command(flatten)]
    stack: StackArgs,
}

#[derive(clap::Args, Debug)]
struct LiveArgs {
    /// Number of bands, cutoffs spread evenly over the whole range
    #[arg(long, default_value_t = 8)]
    bands: usize,

    /// Tone frequencies in Hz.  Each one slowly sweeps upward.
    #[arg(long, value_delimiter = ',', default_value = "55,880")]
    tones: Vec<f64>,

    /// Control ticks per second
    #[arg(long, default_value_t = 60.0)]
    tick_rate: f64,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    seconds: Option<f64>,

    #[command(flatten)]
    stack: StackArgs,
}

fn main() -> Result<(), WorkbenchError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        None => unreachable!(),
        Some(Command::Config) => cmd_config(),
        Some(Command::Response(a)) => cmd_response(a)?,
        Some(Command::Levels(a)) => cmd_levels(a)?,
        Some(Command::Live(a)) => cmd_live(a)?,
    }

    Ok(())
}

const INDENT: usize = 2;
const LABEL_W: usize = 28; // includes colon
const VALUE_W: usize = 18;

macro_rules! header {
    ($($arg:tt)*) => {{
        const WIDTH: usize = INDENT + LABEL_W + 1 + VALUE_W;
        let title = format!($($arg)*);
        println!("\n{title}");
        println!("{}", "=".repeat(WIDTH));
    }};
}

macro_rules! row {
    ($label:expr, $fmt:expr, $value:expr) => {{
        let value = format!($fmt, $value);
        println!(
            "{:indent$}{label:<label_w$} {:>value_w$}",
            "",
            value,
            indent = INDENT,
            label = format!("{}:", $label),
            label_w = LABEL_W,
            value_w = VALUE_W,
        );
    }};
}

fn cmd_config() {
    let band = BandParams::default();
    let stack = StackConfig::default();

    header!("Strata Workbench Defaults");
    row!("Reference level", "{:1.6}", REF_LEVEL);
    row!("Zero offset", "{:e}", ZERO_OFFSET);
    row!("Silence floor", "{:4.1} dB", 20.0 * ZERO_OFFSET.log10());
    row!("Initial level", "{:4.1} dB", MIN_DB);
    row!("Max cutoff", "{:5.0} Hz", MAX_CUTOFF_HZ);
    row!("Min cutoff", "{:3.2} Hz", cutoff_to_hz(0.0));
    row!("Cutoff range", "{:?}", bands::CUTOFF_RANGE);
    row!("Q range", "{:?}", bands::Q_RANGE);
    row!("Gain range", "{:?}", bands::GAIN_RANGE);

    header!("Default Band");
    row!("Cutoff", "{:1.2}", band.cutoff);
    row!("Cutoff frequency", "{:4.2} Hz", band.cutoff_hz());
    row!("Q", "{:2.1}", band.q);
    row!("Gain", "{:2.1}", band.gain);
    row!("Listen", "{}", band.listen);

    header!("Default Stack");
    row!("Sample rate", "{} Hz", stack.sample_rate);
    row!("Mute", "{}", stack.mute);
    row!("Level floor", "{:?}", stack.level_floor);
}

/// Run `seconds` of `signal` through the stack in blocks, ticking once at the end.  A tick at the
/// start discards whatever was measured before.
fn measure(
    stack: &mut BandStack,
    signal: &mut impl Iterator<Item = f32>,
    seconds: f64,
    args: &StackArgs,
) -> Result<(), StrataError> {
    let frames = (seconds * args.sample_rate as f64).ceil() as usize;
    let mut mono = vec![0.0f32; args.block.max(1)];
    stack.tick();
    let mut remaining = frames;
    while remaining > 0 {
        let n = remaining.min(mono.len());
        for slot in mono[..n].iter_mut() {
            *slot = signal.next().unwrap_or(0.0);
        }
        let mut block = dsp::interleave(&mono[..n], args.channels)?;
        stack.process_block(&mut block, args.channels);
        remaining -= n;
    }
    stack.tick();
    Ok(())
}

fn cmd_response(args: ResponseArgs) -> Result<(), WorkbenchError> {
    let fs = args.stack.sample_rate as f64;
    let center = cutoff_to_hz(args.cutoff);
    header!("Response of cutoff {:1.3} ({center:.2} Hz), Q {}", args.cutoff, args.stack.q);

    let steps = args.steps_per_octave.max(1);
    let top = (fs * 0.45).min(20_000.0);
    let mut loudest: Option<(f64, f32)> = None;
    for k in 0.. {
        let f = 20.0 * (k as f64 / steps as f64).exp2();
        if f > top {
            break;
        }

        let mut stack = BandStack::builder(args.stack.config())
            .band(BandParams {
                cutoff: args.cutoff,
                ..args.stack.template()
            })
            .build()?;
        let mut sine = SineSweeper::new(f, fs);
        // Settle, then measure.
        measure(&mut stack, &mut sine, 0.25, &args.stack)?;
        measure(&mut stack, &mut sine, 0.5, &args.stack)?;

        let db = stack.band_level(0);
        if loudest.is_none_or(|(_, peak)| db > peak) {
            loudest = Some((f, db));
        }
        let near_cutoff = (f / center as f64).log2().abs() <= 0.5 / steps as f64;
        let label = if near_cutoff {
            format!("{f:8.1} Hz (cutoff)")
        } else {
            format!("{f:8.1} Hz")
        };
        row!(label, "{:7.2} dB", db);
    }

    if let Some((f, db)) = loudest {
        row!("Loudest", "{:8.1} Hz", f);
        row!("Loudest level", "{:7.2} dB", db);
        if (f / center as f64).log2().abs() > 1.0 {
            log::warn!("peak at {f:.1} Hz is more than an octave from the cutoff at {center:.1} Hz");
        }
    }
    Ok(())
}

fn mix(tones: &[f64], fs: f64) -> impl Iterator<Item = f32> + use<> {
    let scale = 1.0 / tones.len().max(1) as f32;
    let mut sines: Vec<SineSweeper> = tones.iter().map(|&f| SineSweeper::new(f, fs)).collect();
    std::iter::from_fn(move || Some(sines.iter_mut().filter_map(|s| s.next()).sum::<f32>() * scale))
}

fn cmd_levels(args: LevelsArgs) -> Result<(), WorkbenchError> {
    let mut stack = args.stack.stack(args.bands)?;
    let mut signal = mix(&args.tones, args.stack.sample_rate as f64);

    measure(&mut stack, &mut signal, 0.1, &args.stack)?;
    measure(&mut stack, &mut signal, args.seconds, &args.stack)?;

    header!("Levels for {:?} Hz over {} s", args.tones, args.seconds);
    let control = stack.control();
    for (i, band) in control.bands().enumerate() {
        row!(
            format!("band {i} ({:7.1} Hz)", band.cutoff_hz()),
            "{:7.2} dB",
            control.band_level(i)
        );
    }
    Ok(())
}

/// Three threads.  The generator plays the audio server and writes interleaved audio into a ring
/// at real-time pace.  The audio thread owns the stack and drains the ring in whole blocks.  This
/// thread is the control clock.
fn cmd_live(args: LiveArgs) -> Result<(), WorkbenchError> {
    let stack_args = args.stack.clone();
    if stack_args.channels == 0 {
        return Err(StrataError::Channels.into());
    }
    let mut stack = stack_args.stack(args.bands)?;
    let control = stack.control();

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let fs = stack_args.sample_rate as f64;
    let channels = stack_args.channels;
    let block_len = stack_args.block.max(1) * channels;
    // A quarter second of slack.
    let ring = HeapRb::<f32>::new(((fs / 4.0) as usize * channels).max(block_len * 2));
    let (mut tx, mut rx) = ring.split();

    let generator = {
        let running = running.clone();
        let tones = args.tones.clone();
        std::thread::spawn(move || {
            let mut sines: Vec<SineSweeper> =
                tones.iter().map(|&f| SineSweeper::new(f, fs)).collect();
            let scale = 1.0 / sines.len().max(1) as f32;
            let block_time = Duration::from_secs_f64((block_len / channels) as f64 / fs);
            let mut chunk = vec![0.0f32; block_len];
            let mut next = Instant::now();
            while running.load(Ordering::Relaxed) {
                for frame in chunk.chunks_exact_mut(channels) {
                    let s = sines.iter_mut().filter_map(|s| s.next()).sum::<f32>() * scale;
                    frame.fill(s);
                }
                // Slow upward drift so the levels move.
                for s in sines.iter_mut() {
                    let f = s.frequency() * 1.0005;
                    s.set_frequency(if f > fs * 0.45 { f / 64.0 } else { f });
                }
                let written = tx.push_slice(&chunk);
                if written < chunk.len() {
                    log::warn!("audio thread falling behind, dropped {} samples", chunk.len() - written);
                }
                next += block_time;
                std::thread::sleep(next.saturating_duration_since(Instant::now()));
            }
        })
    };

    let audio = {
        let running = running.clone();
        std::thread::spawn(move || {
            let mut block = vec![0.0f32; block_len];
            let mut blocks = 0usize;
            while running.load(Ordering::Relaxed) {
                if rx.occupied_len() >= block_len {
                    rx.pop_slice(&mut block);
                    stack.process_block(&mut block, channels);
                    blocks += 1;
                } else {
                    std::thread::sleep(Duration::from_micros(500));
                }
            }
            blocks
        })
    };

    log::info!(
        "live: {} bands, {} Hz, {} channels, {} frames per block, {} ticks per second",
        control.len(),
        fs,
        channels,
        block_len / channels,
        args.tick_rate
    );

    let period = Duration::from_secs_f64(1.0 / args.tick_rate.max(1.0));
    let began = Instant::now();
    let mut levels = vec![0.0f32; control.len()];
    let mut wrote = false;
    let mut next = Instant::now();
    while running.load(Ordering::Relaxed) {
        control.tick();
        control.levels(&mut levels);

        if wrote {
            print!("\x1B[{}A", levels.len());
        } else {
            wrote = true;
        }
        for (i, db) in levels.iter().enumerate() {
            println!("{}", meter_line(i, control.band(i).map(|b| b.cutoff_hz()), *db));
        }

        if let Some(limit) = args.seconds {
            if began.elapsed().as_secs_f64() >= limit {
                running.store(false, Ordering::SeqCst);
            }
        }
        next += period;
        std::thread::sleep(next.saturating_duration_since(Instant::now()));
    }

    let blocks = audio.join().map_err(|_| WorkbenchError::Thread("audio"))?;
    generator.join().map_err(|_| WorkbenchError::Thread("generator"))?;
    log::info!("processed {blocks} blocks in {:.1} s", began.elapsed().as_secs_f64());
    Ok(())
}

// One bar per band, -60 dB to +3 dB.
fn meter_line(index: usize, cutoff_hz: Option<f32>, db: f32) -> String {
    const WIDTH: usize = 48;
    let t = ((db - MIN_DB) / (3.0 - MIN_DB)).clamp(0.0, 1.0);
    let filled = (t * WIDTH as f32).round() as usize;
    format!(
        "{index:2} {:8.1} Hz {:7.2} dB |{}{}|",
        cutoff_hz.unwrap_or(0.0),
        db,
        "#".repeat(filled),
        " ".repeat(WIDTH - filled)
    )
}
