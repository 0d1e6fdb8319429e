//! nesjit - run NES ROMs through compiled 6502 functions

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use parking_lot::Mutex;

use nesjit_core::cartridge::Cartridge;
use nesjit_core::config::{EmulatorConfig, TimingModeKind};
use nesjit_core::emulator::{EmulatorEvent, NesEmulator};
use nesjit_core::modes;
use nesjit_core::{JitCompiler, NesHardware};

#[derive(Parser, Debug)]
#[command(name = "nesjit")]
#[command(about = "NES emulator that compiles 6502 functions on first use", long_about = None)]
struct Args {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile every function reachable from the interrupt vectors
    Compile {
        /// Path to the iNES ROM file
        rom: PathBuf,

        /// Write the compiled-function cache here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a ROM
    Run {
        /// Path to the iNES ROM file
        rom: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Timing mode: event-driven or cycle-accurate
        #[arg(short, long)]
        mode: Option<TimingModeKind>,

        /// Compiled-function cache to load and update
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Run this many frames as fast as possible, then exit
        #[arg(short, long)]
        frames: Option<u64>,

        /// Wall-clock seconds to run in real time
        #[arg(short, long, default_value = "5")]
        seconds: f64,

        /// Dump CPU and PPU state on exit
        #[arg(short = 'd', long)]
        dump_state: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match args.command {
        Command::Compile { rom, output } => compile(rom, output),
        Command::Run {
            rom,
            config,
            mode,
            cache,
            frames,
            seconds,
            dump_state,
        } => {
            let mut config = match config {
                Some(path) => EmulatorConfig::load(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?,
                None => EmulatorConfig::default(),
            };
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if cache.is_some() {
                config.cache_path = cache;
            }
            run(rom, config, frames, seconds, dump_state)
        }
    }
}

fn load_cartridge(rom: &Path) -> Result<Cartridge> {
    let rom_data = fs::read(rom).with_context(|| format!("failed to read ROM file {}", rom.display()))?;
    let cartridge = Cartridge::from_rom(&rom_data).context("failed to load cartridge")?;

    println!("Loaded cartridge:");
    println!("  PRG ROM: {} bytes", cartridge.prg_rom().len());
    println!("  CHR ROM: {} bytes", cartridge.chr_rom().len());
    println!("  Mapper: {}", cartridge.mapper());
    if cartridge.mapper() != 0 {
        warn!("mapper {} is not emulated; PRG is mapped flat", cartridge.mapper());
    }
    Ok(cartridge)
}

fn compile(rom: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let cartridge = load_cartridge(&rom)?;
    let jit = JitCompiler::new(cartridge.code_regions());

    let mut hardware = NesHardware::with_prg(cartridge.prg_rom().to_vec());
    let vectors = hardware.interrupt_vectors();
    println!(
        "Vectors: reset ${:04X} nmi ${:04X} irq ${:04X}",
        vectors.reset, vectors.nmi, vectors.irq
    );

    let report = jit.precompile(&vectors.entries());
    println!("Compiled {} functions", report.compiled.len());
    for (address, err) in &report.failed {
        println!("  ${:04X}: {}", address, err);
    }

    if let Some(path) = output {
        let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        let saved = jit.save_cache(BufWriter::new(file)).context("failed to write cache")?;
        println!("Wrote {} functions to {}", saved, path.display());
    }
    Ok(())
}

fn run(rom: PathBuf, config: EmulatorConfig, frames: Option<u64>, seconds: f64, dump_state: bool) -> Result<()> {
    if !(seconds.is_finite() && seconds > 0.0) {
        bail!("--seconds must be positive");
    }
    let cartridge = load_cartridge(&rom)?;
    let mode_kind = config.mode;
    let mut emulator = NesEmulator::from_cartridge(&cartridge, config).context("failed to start emulator")?;

    if let Some(frames) = frames {
        println!("\nRunning {} frames...", frames);
        emulator.start();
        for _ in 0..frames {
            emulator.execute_frame().context("frame failed")?;
        }
        emulator.stop();
        finish(&emulator, dump_state)?;
        return Ok(());
    }

    let events = emulator.subscribe();
    let shared = Arc::new(Mutex::new(emulator));
    let mut driver = modes::create_mode(mode_kind, Arc::clone(&shared));
    driver.start().context("failed to start timing mode")?;

    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(EmulatorEvent::Stats(stats)) => info!(
                "{} cycles, {:.0} cycles/s, scanline {}, {} frames",
                stats.total_cycles, stats.cycles_per_second, stats.current_scanline, stats.frames
            ),
            Ok(EmulatorEvent::FrameComplete(_)) => {}
            Ok(EmulatorEvent::Stopped) => break,
            Err(_) => break,
        }
    }
    driver.stop();

    let emulator = shared.lock();
    finish(&emulator, dump_state)
}

fn finish(emulator: &NesEmulator, dump_state: bool) -> Result<()> {
    let stats = emulator.stats();
    println!(
        "Completed {} frames, {} cycles, {} compiled functions, {} interpreted addresses",
        stats.frames,
        stats.total_cycles,
        stats.compiled_functions,
        emulator.dispatcher().absent_count()
    );
    if dump_state {
        println!("{}", emulator.hardware().summary());
    }
    if let Some(saved) = emulator.save_cache().context("failed to save cache")? {
        println!("Saved {} functions", saved);
    }
    Ok(())
}
