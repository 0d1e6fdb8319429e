//! Frame driver
//!
//! [`NesEmulator`] owns the hardware and the dispatcher and advances them a
//! frame at a time: one CPU step followed by three PPU dots, repeated
//! `cycles_per_frame` times. A vblank raised by any of those dots delivers an
//! NMI before the next CPU step.
//!
//! Timing (how often frames run) is left to [`crate::modes`].

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::cartridge::Cartridge;
use crate::config::{EmulatorConfig, PPU_STEPS_PER_CPU_STEP};
use crate::controller::Buttons;
use crate::error::{EmulatorError, JitError};
use crate::hardware::NesHardware;
use crate::jit::{Dispatcher, JitCompiler};
use crate::ppu::PpuEvents;

/// Snapshot returned by [`NesEmulator::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmulationStats {
    pub total_cycles: i64,
    pub cycles_per_second: f64,
    pub current_scanline: i32,
    pub is_running: bool,
    pub runtime: Duration,
    pub frames: u64,
    pub compiled_functions: usize,
}

/// Notifications sent to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum EmulatorEvent {
    /// Periodic statistics, every `stats_interval_cycles` CPU steps
    Stats(EmulationStats),
    /// A PPU frame finished; carries the running frame count
    FrameComplete(u64),
    Stopped,
}

pub struct NesEmulator {
    hardware: NesHardware,
    dispatcher: Dispatcher,
    config: EmulatorConfig,
    running: bool,
    paused: bool,
    total_cycles: i64,
    frame_count: u64,
    next_stats_at: i64,
    /// Runtime accumulated by previous start/stop spans
    previous_runtime: Duration,
    started_at: Option<Instant>,
    subscribers: Vec<Sender<EmulatorEvent>>,
}

impl NesEmulator {
    /// Wrap already-loaded hardware; the CPU is not reset
    pub fn new(hardware: NesHardware, jit: Arc<JitCompiler>, config: EmulatorConfig) -> Self {
        let dispatcher = Dispatcher::new(jit, config.failure_policy);
        let next_stats_at = config.stats_interval_cycles as i64;
        Self {
            hardware,
            dispatcher,
            config,
            running: false,
            paused: false,
            total_cycles: 0,
            frame_count: 0,
            next_stats_at,
            previous_runtime: Duration::ZERO,
            started_at: None,
            subscribers: Vec::new(),
        }
    }

    /// Map the cartridge's PRG, load any configured cache and reset the CPU
    pub fn from_cartridge(cartridge: &Cartridge, config: EmulatorConfig) -> Result<Self, EmulatorError> {
        config.validate()?;
        let jit = JitCompiler::new(cartridge.code_regions());
        if let Some(path) = &config.cache_path {
            if path.exists() {
                let loaded = load_cache_file(&jit, path)?;
                info!("loaded {} compiled functions from {}", loaded, path.display());
            }
        }

        let mut hardware = NesHardware::with_prg(cartridge.prg_rom().to_vec());
        hardware.reset();
        debug!("reset: {}", hardware.summary());
        Ok(Self::new(hardware, Arc::new(jit), config))
    }

    pub fn from_rom(rom_data: &[u8], config: EmulatorConfig) -> Result<Self, EmulatorError> {
        let cartridge = Cartridge::from_rom(rom_data)?;
        Self::from_cartridge(&cartridge, config)
    }

    /// Run one frame to completion
    pub fn execute_frame(&mut self) -> Result<(), EmulatorError> {
        for _ in 0..self.config.cycles_per_frame {
            self.step()?;
        }
        Ok(())
    }

    /// One CPU step and the PPU dots that follow it
    pub fn step(&mut self) -> Result<(), EmulatorError> {
        self.hardware.execute_cpu_cycle(&self.dispatcher)?;

        let mut nmi = false;
        for _ in 0..PPU_STEPS_PER_CPU_STEP {
            let events = self.hardware.step_ppu();
            if events.contains(PpuEvents::VBLANK_STARTED) {
                nmi = true;
            }
            if events.contains(PpuEvents::FRAME_COMPLETE) {
                self.frame_count += 1;
                self.emit(EmulatorEvent::FrameComplete(self.frame_count));
            }
        }
        if nmi {
            self.hardware.handle_nmi();
        }

        self.total_cycles += 1;
        if self.config.stats_interval_cycles > 0 && self.total_cycles >= self.next_stats_at {
            self.next_stats_at += self.config.stats_interval_cycles as i64;
            let stats = self.stats();
            self.emit(EmulatorEvent::Stats(stats));
        }
        Ok(())
    }

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.paused = false;
        self.started_at = Some(Instant::now());
        info!("emulator started at {}", self.hardware.summary());
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if let Some(started) = self.started_at.take() {
            self.previous_runtime += started.elapsed();
        }
        self.running = false;
        self.paused = false;
        info!(
            "emulator stopped after {} cycles, {} frames",
            self.total_cycles, self.frame_count
        );
        self.emit(EmulatorEvent::Stopped);
    }

    pub fn pause(&mut self) -> Result<(), EmulatorError> {
        if !self.running {
            return Err(EmulatorError::NotRunning);
        }
        self.paused = true;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), EmulatorError> {
        if !self.running {
            return Err(EmulatorError::NotRunning);
        }
        self.paused = false;
        Ok(())
    }

    /// Reset the hardware and counters; compiled code is kept
    pub fn reset(&mut self) {
        self.hardware.reset();
        self.total_cycles = 0;
        self.frame_count = 0;
        self.next_stats_at = self.config.stats_interval_cycles as i64;
        self.previous_runtime = Duration::ZERO;
        if self.running {
            self.started_at = Some(Instant::now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn total_cycles(&self) -> i64 {
        self.total_cycles
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn runtime(&self) -> Duration {
        self.previous_runtime + self.started_at.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn stats(&self) -> EmulationStats {
        let runtime = self.runtime();
        let seconds = runtime.as_secs_f64();
        EmulationStats {
            total_cycles: self.total_cycles,
            cycles_per_second: if seconds > 0.0 {
                self.total_cycles as f64 / seconds
            } else {
                0.0
            },
            current_scanline: self.hardware.ppu().scanline(),
            is_running: self.running,
            runtime,
            frames: self.frame_count,
            compiled_functions: self.dispatcher.jit().stats().compiled_functions,
        }
    }

    /// Receive events from now on; a dropped receiver is pruned on next send
    pub fn subscribe(&mut self) -> Receiver<EmulatorEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.subscribers.push(sender);
        receiver
    }

    fn emit(&mut self, event: EmulatorEvent) {
        self.subscribers.retain(|s| s.send(event.clone()).is_ok());
    }

    pub fn set_controller_state(&mut self, port: usize, buttons: Buttons) {
        self.hardware.set_controller_state(port, buttons);
    }

    pub fn hardware(&self) -> &NesHardware {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut NesHardware {
        &mut self.hardware
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Write the compiled-function cache to the configured path, if any
    pub fn save_cache(&self) -> Result<Option<usize>, EmulatorError> {
        let Some(path) = &self.config.cache_path else {
            return Ok(None);
        };
        let file = File::create(path).map_err(JitError::from)?;
        let saved = self.dispatcher.jit().save_cache(BufWriter::new(file))?;
        info!("saved {} compiled functions to {}", saved, path.display());
        Ok(Some(saved))
    }
}

fn load_cache_file(jit: &JitCompiler, path: &Path) -> Result<usize, EmulatorError> {
    let file = File::open(path).map_err(JitError::from)?;
    match jit.load_cache(BufReader::new(file)) {
        Ok(loaded) => Ok(loaded),
        Err(JitError::CacheMismatch(reason)) => {
            warn!("ignoring cache {}: {}", path.display(), reason);
            Ok(0)
        }
        Err(err) => Err(err.into()),
    }
}

impl std::fmt::Debug for NesEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NesEmulator")
            .field("hardware", &self.hardware)
            .field("running", &self.running)
            .field("paused", &self.paused)
            .field("total_cycles", &self.total_cycles)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 16KB image idling on JMP ($8004) at reset, RTI as the NMI handler.
    /// The pointer cell holds $8000, so each CPU step runs one jump.
    fn spin_cartridge() -> Cartridge {
        let mut prg = vec![0xEA; 0x4000];
        prg[0x0000..0x0003].copy_from_slice(&[0x6C, 0x04, 0x80]);
        prg[0x0003] = 0x40;
        prg[0x0004..0x0006].copy_from_slice(&[0x00, 0x80]);
        prg[0x3FFA..0x3FFC].copy_from_slice(&[0x03, 0x80]);
        prg[0x3FFC..0x3FFE].copy_from_slice(&[0x00, 0x80]);
        prg[0x3FFE..0x4000].copy_from_slice(&[0x03, 0x80]);
        Cartridge::from_prg(prg)
    }

    fn emulator() -> NesEmulator {
        NesEmulator::from_cartridge(&spin_cartridge(), EmulatorConfig::default()).unwrap()
    }

    #[test]
    fn test_reset_reads_vector() {
        let emu = emulator();
        assert_eq!(emu.hardware().pc(), 0x8000);
        assert!(!emu.is_running());
    }

    #[test]
    fn test_frame_advances_counters() {
        let mut emu = emulator();
        let events = emu.subscribe();
        emu.execute_frame().unwrap();

        assert_eq!(emu.total_cycles(), 29781);
        assert_eq!(emu.frame_count(), 1);
        let frames: Vec<_> = events
            .try_iter()
            .filter(|e| matches!(e, EmulatorEvent::FrameComplete(_)))
            .collect();
        assert_eq!(frames, vec![EmulatorEvent::FrameComplete(1)]);
        assert_eq!(emu.stats().compiled_functions, 2);
    }

    #[test]
    fn test_stats_events_every_interval() {
        let config = EmulatorConfig {
            stats_interval_cycles: 1000,
            ..EmulatorConfig::default()
        };
        let mut emu = NesEmulator::from_cartridge(&spin_cartridge(), config).unwrap();
        let events = emu.subscribe();
        for _ in 0..2500 {
            emu.step().unwrap();
        }
        let stats: Vec<i64> = events
            .try_iter()
            .filter_map(|e| match e {
                EmulatorEvent::Stats(s) => Some(s.total_cycles),
                _ => None,
            })
            .collect();
        assert_eq!(stats, vec![1000, 2000]);
    }

    #[test]
    fn test_vblank_delivers_nmi() {
        let mut emu = emulator();
        // 241 scanlines of dots, three per CPU step
        let steps = (341 * 241 + 2) / 3;
        for _ in 0..steps {
            emu.step().unwrap();
        }
        assert!(emu.hardware().ppu().in_vblank());
        assert_eq!(emu.hardware().pc(), 0x8003);
        emu.step().unwrap();
        assert_eq!(emu.hardware().pc(), 0x8000);
    }

    #[test]
    fn test_start_stop_pause() {
        let mut emu = emulator();
        let events = emu.subscribe();
        assert!(matches!(emu.pause(), Err(EmulatorError::NotRunning)));

        emu.start();
        assert!(emu.is_running());
        emu.pause().unwrap();
        assert!(emu.is_paused());
        emu.resume().unwrap();
        assert!(!emu.is_paused());
        emu.stop();
        assert!(!emu.is_running());
        assert_eq!(events.try_recv(), Ok(EmulatorEvent::Stopped));
    }

    #[test]
    fn test_reset_keeps_compiled_code() {
        let mut emu = emulator();
        emu.execute_frame().unwrap();
        emu.reset();
        assert_eq!(emu.total_cycles(), 0);
        assert_eq!(emu.frame_count(), 0);
        assert_eq!(emu.hardware().pc(), 0x8000);
        assert!(emu.dispatcher().jit().is_compiled(0x8000));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut emu = emulator();
        drop(emu.subscribe());
        emu.start();
        emu.stop();
        assert!(emu.subscribers.is_empty());
    }
}
