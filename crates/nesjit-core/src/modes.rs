//! Real-time timing modes
//!
//! Both modes drive a [`SharedEmulator`] from one background thread and only
//! ever run whole frames, so stopping takes effect between frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, Receiver, Sender};
use log::{debug, error, info, trace};
use parking_lot::Mutex;

use crate::config::TimingModeKind;
use crate::emulator::NesEmulator;
use crate::error::EmulatorError;

pub type SharedEmulator = Arc<Mutex<NesEmulator>>;

/// Sleep while paused in cycle-accurate mode
const PAUSE_SLEEP: Duration = Duration::from_millis(10);

pub trait TimingMode: Send {
    /// Start the emulator and its driver thread. No-op while a driver is
    /// live; a driver that exited on its own is joined and replaced.
    fn start(&mut self) -> Result<(), EmulatorError>;

    /// Stop after the current frame and wait for the thread to exit
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Build the driver selected by `kind`
pub fn create_mode(kind: TimingModeKind, emulator: SharedEmulator) -> Box<dyn TimingMode> {
    match kind {
        TimingModeKind::EventDriven => Box::new(EventDrivenMode::new(emulator)),
        TimingModeKind::CycleAccurate => Box::new(CycleAccurateMode::new(emulator)),
    }
}

/// Runs one frame per tick of a fixed-interval timer
///
/// The frame runs under `try_lock`: if the emulator is busy (a slow frame,
/// or a host holding the lock) the tick is skipped rather than queued.
pub struct EventDrivenMode {
    emulator: SharedEmulator,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl EventDrivenMode {
    pub fn new(emulator: SharedEmulator) -> Self {
        Self {
            emulator,
            stop_tx: None,
            thread: None,
        }
    }
}

impl EventDrivenMode {
    fn join_thread(&mut self) {
        // Dropping the sender disconnects the stop channel
        self.stop_tx.take();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("event-driven thread panicked");
            }
        }
    }
}

impl TimingMode for EventDrivenMode {
    fn start(&mut self) -> Result<(), EmulatorError> {
        if self.thread.is_some() {
            if !driver_exited(&self.thread, &self.emulator) {
                return Ok(());
            }
            debug!("event-driven thread exited on its own, restarting");
            self.join_thread();
        }
        let interval = {
            let mut emu = self.emulator.lock();
            emu.start();
            Duration::from_millis(emu.config().frame_interval_ms)
        };

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let emulator = Arc::clone(&self.emulator);
        let handle = thread::Builder::new()
            .name("nesjit-event".into())
            .spawn(move || run_event_driven(emulator, interval, stop_rx))
            .map_err(EmulatorError::Spawn)?;

        self.stop_tx = Some(stop_tx);
        self.thread = Some(handle);
        info!("event-driven mode started, {:?} per frame", interval);
        Ok(())
    }

    fn stop(&mut self) {
        self.join_thread();
        self.emulator.lock().stop();
    }

    fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for EventDrivenMode {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

/// True when the driver thread has finished, or will at its next check
/// because the emulator was stopped underneath it
fn driver_exited(thread: &Option<JoinHandle<()>>, emulator: &SharedEmulator) -> bool {
    thread.as_ref().map_or(true, |h| h.is_finished()) || !emulator.lock().is_running()
}

fn run_event_driven(emulator: SharedEmulator, interval: Duration, stop_rx: Receiver<()>) {
    let ticker = tick(interval);
    loop {
        let keep_going = select! {
            recv(stop_rx) -> _ => false,
            recv(ticker) -> _ => run_tick(&emulator),
        };
        if !keep_going {
            break;
        }
    }
}

/// Run one frame if the emulator is free; false once the driver should exit
fn run_tick(emulator: &SharedEmulator) -> bool {
    let Some(mut emu) = emulator.try_lock() else {
        trace!("tick skipped, emulator busy");
        return true;
    };
    if !emu.is_running() {
        return false;
    }
    if emu.is_paused() {
        return true;
    }
    match emu.execute_frame() {
        Ok(()) => true,
        Err(err) => {
            error!("frame failed: {}", err);
            emu.stop();
            false
        }
    }
}

/// Paces frames against the nominal CPU clock
///
/// Target wall time is derived from cycles executed since the last clock
/// base; each frame is followed by a sleep for whatever time remains.
pub struct CycleAccurateMode {
    emulator: SharedEmulator,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CycleAccurateMode {
    pub fn new(emulator: SharedEmulator) -> Self {
        Self {
            emulator,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl CycleAccurateMode {
    fn join_thread(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("cycle-accurate thread panicked");
            }
        }
    }
}

impl TimingMode for CycleAccurateMode {
    fn start(&mut self) -> Result<(), EmulatorError> {
        if self.thread.is_some() {
            if !driver_exited(&self.thread, &self.emulator) {
                return Ok(());
            }
            debug!("cycle-accurate thread exited on its own, restarting");
            self.join_thread();
        }
        let clock_hz = {
            let mut emu = self.emulator.lock();
            emu.start();
            emu.config().cpu_clock_hz
        };

        self.running.store(true, Ordering::Release);
        let emulator = Arc::clone(&self.emulator);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("nesjit-cycle".into())
            .spawn(move || run_cycle_accurate(emulator, clock_hz, running))
            .map_err(|err| {
                self.running.store(false, Ordering::Release);
                EmulatorError::Spawn(err)
            })?;

        self.thread = Some(handle);
        info!("cycle-accurate mode started at {} Hz", clock_hz);
        Ok(())
    }

    fn stop(&mut self) {
        self.join_thread();
        self.emulator.lock().stop();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for CycleAccurateMode {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

fn run_cycle_accurate(emulator: SharedEmulator, clock_hz: f64, running: Arc<AtomicBool>) {
    let mut base: Option<(Instant, i64)> = None;

    while running.load(Ordering::Acquire) {
        let total_cycles = {
            let mut emu = emulator.lock();
            if !emu.is_running() {
                break;
            }
            if emu.is_paused() {
                None
            } else {
                if base.map_or(true, |(_, cycles)| emu.total_cycles() < cycles) {
                    base = Some((Instant::now(), emu.total_cycles()));
                }
                if let Err(err) = emu.execute_frame() {
                    error!("frame failed: {}", err);
                    emu.stop();
                    break;
                }
                Some(emu.total_cycles())
            }
        };

        let Some(total_cycles) = total_cycles else {
            base = None;
            thread::sleep(PAUSE_SLEEP);
            continue;
        };
        if let Some((started, base_cycles)) = base {
            let elapsed_cycles = (total_cycles - base_cycles) as f64;
            let target = started + Duration::from_secs_f64(elapsed_cycles / clock_hz);
            let now = Instant::now();
            if target > now {
                thread::sleep(target - now);
            }
        }
    }
    running.store(false, Ordering::Release);
}
