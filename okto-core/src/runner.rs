use std::{
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, error, trace};

use crate::{
    cpu::{CpuError, CycleOutcome},
    display::Frame,
    emulator::Emulator,
    keypad::{Key, KeyState},
};

/// Interval between timer ticks, 60 per second.
const TIMER_TICK_PERIOD: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// Pacing for the emulator thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Interpreter cycles per second. Timers tick at 60 Hz regardless of
    /// this rate; the two clocks were independent on the original
    /// hardware too.
    pub cycles_per_second: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cycles_per_second: 700,
        }
    }
}

/// Messages from the driver to the emulator thread. Dropping the sender
/// stops the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    KeyStateChange { key: Key, state: KeyState },
}

/// The driver's write end of the control channel.
pub type ControlSender = Sender<ControlEvent>;
/// The driver's read end of the event channel.
pub type EventReceiver = Receiver<EmulatorEvent>;
/// Handle to the emulator thread; yields the fatal fault, if any.
pub type EmulatorHandle = JoinHandle<Result<(), CpuError>>;

/// Messages from the emulator thread to the driver.
#[derive(Debug, Clone)]
pub enum EmulatorEvent {
    /// The display changed; a fresh snapshot for the renderer.
    ScreenUpdate(Box<Frame>),
    /// The CPU parked on a key-wait.
    WaitingForKey,
    StartPlayingSound,
    StopPlayingSound,
    /// A fatal fault; the emulator thread stops right after sending
    /// this, and the same error comes out of the join handle.
    ErrorEncountered(CpuError),
}

impl Emulator {
    /// Moves the machine onto its own thread, paced per `options`.
    ///
    /// Key changes go in through the returned sender; screen, sound and
    /// error events come out of the receiver. This channel indirection
    /// is what keeps keypad writes from a UI thread safely ordered with
    /// interpreter cycles: they are applied between cycles, on the
    /// emulator thread.
    pub fn start(self, options: RunOptions) -> (ControlSender, EventReceiver, EmulatorHandle) {
        let (control_sender, control_receiver) = flume::unbounded();
        let (event_sender, event_receiver) = flume::unbounded();

        let join_handle = thread::Builder::new()
            .name("okto emulator".to_owned())
            .spawn(move || run(self, options, control_receiver, event_sender))
            .expect("could not spawn emulator thread");

        (control_sender, event_receiver, join_handle)
    }
}

#[tracing::instrument(skip_all, fields(cycles_per_second = options.cycles_per_second))]
fn run(
    mut emulator: Emulator,
    options: RunOptions,
    control: Receiver<ControlEvent>,
    events: Sender<EmulatorEvent>,
) -> Result<(), CpuError> {
    let cycle_period = Duration::from_secs_f64(1.0 / options.cycles_per_second.max(1) as f64);

    debug!("emulator thread started");

    let mut next_cycle = Instant::now();
    let mut next_timer_tick = Instant::now() + TIMER_TICK_PERIOD;
    let mut sound_was_active = false;

    loop {
        loop {
            match control.try_recv() {
                Ok(event) => apply_control_event(&mut emulator, event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("control channel closed, stopping");
                    return Ok(());
                }
            }
        }

        if Instant::now() >= next_timer_tick {
            emulator.tick_timers();
            next_timer_tick += TIMER_TICK_PERIOD;
        }

        if emulator.is_waiting_for_key() {
            // Cycles are suspended until a key press arrives, but the
            // 60 Hz ticks must go on; block on the control channel only
            // up to the next tick.
            match control.recv_deadline(next_timer_tick) {
                Ok(event) => apply_control_event(&mut emulator, event),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("control channel closed, stopping");
                    return Ok(());
                }
            }
            next_cycle = Instant::now();
        } else if Instant::now() >= next_cycle {
            match emulator.cycle() {
                Ok(CycleOutcome::Completed { display_updated }) => {
                    if display_updated
                        && events
                            .send(EmulatorEvent::ScreenUpdate(Box::new(emulator.frame())))
                            .is_err()
                    {
                        return Ok(()); // event receiver gone
                    }
                }
                Ok(CycleOutcome::WaitingForKey) => {
                    trace!("parked waiting for a key press");
                    let _ = events.send(EmulatorEvent::WaitingForKey);
                }
                Err(cpu_error) => {
                    error!(%cpu_error, "stopping on fatal fault");
                    let _ = events.send(EmulatorEvent::ErrorEncountered(cpu_error.clone()));
                    return Err(cpu_error);
                }
            }
            next_cycle += cycle_period;
        }

        let sound_active = emulator.sound_active();
        if sound_active != sound_was_active {
            let event = if sound_active {
                EmulatorEvent::StartPlayingSound
            } else {
                EmulatorEvent::StopPlayingSound
            };
            if events.send(event).is_err() {
                return Ok(());
            }
            sound_was_active = sound_active;
        }

        let wakeup = next_cycle.min(next_timer_tick);
        spin_sleep::sleep(wakeup.saturating_duration_since(Instant::now()));
    }
}

fn apply_control_event(emulator: &mut Emulator, event: ControlEvent) {
    match event {
        ControlEvent::KeyStateChange { key, state } => {
            trace!(?key, ?state, "key state change");
            emulator.set_key_state(key, state);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dropping_the_control_sender_stops_the_thread() {
        // 1200: jump-to-self
        let emulator = Emulator::builder().rom(&[0x12, 0x00]).build().unwrap();
        let (control_sender, _event_receiver, join_handle) =
            emulator.start(RunOptions::default());

        drop(control_sender);

        assert_eq!(join_handle.join().unwrap(), Ok(()));
    }

    #[test]
    fn fatal_faults_come_out_of_the_join_handle() {
        // program memory is zeroed, so the first fetch decodes 0x0000
        let emulator = Emulator::builder().rom(&[]).build().unwrap();
        let (_control_sender, event_receiver, join_handle) =
            emulator.start(RunOptions::default());

        let error = join_handle.join().unwrap().unwrap_err();
        assert_eq!(
            error,
            CpuError::UnrecognizedOpcode {
                opcode: 0x0000,
                program_counter: 0x200,
            }
        );
        assert!(event_receiver
            .iter()
            .any(|event| matches!(event, EmulatorEvent::ErrorEncountered(_))));
    }
}
