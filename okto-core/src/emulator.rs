use rand::rngs::StdRng;

use crate::{
    cpu::{Cpu, CpuError, CycleOutcome},
    display::{Display, Frame},
    keypad::{Key, KeyState, Keypad},
    memory::{Memory, MemoryError},
    timer::{TimerKind, Timers},
};

/// A fully wired CHIP-8 machine: the four peripheral components plus the
/// CPU that mutates them.
///
/// The emulator does not pace itself; something external has to call
/// [`Emulator::cycle`] at the interpreter rate and
/// [`Emulator::tick_timers`] at 60 Hz. [`Emulator::start`] spawns the
/// thread that does exactly that.
///
/// [`Emulator::start`]: crate::runner
#[derive(Debug)]
pub struct Emulator {
    cpu: Cpu,
    memory: Memory,
    display: Display,
    keypad: Keypad,
    timers: Timers,
}

impl Emulator {
    pub fn builder() -> EmulatorBuilder {
        EmulatorBuilder::new()
    }

    /// Runs one fetch/decode/execute cycle.
    pub fn cycle(&mut self) -> Result<CycleOutcome, CpuError> {
        self.cpu.cycle(
            &mut self.memory,
            &mut self.display,
            &self.keypad,
            &mut self.timers,
        )
    }

    /// One 60 Hz timer tick, independent of the cycle rate.
    pub fn tick_timers(&mut self) {
        self.timers.tick();
    }

    /// Applies a key state change from the input collaborator. A
    /// released-to-pressed transition completes a pending `FX0A` wait.
    pub fn set_key_state(&mut self, key: Key, state: KeyState) {
        let was_pressed = self.keypad.is_pressed(key);
        self.keypad.set_state(key, state);
        if state == KeyState::Pressed && !was_pressed {
            self.cpu.complete_key_wait(key);
        }
    }

    /// Snapshot of the display for the renderer.
    pub fn frame(&self) -> Frame {
        self.display.frame()
    }

    /// Whether the buzzer should currently be audible.
    pub fn sound_active(&self) -> bool {
        self.timers.get(TimerKind::Sound) > 0
    }

    pub fn is_waiting_for_key(&self) -> bool {
        self.cpu.is_waiting_for_key()
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }
}

/// Builds an [`Emulator`]: the font table is written first, then the ROM
/// image. Building a fresh machine is the only way to load a ROM. There
/// is no load path into a running emulator, so a load can never observe
/// stale registers, stack frames or a moved program counter.
pub struct EmulatorBuilder {
    rom: Vec<u8>,
    rng: Option<StdRng>,
}

impl EmulatorBuilder {
    pub fn new() -> Self {
        Self {
            rom: Vec::new(),
            rng: None,
        }
    }

    /// The ROM image to copy to address 0x200.
    pub fn rom(mut self, rom: &[u8]) -> Self {
        self.rom = rom.to_vec();
        self
    }

    /// Injects the random source used by `CXNN`, for deterministic runs.
    pub fn rng(mut self, rng: StdRng) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Fails with [`MemoryError::RomTooLarge`] before any machine state
    /// exists when the ROM does not fit.
    pub fn build(self) -> Result<Emulator, MemoryError> {
        let mut memory = Memory::default();
        memory.load_font();
        memory.load_program(&self.rom)?;

        let cpu = match self.rng {
            Some(rng) => Cpu::with_rng(rng),
            None => Cpu::new(),
        };

        Ok(Emulator {
            cpu,
            memory,
            display: Display::default(),
            keypad: Keypad::default(),
            timers: Timers::default(),
        })
    }
}

impl Default for EmulatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::convert::TryFrom;

    use super::*;
    use crate::{cpu::DataRegister, instruction::Instruction, memory, U4};

    fn assemble(instructions: &[Instruction]) -> Vec<u8> {
        instructions
            .iter()
            .flat_map(|&instruction| <[u8; 2]>::from(instruction).to_vec())
            .collect()
    }

    #[test]
    fn oversized_rom_is_rejected_at_build_time() {
        let result = Emulator::builder()
            .rom(&[0x55; memory::MAX_ROM_LEN + 1])
            .build();

        assert_eq!(
            result.err(),
            Some(MemoryError::RomTooLarge {
                rom_len: memory::MAX_ROM_LEN + 1
            })
        );
    }

    #[test]
    fn built_machine_starts_at_0x200_with_the_font_in_place() {
        let emulator = Emulator::builder().rom(&[0x00, 0xE0]).build().unwrap();

        assert_eq!(emulator.cpu().program_counter(), 0x200);
        assert_eq!(emulator.memory().read(0x000), Ok(0xF0));
        assert_eq!(emulator.memory().read(0x200), Ok(0x00));
        assert_eq!(emulator.memory().read(0x201), Ok(0xE0));
    }

    #[test]
    fn clear_display_wipes_previous_drawing() {
        let rom = assemble(&[
            Instruction::SetIndexToFont {
                digit_register: DataRegister::V0,
            },
            Instruction::Draw {
                x_register: DataRegister::V0,
                y_register: DataRegister::V0,
                row_count: U4::try_from(5).unwrap(),
            },
            Instruction::ClearDisplay,
        ]);
        let mut emulator = Emulator::builder().rom(&rom).build().unwrap();

        emulator.cycle().unwrap();
        emulator.cycle().unwrap();
        assert!(emulator.frame().iter().any(|&on| on));

        emulator.cycle().unwrap();
        assert!(emulator.frame().iter().all(|&on| !on));
    }

    #[test]
    fn key_wait_resumes_only_on_a_press_transition() {
        let rom = assemble(&[Instruction::WaitForKey {
            register: DataRegister::V7,
        }]);
        let mut emulator = Emulator::builder().rom(&rom).build().unwrap();

        // park the CPU with a key already held down
        emulator.set_key_state(Key::K5, KeyState::Pressed);
        assert_eq!(emulator.cycle(), Ok(CycleOutcome::WaitingForKey));

        // re-reporting the held key is not a transition
        emulator.set_key_state(Key::K5, KeyState::Pressed);
        assert!(emulator.is_waiting_for_key());

        emulator.set_key_state(Key::K5, KeyState::NotPressed);
        assert!(emulator.is_waiting_for_key());

        emulator.set_key_state(Key::K5, KeyState::Pressed);
        assert!(!emulator.is_waiting_for_key());
        assert_eq!(emulator.cpu().register(DataRegister::V7), 0x5);
        assert_eq!(emulator.cpu().program_counter(), 0x202);
    }
}
