use std::convert::TryFrom;

use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;

use crate::{
    display::Display,
    font,
    instruction::{Instruction, UnrecognizedOpcode},
    keypad::{Key, KeyState, Keypad},
    memory::{self, Memory},
    nibble_ints::{U4, U8Nibble},
    timer::{TimerKind, Timers},
};

mod call_stack;
mod register;

pub use call_stack::CallStack;
pub use register::DataRegister;

/// Width of one instruction word in memory.
const INSTRUCTION_LEN: u16 = 2;

/// Fatal interpreter faults. Every variant is a defect in the ROM or the
/// interpreter itself; the driver decides whether to terminate or build
/// a fresh machine, the core never retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("out of bounds memory access at {address:#06X} (PC {program_counter:#06X})")]
    OutOfBounds { address: u16, program_counter: u16 },
    #[error("unrecognized opcode {opcode:#06X} at {program_counter:#06X}")]
    UnrecognizedOpcode { opcode: u16, program_counter: u16 },
    #[error("call stack overflow at {program_counter:#06X}")]
    StackOverflow { program_counter: u16 },
    #[error("return with an empty call stack at {program_counter:#06X}")]
    StackUnderflow { program_counter: u16 },
}

/// What one cycle did, as far as the driver loop cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// One instruction ran to completion.
    Completed { display_updated: bool },
    /// The CPU is parked on `FX0A`; the program counter is frozen until
    /// a key press arrives.
    WaitingForKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyWait {
    Idle,
    Waiting { target_register: DataRegister },
}

/// The fetch/decode/execute core.
///
/// Owns the register file, index register, program counter and call
/// stack; everything else it touches (memory, display, keypad, timers)
/// is passed into [`Cpu::cycle`] by the machine that owns all five.
/// The random source for `CXNN` is injected at construction so runs can
/// be made deterministic.
#[derive(Debug, Clone)]
pub struct Cpu {
    registers: [u8; DataRegister::COUNT],
    index_register: u16,
    program_counter: u16,
    call_stack: CallStack,
    key_wait: KeyWait,
    rng: StdRng,
}

impl Cpu {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// A CPU with an explicit random source, for deterministic runs.
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            registers: [0; DataRegister::COUNT],
            index_register: 0,
            program_counter: memory::PROGRAM_START,
            call_stack: CallStack::default(),
            key_wait: KeyWait::Idle,
            rng,
        }
    }

    pub fn program_counter(&self) -> u16 {
        self.program_counter
    }

    pub fn index_register(&self) -> u16 {
        self.index_register
    }

    pub fn register(&self, register: DataRegister) -> u8 {
        self.registers[register as u8 as usize]
    }

    fn set_register(&mut self, register: DataRegister, value: u8) {
        self.registers[register as u8 as usize] = value;
    }

    pub fn is_waiting_for_key(&self) -> bool {
        matches!(self.key_wait, KeyWait::Waiting { .. })
    }

    /// Completes a pending `FX0A`: stores the key id in the target
    /// register and steps past the wait instruction. Returns whether the
    /// press was consumed by a wait.
    pub(crate) fn complete_key_wait(&mut self, key: Key) -> bool {
        match self.key_wait {
            KeyWait::Waiting { target_register } => {
                self.set_register(target_register, key as u8);
                self.program_counter = self.program_counter.wrapping_add(INSTRUCTION_LEN);
                self.key_wait = KeyWait::Idle;
                true
            }
            KeyWait::Idle => false,
        }
    }

    fn read_memory(&self, memory: &Memory, address: u16) -> Result<u8, CpuError> {
        memory.read(address).map_err(|_| CpuError::OutOfBounds {
            address,
            program_counter: self.program_counter,
        })
    }

    fn write_memory(&self, memory: &mut Memory, address: u16, value: u8) -> Result<(), CpuError> {
        memory
            .write(address, value)
            .map_err(|_| CpuError::OutOfBounds {
                address,
                program_counter: self.program_counter,
            })
    }

    /// The two instruction bytes at the program counter. Fetch never
    /// advances the counter; every execute path does so explicitly.
    fn fetch(&self, memory: &Memory) -> Result<[u8; 2], CpuError> {
        Ok([
            self.read_memory(memory, self.program_counter)?,
            self.read_memory(memory, self.program_counter.wrapping_add(1))?,
        ])
    }

    /// Press state for a raw key id out of a register; ids above 0xF
    /// mean "no key" and read as not pressed.
    fn key_state(&self, keypad: &Keypad, key_id: u8) -> KeyState {
        Key::try_from(key_id)
            .map(|key| keypad.state(key))
            .unwrap_or(KeyState::NotPressed)
    }

    fn skip_next(&mut self) {
        self.program_counter = self.program_counter.wrapping_add(2 * INSTRUCTION_LEN);
    }

    /// Runs exactly one fetch/decode/execute cycle.
    ///
    /// While parked on `FX0A` this is a no-op reporting
    /// [`CycleOutcome::WaitingForKey`]; the park is released through
    /// [`Cpu::complete_key_wait`].
    pub fn cycle(
        &mut self,
        memory: &mut Memory,
        display: &mut Display,
        keypad: &Keypad,
        timers: &mut Timers,
    ) -> Result<CycleOutcome, CpuError> {
        if self.is_waiting_for_key() {
            return Ok(CycleOutcome::WaitingForKey);
        }

        let bytes = self.fetch(memory)?;
        let instruction = Instruction::try_from(bytes).map_err(|UnrecognizedOpcode(opcode)| {
            CpuError::UnrecognizedOpcode {
                opcode,
                program_counter: self.program_counter,
            }
        })?;

        let mut pc_overridden = false;
        let mut display_updated = false;

        match instruction {
            Instruction::ClearDisplay => {
                display.clear();
                display_updated = true;
            }
            Instruction::Return => {
                self.program_counter =
                    self.call_stack
                        .pop()
                        .ok_or(CpuError::StackUnderflow {
                            program_counter: self.program_counter,
                        })?;
                pc_overridden = true;
            }
            Instruction::Jump { target } => {
                self.program_counter = target.into_u16();
                pc_overridden = true;
            }
            Instruction::Call { target } => {
                self.call_stack
                    .push(self.program_counter.wrapping_add(INSTRUCTION_LEN))
                    .map_err(|_| CpuError::StackOverflow {
                        program_counter: self.program_counter,
                    })?;
                self.program_counter = target.into_u16();
                pc_overridden = true;
            }
            Instruction::SkipIfEqConst { register, constant } => {
                if self.register(register) == constant {
                    self.skip_next();
                    pc_overridden = true;
                }
            }
            Instruction::SkipIfNeqConst { register, constant } => {
                if self.register(register) != constant {
                    self.skip_next();
                    pc_overridden = true;
                }
            }
            Instruction::SkipIfEq {
                register1,
                register2,
            } => {
                if self.register(register1) == self.register(register2) {
                    self.skip_next();
                    pc_overridden = true;
                }
            }
            Instruction::SetConst { register, constant } => self.set_register(register, constant),
            Instruction::AddConst { register, constant } => {
                self.set_register(register, self.register(register).wrapping_add(constant))
            }
            Instruction::Copy { target, source } => {
                self.set_register(target, self.register(source))
            }
            Instruction::Or { target, source } => {
                self.set_register(target, self.register(target) | self.register(source))
            }
            Instruction::And { target, source } => {
                self.set_register(target, self.register(target) & self.register(source))
            }
            Instruction::Xor { target, source } => {
                self.set_register(target, self.register(target) ^ self.register(source))
            }
            Instruction::Add { target, source } => {
                let (sum, carry) = self
                    .register(target)
                    .overflowing_add(self.register(source));
                self.set_register(target, sum);
                // the flag write wins when the destination is VF itself
                self.set_register(DataRegister::VF, carry as u8);
            }
            Instruction::Sub { target, source } => {
                let (difference, borrow) = self
                    .register(target)
                    .overflowing_sub(self.register(source));
                self.set_register(target, difference);
                self.set_register(DataRegister::VF, (!borrow) as u8);
            }
            Instruction::ShiftRight { register } => {
                let value = self.register(register);
                self.set_register(register, value >> 1);
                self.set_register(DataRegister::VF, value & 0b1);
            }
            Instruction::RevSub { target, source } => {
                let (difference, borrow) = self
                    .register(source)
                    .overflowing_sub(self.register(target));
                self.set_register(target, difference);
                self.set_register(DataRegister::VF, (!borrow) as u8);
            }
            Instruction::ShiftLeft { register } => {
                let value = self.register(register);
                self.set_register(register, value << 1);
                self.set_register(DataRegister::VF, value >> 7);
            }
            Instruction::SkipIfNeq {
                register1,
                register2,
            } => {
                if self.register(register1) != self.register(register2) {
                    self.skip_next();
                    pc_overridden = true;
                }
            }
            Instruction::SetIndex { address } => self.index_register = address.into_u16(),
            Instruction::JumpOffset { address } => {
                self.program_counter = address
                    .into_u16()
                    .wrapping_add(self.register(DataRegister::V0) as u16);
                pc_overridden = true;
            }
            Instruction::Random { register, mask } => {
                let byte: u8 = self.rng.gen();
                self.set_register(register, byte & mask);
            }
            Instruction::Draw {
                x_register,
                y_register,
                row_count,
            } => {
                let x = self.register(x_register) as usize;
                let y = self.register(y_register) as usize;
                let mut collision = false;
                for row in 0..row_count.into_u8() as u16 {
                    let sprite_row =
                        self.read_memory(memory, self.index_register.wrapping_add(row))?;
                    collision |= display.compose(x, y + row as usize, sprite_row);
                }
                self.set_register(DataRegister::VF, collision as u8);
                display_updated = true;
            }
            Instruction::SkipIfKeyPressed { key_register } => {
                if self.key_state(keypad, self.register(key_register)) == KeyState::Pressed {
                    self.skip_next();
                    pc_overridden = true;
                }
            }
            Instruction::SkipIfKeyNotPressed { key_register } => {
                if self.key_state(keypad, self.register(key_register)) == KeyState::NotPressed {
                    self.skip_next();
                    pc_overridden = true;
                }
            }
            Instruction::ReadDelayTimer { register } => {
                self.set_register(register, timers.get(TimerKind::Delay))
            }
            Instruction::WaitForKey { register } => {
                self.key_wait = KeyWait::Waiting {
                    target_register: register,
                };
                // PC stays on this instruction until the wait completes
                return Ok(CycleOutcome::WaitingForKey);
            }
            Instruction::SetDelayTimer { register } => {
                timers.set(TimerKind::Delay, self.register(register))
            }
            Instruction::SetSoundTimer { register } => {
                timers.set(TimerKind::Sound, self.register(register))
            }
            Instruction::AddToIndex { register } => {
                self.index_register = self
                    .index_register
                    .wrapping_add(self.register(register) as u16)
            }
            Instruction::SetIndexToFont { digit_register } => {
                // glyphs sit at the bottom of memory, GLYPH_HEIGHT bytes apart
                self.index_register =
                    self.register(digit_register) as u16 * font::GLYPH_HEIGHT as u16;
            }
            Instruction::StoreBcd { register } => {
                let [hundreds, tens, ones] = decimal_digits(self.register(register));
                let index = self.index_register;
                self.write_memory(memory, index, hundreds)?;
                self.write_memory(memory, index.wrapping_add(1), tens)?;
                self.write_memory(memory, index.wrapping_add(2), ones)?;
            }
            Instruction::StoreRegisters { last_register } => {
                for offset in 0..=last_register as u8 {
                    let register = DataRegister::from(U4::from_u8(offset, U8Nibble::Lo));
                    self.write_memory(
                        memory,
                        self.index_register.wrapping_add(offset as u16),
                        self.register(register),
                    )?;
                }
            }
            Instruction::LoadRegisters { last_register } => {
                for offset in 0..=last_register as u8 {
                    let register = DataRegister::from(U4::from_u8(offset, U8Nibble::Lo));
                    let value = self
                        .read_memory(memory, self.index_register.wrapping_add(offset as u16))?;
                    self.set_register(register, value);
                }
                self.index_register = self
                    .index_register
                    .wrapping_add(last_register as u8 as u16 + 1);
            }
        }

        if !pc_overridden {
            self.program_counter = self.program_counter.wrapping_add(INSTRUCTION_LEN);
        }

        Ok(CycleOutcome::Completed { display_updated })
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Decimal digits of a byte, most significant first. Three digits always
/// suffice for a u8.
fn decimal_digits(value: u8) -> [u8; 3] {
    [value / 100, value / 10 % 10, value % 10]
}
