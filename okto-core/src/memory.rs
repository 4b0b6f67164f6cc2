use std::fmt::{self, Debug};

use thiserror::Error;

use crate::font;

/// Total addressable memory in bytes.
pub const LEN: usize = 4096;

/// First address available to program code; everything below it belongs
/// to the interpreter (the font table lives at 0x000..0x050).
pub const PROGRAM_START: u16 = 0x200;

/// Largest ROM image that fits between [`PROGRAM_START`] and the end of
/// the address space.
pub const MAX_ROM_LEN: usize = LEN - PROGRAM_START as usize;

/// Faults of the memory component. Both are fatal: they indicate a
/// defective ROM or interpreter, not a recoverable runtime condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("out of bounds memory access at address {address:#06X}")]
    OutOfBounds { address: u16 },
    #[error("ROM of {rom_len} bytes exceeds the {MAX_ROM_LEN} bytes of program memory")]
    RomTooLarge { rom_len: usize },
}

/// The flat 4 KiB byte store holding font data, the loaded program and
/// whatever the program writes at runtime.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    bytes: [u8; LEN],
}

impl Memory {
    pub fn read(&self, address: u16) -> Result<u8, MemoryError> {
        self.bytes
            .get(address as usize)
            .copied()
            .ok_or(MemoryError::OutOfBounds { address })
    }

    pub fn write(&mut self, address: u16, value: u8) -> Result<(), MemoryError> {
        match self.bytes.get_mut(address as usize) {
            Some(byte) => {
                *byte = value;
                Ok(())
            }
            None => Err(MemoryError::OutOfBounds { address }),
        }
    }

    /// Writes the interpreter font into 0x000..0x050. Must happen before
    /// a program is loaded; `FX29` depends on this exact placement.
    pub fn load_font(&mut self) {
        self.bytes[..font::FONT_LEN].copy_from_slice(&font::FONT);
    }

    /// Copies a program image into memory starting at [`PROGRAM_START`].
    /// When the image does not fit, memory is left untouched.
    pub fn load_program(&mut self, rom: &[u8]) -> Result<(), MemoryError> {
        if rom.len() > MAX_ROM_LEN {
            return Err(MemoryError::RomTooLarge { rom_len: rom.len() });
        }
        let start = PROGRAM_START as usize;
        self.bytes[start..start + rom.len()].copy_from_slice(rom);
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self { bytes: [0; LEN] }
    }
}

impl Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_write_in_bounds() {
        let mut memory = Memory::default();
        memory.write(0x300, 0x2A).unwrap();
        assert_eq!(memory.read(0x300), Ok(0x2A));
    }

    #[test]
    fn first_out_of_bounds_address() {
        let mut memory = Memory::default();
        assert_eq!(
            memory.read(LEN as u16),
            Err(MemoryError::OutOfBounds { address: 0x1000 })
        );
        assert_eq!(
            memory.write(LEN as u16, 0),
            Err(MemoryError::OutOfBounds { address: 0x1000 })
        );
    }

    #[test]
    fn font_is_placed_at_the_bottom() {
        let mut memory = Memory::default();
        memory.load_font();
        assert_eq!(memory.read(0x000), Ok(0xF0));
        assert_eq!(memory.read(0x04F), Ok(0x80));
        assert_eq!(memory.read(0x050), Ok(0x00));
    }

    #[test]
    fn program_is_placed_at_0x200() {
        let mut memory = Memory::default();
        memory.load_program(&[0xAA, 0xBB]).unwrap();
        assert_eq!(memory.read(PROGRAM_START), Ok(0xAA));
        assert_eq!(memory.read(PROGRAM_START + 1), Ok(0xBB));
    }

    #[test]
    fn largest_rom_fits_exactly() {
        let mut memory = Memory::default();
        memory.load_program(&[0x55; MAX_ROM_LEN]).unwrap();
        assert_eq!(memory.read(LEN as u16 - 1), Ok(0x55));
    }

    #[test]
    fn oversized_rom_leaves_memory_untouched() {
        let mut memory = Memory::default();
        let untouched = memory.clone();
        assert_eq!(
            memory.load_program(&[0x55; MAX_ROM_LEN + 1]),
            Err(MemoryError::RomTooLarge {
                rom_len: MAX_ROM_LEN + 1
            })
        );
        assert_eq!(memory, untouched);
    }
}
