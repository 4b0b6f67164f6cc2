use num_enum::{IntoPrimitive, TryFromPrimitive};

/// A key of the 4x4 hex keypad.
///
/// Converting from a raw key id fails for values above 0xF; the
/// interpreter treats such ids as "no key", never as an error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum Key {
    K0,
    K1,
    K2,
    K3,
    K4,
    K5,
    K6,
    K7,
    K8,
    K9,
    KA,
    KB,
    KC,
    KD,
    KE,
    KF,
}

impl Key {
    pub const COUNT: usize = 16;
}

/// Press state of a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    NotPressed,
}

impl Default for KeyState {
    fn default() -> Self {
        Self::NotPressed
    }
}

/// Press-state table for all sixteen keys. Written by the input
/// collaborator (via the runner's control channel), read by the
/// interpreter during `EX9E`/`EXA1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypad {
    states: [KeyState; Key::COUNT],
}

impl Keypad {
    pub fn state(&self, key: Key) -> KeyState {
        self.states[key as u8 as usize]
    }

    pub fn is_pressed(&self, key: Key) -> bool {
        self.state(key) == KeyState::Pressed
    }

    pub fn set_state(&mut self, key: Key, state: KeyState) {
        self.states[key as u8 as usize] = state;
    }
}

impl Default for Keypad {
    fn default() -> Self {
        Self {
            states: [KeyState::NotPressed; Key::COUNT],
        }
    }
}
