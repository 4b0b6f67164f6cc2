use num_enum::{IntoPrimitive, TryFromPrimitive, UnsafeFromPrimitive};

use crate::nibble_ints::U4;

/// General purpose data register of the interpreter.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    TryFromPrimitive,
    IntoPrimitive,
    UnsafeFromPrimitive,
)]
#[repr(u8)]
pub enum DataRegister {
    /// Used as the jump offset in `BNNN`.
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
    V8,
    V9,
    VA,
    VB,
    VC,
    VD,
    VE,
    /// The implicit flag register: receives carry, not-borrow,
    /// shifted-out bits and sprite collision. Instructions that write it
    /// as a flag clobber whatever was stored there.
    VF,
}

impl DataRegister {
    pub const COUNT: usize = 16;
}

impl From<U4> for DataRegister {
    fn from(val: U4) -> Self {
        // SAFETY: there are exactly sixteen registers, one per low-nibble value.
        unsafe { DataRegister::from_unchecked(val.into_u8()) }
    }
}
