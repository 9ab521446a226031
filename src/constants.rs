/// First bytes of every binary image: `C0:)`.
pub const MAGIC: [u8; 4] = [0x43, 0x30, 0x3a, 0x29];

/// Format version, directly after the magic.
pub const VERSION: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Size of one stack cell. Every variable occupies exactly one slot.
pub const SLOT_BYTES: u32 = 4;

/// Nesting level recorded for every function (there are no inner scopes).
pub const FUNCTION_LEVEL: u16 = 1;

pub const INT_TAG: u8 = 0x00;
pub const DOUBLE_TAG: u8 = 0x01;
pub const STRING_TAG: u8 = 0x02;
