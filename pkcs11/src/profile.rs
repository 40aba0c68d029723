// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Native word width and structure packing of a cryptoki module

use std::fmt;

use crate::layout::LayoutError;
use crate::CK_ULONG;
use crate::CK_UNAVAILABLE_INFORMATION;

/// Width of the module's `CK_ULONG`
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NativeWord {
    Width4,
    Width8,
}

impl NativeWord {
    pub const fn size(self) -> usize {
        match self {
            NativeWord::Width4 => 4,
            NativeWord::Width8 => 8,
        }
    }

    pub fn from_size(size: usize) -> Option<NativeWord> {
        match size {
            4 => Some(NativeWord::Width4),
            8 => Some(NativeWord::Width8),
            _ => None,
        }
    }

    /// Checks that a logical value can be represented in this width.
    /// All ones is always representable, it becomes all ones of the
    /// narrower word.
    pub fn fits(self, value: CK_ULONG) -> bool {
        match self {
            NativeWord::Width8 => true,
            NativeWord::Width4 => {
                value == CK_UNAVAILABLE_INFORMATION
                    || value <= CK_ULONG::from(u32::MAX)
            }
        }
    }

    /// Decodes a native word from the start of `bytes`
    pub fn read(self, bytes: &[u8]) -> CK_ULONG {
        match self {
            NativeWord::Width4 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&bytes[..4]);
                u32::from_ne_bytes(raw).widen()
            }
            NativeWord::Width8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                u64::from_ne_bytes(raw)
            }
        }
    }

    /// Encodes `value` at the start of `bytes`
    pub fn write(
        self,
        value: CK_ULONG,
        bytes: &mut [u8],
    ) -> Result<(), LayoutError> {
        match self {
            NativeWord::Width4 => match u32::narrow(value) {
                Some(v) => bytes[..4].copy_from_slice(&v.to_ne_bytes()),
                None => return Err(LayoutError::Overflow(value)),
            },
            NativeWord::Width8 => {
                bytes[..8].copy_from_slice(&value.to_ne_bytes())
            }
        }
        Ok(())
    }
}

/// Structure alignment rule of the module
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PackingMode {
    /// Natural C alignment of the host compiler
    Default,
    /// `#pragma pack(1)`, every field at the next byte
    OneByte,
}

/// One of the four ABI variants a cryptoki module may be built with
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PlatformProfile {
    pub word: NativeWord,
    pub packing: PackingMode,
}

impl PlatformProfile {
    pub const W4: PlatformProfile = PlatformProfile {
        word: NativeWord::Width4,
        packing: PackingMode::Default,
    };
    pub const W4_PACKED: PlatformProfile = PlatformProfile {
        word: NativeWord::Width4,
        packing: PackingMode::OneByte,
    };
    pub const W8: PlatformProfile = PlatformProfile {
        word: NativeWord::Width8,
        packing: PackingMode::Default,
    };
    pub const W8_PACKED: PlatformProfile = PlatformProfile {
        word: NativeWord::Width8,
        packing: PackingMode::OneByte,
    };

    pub const ALL: [PlatformProfile; 4] = [
        PlatformProfile::W4,
        PlatformProfile::W4_PACKED,
        PlatformProfile::W8,
        PlatformProfile::W8_PACKED,
    ];

    pub const fn new(word: NativeWord, packing: PackingMode) -> Self {
        PlatformProfile {
            word: word,
            packing: packing,
        }
    }
}

impl fmt::Display for PlatformProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let packing = match self.packing {
            PackingMode::Default => "",
            PackingMode::OneByte => "_packed",
        };
        write!(f, "w{}{}", self.word.size(), packing)
    }
}

/// The Rust type of a native `CK_ULONG`
pub trait Word:
    Copy + Default + Eq + fmt::Debug + Send + Sync + 'static
{
    const WIDTH: NativeWord;

    /// Narrows a logical value, `None` when it does not fit
    fn narrow(value: CK_ULONG) -> Option<Self>;

    /// Widens back to the logical value
    fn widen(self) -> CK_ULONG;
}

impl Word for u32 {
    const WIDTH: NativeWord = NativeWord::Width4;

    fn narrow(value: CK_ULONG) -> Option<u32> {
        if value == CK_UNAVAILABLE_INFORMATION {
            return Some(u32::MAX);
        }
        u32::try_from(value).ok()
    }

    fn widen(self) -> CK_ULONG {
        if self == u32::MAX {
            CK_UNAVAILABLE_INFORMATION
        } else {
            CK_ULONG::from(self)
        }
    }
}

impl Word for u64 {
    const WIDTH: NativeWord = NativeWord::Width8;

    fn narrow(value: CK_ULONG) -> Option<u64> {
        Some(value)
    }

    fn widen(self) -> CK_ULONG {
        self
    }
}

/// Compile time marker for a [PackingMode]
pub trait Packing: Send + Sync + 'static {
    const MODE: PackingMode;
}

#[derive(Debug)]
pub struct DefaultPacking;

impl Packing for DefaultPacking {
    const MODE: PackingMode = PackingMode::Default;
}

#[derive(Debug)]
pub struct OneBytePacking;

impl Packing for OneBytePacking {
    const MODE: PackingMode = PackingMode::OneByte;
}

/// The profile matching a `(Word, Packing)` pair
pub const fn profile_of<W: Word, P: Packing>() -> PlatformProfile {
    PlatformProfile::new(W::WIDTH, P::MODE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_information_maps_across_widths() {
        assert_eq!(u32::narrow(CK_UNAVAILABLE_INFORMATION), Some(u32::MAX));
        assert_eq!(u32::MAX.widen(), CK_UNAVAILABLE_INFORMATION);
        assert_eq!(u32::narrow(0x1_0000_0000), None);
        assert_eq!(u32::narrow(42), Some(42));

        let mut buf = [0u8; 4];
        NativeWord::Width4
            .write(CK_UNAVAILABLE_INFORMATION, &mut buf)
            .unwrap();
        assert_eq!(buf, [0xff; 4]);
        assert_eq!(NativeWord::Width4.read(&buf), CK_UNAVAILABLE_INFORMATION);
        assert!(NativeWord::Width4.write(1 << 40, &mut buf).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(PlatformProfile::W4_PACKED.to_string(), "w4_packed");
        assert_eq!(PlatformProfile::W8.to_string(), "w8");
    }
}
