use strum_macros::Display;

/// How the PPU's 2 KiB of internal nametable VRAM is mapped onto the four
/// logical 1 KiB nametable slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum NameTableMirroring {
    Horizontal,
    Vertical,
    OneScreenLowerBank,
    OneScreenUpperBank,
    FourScreen,
}

impl NameTableMirroring {
    pub fn as_tag(self) -> u8 {
        match self {
            NameTableMirroring::Horizontal => 0,
            NameTableMirroring::Vertical => 1,
            NameTableMirroring::OneScreenLowerBank => 2,
            NameTableMirroring::OneScreenUpperBank => 3,
            NameTableMirroring::FourScreen => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<NameTableMirroring, String> {
        Ok(match tag {
            0 => NameTableMirroring::Horizontal,
            1 => NameTableMirroring::Vertical,
            2 => NameTableMirroring::OneScreenLowerBank,
            3 => NameTableMirroring::OneScreenUpperBank,
            4 => NameTableMirroring::FourScreen,
            other => return Err(format!("unknown mirroring tag {}", other)),
        })
    }

    /// Maps a raw PPU nametable address (`$2000..=$2FFF`, already masked
    /// to 12 bits) onto an offset into the 2 KiB internal VRAM: vertical
    /// drops bit `0x800`; horizontal maps `0x800->0x400` and clears
    /// `0xC00`.
    pub fn vram_offset(self, address: u16) -> u16 {
        let address = address & 0x0FFF;
        match self {
            NameTableMirroring::Vertical => address & !0x0800,
            NameTableMirroring::Horizontal => {
                if address & 0x0800 != 0 {
                    (address & !0x0C00) | 0x0400
                } else {
                    address & !0x0C00
                }
            }
            NameTableMirroring::OneScreenLowerBank => address & 0x03FF,
            NameTableMirroring::OneScreenUpperBank => (address & 0x03FF) | 0x0400,
            // Four-screen cartridges carry their own 2 extra KiB; callers
            // that lack that extra RAM fall back to treating it as vertical.
            NameTableMirroring::FourScreen => address & 0x0FFF,
        }
    }
}
