use modular_bitfield::prelude::*;

/// `$2000` PPUCTRL. The nametable/pattern-table selector fields stay raw
/// bit widths rather than their own enums, since the addressing math only
/// ever needs the numeric value.
#[bitfield]
#[derive(Clone, Copy, Debug)]
pub struct Ctrl {
    pub base_name_table: B2,
    pub vram_address_increment_32: bool,
    pub sprite_pattern_table: B1,
    pub background_pattern_table: B1,
    pub tall_sprites: bool,
    pub master_slave: bool,
    pub nmi_enabled: bool,
}

impl Ctrl {
    pub fn from_u8(value: u8) -> Ctrl {
        Ctrl::from_bytes([value])
    }

    pub fn to_u8(self) -> u8 {
        self.into_bytes()[0]
    }

    pub fn vram_address_increment(self) -> u16 {
        if self.vram_address_increment_32() { 32 } else { 1 }
    }
}

/// `$2001` PPUMASK.
#[bitfield]
#[derive(Clone, Copy, Debug)]
pub struct Mask {
    pub greyscale: bool,
    pub show_background_left: bool,
    pub show_sprites_left: bool,
    pub background_enabled: bool,
    pub sprites_enabled: bool,
    pub emphasize_red: bool,
    pub emphasize_green: bool,
    pub emphasize_blue: bool,
}

impl Mask {
    pub fn from_u8(value: u8) -> Mask {
        Mask::from_bytes([value])
    }

    pub fn to_u8(self) -> u8 {
        self.into_bytes()[0]
    }

    pub fn rendering_enabled(self) -> bool {
        self.background_enabled() || self.sprites_enabled()
    }
}

/// `$2002` PPUSTATUS. The low 5 bits are open-bus/stale PPU data-bus
/// contents in hardware; this core just reads back zero there.
#[bitfield]
#[derive(Clone, Copy, Debug)]
pub struct Status {
    #[skip]
    _unused: B5,
    pub sprite_overflow: bool,
    pub sprite0_hit: bool,
    pub vblank_active: bool,
}

impl Status {
    pub fn to_u8(self) -> u8 {
        self.into_bytes()[0]
    }
}
