use modular_bitfield::prelude::*;

/// The 6502 status register. Bit 5 has no flip-flop of its own and always
/// reads back as 1; `unused` models that rather than special-casing every
/// read site.
#[bitfield]
#[derive(Clone, Copy, Debug)]
pub struct StatusFlags {
    pub carry: bool,
    pub zero: bool,
    pub interrupt_disable: bool,
    pub decimal: bool,
    pub break_flag: bool,
    pub unused: bool,
    pub overflow: bool,
    pub negative: bool,
}

impl StatusFlags {
    pub fn power_on() -> StatusFlags {
        StatusFlags::new().with_interrupt_disable(true).with_unused(true)
    }

    pub fn set_nz(&mut self, value: u8) {
        self.set_zero(value == 0);
        self.set_negative(value & 0x80 != 0);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub s: u8,
    pub pc: u16,
    pub p: StatusFlags,
}

impl Registers {
    pub fn power_on() -> Registers {
        Registers { a: 0, x: 0, y: 0, s: 0xFD, pc: 0, p: StatusFlags::power_on() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_flag_bit_always_reads_as_set() {
        let flags = StatusFlags::power_on();
        assert!(flags.unused());
    }

    #[test]
    fn set_nz_reports_zero_and_negative() {
        let mut flags = StatusFlags::power_on();
        flags.set_nz(0);
        assert!(flags.zero());
        assert!(!flags.negative());
        flags.set_nz(0x80);
        assert!(!flags.zero());
        assert!(flags.negative());
    }
}
