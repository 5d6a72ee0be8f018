/// The three mapper families this crate implements with cycle-level
/// accuracy. Any other iNES mapper number is rejected at cartridge-load
/// time rather than silently approximated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapperKind {
    Nrom,
    Mmc1,
    UxRom,
}

impl MapperKind {
    pub fn from_ines_number(number: u16) -> Result<MapperKind, String> {
        match number {
            0 => Ok(MapperKind::Nrom),
            1 => Ok(MapperKind::Mmc1),
            2 => Ok(MapperKind::UxRom),
            other => Err(format!("Mapper {other} isn't supported (only NROM/MMC1/UxROM are).")),
        }
    }
}
