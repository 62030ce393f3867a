use num_enum::{FromPrimitive, IntoPrimitive};

/// Cartridge Type — $0147. Only the values this core can actually drive are
/// broken out by name; everything else is preserved as `Unsupported` so the
/// loader can report a clear error instead of silently misbehaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CartridgeType {
    RomOnly = 0x00,
    Mbc1 = 0x01,
    Mbc1Ram = 0x02,
    Mbc1RamBattery = 0x03,
    RomRam = 0x08,
    RomRamBattery = 0x09,
    #[num_enum(catch_all)]
    Unsupported(u8),
}

impl CartridgeType {
    pub fn is_mbc1(self) -> bool {
        matches!(
            self,
            CartridgeType::Mbc1 | CartridgeType::Mbc1Ram | CartridgeType::Mbc1RamBattery
        )
    }

    /// 0x00/0x08/0x09: no bank switching, handled by `mbc::RomOnly`.
    pub fn is_rom_only(self) -> bool {
        matches!(
            self,
            CartridgeType::RomOnly | CartridgeType::RomRam | CartridgeType::RomRamBattery
        )
    }

    pub fn has_ram(self) -> bool {
        matches!(
            self,
            CartridgeType::Mbc1Ram
                | CartridgeType::Mbc1RamBattery
                | CartridgeType::RomRam
                | CartridgeType::RomRamBattery
        )
    }
}

/// ROM Size — $0148. `2^(1+n) * 16 KiB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum RomSize {
    #[num_enum(default)]
    Kb32 = 0x00,
    Kb64 = 0x01,
    Kb128 = 0x02,
    Kb256 = 0x03,
    Kb512 = 0x04,
    Mb1 = 0x05,
    Mb2 = 0x06,
    Mb4 = 0x07,
    Mb8 = 0x08,
}

impl RomSize {
    pub fn bytes(self) -> usize {
        32 * 1024 << (u8::from(self) as usize)
    }
}

/// RAM Size — $0149.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum RamSize {
    #[num_enum(default)]
    None = 0x00,
    Unused = 0x01,
    Kb8 = 0x02,
    Kb32 = 0x03,
    Kb128 = 0x04,
    Kb64 = 0x05,
}

impl RamSize {
    pub fn bytes(self) -> usize {
        match self {
            RamSize::None | RamSize::Unused => 0,
            RamSize::Kb8 => 8 * 1024,
            RamSize::Kb32 => 32 * 1024,
            RamSize::Kb128 => 128 * 1024,
            RamSize::Kb64 => 64 * 1024,
        }
    }
}

/// A thin, non-owning view over the header fields at $0100-$014F.
/// The cartridge loader keeps the whole ROM image; this struct just names
/// the offsets and decodes the typed fields out of a byte slice.
#[derive(Debug, Clone)]
pub struct CartridgeHeader {
    pub title: String,
    pub cartridge_type: CartridgeType,
    pub rom_size: RomSize,
    pub ram_size: RamSize,
    pub header_checksum: u8,
}

impl CartridgeHeader {
    pub const TITLE_RANGE: std::ops::Range<usize> = 0x134..0x144;
    pub const CARTRIDGE_TYPE: usize = 0x147;
    pub const ROM_SIZE: usize = 0x148;
    pub const RAM_SIZE: usize = 0x149;
    pub const HEADER_CHECKSUM: usize = 0x14D;
    pub const CHECKSUM_RANGE: std::ops::RangeInclusive<usize> = 0x134..=0x14C;

    pub fn parse(rom: &[u8]) -> Self {
        let title_bytes = &rom[Self::TITLE_RANGE];
        let title = title_bytes
            .iter()
            .copied()
            .take_while(|&b| b != 0)
            .map(|b| b as char)
            .collect();

        Self {
            title,
            cartridge_type: CartridgeType::from(rom[Self::CARTRIDGE_TYPE]),
            rom_size: RomSize::from(rom[Self::ROM_SIZE]),
            ram_size: RamSize::from(rom[Self::RAM_SIZE]),
            header_checksum: rom[Self::HEADER_CHECKSUM],
        }
    }

    /// `x = 0; for b in title..=version: x = x - b - 1; checksum = x & 0xFF`
    pub fn compute_checksum(rom: &[u8]) -> u8 {
        let mut x: i32 = 0;
        for &b in &rom[Self::CHECKSUM_RANGE] {
            x = x.wrapping_sub(b as i32).wrapping_sub(1);
        }
        (x & 0xFF) as u8
    }

    pub fn checksum_valid(&self, rom: &[u8]) -> bool {
        Self::compute_checksum(rom) == self.header_checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_rom() -> Vec<u8> {
        vec![0u8; 0x8000]
    }

    #[test]
    fn checksum_of_all_zero_header_is_nonzero() {
        let rom = blank_rom();
        // x = -1 for each of 25 bytes => x = -25, & 0xFF = 0xE7
        assert_eq!(CartridgeHeader::compute_checksum(&rom), 0xE7);
    }

    #[test]
    fn rom_size_doubles_from_32kb_base() {
        assert_eq!(RomSize::Kb32.bytes(), 32 * 1024);
        assert_eq!(RomSize::Kb64.bytes(), 64 * 1024);
        assert_eq!(RomSize::Mb2.bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn unsupported_cartridge_type_is_preserved() {
        let t = CartridgeType::from(0xFF);
        assert_eq!(t, CartridgeType::Unsupported(0xFF));
    }
}
