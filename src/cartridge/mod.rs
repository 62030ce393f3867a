pub mod header;
pub mod mbc;
pub mod mbc1;

use header::{CartridgeHeader, CartridgeType};
use std::fmt;

/// A loaded cartridge: header plus whatever bank-switching behavior its MBC
/// implements. Lives in the address-decoded slots $0000-$7FFF and
/// $A000-$BFFF of the bus.
pub trait Cartridge {
    fn read(&self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);
    fn header(&self) -> &CartridgeHeader;
}

#[derive(Debug)]
pub enum CartridgeError {
    TooSmall(usize),
    Unsupported(CartridgeType),
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartridgeError::TooSmall(len) => {
                write!(f, "ROM image too small to contain a header: {} bytes", len)
            }
            CartridgeError::Unsupported(t) => write!(f, "unsupported cartridge type: {:?}", t),
        }
    }
}

impl std::error::Error for CartridgeError {}

/// Parse a raw ROM image and construct the right MBC implementation for it.
pub fn load(rom: Vec<u8>) -> Result<Box<dyn Cartridge>, CartridgeError> {
    if rom.len() < 0x150 {
        return Err(CartridgeError::TooSmall(rom.len()));
    }

    let header = CartridgeHeader::parse(&rom);
    log::info!(
        "loaded cartridge \"{}\" type={:?} rom={:?} ram={:?}",
        header.title,
        header.cartridge_type,
        header.rom_size,
        header.ram_size
    );
    if !header.checksum_valid(&rom) {
        log::warn!("cartridge header checksum mismatch (continuing anyway)");
    }

    match header.cartridge_type {
        t if t.is_rom_only() => Ok(Box::new(mbc::RomOnly::new(rom, header))),
        t if t.is_mbc1() => {
            let ram_size = header.ram_size.bytes();
            Ok(Box::new(mbc1::Mbc1::new(rom, vec![0u8; ram_size], header)))
        }
        other => Err(CartridgeError::Unsupported(other)),
    }
}
