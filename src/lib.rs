//! DMG-01 CPU core: registers, flags, instruction decode/execute, interrupt
//! sequencing, the address-decoded memory bus, and cartridge/MBC logic.
//!
//! Pixel rendering, audio synthesis, timer ticking, button input, and host
//! windowing are not implemented here; the bus reserves address space and
//! MMIO storage for them but nothing in this crate interprets it.

pub mod cartridge;
pub mod cpu;
pub mod gb;
pub mod mmu;

pub use cpu::Cpu;
pub use gb::GameBoy;
pub use mmu::Mmu;
