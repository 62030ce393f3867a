use crate::cartridge::{self, CartridgeError};
use crate::cpu::interrupts::InterruptFlags;
use crate::cpu::Cpu;
use crate::mmu::Mmu;
use log::info;
use std::cell::RefCell;
use std::rc::Rc;

/// The DMG-01 (non-color) Game Boy: CPU, bus, and cartridge wired together.
///
/// Construction order matters, per the open question in spec.md §9: the
/// cartridge must be attached to the bus before `reset()` runs, since reset
/// writes the post-boot MMIO defaults through the bus and a delegate that
/// isn't attached yet would miss them.
pub struct GameBoy {
    cpu: Cpu,
    mmu: Rc<RefCell<Mmu>>,
}

impl GameBoy {
    /// Load a raw ROM image, wire up the bus and cartridge, and bring the
    /// machine up in the documented post-boot-ROM state. There is no boot
    /// ROM implementation in this core; every run starts where the real
    /// boot ROM would have handed off.
    pub fn power_on(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        let cartridge = cartridge::load(rom)?;
        let if_ = Rc::new(RefCell::new(InterruptFlags::new()));
        let mmu = Rc::new(RefCell::new(Mmu::new(cartridge, if_.clone())));
        mmu.borrow_mut().reset();

        let mut cpu = Cpu::new(mmu.clone(), if_);
        cpu.reset();

        Ok(Self { cpu, mmu })
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn log_cartridge_header(&self) {
        let header = self.mmu.borrow().cartridge_header().clone();
        info!(
            "cartridge \"{}\" type={:?} rom={:?} ram={:?}",
            header.title, header.cartridge_type, header.rom_size, header.ram_size
        );
    }

    /// Run one fetch/decode/execute step (or service an interrupt, or idle
    /// in HALT). Propagates a decode error for the host loop to report.
    pub fn step(&mut self) -> Result<u32, crate::cpu::decode::DecodeError> {
        self.cpu.step()
    }

    /// Drain bytes the serial test hook has captured since the last call.
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.mmu.borrow_mut().take_serial_output()
    }
}
