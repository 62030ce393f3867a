pub mod decode;
pub mod execute;
pub mod interrupts;
pub mod operand;
pub mod registers;

use self::decode::DecodeError;
use self::interrupts::{Ime, Interrupt, InterruptFlags};
use self::registers::Registers;
use crate::mmu::memory::Memory;
use crate::mmu::Mmu;
use log::trace;
use std::cell::RefCell;
use std::rc::Rc;

/// The DMG-01 had a Sharp LR35902 CPU (speculated to be a SM83 core), a
/// hybrid of the Z80 and the 8080. https://gbdev.io/gb-opcodes/optables/errata
pub struct Cpu {
    pub(crate) reg: Registers,
    pub(crate) mem: Rc<RefCell<Mmu>>,
    pub(crate) if_: Rc<RefCell<InterruptFlags>>,
    pub(crate) ime: Ime,
    pub(crate) halted: bool,
    pub(crate) wait_for_button: bool,
}

impl Cpu {
    pub fn new(mem: Rc<RefCell<Mmu>>, if_: Rc<RefCell<InterruptFlags>>) -> Self {
        Self {
            reg: Registers::new(),
            mem,
            if_,
            ime: Ime::Disabled,
            halted: false,
            wait_for_button: false,
        }
    }

    /// Put the CPU into the documented post-boot-ROM state.
    pub fn reset(&mut self) {
        self.reg = Registers::post_boot();
        self.ime = Ime::Disabled;
        self.halted = false;
        self.wait_for_button = false;
    }

    pub fn registers(&self) -> &Registers {
        &self.reg
    }

    fn ie(&self) -> u8 {
        self.mem.borrow().read8(0xFFFF)
    }

    /// Check IE & IF for a pending, enabled interrupt, highest priority (bit
    /// 0) first, without regard to IME — used to wake from HALT even when
    /// interrupts are globally disabled.
    fn pending_interrupt(&self) -> Option<Interrupt> {
        let ie = self.ie();
        let if_ = self.if_.borrow().get_raw();
        let pending = ie & if_;
        Interrupt::ALL
            .into_iter()
            .find(|&i| pending & i.bit() != 0)
    }

    /// Service one pending interrupt if IME is set: clear IF's bit, push PC,
    /// jump to the vector, disable IME. Returns the cycle cost if one fired.
    fn service_interrupt(&mut self) -> Option<u32> {
        if !self.ime.is_enabled() {
            return None;
        }
        let interrupt = self.pending_interrupt()?;
        self.if_.borrow_mut().clear(interrupt);
        self.ime = Ime::Disabled;
        self.halted = false;
        let pc = self.reg.pc;
        self.push16(pc);
        self.reg.pc = interrupt.vector();
        trace!("servicing interrupt {:?} -> {:#06x}", interrupt, self.reg.pc);
        Some(20)
    }

    /// Run one fetch/decode/execute step (or service one interrupt, or sit
    /// idle in HALT) and return the number of T-states it cost.
    pub fn step(&mut self) -> Result<u32, DecodeError> {
        if let Some(cycles) = self.service_interrupt() {
            return Ok(cycles);
        }

        if self.halted {
            // Any pending interrupt, enabled or not, wakes the CPU even with
            // IME cleared; it's just not serviced until IME allows it.
            if self.pending_interrupt().is_some() {
                self.halted = false;
            } else {
                return Ok(4);
            }
        }

        // EI/DI arm a pending transition that must not resolve until a full
        // instruction *after* the one that armed it has completed. Only
        // resolve a transition that was already pending when this
        // instruction began; one this instruction itself just armed (via
        // EI/DI) is left pending for the following step() call.
        let ime_before = self.ime;
        let cycles = self.execute_next()?;
        if matches!(ime_before, Ime::EnablePending | Ime::DisablePending) {
            self.ime = ime_before.step();
        }
        Ok(cycles)
    }

    pub(crate) fn push16(&mut self, value: u16) {
        self.reg.sp = self.reg.sp.wrapping_sub(2);
        let sp = self.reg.sp;
        self.mem.borrow_mut().write16(sp, value);
    }

    pub(crate) fn pop16(&mut self) -> u16 {
        let sp = self.reg.sp;
        let value = self.mem.borrow().read16(sp);
        self.reg.sp = self.reg.sp.wrapping_add(2);
        value
    }

    pub(crate) fn fetch8(&mut self) -> u8 {
        let pc = self.reg.pc;
        let byte = self.mem.borrow().read8(pc);
        self.reg.pc = self.reg.pc.wrapping_add(1);
        byte
    }

    pub(crate) fn fetch16(&mut self) -> u16 {
        let lo = self.fetch8() as u16;
        let hi = self.fetch8() as u16;
        (hi << 8) | lo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header::{CartridgeHeader, CartridgeType, RamSize, RomSize};
    use crate::cartridge::mbc::RomOnly;

    pub fn test_cpu() -> Cpu {
        let header = CartridgeHeader {
            title: "TEST".into(),
            cartridge_type: CartridgeType::RomOnly,
            rom_size: RomSize::Kb32,
            ram_size: RamSize::Kb8,
            header_checksum: 0,
        };
        let cart = Box::new(RomOnly::new(vec![0u8; 0x8000], header));
        let if_ = Rc::new(RefCell::new(InterruptFlags::new()));
        let mem = Rc::new(RefCell::new(Mmu::new(cart, if_.clone())));
        mem.borrow_mut().reset();
        let mut cpu = Cpu::new(mem, if_);
        cpu.reset();
        cpu
    }

    #[test]
    fn halted_cpu_consumes_cycles_without_fetching() {
        let mut cpu = test_cpu();
        cpu.halted = true;
        let pc = cpu.reg.pc;
        let cycles = cpu.step().unwrap();
        assert_eq!(cycles, 4);
        assert_eq!(cpu.reg.pc, pc);
    }

    #[test]
    fn pending_interrupt_wakes_halt_even_with_ime_disabled() {
        let mut cpu = test_cpu();
        cpu.halted = true;
        cpu.ime = Ime::Disabled;
        cpu.mem.borrow_mut().write8(0xFFFF, 0x01);
        cpu.if_.borrow_mut().set(Interrupt::VBlank);
        cpu.step().unwrap();
        assert!(!cpu.halted);
    }

    /// EI; NOP; NOP with IE/IF already set for VBlank: the NOP right after
    /// EI must run uninterrupted, and the pending interrupt should only be
    /// serviced on the step *after* that NOP completes.
    #[test]
    fn ei_arms_interrupts_only_after_the_following_instruction() {
        let mut cpu = test_cpu();
        let base = cpu.reg.pc;
        cpu.mem.borrow_mut().write8(base, 0xFB); // EI
        cpu.mem.borrow_mut().write8(base + 1, 0x00); // NOP
        cpu.mem.borrow_mut().write8(base + 2, 0x00); // NOP
        cpu.mem.borrow_mut().write8(0xFFFF, 0x01); // IE: VBlank
        cpu.if_.borrow_mut().set(Interrupt::VBlank);

        cpu.step().unwrap(); // EI
        assert_eq!(cpu.ime, Ime::EnablePending);

        cpu.step().unwrap(); // NOP, not an interrupt dispatch
        assert_eq!(cpu.reg.pc, base + 2);
        assert_eq!(cpu.ime, Ime::Enabled);

        let cycles = cpu.step().unwrap(); // now the interrupt fires
        assert_eq!(cycles, 20);
        assert_eq!(cpu.reg.pc, 0x0040);
        assert_eq!(cpu.ime, Ime::Disabled);
    }

    /// Symmetric to the EI case: DI's disable must not take effect until the
    /// instruction after it has completed.
    #[test]
    fn di_disarms_interrupts_only_after_the_following_instruction() {
        let mut cpu = test_cpu();
        cpu.ime = Ime::Enabled;
        let base = cpu.reg.pc;
        cpu.mem.borrow_mut().write8(base, 0xF3); // DI
        cpu.mem.borrow_mut().write8(base + 1, 0x00); // NOP

        cpu.step().unwrap(); // DI
        assert_eq!(cpu.ime, Ime::DisablePending);

        cpu.step().unwrap(); // NOP
        assert_eq!(cpu.ime, Ime::Disabled);
    }
}
