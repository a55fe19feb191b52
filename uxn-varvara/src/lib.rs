//! Device plane implementing the Varvara System and Console contracts
#![warn(missing_docs)]

mod console;
mod system;

pub use console::{Console, ConsolePorts, Type as ConsoleType};
pub use system::{System, SystemPorts};

use uxn::{Device, Uxn};

/// Aggregate device plane: the System and Console devices
///
/// Any other device page is unimplemented; addressing one is a fatal
/// condition, signaled by returning `false` from [`Device::deo`] (or
/// recorded for [`Device::dei`], which has no way to halt the CPU).
pub struct Varvara {
    system: System,
    console: Console,
    unknown_device: Option<u8>,
}

impl Default for Varvara {
    fn default() -> Self {
        Self::new()
    }
}

impl Varvara {
    /// Builds a new instance of the Varvara device plane
    pub fn new() -> Self {
        Self {
            system: System::default(),
            console: Console::new(),
            unknown_device: None,
        }
    }

    /// Shared borrow of the console device
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Mutable borrow of the console device
    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    /// Shared borrow of the system device
    pub fn system(&self) -> &System {
        &self.system
    }

    /// Mutable borrow of the system device
    pub fn system_mut(&mut self) -> &mut System {
        &mut self.system
    }

    /// Resets expansion memory, loading the given data
    pub fn reset(&mut self, mem: &[u8]) {
        self.system.reset(mem);
        self.unknown_device = None;
    }

    /// Returns the device-page nibble of the last unimplemented device
    /// that was addressed, if any
    pub fn unknown_device(&self) -> Option<u8> {
        self.unknown_device
    }
}

impl Device for Varvara {
    fn deo(&mut self, vm: &mut Uxn, target: u8) -> bool {
        match target & 0xF0 {
            SystemPorts::BASE => {
                self.system.deo(vm, target);
                !self.system.should_exit()
            }
            ConsolePorts::BASE => {
                self.console.deo(vm, target);
                true
            }
            t => {
                self.unknown_device = Some(t);
                false
            }
        }
    }

    fn dei(&mut self, vm: &mut Uxn, target: u8) {
        match target & 0xF0 {
            SystemPorts::BASE => self.system.dei(vm, target),
            ConsolePorts::BASE => self.console.dei(vm, target),
            t => self.unknown_device = Some(t),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use uxn::{op, UxnRam};

    /// Builds a ROM that writes `value` to `target` via `DEO`, then (if
    /// execution isn't halted) stores a marker byte at zero-page address
    /// `0x20`, then `BRK`s.
    fn halt_probe_rom(value: u8, target: u8) -> Vec<u8> {
        vec![
            op::LIT,
            value,
            op::LIT,
            target,
            op::DEO,
            op::LIT,
            0xAA,
            op::LIT,
            0x20,
            op::STZ,
            op::BRK,
        ]
    }

    #[test]
    fn state_port_write_halts_vector_immediately() {
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&mut ram);
        // SystemPorts::BASE (0x00) | state offset (0x0f)
        let rom = halt_probe_rom(0x01, 0x0f);
        vm.load_rom(&rom).unwrap();

        let mut dev = Varvara::new();
        vm.run_vector(&mut dev, 0x100).unwrap();

        assert_eq!(dev.system_mut().exit(), Some(1));
        assert_eq!(
            vm.ram_read_byte(0x0020),
            0,
            "instructions after the state-port DEO must not execute"
        );
    }

    #[test]
    fn unknown_device_write_halts_vector_and_is_recorded() {
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&mut ram);
        // 0xe0 is not System (0x00) or Console (0x10)
        let rom = halt_probe_rom(0x42, 0xe0);
        vm.load_rom(&rom).unwrap();

        let mut dev = Varvara::new();
        vm.run_vector(&mut dev, 0x100).unwrap();

        assert_eq!(dev.unknown_device(), Some(0xe0));
        assert_eq!(
            vm.ram_read_byte(0x0020),
            0,
            "instructions after an unknown-device DEO must not execute"
        );
    }

    #[test]
    fn console_write_does_not_halt() {
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&mut ram);
        // ConsolePorts::BASE (0x10) | write offset (0x08) == 0x18
        let rom = halt_probe_rom(b'A', 0x18);
        vm.load_rom(&rom).unwrap();

        let mut dev = Varvara::new();
        vm.run_vector(&mut dev, 0x100).unwrap();

        assert_eq!(dev.console_mut().take_stdout(), vec![b'A']);
        assert_eq!(
            vm.ram_read_byte(0x0020),
            0xAA,
            "a console write should not halt the vector"
        );
    }
}
