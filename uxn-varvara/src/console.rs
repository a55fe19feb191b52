//! Console device: standard input, standard output, standard error
use std::mem::offset_of;
use uxn::{Ports, Uxn};
use zerocopy::{AsBytes, BigEndian, FromBytes, FromZeroes, U16};

/// Console device state
pub struct Console {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct ConsolePorts {
    vector: U16<BigEndian>,
    read: u8,
    _exec: u8,
    _mode: u8,
    _dead: u8,
    _exit: u8,
    type_: u8,
    write: u8,
    error: u8,
    _pad: [u8; 6],
}

/// Value written to the `type` port before triggering the console vector
#[derive(Copy, Clone, Debug)]
pub enum Type {
    /// Byte arrived on standard input
    Stdin = 1,
    /// Byte is part of a command-line argument
    Argument = 2,
    /// Byte separates two command-line arguments
    ArgumentSpacer = 3,
    /// Byte is the last of the final command-line argument
    ArgumentEnd = 4,
}

impl Ports for ConsolePorts {
    const BASE: u8 = 0x10;
}

static_assertions::const_assert_eq!(
    core::mem::size_of::<ConsolePorts>(),
    uxn::DEV_SIZE
);

impl ConsolePorts {
    const WRITE: u8 = Self::BASE | offset_of!(Self, write) as u8;
    const ERROR: u8 = Self::BASE | offset_of!(Self, error) as u8;
}

impl Console {
    /// Builds an empty console, with nothing buffered
    pub fn new() -> Self {
        Self {
            stdout: vec![],
            stderr: vec![],
        }
    }

    /// Handles a `DEO` targeting the console device page
    pub fn deo(&mut self, vm: &mut Uxn, target: u8) {
        let v = vm.dev::<ConsolePorts>();
        match target {
            ConsolePorts::WRITE => self.stdout.push(v.write),
            ConsolePorts::ERROR => self.stderr.push(v.error),
            _ => (),
        }
    }

    /// Handles a `DEI` targeting the console device page
    ///
    /// There is nothing to do here: the `read` byte is populated by
    /// [`Self::set_char`] ahead of triggering the vector.
    pub fn dei(&mut self, _vm: &mut Uxn, _target: u8) {}

    /// Sets the `type` port, ahead of triggering the console vector
    pub fn set_type(&mut self, vm: &mut Uxn, ty: Type) {
        vm.dev_mut::<ConsolePorts>().type_ = ty as u8;
    }

    /// Marks argument-mode in the `type` port if a program received argv
    ///
    /// Must be called before running the reset vector, per the Varvara
    /// specification, so that `run_vector` for `0x100` sees the flag.
    pub fn set_has_args(&mut self, vm: &mut Uxn, has_args: bool) {
        if has_args {
            vm.dev_mut::<ConsolePorts>().type_ = 1;
        }
    }

    /// Writes a byte to the `read` port, ready to trigger the console vector
    pub fn set_char(&mut self, vm: &mut Uxn, c: u8) {
        vm.dev_mut::<ConsolePorts>().read = c;
    }

    /// Reads the console vector address
    pub fn vector(&self, vm: &Uxn) -> u16 {
        vm.dev::<ConsolePorts>().vector.get()
    }

    /// Returns `true` if a console vector is installed
    pub fn has_vector(&self, vm: &Uxn) -> bool {
        self.vector(vm) != 0
    }

    /// Takes the buffered `stdout` bytes, leaving the buffer empty
    pub fn take_stdout(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stdout)
    }

    /// Takes the buffered `stderr` bytes, leaving the buffer empty
    pub fn take_stderr(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stderr)
    }
}
