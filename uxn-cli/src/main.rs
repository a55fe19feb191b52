//! CLI host for the Uxn virtual machine
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use uxn::{Uxn, UxnRam};
use uxn_varvara::{ConsoleType, Varvara};

/// Loads a ROM and runs it under the Varvara device plane
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// ROM to load and execute
    rom: PathBuf,

    /// Arguments to pass into the VM as console input
    #[arg(last = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    let env = env_logger::Env::default()
        .filter_or("UXN_LOG", "info")
        .write_style_or("UXN_LOG", "always");
    env_logger::init_from_env(env);

    let args = Args::parse();
    let mut f = std::fs::File::open(&args.rom)
        .with_context(|| format!("failed to open {:?}", args.rom))?;
    let mut rom = vec![];
    f.read_to_end(&mut rom).context("failed to read file")?;

    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&mut ram);
    vm.load_rom(&rom)
        .with_context(|| format!("{:?} is not a valid Uxn ROM", args.rom))?;

    let mut dev = Varvara::new();
    dev.console_mut().set_has_args(&mut vm, !args.args.is_empty());

    let start = std::time::Instant::now();
    run_vector(&mut vm, &mut dev, 0x100)?;
    info!("startup complete in {:?}", start.elapsed());
    flush(&mut dev)?;
    if let Some(code) = exit_code(&mut dev) {
        std::process::exit(code);
    }

    for (i, arg) in args.args.iter().enumerate() {
        if i > 0 {
            send_char(&mut vm, &mut dev, ConsoleType::ArgumentSpacer, b' ')?;
            if exit_code(&mut dev).is_some() {
                break;
            }
        }
        for &c in arg.as_bytes() {
            send_char(&mut vm, &mut dev, ConsoleType::Argument, c)?;
        }
        if let Some(code) = exit_code(&mut dev) {
            std::process::exit(code);
        }
    }
    if !args.args.is_empty() {
        send_char(&mut vm, &mut dev, ConsoleType::ArgumentEnd, b'\n')?;
        if let Some(code) = exit_code(&mut dev) {
            std::process::exit(code);
        }
    }

    if dev.console().has_vector(&vm) {
        let mut stdin = std::io::stdin().lock();
        let mut buf = [0u8; 1];
        while stdin.read(&mut buf).context("failed to read stdin")? > 0 {
            send_char(&mut vm, &mut dev, ConsoleType::Stdin, buf[0])?;
            if let Some(code) = exit_code(&mut dev) {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}

fn send_char(
    vm: &mut Uxn,
    dev: &mut Varvara,
    ty: ConsoleType,
    c: u8,
) -> Result<()> {
    dev.console_mut().set_type(vm, ty);
    dev.console_mut().set_char(vm, c);
    let vector = dev.console().vector(vm);
    run_vector(vm, dev, vector)?;
    flush(dev)
}

fn run_vector(vm: &mut Uxn, dev: &mut Varvara, vector: u16) -> Result<()> {
    match vm.run_vector(dev, vector) {
        Ok(_) => Ok(()),
        Err(diag) => {
            flush(dev)?;
            if let Some(t) = dev.unknown_device() {
                anyhow::bail!("halted: unimplemented device {t:#04x}");
            }
            anyhow::bail!("halted: {diag}");
        }
    }
}

fn flush(dev: &mut Varvara) -> Result<()> {
    let out = dev.console_mut().take_stdout();
    if !out.is_empty() {
        std::io::stdout().write_all(&out)?;
        std::io::stdout().flush()?;
    }
    let err = dev.console_mut().take_stderr();
    if !err.is_empty() {
        std::io::stderr().write_all(&err)?;
        std::io::stderr().flush()?;
    }
    Ok(())
}

fn exit_code(dev: &mut Varvara) -> Option<i32> {
    dev.system_mut().exit()
}
