//! `rv32ima-host`: load a kernel image, drive the `rv32ima-core` step
//! loop to completion, and turn a SYSCON termination code into a
//! process exit status.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use clap_num::maybe_hex;
use rv32ima_core::memory::GuestMemory;
use rv32ima_core::{step, ProcessorState, StepOutcome};
use rv32ima_host::image::{load_dtb, load_elf_image, load_raw_image};
use rv32ima_host::uart::ConsoleUart;
use rv32ima_host::BootImage;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_RAM_SIZE: u32 = 16 * 1024 * 1024;
const DEFAULT_LOAD_ADDRESS: u32 = 0x8000_0000;
const DEFAULT_MAX_INSTRUCTIONS_PER_CALL: u32 = 1024;

/// Run a kernel image against the RV32IMA step engine.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the kernel image to load.
    image: PathBuf,

    /// Treat `image` as an ELF file and load its PT_LOAD segments
    /// instead of copying it in as a flat raw binary.
    #[arg(long)]
    elf: bool,

    /// RAM size in bytes (accepts `0x`-prefixed hex).
    #[arg(long, value_parser=maybe_hex::<u32>, default_value_t = DEFAULT_RAM_SIZE)]
    ram_size: u32,

    /// Guest physical address the image is loaded at (accepts
    /// `0x`-prefixed hex).
    #[arg(long, value_parser=maybe_hex::<u32>, default_value_t = DEFAULT_LOAD_ADDRESS)]
    load_address: u32,

    /// Path to a device-tree blob to load after the kernel image and
    /// point `regs[11]` at.
    #[arg(long)]
    dtb: Option<PathBuf>,

    /// Instructions retired per `step` call before yielding back to
    /// the host loop to resample the clock.
    #[arg(long, default_value_t = DEFAULT_MAX_INSTRUCTIONS_PER_CALL)]
    max_instructions_per_call: u32,

    /// Raise the tracing filter level (repeatable: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut ram = GuestMemory::new(args.load_address, args.ram_size)
        .context("constructing guest RAM image")?;

    let (entry, kernel_end) = if args.elf {
        let (entry, end) = load_elf_image(&args.image, &mut ram, args.load_address)
            .with_context(|| format!("loading ELF image {}", args.image.display()))?;
        (entry, end)
    } else {
        let end = load_raw_image(&args.image, &mut ram, 0)
            .with_context(|| format!("loading raw image {}", args.image.display()))?;
        (args.load_address, end)
    };

    let dtb_address = match &args.dtb {
        Some(dtb_path) => {
            let offset =
                load_dtb(dtb_path, &mut ram, kernel_end).context("loading device-tree blob")?;
            Some(args.load_address.wrapping_add(offset))
        }
        None => None,
    };
    let boot_image = BootImage { entry, dtb_address };

    let mut state = ProcessorState::boot(boot_image.entry, boot_image.dtb_address.unwrap_or(0));
    let mut bus = ConsoleUart::new();

    info!(
        image = %args.image.display(),
        entry = format!("0x{:x}", boot_image.entry),
        ram_size = args.ram_size,
        "starting rv32ima-host"
    );

    let mut clock = Instant::now();
    let exit_code = loop {
        let elapsed_us = clock.elapsed().as_micros().min(u128::from(u32::MAX)) as u32;
        clock = Instant::now();

        match step(
            &mut state,
            &mut ram,
            &mut bus,
            0,
            elapsed_us,
            args.max_instructions_per_call,
        ) {
            StepOutcome::Continued => {}
            StepOutcome::WaitingForInterrupt => {
                std::thread::sleep(std::time::Duration::from_micros(100));
            }
            StepOutcome::SystemControl(code) => {
                info!(code, "SYSCON termination requested");
                break code;
            }
        }
    };

    if exit_code != 0 {
        warn!(code = exit_code, "guest requested non-zero termination");
    }
    std::process::exit((exit_code & 0xff) as i32);
}
