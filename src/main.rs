//! simt-emu: cycle-level emulator for a tiny SIMT compute accelerator

use std::env;

use anyhow::{bail, Context};

use simt_emu::config::Config;
use simt_emu::device::params::DeviceParams;
use simt_emu::emu::gpu::Gpu;
use simt_emu::isa::{assemble, parse_program_image, Instruction};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage();
        return Ok(());
    }

    let mut path: Option<&str> = None;
    let mut threads: Option<u8> = None;
    let mut max_cycles: Option<u64> = None;
    let mut data: Vec<u8> = Vec::new();
    let mut dump: Option<(u8, usize)> = None;
    let mut list = false;

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--threads" | "-t" => {
                threads = Some(take_value(&args, &mut i, arg)?.parse().context("bad --threads")?);
            }
            "--max-cycles" => {
                max_cycles =
                    Some(take_value(&args, &mut i, arg)?.parse().context("bad --max-cycles")?);
            }
            "--data" | "-d" => {
                data = parse_data_list(take_value(&args, &mut i, arg)?)?;
            }
            "--dump" => {
                let range = take_value(&args, &mut i, arg)?;
                dump = Some(parse_range(range).context("bad --dump range, expected LO..HI")?);
            }
            "--list" | "-l" => list = true,
            "--help" | "-h" => {
                usage();
                return Ok(());
            }
            _ if !arg.starts_with('-') => path = Some(arg),
            _ => bail!("unknown option: {}", arg),
        }
        i += 1;
    }

    let path = match path {
        Some(p) => p,
        None => {
            usage();
            return Ok(());
        }
    };

    // Assemble or load the kernel
    let program = if path.ends_with(".bin") {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path))?;
        parse_program_image(&bytes)?
    } else {
        let source =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        assemble(&source)?
    };
    println!("Loaded {} ({} instruction words)", path, program.len());

    if list {
        println!();
        println!("Program listing:");
        for (addr, word) in program.iter().enumerate() {
            println!("  {:3}: {:04X}  {}", addr, word, Instruction::decode(*word));
        }
    }

    let config = Config::get();
    let params = DeviceParams {
        memory_latency: config.memory_latency(),
        ..DeviceParams::default()
    };
    let mut gpu = Gpu::new(params)?;
    gpu.program_mem_mut().load(0, &program);
    if !gpu.data_mem_mut().load(0, &data) {
        bail!("--data holds {} values, data memory holds 256", data.len());
    }

    let threads = threads.unwrap_or_else(|| config.default_thread_count());
    let max_cycles = max_cycles.unwrap_or_else(|| config.max_cycles());

    gpu.configure(threads)?;
    gpu.launch()?;
    gpu.run_to_done(max_cycles)?;

    let stats = gpu.stats();
    println!();
    println!("Run complete");
    println!("  Threads:      {}", threads);
    println!("  Cycles:       {}", stats.cycles);
    println!("  Instructions: {}", stats.instructions);
    println!("  Blocks:       {}", stats.blocks_completed);
    println!(
        "  Fetch channel grants/deferred: {}/{}",
        stats.fetch.grants, stats.fetch.deferred
    );
    println!(
        "  Data channel grants/deferred:  {}/{}",
        stats.data.grants, stats.data.deferred
    );

    let (base, len) = dump.unwrap_or((0, 32));
    println!();
    println!("Data memory [{}..{}]:", base, base as usize + len);
    for (row, chunk) in gpu.data_mem().read_range(base, len).chunks(16).enumerate() {
        print!("  {:3}: ", base as usize + row * 16);
        for value in chunk {
            print!("{:3} ", value);
        }
        println!();
    }

    Ok(())
}

/// Consume the value following a flag.
fn take_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> anyhow::Result<&'a str> {
    *i += 1;
    match args.get(*i) {
        Some(value) => Ok(value.as_str()),
        None => bail!("{} needs a value", flag),
    }
}

/// Parse a comma-separated byte list: `1,2,0x10`.
fn parse_data_list(list: &str) -> anyhow::Result<Vec<u8>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u8::from_str_radix(hex, 16)
            } else {
                s.parse()
            }
            .with_context(|| format!("bad data value '{}'", s))
        })
        .collect()
}

/// Parse an address range: `16..24`.
fn parse_range(range: &str) -> Option<(u8, usize)> {
    let (lo, hi) = range.split_once("..")?;
    let lo: usize = lo.trim().parse().ok()?;
    let hi: usize = hi.trim().parse().ok()?;
    if lo > 255 || hi > 256 || hi < lo {
        return None;
    }
    Some((lo as u8, hi - lo))
}

fn usage() {
    println!("simt-emu: cycle-level emulator for a tiny SIMT compute accelerator");
    println!();
    println!("Usage: simt-emu <kernel.asm|kernel.bin> [options]");
    println!();
    println!("Options:");
    println!("  -t, --threads N     total thread count to launch (default from config)");
    println!("  -d, --data LIST     comma-separated bytes loaded at data address 0");
    println!("      --dump LO..HI   data memory range to print after the run (default 0..32)");
    println!("      --max-cycles N  cycle budget before the run is declared stuck");
    println!("  -l, --list          print the program listing before running");
    println!("  -h, --help          show this help");
    println!();
    println!("Environment: SIMT_EMU_THREADS, SIMT_EMU_MAX_CYCLES, SIMT_EMU_MEM_LATENCY");
    println!("Config files: ./simt-emu.toml, ~/.config/simt-emu/config.toml");
}
