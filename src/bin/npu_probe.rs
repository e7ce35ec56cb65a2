use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use eva_npu::{NpuContext, SoftNpu};

#[derive(Parser, Debug)]
#[command(name = "npu-probe", version)]
#[command(about = "Probe the EVA NPU driver and run a device self-test", long_about = None)]
struct Cli {
    /// Override the reference device capacity in bytes
    #[arg(long)]
    memory_bytes: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print device name and memory capacity
    Info,
    /// Allocate, copy, and execute against the device, verifying results
    Selftest {
        /// Transfer size in bytes for the copy round-trip
        #[arg(long, default_value_t = 4096)]
        size: usize,
    },
}

fn main() -> Result<()> {
    eva_npu::init_logging_default();
    let cli = Cli::parse();

    let backend = match cli.memory_bytes {
        Some(bytes) => SoftNpu::with_capacity(bytes),
        None => SoftNpu::new(),
    };
    let ctx = NpuContext::new(Box::new(backend));
    ctx.init()?;

    let result = match cli.command {
        Commands::Info => info(&ctx),
        Commands::Selftest { size } => selftest(&ctx, size),
    };

    ctx.shutdown()?;
    result
}

fn info(ctx: &NpuContext) -> Result<()> {
    println!("device:    {}", ctx.device_name()?);
    println!("total:     {} bytes", ctx.total_memory());
    println!("available: {} bytes", ctx.available_memory());
    Ok(())
}

fn selftest(ctx: &NpuContext, size: usize) -> Result<()> {
    if size == 0 {
        bail!("self-test size must be greater than zero");
    }

    let input = ctx.alloc(size)?;
    let output = ctx.alloc(size)?;

    let pattern: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    ctx.copy_to_device(&input, &pattern)?;

    ctx.execute(b"selftest", &[input], &[output])?;

    let mut result = vec![0u8; size];
    ctx.copy_from_device(&output, &mut result)?;

    if result != pattern {
        bail!("self-test output does not match input pattern");
    }

    ctx.free(output)?;
    ctx.free(input)?;

    if ctx.available_memory() != ctx.total_memory() {
        bail!("self-test leaked device memory");
    }

    println!("self-test passed ({} bytes round-tripped)", size);
    Ok(())
}
