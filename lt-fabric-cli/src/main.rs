use clap::Parser;
use log::{info, warn};
use lt_fabric_core::config::FabricConfig;
use lt_fabric_core::initiator::Initiator;
use lt_fabric_core::platform::registry::Registry;
use lt_fabric_core::platform::{Platform, PlatformBuilder};
use lt_fabric_core::resources::ram::Ram;
use lt_fabric_core::resources::traffic::{Op, ScriptedInitiator};
use lt_fabric_core::resources::tty::{register, Tty, TTY_SPAN};
use lt_fabric_core::segment::Segment;
use lt_fabric_core::simulator::{RunOutcome, Simulator};
use lt_fabric_core::Time;
use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

const RAM_BASE: u64 = 0x0000_0000;
const RAM_SIZE: u64 = 0x0010_0000;
const TTY_BASE: u64 = 0x0100_0000;
/// RAM bytes reserved for each initiator's private accesses.
const STRIDE: u64 = 0x800;
/// Shared word every initiator tries to claim with a locked read / store-conditional pair.
const LOCK: u64 = RAM_SIZE - 4;

/// Runs a demo platform: scripted initiators exercising a RAM and a TTY through one interconnect.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of initiators.
    #[arg(short, long, default_value_t = 4)]
    initiators: u32,
    /// Memory accesses per initiator.
    #[arg(short, long, default_value_t = 16)]
    accesses: u64,
    /// Time a message spends crossing the interconnect.
    #[arg(short, long, default_value_t = 10)]
    latency: Time,
    /// How far an initiator may run ahead before sending a null message.
    #[arg(short, long, default_value_t = 100)]
    quantum: Time,
    /// Stop after this many rounds.
    #[arg(long)]
    max_steps: Option<usize>,
    /// Write every delivery to a target to this file, one per line.
    #[arg(long)]
    trace: Option<PathBuf>,
    /// Increase logging verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    stderrlog::new()
        .verbosity(usize::from(args.verbose) + 2)
        .modules([module_path!(), "lt_fabric_core"])
        .init()?;

    let platform = build_platform(&args)?;
    let mut simulator = Simulator::new(platform);
    let outcome = simulator.run(args.max_steps);
    let steps = simulator.current_steps();
    let platform = simulator.into_inner();

    match outcome {
        RunOutcome::Finished => info!("Finished after {steps} steps at time {}", platform.time()),
        RunOutcome::Stalled => warn!("Stalled after {steps} steps at time {}", platform.time()),
        RunOutcome::StepLimit => warn!("Step limit reached at time {}", platform.time()),
    }
    report(&platform);

    if let Some(path) = &args.trace {
        let mut out = BufWriter::new(File::create(path)?);
        for event in platform.interconnect().trace().unwrap_or_default() {
            writeln!(out, "{event}")?;
        }
        out.flush()?;
        info!("Trace written to {}", path.display());
    }

    Ok(())
}

fn build_platform(args: &Args) -> Result<Platform, Box<dyn Error>> {
    let config = FabricConfig {
        latency: args.latency,
        quantum: args.quantum,
        ..FabricConfig::default()
    };
    let cell = config.data_width as u64;
    let terminals = args.initiators.max(1) as usize;

    let mut builder = PlatformBuilder::new(config);
    builder
        .segment(Segment::new("RAM", RAM_BASE, RAM_SIZE, [0], true)?)
        .segment(Segment::new(
            "TTY",
            TTY_BASE,
            terminals as u64 * TTY_SPAN * cell,
            [1],
            false,
        )?)
        .target("ram", "ram", [0])
        .multi_channel_target("tty", "tty", [1], terminals)
        .trace(args.trace.is_some());
    for id in 0..args.initiators {
        let script = script(id, args.accesses, cell);
        builder.initiator(ScriptedInitiator::new(
            format!("cpu{id}"),
            id,
            args.quantum,
            script,
        ));
    }
    Ok(builder.build(&Registry::with_defaults())?)
}

/// Private read-after-write traffic, a go at the shared lock, then a line on the initiator's own
/// terminal.
fn script(id: u32, accesses: u64, cell: u64) -> Vec<Op> {
    let base = RAM_BASE + u64::from(id) * STRIDE;
    let mut ops = vec![Op::Compute(u64::from(id) * 3 + 1)];
    for k in 0..accesses {
        let address = base + (k * 4) % STRIDE;
        ops.push(Op::Write {
            address,
            data: (k as u32 ^ id).to_le_bytes().to_vec(),
        });
        ops.push(Op::Compute(k % 5));
        ops.push(Op::Read { address, len: 4 });
    }
    ops.push(Op::LockedRead {
        address: LOCK,
        len: 4,
    });
    ops.push(Op::StoreConditional {
        address: LOCK,
        data: (id + 1).to_le_bytes().to_vec(),
    });

    let terminal = TTY_BASE + (u64::from(id) * TTY_SPAN + register::WRITE) * cell;
    for byte in format!("cpu{id} done\n").bytes() {
        ops.push(Op::Write {
            address: terminal,
            data: vec![byte, 0, 0, 0],
        });
    }
    ops
}

fn report(platform: &Platform) {
    for initiator in platform.initiators() {
        if let Some(cpu) = initiator.downcast_ref::<ScriptedInitiator>() {
            info!(
                "{}: {} responses ({} errors), {} null messages, local time {}",
                cpu.name(),
                cpu.responses().len(),
                cpu.errors(),
                cpu.nulls_sent(),
                initiator.local_time()
            );
        }
    }
    info!("Interconnect: {}", platform.interconnect().stats());

    if let Some(tty) = platform.target::<Tty>("tty") {
        for terminal in 0..platform.initiators().len() {
            print!("{}", String::from_utf8_lossy(tty.output(terminal)));
        }
    }
    if let Some(lock) = platform
        .target::<Ram>("ram")
        .and_then(|ram| ram.peek(LOCK, 4))
    {
        info!("Lock word: {lock:02x?}");
    }
}
