use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use process_simulator::config::{AllocatorConfig, SystemConfig};
use process_simulator::io::{loader, Disk};
use process_simulator::kernel::memory::buddy::{DEFAULT_MAX_ORDER, DEFAULT_MIN_ORDER};
use process_simulator::kernel::{Driver, LogObserver, ProcessStatistics, SchedulingAlgorithm};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AllocatorKind {
    FixedEqual,
    FixedUnequal,
    Buddy,
}

/// Runs assembly programs on simulated CPUs sharing one main memory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding *.asm / *.txt programs
    programs: PathBuf,

    /// JSON configuration file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of CPUs
    #[arg(long)]
    cpus: Option<usize>,

    /// Scheduler for every CPU (fifo, sjf, srt, rr, rr:<quantum>, hrrn)
    #[arg(short, long)]
    scheduler: Option<SchedulingAlgorithm>,

    /// Round robin quantum, used with `--scheduler rr`
    #[arg(short, long)]
    quantum: Option<u32>,

    /// Memory allocation strategy
    #[arg(short, long, value_enum)]
    allocator: Option<AllocatorKind>,

    /// Partition size for the equal fixed-partition allocator
    #[arg(long, default_value_t = 64)]
    partition_size: usize,

    /// User memory size in cells
    #[arg(long)]
    memory: Option<usize>,

    /// Run every CPU on its own thread instead of stepping in lockstep
    #[arg(short, long)]
    threaded: bool,

    /// Upper bound on ticks when stepping
    #[arg(long, default_value_t = 10_000)]
    max_ticks: u64,

    /// Write the per-process statistics as JSON to this file
    #[arg(short, long)]
    report: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn build_config(args: &Args) -> Result<SystemConfig> {
    let mut config = match &args.config {
        Some(path) => SystemConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SystemConfig::default(),
    };

    if let Some(cpus) = args.cpus {
        config.set_cpu_count(cpus);
    }

    let scheduler = match (args.scheduler, args.quantum) {
        (Some(SchedulingAlgorithm::RoundRobin { .. }), Some(quantum)) | (None, Some(quantum)) => {
            Some(SchedulingAlgorithm::RoundRobin { quantum })
        }
        (Some(_), Some(_)) => bail!("--quantum only applies to the round robin scheduler"),
        (scheduler, None) => scheduler,
    };
    if let Some(scheduler) = scheduler {
        config.set_scheduler(scheduler);
    }

    if let Some(memory) = args.memory {
        config.memory.user_size = memory;
    }

    if let Some(kind) = args.allocator {
        config.memory.allocator = match kind {
            AllocatorKind::FixedEqual => AllocatorConfig::FixedEqual {
                partition_size: args.partition_size,
            },
            AllocatorKind::FixedUnequal => AllocatorConfig::FixedUnequal,
            AllocatorKind::Buddy => AllocatorConfig::Buddy {
                min_order: DEFAULT_MIN_ORDER,
                max_order: DEFAULT_MAX_ORDER,
            },
        };
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_statistics(statistics: &[ProcessStatistics]) {
    println!("Stats for executed processes (times in ticks):");
    println!(
        "... ID | Name         | CPU | Start | Finish | CPU time | Wait | Turnaround | Result"
    );
    println!(
        "...----|--------------|-----|-------|--------|----------|------|------------|-------"
    );
    for stats in statistics {
        println!("{}", stats);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = build_config(&args)?;

    println!("Starting the simulator.");
    println!("Loading programs into disk.");
    let mut disk = Disk::new(config.disk.size, config.disk.virtual_memory);
    let names = loader::load_programs_from_dir(&args.programs, &mut disk)
        .with_context(|| format!("Failed to read programs from {}", args.programs.display()))?;

    if names.is_empty() {
        println!("No programs to load into memory.");
        return Ok(());
    }

    let mut driver = Driver::new(&config, disk).context("Failed to build the system")?;
    driver.add_observer(Arc::new(LogObserver));

    println!("Enqueuing {} programs for admission.", driver.load_all_programs());
    println!("...Admitted {} processes into memory.", driver.admit().len());

    if args.threaded {
        println!("Starting {} CPU threads.", driver.cpu_count());
        driver.start()?;
        let timeout = Duration::from_millis(config.step_interval_ms.max(1) * args.max_ticks);
        if !driver.await_finished(timeout) {
            println!("...Timed out before every process finished.");
        }
        driver.stop();
    } else {
        println!("Stepping {} CPUs.", driver.cpu_count());
        let ticks = driver.run(args.max_ticks)?;
        println!("...Ran {} ticks.", ticks);
        if !driver.is_finished() {
            println!("...Stopped at the tick limit with processes still pending.");
        }
    }

    let output = driver.output();
    if !output.is_empty() {
        println!("Program output:");
        for line in &output {
            println!("... {}", line);
        }
    }

    let statistics = driver.statistics();
    print_statistics(&statistics);
    println!();
    print!("{}", driver.report());

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&statistics)
            .context("Failed to serialize statistics")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        println!("Wrote statistics to {}.", path.display());
    }

    Ok(())
}
