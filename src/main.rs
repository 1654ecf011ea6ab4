use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use kiln::{Program, RuntimeConfig, VM};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "A quickening bytecode VM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link and run a compiled program
    Run {
        /// The program to run, as JSON
        file: PathBuf,

        /// Bytes per semispace (overrides the config file)
        #[arg(long)]
        heap_size: Option<usize>,

        /// Print GC statistics after the run
        #[arg(long)]
        gc_stats: bool,

        /// Log every dispatched instruction (needs RUST_LOG=trace)
        #[arg(long)]
        trace: bool,

        /// Runtime config file (TOML)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Link a compiled program and print a summary without running it
    Link {
        /// The program to link, as JSON
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            heap_size,
            gc_stats,
            trace,
            config,
        } => load_config(config.as_deref()).and_then(|mut config| {
            if let Some(heap_size) = heap_size {
                config.heap_size = heap_size;
            }
            config.gc_stats |= gc_stats;
            config.trace |= trace;
            run_file(&file, &config)
        }),
        Commands::Link { file } => link_file(&file),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, String> {
    match path {
        Some(path) => RuntimeConfig::load(path).map_err(|e| format!("error: {}", e)),
        None => Ok(RuntimeConfig::default()),
    }
}

fn run_file(path: &Path, config: &RuntimeConfig) -> Result<(), String> {
    let program = Program::load(path).map_err(|e| format!("error: {}", e))?;
    let mut vm = VM::new(config).map_err(|e| format!("error: {}", e))?;
    let result = vm.run(&program).map_err(|e| e.to_string());

    if config.gc_stats {
        let stats = vm.gc_stats();
        eprintln!(
            "[GC] cycles: {}, bytes copied: {}, total pause: {:?}, max pause: {:?}",
            stats.cycles, stats.bytes_copied, stats.total_pause, stats.max_pause
        );
    }
    result
}

fn link_file(path: &Path) -> Result<(), String> {
    let program = Program::load(path).map_err(|e| format!("error: {}", e))?;
    let image = kiln::link(&program).map_err(|e| e.to_string())?;
    println!("code:    {} bytes", image.code.len());
    println!("classes: {}", image.classes.len());
    println!("globals: {}", image.globals.len());
    println!("symbols: {}", image.symbols.len());
    println!("entry:   {}", image.entry);
    Ok(())
}
