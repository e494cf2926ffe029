use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use rdb_core::binary::BinaryImage;
use rdb_core::dwarf::DebugInfo;
use rdb_core::symbols::{FunctionSymbol, SymbolTable};
use rdb_core::EngineConfig;
use rdb_utils::{init_logging_with_level, logging, LogLevel};

/// A minimal native debugger for ELF64 executables.
#[derive(Parser, Debug)]
#[command(name = "rdb")]
#[command(version)]
#[command(about = "A minimal native debugger for ELF64 executables on Linux/x86-64", long_about = None)]
struct Cli
{
    /// Default log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn", value_parser = LogLevel::from_str)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// List function and file symbols
    Symbols
    {
        /// Path to the executable
        program: PathBuf,
    },
    /// Show the compile unit and decoded line table
    Lines
    {
        /// Path to the executable
        program: PathBuf,
    },
    /// Launch a program and run it through its breakpoints
    Run
    {
        /// Path to the executable to launch
        program: PathBuf,
        /// Breakpoint as a function name or `file:line` (repeatable)
        #[arg(short = 'b', long = "break")]
        breakpoints: Vec<BreakpointSpec>,
        /// Argument passed to the program (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment variable `KEY=VALUE` for the program (repeatable)
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,
        /// Milliseconds between state polls while the program runs
        #[arg(long, default_value_t = 10)]
        poll_interval_ms: u64,
        /// Maximum number of breakpoints
        #[arg(long, default_value_t = rdb_core::config::DEFAULT_MAX_BREAKPOINTS)]
        max_breakpoints: usize,
    },
}

/// Where to put a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BreakpointSpec
{
    Symbol(String),
    Location
    {
        file: String,
        line: u64,
    },
}

impl FromStr for BreakpointSpec
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        if s.is_empty() {
            return Err("breakpoint must not be empty".to_string());
        }
        // `a::b` is a Rust path, `a.c:12` a location
        match s.rsplit_once(':') {
            Some((file, line)) if !file.is_empty() && !file.ends_with(':') => match line.parse() {
                Ok(line) => Ok(BreakpointSpec::Location {
                    file: file.to_string(),
                    line,
                }),
                Err(_) => Err(format!("invalid line number in {s}")),
            },
            _ => Ok(BreakpointSpec::Symbol(s.to_string())),
        }
    }
}

fn parse_env(s: &str) -> Result<(String, String), String>
{
    s.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {s}"))
}

fn main()
{
    let cli = Cli::parse();

    let guard = logging::format_from_env().and_then(|format| init_logging_with_level(cli.log_level, format));
    let _guard = match guard {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_command(command: Commands) -> Result<(), Box<dyn std::error::Error>>
{
    match command {
        Commands::Symbols { program } => print_symbols(&program),
        Commands::Lines { program } => print_lines(&program),
        Commands::Run {
            program,
            breakpoints,
            args,
            env,
            poll_interval_ms,
            max_breakpoints,
        } => {
            let mut config = EngineConfig::default()
                .with_max_breakpoints(max_breakpoints)
                .with_args(args)
                .with_env(env);
            config.pass_argv0 = true;
            run::run(&program, config, &breakpoints, poll_interval_ms)
        }
    }
}

fn print_symbols(path: &Path) -> Result<(), Box<dyn std::error::Error>>
{
    let image = BinaryImage::load(path)?;
    let symbols = SymbolTable::extract(&image)?;

    println!("Functions ({}):", symbols.function_count());
    for function in symbols.functions() {
        println!("  {}", format_function(&function));
    }

    println!("\nFiles ({}):", symbols.file_count());
    for file in symbols.file_names() {
        println!("  {file}");
    }
    Ok(())
}

/// One `rdb symbols` line: address, size, language, then the display name
/// with the linkage name in parentheses when they differ.
fn format_function(function: &FunctionSymbol<'_>) -> String
{
    let display = function.display_name();
    let name = if display == function.name {
        display
    } else {
        format!("{display} ({})", function.name)
    };
    format!(
        "{:#018x} {:>6}  {:<4} {name}",
        function.address.value(),
        function.size,
        function.language().to_string()
    )
}

fn print_lines(path: &Path) -> Result<(), Box<dyn std::error::Error>>
{
    let image = BinaryImage::load(path)?;
    let debug_info = DebugInfo::parse(&image, rdb_core::config::DEFAULT_MAX_ABBREVIATIONS)?;

    let unit = debug_info.compile_unit();
    println!("Compile unit:");
    println!("  Name: {}", unit.name.as_deref().unwrap_or("<none>"));
    println!("  Producer: {}", unit.producer.as_deref().unwrap_or("<none>"));
    match unit.language {
        Some(language) => println!("  Language: {language}"),
        None => println!("  Language: <none>"),
    }
    println!("  DWARF version: {}", unit.version);

    for program in debug_info.line_programs() {
        println!(
            "\nLine program at {:#x} ({} files, {} rows):",
            program.header.offset,
            program.files.len(),
            program.rows.len()
        );
        for row in &program.rows {
            let file = program
                .file(row.file)
                .map_or_else(|| format!("<file {}>", row.file), |entry| program.file_path(entry));
            let mut flags = String::new();
            if row.is_stmt {
                flags.push_str(" stmt");
            }
            if row.end_sequence {
                flags.push_str(" end_sequence");
            }
            println!(
                "  {:#018x}  {}:{}:{}{}",
                row.address.value(),
                file,
                row.line_begin,
                row.column_begin,
                flags
            );
        }
    }
    Ok(())
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod run
{
    use std::path::Path;
    use std::time::Duration;

    use rdb_core::types::{ProgramState, StopReason};
    use rdb_core::{EngineConfig, Program};
    use rdb_utils::info;

    use super::BreakpointSpec;

    /// Launch `path`, set `breakpoints`, and resume through every stop until
    /// the program exits.
    pub fn run(
        path: &Path,
        config: EngineConfig,
        breakpoints: &[BreakpointSpec],
        poll_interval_ms: u64,
    ) -> Result<(), Box<dyn std::error::Error>>
    {
        let mut program = Program::open(path, config)?;
        if let Some(pid) = program.pid() {
            println!("Launched {} (PID: {pid})", path.display());
        }

        for spec in breakpoints {
            let id = match spec {
                BreakpointSpec::Symbol(name) => program.create_breakpoint_at_symbol(name)?,
                BreakpointSpec::Location { file, line } => program.create_breakpoint_at_location(file, *line)?,
            };
            if let Some((_, breakpoint)) = program.breakpoints().find(|(candidate, _)| *candidate == id) {
                println!("Breakpoint {id} at {}", breakpoint.instruction_address);
            }
        }

        let poll_interval = Duration::from_millis(poll_interval_ms);
        loop {
            program.continue_execution()?;
            while !program.update_state()? {
                std::thread::sleep(poll_interval);
            }
            if program.state() == ProgramState::Exited {
                println!("Program exited");
                return Ok(());
            }
            print_stop(&program);
        }
    }

    fn print_stop(program: &Program)
    {
        let rip = program.rip();
        let function = program
            .symbol_table()
            .function_containing(rip)
            .map(|function| format!(" in {}+{:#x}", function.display_name(), rip.value() - function.address.value()))
            .unwrap_or_default();
        let location = program
            .debug_info()
            .location_for(rip)
            .map(|location| format!(" at {}:{}", location.file, location.line))
            .unwrap_or_default();

        match (program.stop_reason(), program.breakpoint_id()) {
            (StopReason::BreakpointHit, Some(id)) => println!("Breakpoint {id} hit at {rip}{function}{location}"),
            (reason, _) => println!("Stopped ({reason}) at {rip}{function}{location}"),
        }
        info!(%rip, reason = %program.stop_reason(), "debuggee stopped");
    }
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
mod run
{
    use std::path::Path;

    use rdb_core::EngineConfig;

    use super::BreakpointSpec;

    pub fn run(
        _path: &Path,
        _config: EngineConfig,
        _breakpoints: &[BreakpointSpec],
        _poll_interval_ms: u64,
    ) -> Result<(), Box<dyn std::error::Error>>
    {
        Err("running programs requires Linux on x86-64".into())
    }
}
