//! AQP card emulator, headless frontend.
//!
//! Replays a port-access script against one emulated card, or reads the
//! same commands interactively with `--step`.

mod script;

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use aqp_core::{savestate, Aqp, AqpConfig, Driver, Generation};
use clap::{Parser, ValueEnum};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use script::Command;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GenerationArg {
    Link,
    Detect,
}

impl From<GenerationArg> for Generation {
    fn from(g: GenerationArg) -> Self {
        match g {
            GenerationArg::Link => Generation::Link,
            GenerationArg::Detect => Generation::Detect,
        }
    }
}

#[derive(Parser)]
#[clap(author, about, long_about = None, version)]
struct Cli {
    /// Port-access script to run
    script: Option<PathBuf>,
    /// I/O base address of the card
    #[clap(long, value_parser = parse_iobase, default_value = "0x150")]
    iobase: u16,
    /// Protocol generation to emulate
    #[clap(long, value_enum, default_value_t = GenerationArg::Link)]
    generation: GenerationArg,
    /// Interactive prompt (after the script, if one is given)
    #[clap(long)]
    step: bool,
    /// Restore registers from a save state before running
    /// (default: the script's `.state` file)
    #[clap(long, value_name = "PATH")]
    load_state: Option<Option<PathBuf>>,
    /// Write a save state when done (default: the script's `.state` file)
    #[clap(long, value_name = "PATH")]
    save_state: Option<Option<PathBuf>>,
    /// Log at debug level
    #[clap(long)]
    debug: bool,
    /// Log every port access
    #[clap(long)]
    trace: bool,
}

fn parse_iobase(s: &str) -> std::result::Result<u16, String> {
    let n = script::parse_num(s).map_err(|e| e.to_string())?;
    u16::try_from(n).map_err(|_| format!("iobase {} does not fit in 16 bits", s))
}

/// Path for `--load-state`/`--save-state`. A bare flag names the file next
/// to the script.
fn resolve_state_path(flag: &Option<Option<PathBuf>>, script: Option<&Path>) -> Result<Option<PathBuf>> {
    match flag {
        None => Ok(None),
        Some(Some(path)) => Ok(Some(path.clone())),
        Some(None) => match script {
            Some(s) => Ok(Some(PathBuf::from(savestate::state_path(&s.to_string_lossy())))),
            None => bail!("no script to derive a save state path from; give one explicitly"),
        },
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.trace {
        "trace"
    } else if cli.debug {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.script.is_none() && !cli.step {
        bail!("nothing to do: give a script or --step");
    }

    let load_path = resolve_state_path(&cli.load_state, cli.script.as_deref())?;
    let save_path = resolve_state_path(&cli.save_state, cli.script.as_deref())?;

    let config = AqpConfig { iobase: cli.iobase, generation: cli.generation.into() };
    let mut aqp = Aqp::new_with_config(config).context("failed to build card")?;

    if let Some(path) = &load_path {
        aqp.load_from_file(path)
            .with_context(|| format!("failed to load state from {}", path.display()))?;
        info!("loaded state from {}", path.display());
        println!("Loaded state from {}", path.display());
    }

    if let Some(path) = &cli.script {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let commands = script::parse_script(&text)
            .with_context(|| format!("in {}", path.display()))?;
        info!("running {} commands from {}", commands.len(), path.display());
        for (line, cmd) in &commands {
            debug!("{}:{} {:?}", path.display(), line, cmd);
            run_command(&mut aqp, cmd).with_context(|| format!("{}:{}", path.display(), line))?;
        }
    }

    if cli.step {
        run_step_mode(&mut aqp)?;
    }

    if let Some(path) = &save_path {
        aqp.save_to_file(path)
            .with_context(|| format!("failed to save state to {}", path.display()))?;
        info!("saved state to {}", path.display());
        println!("Saved state to {}", path.display());
    }
    Ok(())
}

/// Run one command, printing whatever it reports. A device fault raised by
/// the command is returned as an error.
fn run_command(aqp: &mut Aqp, cmd: &Command) -> Result<()> {
    let base = aqp.config.iobase;
    let port = |offset: u8| base.wrapping_add(u16::from(offset));
    match *cmd {
        Command::Read(p) => println!("r{:02x} = 0x{:02X}", p, aqp.read_port(port(p))),
        Command::Write(p, b) => aqp.write_port(port(p), b),
        Command::Expect(p, want) => {
            let got = aqp.read_port(port(p));
            if got != want {
                bail!("expect r{:02x} = 0x{:02X}, got 0x{:02X}", p, want, got);
            }
        }
        Command::Reset => aqp.reset(),
        Command::Poke(addr, value) => Driver::new(aqp).poke(addr, value)?,
        Command::Peek(addr) => {
            let value = Driver::new(aqp).peek(addr)?;
            println!("PEEK(0x{:08X}) = 0x{:08X}", addr, value);
        }
        Command::Link(tag, len) => {
            let bytes = Driver::new(aqp).link(tag, len)?;
            let hex: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            println!("LINK(0x{:08X}) = {}", tag, hex.join(" "));
        }
        Command::Detect => {
            let found = Driver::new(aqp).detect()?;
            println!("detect: {}", if found { "card present" } else { "no card" });
        }
        Command::Watch(p, kind) => {
            let idx = aqp.debugger.add_watchpoint(p, kind);
            println!("watchpoint [{}] on +0x{:02X}", idx, p);
        }
        Command::Dump => {
            print!("{}", aqp.dump_state());
            print!("{}", aqp.debugger.list_watchpoints());
        }
        Command::Mem(start, count) => print!("{}", aqp.dump_memory(start, count)),
        Command::Trace => print!("{}", aqp.debugger.format_trace()),
    }

    if let Some(hit) = aqp.debugger.take_hit() {
        println!("*** Watchpoint [{}]: {:?} +0x{:02X} = 0x{:02X} ***", hit.index, hit.dir, hit.offset, hit.value);
    }
    if let Some(fault) = aqp.take_fault() {
        warn!("fault after {:?}: {}", cmd, fault);
        bail!("device fault: {}", fault);
    }
    Ok(())
}

// ─── Step Mode ──────────────────────────────────────────────────────────────

fn run_step_mode(aqp: &mut Aqp) -> Result<()> {
    println!("Step mode: script commands, q=quit");
    print!("{}", aqp.dump_state());

    let stdin = io::stdin();
    let mut count = 0usize;
    loop {
        print!("aqp> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let cmd = line.trim();
        if matches!(cmd, "q" | "quit") {
            break;
        }
        match script::parse_line(cmd) {
            Ok(Some(c)) => {
                count += 1;
                if let Err(e) = run_command(aqp, &c) {
                    warn!("step command {:?} failed: {:#}", c, e);
                    println!("error: {:#}", e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                debug!("unparsed input {:?}", cmd);
                println!("error: {:#}", e);
            }
        }
    }
    println!("Total: {} commands", count);
    Ok(())
}
