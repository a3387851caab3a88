use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use killbot::{
    AgentConfig, CubeId, ExecutionLoop, Grid, Ledger, LedgerReader, RpcLedger, SimLedger,
    StrategyKind, SubgraphFeed, build_strategy, load_action_stats,
    modules::config::{data_dir, default_config_path, load_config, save_config},
    modules::economy::{Economy, LedgerConstants},
    modules::error::ConfigError,
    modules::ledger::short_identity,
    state::{self, Status},
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

mod grid;

use grid::{GridCommand, run_grid};

const PID_FILE: &str = ".killbot/runtime.pid";
const KEY_FILE: &str = ".killbot/.key";
const TOKEN_ENV: &str = "KILLBOT_GATEWAY_TOKEN";
/// Starting balance for `--ledger sim` runs.
const SIM_FUNDING: u128 = 1_000_000;

#[derive(Parser)]
#[command(
    name = "killbot",
    version,
    about = "Tactical decision engine for cube-lattice combat agents",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LedgerBackend {
    /// JSON-RPC gateway from the config file
    Rpc,
    /// In-process simulated board
    Sim,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Toon,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a default config and runtime state under .killbot/
    Init {
        /// Agent address to store in the config
        #[arg(long)]
        identity: Option<String>,
        /// Overwrite an existing config file
        #[arg(long, action = ArgAction::SetTrue, default_value_t = false)]
        force: bool,
    },
    /// Run the scan/decide/act loop
    Run {
        /// Strategy to run (defaults to the config's strategy.kind)
        #[arg(short = 's', long, value_enum)]
        strategy: Option<StrategyKind>,
        /// Config file (default .killbot/config.json)
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
        /// Ledger backend
        #[arg(long, value_enum, default_value_t = LedgerBackend::Rpc)]
        ledger: LedgerBackend,
        /// Number of cycles to run (omit for continuous)
        #[arg(short = 'n', long)]
        cycles: Option<u64>,
        /// Delay between cycles in ms (defaults to runner.poll_delay_ms)
        #[arg(short = 'd', long)]
        delay_ms: Option<u64>,
        /// Bearer token for the gateway (also reads KILLBOT_GATEWAY_TOKEN, then .killbot/.key)
        #[arg(long)]
        gateway_token: Option<String>,
        /// Run in the background and return immediately
        #[arg(long, action = ArgAction::SetTrue, default_value_t = false)]
        detach: bool,
        /// Internal flag for background child process (do not use directly)
        #[arg(long, hide = true, default_value_t = false)]
        background_child: bool,
    },
    /// Show runtime status and action counters
    Status,
    /// Mark the runtime as stopped and signal a background loop
    Stop,
    /// Read cubes once and print their occupants
    Scan {
        /// Cube ids (omit for the whole lattice)
        cubes: Vec<CubeId>,
        /// Config file (default .killbot/config.json)
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = LedgerBackend::Rpc)]
        ledger: LedgerBackend,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
        #[arg(long)]
        gateway_token: Option<String>,
    },
    /// Lattice geometry helpers
    Grid {
        /// Lattice side length
        #[arg(long, default_value_t = killbot::modules::grid::DEFAULT_SIDE)]
        side: u16,
        #[command(subcommand)]
        command: GridCommand,
    },
}

pub fn run() {
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli.command) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn dispatch(command: Command) -> Result<(), String> {
    match command {
        Command::Init { identity, force } => run_init(identity, force),
        Command::Run {
            strategy,
            config,
            ledger,
            cycles,
            delay_ms,
            gateway_token,
            detach,
            background_child,
        } => {
            let args = RunArgs {
                strategy,
                config,
                ledger,
                cycles,
                delay_ms,
                gateway_token,
            };
            if detach && !background_child {
                launch_background_run(&args)
            } else {
                run_loop(args)
            }
        }
        Command::Status => run_status(),
        Command::Stop => run_stop(),
        Command::Scan {
            cubes,
            config,
            ledger,
            format,
            gateway_token,
        } => run_scan(cubes, config, ledger, format, gateway_token),
        Command::Grid { side, command } => run_grid(side, command),
    }
}

struct RunArgs {
    strategy: Option<StrategyKind>,
    config: Option<PathBuf>,
    ledger: LedgerBackend,
    cycles: Option<u64>,
    delay_ms: Option<u64>,
    gateway_token: Option<String>,
}

fn run_init(identity: Option<String>, force: bool) -> Result<(), String> {
    let path = default_config_path();
    if path.exists() && !force {
        println!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    } else {
        let config = AgentConfig {
            identity: identity.unwrap_or_default(),
            ..AgentConfig::default()
        };
        save_config(&path, &config).map_err(|e| e.to_string())?;
        println!("Wrote default config to {}", path.display());
        if config.identity.is_empty() {
            println!("Set `identity` before running the loop.");
        }
    }

    state::init_state_in(&data_dir()).map_err(|e| e.to_string())?;
    println!("Initialized state at {}", state::state_file_path().display());
    Ok(())
}

fn run_status() -> Result<(), String> {
    match state::load_state().map_err(|e| e.to_string())? {
        None => {
            println!("Status: not initialized. Run `killbot init`.");
        }
        Some(state) => {
            println!(
                "Status: {:?} | cycle={} | strategy={} | updated={} | message={}",
                state.status,
                state.cycle,
                state.strategy.unwrap_or_else(|| "-".into()),
                state.updated_at.unwrap_or_else(|| "-".into()),
                state.message.unwrap_or_else(|| "-".into())
            );
        }
    }
    print_action_summary()
}

fn run_stop() -> Result<(), String> {
    let current = state::load_state().map_err(|e| e.to_string())?;
    let Some(prev) = current else {
        return Err("Not initialized. Run `killbot init` first.".into());
    };
    let updated = state::set_status(Status::Stopped, prev.cycle, Some("stopped by user".into()))
        .map_err(|e| e.to_string())?;
    println!("Stopped. cycle={}", updated.cycle);
    print_action_summary()?;
    try_kill_background_process();
    Ok(())
}

fn load_agent_config(path: Option<PathBuf>) -> Result<AgentConfig, String> {
    let path = path.unwrap_or_else(default_config_path);
    load_config(&path).map_err(|e| match e {
        ConfigError::Io(_) => format!(
            "cannot read config {}: {}. Run `killbot init` first.",
            path.display(),
            e
        ),
        other => format!("{}: {}", path.display(), other),
    })
}

fn run_loop(args: RunArgs) -> Result<(), String> {
    let mut config = load_agent_config(args.config)?;
    if let Some(kind) = args.strategy {
        config.strategy.kind = kind;
    }
    let delay = Duration::from_millis(args.delay_ms.unwrap_or(config.runner.poll_delay_ms));
    let strategy = build_strategy(&config.strategy);

    let dir = data_dir();
    let mut runtime = state::load_state_in(&dir)
        .map_err(|e| e.to_string())?
        .unwrap_or_default();
    runtime.status = Status::Running;
    runtime.strategy = Some(config.strategy.kind.to_string());
    runtime.message = Some("loop starting".into());
    state::save_state_in(&dir, &runtime).map_err(|e| e.to_string())?;

    println!(
        "Running {} for {} on the {} ledger ({} cycle(s), delay {} ms)",
        config.strategy.kind,
        short_identity(&config.identity),
        match args.ledger {
            LedgerBackend::Rpc => "rpc",
            LedgerBackend::Sim => "sim",
        },
        args.cycles
            .map(|c| c.to_string())
            .unwrap_or_else(|| "continuous".into()),
        delay.as_millis()
    );

    let last_cycle = match args.ledger {
        LedgerBackend::Rpc => {
            let ledger = connect_rpc(&config, args.gateway_token)?;
            drive(ExecutionLoop::new(ledger, strategy, &config), args.cycles, delay)?
        }
        LedgerBackend::Sim => {
            let ledger = seeded_sim(&config)?;
            drive(ExecutionLoop::new(ledger, strategy, &config), args.cycles, delay)?
        }
    };

    state::set_status(Status::Stopped, last_cycle, Some("loop finished".into()))
        .map_err(|e| e.to_string())?;
    print_action_summary()
}

fn drive<L: Ledger>(
    engine: Result<ExecutionLoop<L>, ConfigError>,
    cycles: Option<u64>,
    delay: Duration,
) -> Result<u64, String> {
    let mut engine = engine.map_err(|e| e.to_string())?.with_persistence(data_dir());
    engine.run(cycles, delay);
    Ok(engine.state().cycle)
}

fn connect_rpc(config: &AgentConfig, token: Option<String>) -> Result<RpcLedger, String> {
    let url = config.require_gateway().map_err(|e| e.to_string())?;
    let timeout = Duration::from_millis(config.network.timeout_ms);
    let token = token
        .or_else(|| env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty()))
        .or_else(load_token_from_file);

    let ledger = RpcLedger::new(url, token, timeout, config.network.read_chunk)
        .map_err(|e| e.to_string())?;
    match config
        .network
        .subgraph_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
    {
        Some(url) => {
            let feed = SubgraphFeed::new(url, timeout).map_err(|e| e.to_string())?;
            Ok(ledger.with_event_feed(feed))
        }
        None if config.strategy.kind == StrategyKind::Aftershock => {
            Err(ConfigError::MissingEndpoint("network.subgraph_url").to_string())
        }
        None => Ok(ledger),
    }
}

fn load_token_from_file() -> Option<String> {
    let data = fs::read_to_string(KEY_FILE).ok()?;
    let trimmed = data.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Simulated board with the agent funded and a scatter of rival stacks.
fn seeded_sim(config: &AgentConfig) -> Result<SimLedger, String> {
    let grid = Grid::new(config.grid.side).map_err(|e| e.to_string())?;
    let mut sim = SimLedger::new(
        grid,
        config.economy,
        LedgerConstants {
            cost_per_unit: 20,
            burn_bps: 666,
        },
    );
    if !config.identity.trim().is_empty() {
        sim.fund(&config.identity, SIM_FUNDING);
    }

    let mut rng = match config.strategy.seeder.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let rivals = ["0x1111", "0x2222", "0x3333", "0x4444"];
    let stacks = (grid.cube_count() / 18).max(1);
    for i in 0..stacks {
        let cube = rng.gen_range(1..=grid.cube_count());
        let units = rng.gen_range(1..=400);
        let reapers = if rng.gen_bool(0.1) { 1 } else { 0 };
        sim.place(cube, rivals[i as usize % rivals.len()], units, reapers);
    }
    sim.advance_blocks(rng.gen_range(0..5_000));
    Ok(sim)
}

#[derive(Serialize)]
struct ScanRow {
    cube: CubeId,
    x: u16,
    y: u16,
    z: u16,
    occupant: String,
    units: u64,
    reapers: u64,
    age: u64,
    power: String,
    net_bounty: String,
}

fn run_scan(
    cubes: Vec<CubeId>,
    config: Option<PathBuf>,
    ledger: LedgerBackend,
    format: OutputFormat,
    gateway_token: Option<String>,
) -> Result<(), String> {
    let config = match config {
        Some(path) => load_agent_config(Some(path))?,
        None => load_config(&default_config_path()).unwrap_or_default(),
    };
    let grid = Grid::new(config.grid.side).map_err(|e| e.to_string())?;
    for cube in &cubes {
        grid.check(*cube).map_err(|e| format!("cube {}: {}", cube, e))?;
    }
    let ids: Vec<CubeId> = if cubes.is_empty() {
        grid.ids().collect()
    } else {
        cubes
    };

    let rows = match ledger {
        LedgerBackend::Rpc => scan_rows(&connect_rpc(&config, gateway_token)?, &config, &grid, &ids)?,
        LedgerBackend::Sim => scan_rows(&seeded_sim(&config)?, &config, &grid, &ids)?,
    };

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&rows).map_err(|e| e.to_string())?;
            println!("{}", json);
        }
        OutputFormat::Toon => {
            let toon = serde_toon::to_string_pretty(&rows).map_err(|e| e.to_string())?;
            println!("{}", toon);
        }
        OutputFormat::Table => print_scan_table(&rows, ids.len()),
    }
    Ok(())
}

fn scan_rows<R: LedgerReader>(
    reader: &R,
    config: &AgentConfig,
    grid: &Grid,
    ids: &[CubeId],
) -> Result<Vec<ScanRow>, String> {
    let constants = LedgerConstants {
        cost_per_unit: reader.cost_per_unit().map_err(|e| e.to_string())?,
        burn_bps: reader.burn_bps().map_err(|e| e.to_string())?,
    };
    let economy = Economy::new(config.economy, constants);
    let read = reader.batch_read(ids).map_err(|e| e.to_string())?;

    let mut rows = Vec::new();
    for occupancy in read {
        let coord = grid.coordinate_of(occupancy.cube).map_err(|e| e.to_string())?;
        for stack in occupancy.stacks.iter().filter(|s| !s.is_empty()) {
            rows.push(ScanRow {
                cube: occupancy.cube,
                x: coord.x,
                y: coord.y,
                z: coord.z,
                occupant: stack.occupant.clone(),
                units: stack.units,
                reapers: stack.reapers,
                age: stack.spawn_age,
                power: stack.power(&economy).to_string(),
                net_bounty: economy.net_bounty(stack.gross_bounty(&economy)).to_string(),
            });
        }
    }
    Ok(rows)
}

fn print_scan_table(rows: &[ScanRow], scanned: usize) {
    println!("Scanned {} cube(s), {} stack(s)", scanned, rows.len());
    if rows.is_empty() {
        return;
    }
    println!(
        "{:>5}  {:<9}  {:<12}  {:>8}  {:>7}  {:>6}  {:>10}  {:>12}",
        "cube", "xyz", "occupant", "units", "reapers", "age", "power", "net bounty"
    );
    for row in rows {
        println!(
            "{:>5}  {:<9}  {:<12}  {:>8}  {:>7}  {:>6}  {:>10}  {:>12}",
            row.cube,
            format!("{},{},{}", row.x, row.y, row.z),
            short_identity(&row.occupant),
            row.units,
            row.reapers,
            row.age,
            row.power,
            row.net_bounty
        );
    }
}

fn print_action_summary() -> Result<(), String> {
    let store = load_action_stats().map_err(|e| e.to_string())?;
    if store.per_identity.is_empty() {
        println!("No action stats recorded.");
        return Ok(());
    }

    println!("Action summary per identity:");
    for (identity, stats) in store.per_identity.iter() {
        println!(
            " - {} | reinforce={} transfer={} engage={} approve={} rejected_batches={}",
            short_identity(identity),
            stats.reinforce_count,
            stats.transfer_count,
            stats.engage_count,
            stats.approve_count,
            stats.rejected_batches
        );
    }
    Ok(())
}

fn launch_background_run(args: &RunArgs) -> Result<(), String> {
    let exe = env::current_exe().map_err(|e| format!("current_exe: {}", e))?;
    let mut child_args = render_run_args(args);
    child_args.push("--background-child".into());

    let child = std::process::Command::new(exe)
        .args(&child_args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn background process: {}", e))?;

    let pid_path = PathBuf::from(PID_FILE);
    if let Some(parent) = pid_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    fs::write(&pid_path, format!("{}", child.id()))
        .map_err(|e| format!("failed to write pid file {}: {}", pid_path.display(), e))?;

    println!(
        "Started background loop (pid={}). Stop with `killbot stop`.",
        child.id()
    );
    Ok(())
}

fn render_run_args(args: &RunArgs) -> Vec<String> {
    let mut out = vec!["run".to_string()];
    if let Some(kind) = args.strategy {
        out.push("--strategy".into());
        out.push(kind.to_string());
    }
    if let Some(path) = &args.config {
        out.push("--config".into());
        out.push(path.display().to_string());
    }
    out.push("--ledger".into());
    out.push(
        match args.ledger {
            LedgerBackend::Rpc => "rpc",
            LedgerBackend::Sim => "sim",
        }
        .into(),
    );
    if let Some(n) = args.cycles {
        out.push("--cycles".into());
        out.push(n.to_string());
    }
    if let Some(ms) = args.delay_ms {
        out.push("--delay-ms".into());
        out.push(ms.to_string());
    }
    if let Some(token) = &args.gateway_token {
        out.push("--gateway-token".into());
        out.push(token.clone());
    }
    out
}

fn try_kill_background_process() {
    let pid_path = PathBuf::from(PID_FILE);
    let pid_str = match fs::read_to_string(&pid_path) {
        Ok(s) => s,
        Err(_) => return,
    };
    let pid: u32 = match pid_str.trim().parse() {
        Ok(p) => p,
        Err(_) => return,
    };

    let status = std::process::Command::new("kill")
        .arg(format!("{}", pid))
        .status();
    match status {
        Ok(s) if s.success() => {
            println!("Stopped background process pid={}", pid);
            let _ = fs::remove_file(pid_path);
        }
        Ok(_) => eprintln!("warning: failed to stop background pid {}", pid),
        Err(_) => {}
    }
}
