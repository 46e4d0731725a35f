use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use memscope::logging::{init_logging, parse_level};
use memscope::{replay_file, Engine, ObservationReport, ObserverConfig, ThreadCounters};
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::thread;

/// memscope command-line front end
///
/// - replay: run a recorded trace log through a fresh engine
/// - synth: run the synthetic read-then-write workload
/// - extract: pull metrics out of a rendered report

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    let matches = create_cli().get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .map(|s| parse_level(s))
        .unwrap_or(tracing::Level::WARN);
    init_logging(level, matches.get_flag("json-logs"));

    if let Err(e) = run_command(&matches) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn create_cli() -> Command {
    Command::new("memscope-cli")
        .about("Memory reference observation tools")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(Arg::new("log-level")
            .help("Log level (trace, debug, info, warn, error)")
            .long("log-level")
            .global(true)
            .default_value("warn"))
        .arg(Arg::new("json-logs")
            .help("Emit logs as JSON")
            .long("json-logs")
            .global(true)
            .action(ArgAction::SetTrue))
        .subcommand(
            Command::new("replay")
                .about("Replay a trace log and print the report")
                .arg(Arg::new("trace")
                    .help("Trace log to replay")
                    .required(true)
                    .value_parser(value_parser!(PathBuf))
                    .index(1))
                .arg(Arg::new("config")
                    .help("JSON configuration file")
                    .long("config")
                    .value_parser(value_parser!(PathBuf)))
                .arg(Arg::new("sample")
                    .help("Keep one of every N references")
                    .long("sample")
                    .value_parser(value_parser!(u64).range(1..)))
                .arg(Arg::new("out")
                    .help("Write surviving references to this trace log")
                    .long("out")
                    .value_parser(value_parser!(PathBuf)))
        )
        .subcommand(
            Command::new("synth")
                .about("Run the synthetic read-then-write workload")
                .arg(Arg::new("threads")
                    .help("Number of worker threads")
                    .long("threads")
                    .value_parser(value_parser!(usize))
                    .default_value("3"))
                .arg(Arg::new("lines")
                    .help("Distinct cache lines each thread touches")
                    .long("lines")
                    .value_parser(value_parser!(u64))
                    .default_value("10000"))
                .arg(Arg::new("config")
                    .help("JSON configuration file")
                    .long("config")
                    .value_parser(value_parser!(PathBuf)))
                .arg(Arg::new("shuffle")
                    .help("Visit lines in random order")
                    .long("shuffle")
                    .action(ArgAction::SetTrue))
                .arg(Arg::new("sample")
                    .help("Keep one of every N references")
                    .long("sample")
                    .value_parser(value_parser!(u64).range(1..)))
                .arg(Arg::new("trace")
                    .help("Write references to this trace log")
                    .long("trace")
                    .value_parser(value_parser!(PathBuf)))
                .arg(Arg::new("metrics")
                    .help("Print engine metrics after the report")
                    .long("metrics")
                    .action(ArgAction::SetTrue))
        )
        .subcommand(
            Command::new("extract")
                .about("Extract metrics from a report")
                .arg(Arg::new("report")
                    .help("File containing a rendered report")
                    .required(true)
                    .value_parser(value_parser!(PathBuf))
                    .index(1))
                .arg(Arg::new("json")
                    .help("Print metrics as JSON")
                    .long("json")
                    .action(ArgAction::SetTrue))
        )
}

fn run_command(matches: &ArgMatches) -> CliResult<()> {
    match matches.subcommand() {
        Some(("replay", sub_matches)) => cmd_replay(sub_matches),
        Some(("synth", sub_matches)) => cmd_synth(sub_matches),
        Some(("extract", sub_matches)) => cmd_extract(sub_matches),
        _ => Err("unknown command".into()),
    }
}

fn required<'a, T: Clone + Send + Sync + 'static>(matches: &'a ArgMatches, name: &str) -> CliResult<&'a T> {
    matches
        .get_one::<T>(name)
        .ok_or_else(|| format!("missing argument: {}", name).into())
}

fn base_config(matches: &ArgMatches) -> CliResult<ObserverConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ObserverConfig::from_json_file(path)?,
        None => ObserverConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(interval) = matches.get_one::<u64>("sample") {
        config = config.with_sampling(*interval);
    }
    Ok(config)
}

fn cmd_replay(matches: &ArgMatches) -> CliResult<()> {
    let trace = required::<PathBuf>(matches, "trace")?;
    let mut config = base_config(matches)?;
    if let Some(out) = matches.get_one::<PathBuf>("out") {
        if out == trace {
            return Err("output trace must differ from the replayed trace".into());
        }
        config = config.with_trace(out);
    }

    let engine = Engine::new(config)?;
    let summary = replay_file(&engine, trace)?;
    let report = engine.shutdown()?;

    eprintln!("Replayed {} records from {} threads", summary.records, summary.threads);
    print!("{}", report);
    Ok(())
}

fn cmd_synth(matches: &ArgMatches) -> CliResult<()> {
    let threads = *required::<usize>(matches, "threads")?;
    let lines = *required::<u64>(matches, "lines")?;
    let shuffle = matches.get_flag("shuffle");

    let mut config = base_config(matches)?;
    if let Some(trace) = matches.get_one::<PathBuf>("trace") {
        config = config.with_trace(trace);
    }

    let engine = Engine::new(config)?;
    let report = run_synthetic(&engine, threads, lines, shuffle)?;
    print!("{}", report);
    if matches.get_flag("metrics") {
        print!("{}", engine.metrics()?);
    }
    Ok(())
}

/// Every thread reads `lines` distinct cache lines, then writes the same
/// lines, so the working set is `lines` regardless of the thread count.
fn run_synthetic(engine: &Engine, threads: usize, lines: u64, shuffle: bool) -> CliResult<ObservationReport> {
    const BASE: u64 = 0x1000_0000;
    const PC: u64 = 0x40_0000;

    let handles: Vec<thread::JoinHandle<memscope::Result<ThreadCounters>>> = (0..threads)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                let mut order: Vec<u64> = (0..lines).collect();
                if shuffle {
                    order.shuffle(&mut rand::rng());
                }
                let mut observer = engine.register_thread()?;
                for &i in &order {
                    observer.on_access(false, BASE + i * 64, 8, PC);
                }
                for &i in &order {
                    observer.on_access(true, BASE + i * 64, 8, PC + 4);
                }
                Ok(observer.finish())
            })
        })
        .collect();

    for handle in handles {
        handle.join().map_err(|_| "synthetic worker panicked")??;
    }
    Ok(engine.shutdown()?)
}

fn cmd_extract(matches: &ArgMatches) -> CliResult<()> {
    let path = required::<PathBuf>(matches, "report")?;
    let text = std::fs::read_to_string(path)?;
    let report = ObservationReport::parse(&text)?;
    let metrics = report.metrics();

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        println!("read_freq: {:.2}", metrics.read_freq);
        println!("write_freq: {:.2}", metrics.write_freq);
        println!("total_reads: {}", metrics.total_reads);
        println!("total_writes: {}", metrics.total_writes);
        println!("workingset_size: {}", metrics.workingset_size);
    }
    Ok(())
}
