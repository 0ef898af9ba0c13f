use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;

use tracegen::config::{DEFAULT_NUM_DAYS, DEFAULT_SINK_ADDR, DEFAULT_SLOT_MINUTES};
use tracegen::{Direction, GeneratorConfig, Orchestrator, Shutdown, Sink};

fn generator_args() -> Vec<Arg> {
    vec![
        Arg::new("dest")
            .long("dest")
            .value_name("IP:PORT")
            .required(true)
            .value_parser(clap::value_parser!(SocketAddr))
            .help("Destination every flow sends to"),
        Arg::new("source-ip")
            .long("source-ip")
            .value_parser(clap::value_parser!(IpAddr))
            .help("Local address flows bind to (default: 0.0.0.0)"),
        Arg::new("base-port")
            .long("base-port")
            .value_parser(clap::value_parser!(u16))
            .help("Flow i binds base-port + i (default: 25000 uplink, 50000 downlink)"),
        Arg::new("trace-dir")
            .long("trace-dir")
            .value_parser(clap::value_parser!(PathBuf))
            .help("Directory holding <app>_<direction>.csv traces"),
        Arg::new("trace")
            .long("trace")
            .value_name("NAME=PATH")
            .action(ArgAction::Append)
            .help("Trace file for one app, overriding --trace-dir"),
        Arg::new("schedule")
            .long("schedule")
            .value_parser(clap::value_parser!(PathBuf))
            .help("Flow schedule CSV"),
        Arg::new("slot-min")
            .long("slot-min")
            .value_parser(clap::value_parser!(u64))
            .help(format!(
                "Minutes per schedule row (default: {})",
                DEFAULT_SLOT_MINUTES
            )),
        Arg::new("days")
            .long("days")
            .value_parser(clap::value_parser!(usize))
            .help(format!(
                "Days of schedule rows to replay, 144 rows per day (default: {})",
                DEFAULT_NUM_DAYS
            )),
        Arg::new("mux")
            .long("mux")
            .action(ArgAction::SetTrue)
            .conflicts_with("no-mux")
            .help("Stagger flow start points (default)"),
        Arg::new("no-mux")
            .long("no-mux")
            .action(ArgAction::SetTrue)
            .help("Start every flow at the beginning of its trace"),
        Arg::new("app-mix")
            .long("app-mix")
            .value_name("JSON")
            .help("App weights, e.g. '{\"youtube\":1,\"browsing\":0.5}'"),
        Arg::new("seed")
            .long("seed")
            .value_parser(clap::value_parser!(u64))
            .help("Seed app sampling for reproducible runs"),
    ]
}

fn run_generator(
    direction: Direction,
    matches: &ArgMatches,
    shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = GeneratorConfig::from_matches(direction, matches)?;
    let (orchestrator, plan) = Orchestrator::prepare(&config, shutdown)?;
    let summary = orchestrator.run(&plan);
    info!(
        "[{}] slots={}/{} flows={} failed={} packets={} bytes={} send_errors={}",
        direction.tag(),
        summary.slots_completed,
        plan.len(),
        summary.flows_started,
        summary.flows_failed,
        summary.packets_sent,
        summary.bytes_sent,
        summary.send_errors
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("tracegen")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Trace-driven UDP traffic generator")
        .subcommand_required(true)
        .subcommand(
            Command::new("uplink")
                .about("Replay uplink traces")
                .args(generator_args()),
        )
        .subcommand(
            Command::new("downlink")
                .about("Replay downlink traces")
                .args(generator_args()),
        )
        .subcommand(
            Command::new("sink")
                .about("Count datagrams arriving on a UDP port")
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .value_parser(clap::value_parser!(SocketAddr))
                        .default_value(DEFAULT_SINK_ADDR)
                        .help("Address to listen on"),
                ),
        )
        .get_matches();

    let shutdown = Shutdown::new();
    let handler = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Interrupted, stopping");
        handler.trigger();
    })?;

    match matches.subcommand() {
        Some(("uplink", sub)) => run_generator(Direction::Uplink, sub, shutdown),
        Some(("downlink", sub)) => run_generator(Direction::Downlink, sub, shutdown),
        Some(("sink", sub)) => {
            let addr = *sub
                .get_one::<SocketAddr>("bind")
                .ok_or("bind address missing")?;
            let sink = Sink::bind(addr)?;
            sink.run(&shutdown)?;
            Ok(())
        }
        _ => unreachable!("subcommand_required"),
    }
}
