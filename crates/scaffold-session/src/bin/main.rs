use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use scaffold_net::{RoomToken, Signaling, TcpRelay, TcpSignaling};
use scaffold_session::sim::{run_room_simulation, run_room_simulation_on, RoomSimulationConfig};
use scaffold_session::SessionConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cli() -> Command {
    Command::new("scaffold")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Collaborative causal-scaffolding rooms")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a room simulation and check convergence")
                .arg(
                    Arg::new("peers")
                        .long("peers")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Peers in the room, creator included"),
                )
                .arg(
                    Arg::new("edits")
                        .long("edits")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Edits per peer"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for the edit script"),
                )
                .arg(
                    Arg::new("relay")
                        .long("relay")
                        .value_parser(value_parser!(SocketAddr))
                        .help("Use a TCP relay instead of an in-process one"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the report as JSON"),
                )
                .arg(
                    Arg::new("no-expand")
                        .long("no-expand")
                        .action(ArgAction::SetTrue)
                        .help("Skip the competing expansions"),
                ),
        )
        .subcommand(
            Command::new("relay")
                .about("Run a TCP signaling relay")
                .arg(
                    Arg::new("listen")
                        .long("listen")
                        .default_value("127.0.0.1:4444")
                        .value_parser(value_parser!(SocketAddr))
                        .help("Address to listen on"),
                ),
        )
        .subcommand(
            Command::new("mint")
                .about("Mint a room token and print its invite link")
                .arg(
                    Arg::new("base")
                        .long("base")
                        .default_value("https://scaffold.local/")
                        .help("Base URL of the app"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Session config file (TOML)"),
                ),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = RoomSimulationConfig {
                peers: args.get_one::<usize>("peers").copied().unwrap_or(3),
                edits_per_peer: args.get_one::<usize>("edits").copied().unwrap_or(8),
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
                expand: !args.get_flag("no-expand"),
                ..RoomSimulationConfig::default()
            };

            let json = args.get_flag("json");
            if !json {
                println!("Running room simulation...");
                println!("Peers: {}", config.peers);
                println!("Seed: {}", config.seed);
                println!();
            }

            let report = match args.get_one::<SocketAddr>("relay") {
                Some(addr) => {
                    let signaling: Arc<dyn Signaling> = Arc::new(TcpSignaling::new(*addr));
                    run_room_simulation_on(config, signaling).await
                }
                None => run_room_simulation(config).await,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report.to_json())?);
            } else {
                println!("{}", report.generate_text());
            }
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("relay", args)) => {
            let addr = args
                .get_one::<SocketAddr>("listen")
                .copied()
                .context("missing listen address")?;
            let relay = TcpRelay::bind(addr)
                .await
                .with_context(|| format!("binding relay on {addr}"))?;
            println!("Relay listening on {}", relay.local_addr()?);
            relay
                .serve_until(async {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        tracing::warn!(error = %err, "cannot listen for ctrl-c");
                        std::future::pending::<()>().await;
                    }
                })
                .await?;
        }
        Some(("mint", args)) => {
            let config = match args.get_one::<PathBuf>("config") {
                Some(path) => SessionConfig::load(path)?,
                None => SessionConfig::default(),
            };
            let base = args
                .get_one::<String>("base")
                .map_or("https://scaffold.local/", String::as_str);
            let token = RoomToken::mint(config.token_len);
            println!("{token}");
            println!("{}{}", base.trim_end_matches('#'), token.to_fragment());
        }
        _ => unreachable!("subcommand_required"),
    }
    Ok(())
}
