mod console;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use warden::{ProcessTable, SystemProcessTable};
use warden_core::config;

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Game server supervisor")]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Start servers and stay attached to their output
	Run {
		/// Servers to start; all of them when omitted
		names: Vec<String>,
	},
	/// Show which server executables are running on this machine
	Status {
		#[arg(long)]
		json: bool,
	},
	/// Inspect or change the config file
	#[command(subcommand)]
	Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
	/// Print the effective config
	Show,
	/// Directory holding the server executables
	SetServerDir { path: PathBuf },
	/// Directory exit logs are written to
	SetLogDir { path: PathBuf },
	/// Turn auto-restart on or off for one server
	SetRestart {
		name: String,
		#[arg(action = clap::ArgAction::Set)]
		enabled: bool,
	},
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();
	let code = match cli.command {
		Command::Run { names } => console::run(&names).await,
		Command::Status { json } => cmd_status(json),
		Command::Config(cmd) => cmd_config(cmd),
	};
	std::process::exit(code);
}

#[derive(Debug, Serialize)]
struct ImageStatus<'a> {
	name: &'a str,
	executable: &'a str,
	running: bool,
}

fn cmd_status(json: bool) -> i32 {
	let config = config::load_global_config();
	let table = SystemProcessTable;
	let rows: Vec<ImageStatus> = config
		.servers
		.iter()
		.map(|row| ImageStatus {
			name: row.name,
			executable: row.executable,
			running: table.is_image_running(row.executable),
		})
		.collect();

	if json {
		match serde_json::to_string_pretty(&rows) {
			Ok(out) => println!("{}", out),
			Err(e) => {
				eprintln!("error: {}", e);
				return 1;
			}
		}
		return 0;
	}

	let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
	for row in &rows {
		let (circle, label) = if row.running {
			("●".green().to_string(), "on".green().to_string())
		} else {
			("●".red().to_string(), "off".red().to_string())
		};
		println!("{} {:<width$} {:<16} {}", circle, row.name, row.executable, label, width = width);
	}
	0
}

fn cmd_config(cmd: ConfigCommand) -> i32 {
	let path = config::config_path();
	let mut config = match config::try_load_from(&path) {
		Ok(c) => c,
		Err(e) => {
			eprintln!("error: {}", e);
			return 1;
		}
	};

	match cmd {
		ConfigCommand::Show => {
			eprintln!("{}", path.display().dimmed());
			return match config.to_toml() {
				Ok(out) => {
					print!("{}", out);
					0
				}
				Err(e) => {
					eprintln!("error: {}", e);
					1
				}
			};
		}
		ConfigCommand::SetServerDir { path } => config.server_dir = Some(absolute(path)),
		ConfigCommand::SetLogDir { path } => config.log_dir = Some(absolute(path)),
		ConfigCommand::SetRestart { name, enabled } => {
			let Some(name) = console::resolve_server(&config.servers, &name) else {
				eprintln!("unknown server: {}", name);
				eprintln!("known servers: {}", config.servers.names().collect::<Vec<_>>().join(", "));
				return 1;
			};
			config.restart.insert(name, enabled);
		}
	}

	match config.save_to(&path) {
		Ok(()) => {
			eprintln!("saved {}", path.display());
			0
		}
		Err(e) => {
			eprintln!("error: {}", e);
			1
		}
	}
}

fn absolute(path: PathBuf) -> PathBuf {
	std::path::absolute(&path).unwrap_or(path)
}
