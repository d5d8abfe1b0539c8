use owo_colors::OwoColorize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use warden::{OutputEvent, ServerState, SharedRestartFlags, StreamKind, Supervisor, SupervisorConfig};
use warden_core::config::{self, GlobalConfig};
use warden_core::ServerTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
	Start(String),
	Stop(String),
	RestartOn(String),
	RestartOff(String),
	Status,
	Help,
	Quit,
}

/// Parses one stdin line. Server names may contain spaces and are matched
/// with [`resolve_server`].
pub fn parse_command(line: &str, servers: &ServerTable) -> Result<Option<ConsoleCommand>, String> {
	let line = line.trim();
	if line.is_empty() {
		return Ok(None);
	}
	let (verb, rest) = match line.split_once(char::is_whitespace) {
		Some((verb, rest)) => (verb, rest.trim()),
		None => (line, ""),
	};

	let server = || -> Result<String, String> {
		if rest.is_empty() {
			return Err(format!("usage: {} <server>", verb));
		}
		resolve_server(servers, rest).ok_or_else(|| format!("unknown server: {}", rest))
	};

	let cmd = match verb {
		"start" => ConsoleCommand::Start(server()?),
		"stop" => ConsoleCommand::Stop(server()?),
		"restart-on" => ConsoleCommand::RestartOn(server()?),
		"restart-off" => ConsoleCommand::RestartOff(server()?),
		"status" | "st" => ConsoleCommand::Status,
		"help" | "?" => ConsoleCommand::Help,
		"quit" | "exit" | "q" => ConsoleCommand::Quit,
		other => return Err(format!("unknown command: {} (try 'help')", other)),
	};
	Ok(Some(cmd))
}

/// Exact name, then case-insensitive name, then the name's first word
/// (`world` for `World Server`).
pub fn resolve_server(servers: &ServerTable, input: &str) -> Option<String> {
	let input = input.trim();
	if servers.contains(input) {
		return Some(input.to_string());
	}
	servers
		.names()
		.find(|name| {
			name.eq_ignore_ascii_case(input)
				|| name
					.split_whitespace()
					.next()
					.is_some_and(|first| first.eq_ignore_ascii_case(input))
		})
		.map(str::to_string)
}

pub async fn run(names: &[String]) -> i32 {
	let global = config::load_global_config();

	let targets: Vec<String> = if names.is_empty() {
		global.servers.names().map(str::to_string).collect()
	} else {
		let mut targets = Vec::with_capacity(names.len());
		for name in names {
			match resolve_server(&global.servers, name) {
				Some(resolved) => targets.push(resolved),
				None => {
					eprintln!("unknown server: {}", name);
					eprintln!("known servers: {}", global.servers.names().collect::<Vec<_>>().join(", "));
					return 1;
				}
			}
		}
		targets
	};

	let flags = SharedRestartFlags::new(global.restart.clone());
	let (supervisor, mut events) = Supervisor::new(SupervisorConfig::from_global(&global), Arc::new(flags.clone()));
	if supervisor.server_directory().is_none() {
		eprintln!("no server directory configured; run 'warden config set-server-dir <path>'");
	}

	for name in &targets {
		// Failures arrive on the event channel as notices.
		let _ = supervisor.start(name).await;
	}

	let mut console = Console {
		supervisor: Arc::clone(&supervisor),
		flags,
		global,
	};

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	let mut stdin_open = true;
	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);

	loop {
		tokio::select! {
			Some(event) = events.recv() => print_event(&event),
			line = lines.next_line(), if stdin_open => match line {
				Ok(Some(line)) => {
					if !console.handle_line(&line).await {
						break;
					}
				}
				Ok(None) => stdin_open = false,
				Err(e) => {
					tracing::warn!("stdin closed: {}", e);
					stdin_open = false;
				}
			},
			_ = &mut ctrl_c => {
				tracing::info!("shutting down");
				break;
			}
		}
	}

	supervisor.stop_all().await;
	while let Ok(event) = events.try_recv() {
		print_event(&event);
	}
	0
}

struct Console {
	supervisor: Arc<Supervisor>,
	flags: SharedRestartFlags,
	global: GlobalConfig,
}

impl Console {
	/// Returns false once the user asked to quit.
	async fn handle_line(&mut self, line: &str) -> bool {
		let cmd = match parse_command(line, self.supervisor.servers()) {
			Ok(Some(cmd)) => cmd,
			Ok(None) => return true,
			Err(e) => {
				eprintln!("{}", e);
				return true;
			}
		};

		match cmd {
			ConsoleCommand::Start(name) => {
				let supervisor = Arc::clone(&self.supervisor);
				tokio::spawn(async move {
					let _ = supervisor.start(&name).await;
				});
			}
			ConsoleCommand::Stop(name) => {
				let supervisor = Arc::clone(&self.supervisor);
				tokio::spawn(async move {
					let _ = supervisor.stop(&name).await;
				});
			}
			ConsoleCommand::RestartOn(name) => self.set_restart(&name, true),
			ConsoleCommand::RestartOff(name) => self.set_restart(&name, false),
			ConsoleCommand::Status => self.print_status().await,
			ConsoleCommand::Help => print_help(),
			ConsoleCommand::Quit => return false,
		}
		true
	}

	fn set_restart(&mut self, name: &str, enabled: bool) {
		self.flags.set(name, enabled);
		self.global.restart.insert(name.to_string(), enabled);
		let state = if enabled { "on" } else { "off" };
		eprintln!("auto-restart {} for {}", state, name);
		if let Err(e) = self.global.save() {
			tracing::warn!("could not persist restart flag: {}", e);
		}
	}

	async fn print_status(&self) {
		let rows = self.supervisor.status().await;
		let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
		for row in &rows {
			let restart = if self.flags.get(&row.name) { "restart" } else { "" };
			match &row.state {
				ServerState::Running { pid, started_at } => {
					eprintln!(
						"{} {:<width$} {:<8} since {} {}",
						"●".green(),
						row.name,
						pid,
						started_at.format("%H:%M:%S"),
						restart.dimmed(),
						width = width
					);
				}
				ServerState::Idle => {
					eprintln!("{} {:<width$} {:<8} {}", "●".red(), row.name, "-", restart.dimmed(), width = width);
				}
			}
		}
	}
}

fn print_event(event: &OutputEvent) {
	let tag = format!("[{}]", event.server);
	match event.stream {
		Some(StreamKind::Stdout) => println!("{} {}", tag.bold(), event.line),
		Some(StreamKind::Stderr) => println!("{} {}", tag.bold(), event.line.red()),
		None => println!("{} {}", tag.bold(), event.line.cyan()),
	}
}

fn print_help() {
	eprintln!("{}", "commands".cyan().bold());
	eprintln!("  {} <server>        Start a server", "start".bold());
	eprintln!("  {} <server>         Stop a server", "stop".bold());
	eprintln!("  {} <server>   Restart it when it crashes", "restart-on".bold());
	eprintln!("  {} <server>  Leave it down when it crashes", "restart-off".bold());
	eprintln!("  {}                 Show running servers", "status".bold());
	eprintln!("  {}                   Stop everything and exit", "quit".bold());
	eprintln!();
	eprintln!("  servers may be named by their first word, e.g. {}", "stop map".bold());
}
