// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod config;
mod render;
mod repl;

use std::process::Stdio;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use agent_client_protocol as acp;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use weft_acp_client::{
	poll_terminal, AgentError, AgentSession, ProtocolClient, PromptOutcome, TerminalPoll,
	TerminalProxy, TranscriptObserver,
};

use config::{Args, WeftConfig};
use render::LineRenderer;
use repl::Input;

/// Lines of terminal output echoed when a command finishes.
const TERMINAL_TAIL_LINES: usize = 20;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
	let args = Args::parse();
	init_logging(args.log_json);

	let file = args.load_file()?;
	let config = args.resolve(file)?;

	// The ACP connection is !Send, so everything runs on one LocalSet.
	let local = tokio::task::LocalSet::new();
	local.run_until(run(config)).await
}

fn init_logging(json: bool) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let builder = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr);
	if json {
		builder.json().init();
	} else {
		builder.init();
	}
}

fn with_suggestion(err: AgentError) -> anyhow::Error {
	anyhow!("{err}\n{}", err.suggestion)
}

async fn run(config: WeftConfig) -> Result<()> {
	let mut child = tokio::process::Command::new(&config.agent.program)
		.args(&config.agent.args)
		.envs(&config.agent.env)
		.current_dir(&config.client.working_dir)
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::inherit())
		.kill_on_drop(true)
		.spawn()
		.with_context(|| format!("failed to start agent `{}`", config.agent.program))?;
	info!(program = %config.agent.program, pid = ?child.id(), "agent started");

	let stdin = child.stdin.take().context("agent stdin is not piped")?;
	let stdout = child.stdout.take().context("agent stdout is not piped")?;

	let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();
	let renderer = Arc::new(LineRenderer::new(terminal_tx));
	let observer: Arc<dyn TranscriptObserver> = renderer.clone();
	let client = ProtocolClient::new(config.client.clone(), Some(observer));

	let (connection, io_task) = acp::ClientSideConnection::new(
		client.clone(),
		stdin.compat_write(),
		stdout.compat(),
		|fut| {
			tokio::task::spawn_local(fut);
		},
	);
	tokio::task::spawn_local(async move {
		if let Err(err) = io_task.await {
			warn!(error = ?err, "agent connection closed");
		}
	});

	let session = Rc::new(AgentSession::new(connection, client.clone()));
	session.initialize().await.map_err(with_suggestion)?;
	let session_id = session
		.new_session(client.working_dir().to_path_buf())
		.await
		.map_err(with_suggestion)?;
	info!(session_id = %session_id.0, "session ready");

	tokio::task::spawn_local(watch_terminals(
		client.terminals(),
		terminal_rx,
		renderer.clone(),
		config.client.terminal_poll_interval,
	));

	renderer.line("connected; type /help for commands");
	let result = repl(&session, &client, &renderer).await;

	session.shutdown().await;
	if let Err(err) = child.kill().await {
		debug!(error = %err, "agent already exited");
	}
	result
}

async fn repl(
	session: &Rc<AgentSession<acp::ClientSideConnection>>,
	client: &ProtocolClient,
	renderer: &Arc<LineRenderer>,
) -> Result<()> {
	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	let mut turn: Option<JoinHandle<()>> = None;

	loop {
		let running = turn.as_ref().is_some_and(|turn| !turn.is_finished());
		let line = tokio::select! {
			line = lines.next_line() => line.context("failed to read stdin")?,
			_ = tokio::signal::ctrl_c() => {
				if running {
					session.cancel().await;
					continue;
				}
				None
			}
		};
		let Some(line) = line else {
			break;
		};

		match Input::parse(&line) {
			Input::Empty => {}
			Input::Quit => break,
			Input::Help => renderer.line(repl::HELP),
			Input::Invalid(usage) => renderer.line(usage),
			Input::Cancel => {
				if running {
					session.cancel().await;
				} else {
					renderer.line("nothing to cancel");
				}
			}
			Input::Pending => {
				let pending = client.pending_permissions().await;
				if pending.is_empty() {
					renderer.line("no pending permission requests");
				}
				for request in pending {
					let options = request
						.options
						.iter()
						.map(|option| option.option_id.as_str())
						.collect::<Vec<_>>()
						.join(", ");
					renderer.line(format!("[permission {}] {options}", request.request_id));
				}
			}
			Input::Approve {
				request_id,
				option_id,
			} => {
				if !client
					.handle_permission_response(&request_id, &option_id)
					.await
				{
					renderer.line(format!("no pending permission request {request_id}"));
				}
			}
			Input::AutoAllow(enabled) => {
				client.permissions().set_auto_allow(enabled);
				let state = if enabled { "on" } else { "off" };
				renderer.line(format!("auto-allow {state}"));
			}
			Input::Prompt(text) => {
				if running {
					renderer.line("a turn is already running; /cancel it first");
					continue;
				}
				let session = Rc::clone(session);
				let renderer = Arc::clone(renderer);
				turn = Some(tokio::task::spawn_local(async move {
					match session.send_prompt(&text).await {
						Ok(PromptOutcome::Completed(reason)) => {
							renderer.line(format!("[turn ended: {reason:?}]"));
						}
						Ok(PromptOutcome::EmptyResponse) => {
							renderer.line("[turn ended without a response]");
						}
						Err(err) => {
							renderer.line(format!("[{err}]"));
							renderer.line(format!("  {}", err.suggestion));
						}
					}
				}));
			}
		}
	}

	if let Some(turn) = turn.filter(|turn| !turn.is_finished()) {
		session.cancel().await;
		turn.abort();
	}
	Ok(())
}

async fn watch_terminals(
	proxy: Arc<TerminalProxy>,
	mut terminal_ids: mpsc::UnboundedReceiver<String>,
	renderer: Arc<LineRenderer>,
	interval: Duration,
) {
	while let Some(terminal_id) = terminal_ids.recv().await {
		let proxy = Arc::clone(&proxy);
		let renderer = Arc::clone(&renderer);
		tokio::task::spawn_local(async move {
			match poll_terminal(&proxy, &terminal_id, interval, |_| {}).await {
				TerminalPoll::Exited(output) => {
					let lines: Vec<&str> = output.output.lines().collect();
					let tail = &lines[lines.len().saturating_sub(TERMINAL_TAIL_LINES)..];
					if output.truncated || tail.len() < lines.len() {
						renderer.line(format!("[terminal {terminal_id}] ..."));
					}
					for line in tail {
						renderer.line(format!("[terminal {terminal_id}] {line}"));
					}
					let status = output.exit_status.unwrap_or_default();
					let summary = match (status.exit_code, status.signal) {
						(Some(code), _) => format!("exited with code {code}"),
						(None, Some(signal)) => format!("killed by {signal}"),
						(None, None) => "exited".to_string(),
					};
					renderer.line(format!("[terminal {terminal_id}] {summary}"));
				}
				TerminalPoll::NotFound => {
					debug!(terminal_id = %terminal_id, "terminal released before exit");
				}
				TerminalPoll::Running(_) => {}
			}
		});
	}
}
