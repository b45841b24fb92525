// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Agent-requested command execution.
//!
//! Each terminal is a child process with piped stdout and stderr drained into
//! one bounded buffer. A supervisor task owns the child: it waits for a
//! natural exit or a kill request, lets the readers finish, then publishes the
//! exit status on a watch channel. Because publication happens after the
//! readers drain, the output is final once an exit status is observed. Output
//! still arriving after a short grace period (a backgrounded grandchild
//! holding the pipes) is dropped.
//!
//! Killing a terminal keeps its record queryable. Releasing it removes the
//! record, killing the process first if it is still running.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::TerminalError;

pub const DEFAULT_OUTPUT_BYTE_LIMIT: usize = 1024 * 1024;

const READ_CHUNK_SIZE: usize = 8192;
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a terminal's process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExitStatus {
	pub exit_code: Option<u32>,
	pub signal: Option<String>,
}

impl TerminalExitStatus {
	fn from_status(status: ExitStatus) -> Self {
		Self {
			exit_code: status.code().and_then(|code| u32::try_from(code).ok()),
			signal: exit_signal(&status),
		}
	}
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<String> {
	use std::os::unix::process::ExitStatusExt;

	status.signal().map(|signal| match signal {
		1 => "SIGHUP".to_string(),
		2 => "SIGINT".to_string(),
		6 => "SIGABRT".to_string(),
		9 => "SIGKILL".to_string(),
		13 => "SIGPIPE".to_string(),
		15 => "SIGTERM".to_string(),
		other => format!("SIG{other}"),
	})
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<String> {
	None
}

/// A snapshot of a terminal's captured output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalOutput {
	pub output: String,
	pub truncated: bool,
	pub exit_status: Option<TerminalExitStatus>,
}

/// What to run.
#[derive(Debug, Clone)]
pub struct TerminalCommand {
	pub command: String,
	pub args: Vec<String>,
	pub env: Vec<(String, String)>,
	pub cwd: PathBuf,
	pub output_byte_limit: Option<usize>,
}

impl TerminalCommand {
	pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
		Self {
			command: command.into(),
			args: Vec::new(),
			env: Vec::new(),
			cwd: cwd.into(),
			output_byte_limit: None,
		}
	}

	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args = args.into_iter().map(Into::into).collect();
		self
	}

	pub fn output_byte_limit(mut self, limit: usize) -> Self {
		self.output_byte_limit = Some(limit);
		self
	}
}

/// Keeps the newest `limit` bytes of combined output.
#[derive(Debug)]
struct OutputBuffer {
	bytes: Vec<u8>,
	limit: usize,
	truncated: bool,
}

impl OutputBuffer {
	fn new(limit: usize) -> Self {
		Self {
			bytes: Vec::new(),
			limit,
			truncated: false,
		}
	}

	fn push(&mut self, chunk: &[u8]) {
		self.bytes.extend_from_slice(chunk);
		if self.bytes.len() > self.limit {
			let excess = self.bytes.len() - self.limit;
			self.bytes.drain(..excess);
			self.truncated = true;
		}
	}

	/// Output as text, never starting or ending inside a UTF-8 sequence.
	fn text(&self) -> String {
		let start = if self.truncated {
			self.bytes
				.iter()
				.take_while(|byte| (**byte & 0b1100_0000) == 0b1000_0000)
				.count()
		} else {
			0
		};
		let bytes = &self.bytes[start..];

		match std::str::from_utf8(bytes) {
			Ok(text) => text.to_string(),
			// An incomplete trailing sequence is held back until the rest arrives.
			Err(err) if err.error_len().is_none() => {
				String::from_utf8_lossy(&bytes[..err.valid_up_to()]).into_owned()
			}
			Err(_) => String::from_utf8_lossy(bytes).into_owned(),
		}
	}
}

#[derive(Debug)]
struct TerminalRecord {
	command: String,
	output: Arc<Mutex<OutputBuffer>>,
	exit: watch::Receiver<Option<TerminalExitStatus>>,
	kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl TerminalRecord {
	async fn kill(&self) -> bool {
		match self.kill.lock().await.take() {
			Some(kill) => kill.send(()).is_ok(),
			None => false,
		}
	}

	fn exit_status(&self) -> Option<TerminalExitStatus> {
		self.exit.borrow().clone()
	}
}

/// Owns every terminal the agent created during the session.
#[derive(Debug)]
pub struct TerminalProxy {
	terminals: RwLock<HashMap<String, Arc<TerminalRecord>>>,
	default_output_limit: usize,
}

impl Default for TerminalProxy {
	fn default() -> Self {
		Self::new(DEFAULT_OUTPUT_BYTE_LIMIT)
	}
}

impl TerminalProxy {
	pub fn new(default_output_limit: usize) -> Self {
		Self {
			terminals: RwLock::new(HashMap::new()),
			default_output_limit,
		}
	}

	#[instrument(skip(self, request), fields(command = %request.command))]
	pub async fn create(&self, request: TerminalCommand) -> Result<String, TerminalError> {
		let mut command = Command::new(&request.command);
		command
			.args(&request.args)
			.envs(request.env.iter().map(|(name, value)| (name, value)))
			.current_dir(&request.cwd)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let mut child = command.spawn().map_err(|source| TerminalError::Spawn {
			command: request.command.clone(),
			source,
		})?;

		let terminal_id = format!("term-{}", Uuid::new_v4());
		let limit = request.output_byte_limit.unwrap_or(self.default_output_limit);
		let output = Arc::new(Mutex::new(OutputBuffer::new(limit)));

		let mut readers = Vec::with_capacity(2);
		if let Some(stdout) = child.stdout.take() {
			readers.push(spawn_reader(stdout, Arc::clone(&output)));
		}
		if let Some(stderr) = child.stderr.take() {
			readers.push(spawn_reader(stderr, Arc::clone(&output)));
		}

		let (exit_tx, exit_rx) = watch::channel(None);
		let (kill_tx, kill_rx) = oneshot::channel();
		tokio::spawn(supervise(terminal_id.clone(), child, readers, kill_rx, exit_tx));

		let record = Arc::new(TerminalRecord {
			command: request.command,
			output,
			exit: exit_rx,
			kill: Mutex::new(Some(kill_tx)),
		});
		self.terminals
			.write()
			.await
			.insert(terminal_id.clone(), record);

		info!(terminal_id = %terminal_id, output_limit = limit, "terminal created");
		Ok(terminal_id)
	}

	async fn record(&self, terminal_id: &str) -> Result<Arc<TerminalRecord>, TerminalError> {
		self.terminals
			.read()
			.await
			.get(terminal_id)
			.cloned()
			.ok_or_else(|| TerminalError::NotFound(terminal_id.to_string()))
	}

	pub async fn output(&self, terminal_id: &str) -> Result<TerminalOutput, TerminalError> {
		let record = self.record(terminal_id).await?;
		// Read the exit status first: once it is set the buffer is final.
		let exit_status = record.exit_status();
		let buffer = record.output.lock().await;
		Ok(TerminalOutput {
			output: buffer.text(),
			truncated: buffer.truncated,
			exit_status,
		})
	}

	pub async fn wait_for_exit(
		&self,
		terminal_id: &str,
	) -> Result<TerminalExitStatus, TerminalError> {
		let mut exit = self.record(terminal_id).await?.exit.clone();
		let status = match exit.wait_for(Option::is_some).await {
			Ok(status) => status.clone(),
			// The supervisor is gone without reporting; nothing more will arrive.
			Err(_) => None,
		};
		Ok(status.unwrap_or_default())
	}

	/// Stops the process. The record stays until it is released.
	#[instrument(skip(self))]
	pub async fn kill(&self, terminal_id: &str) -> Result<(), TerminalError> {
		let record = self.record(terminal_id).await?;
		if record.kill().await {
			info!(command = %record.command, "terminal kill requested");
		} else {
			debug!("terminal already stopped");
		}
		Ok(())
	}

	/// Destroys the record. Unknown ids are ignored.
	#[instrument(skip(self))]
	pub async fn release(&self, terminal_id: &str) {
		let record = self.terminals.write().await.remove(terminal_id);
		match record {
			Some(record) => {
				record.kill().await;
				info!("terminal released");
			}
			None => debug!("release of unknown terminal"),
		}
	}

	pub async fn kill_all(&self) {
		let records: Vec<_> = self.terminals.read().await.values().cloned().collect();
		let mut killed = 0usize;
		for record in records {
			if record.kill().await {
				killed += 1;
			}
		}
		if killed > 0 {
			info!(killed, "killed running terminals");
		}
	}

	pub async fn contains(&self, terminal_id: &str) -> bool {
		self.terminals.read().await.contains_key(terminal_id)
	}

	pub async fn len(&self) -> usize {
		self.terminals.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.terminals.read().await.is_empty()
	}
}

fn spawn_reader<R>(mut reader: R, output: Arc<Mutex<OutputBuffer>>) -> JoinHandle<()>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	tokio::spawn(async move {
		let mut chunk = [0u8; READ_CHUNK_SIZE];
		loop {
			match reader.read(&mut chunk).await {
				Ok(0) => break,
				Ok(n) => output.lock().await.push(&chunk[..n]),
				Err(err) => {
					debug!(error = %err, "terminal output stream closed");
					break;
				}
			}
		}
	})
}

async fn supervise(
	terminal_id: String,
	mut child: Child,
	readers: Vec<JoinHandle<()>>,
	kill: oneshot::Receiver<()>,
	exit: watch::Sender<Option<TerminalExitStatus>>,
) {
	// A dropped kill sender means the record was released.
	let natural = tokio::select! {
		status = child.wait() => Some(status),
		_ = kill => None,
	};

	let status = match natural {
		Some(status) => status,
		None => {
			if let Err(err) = child.start_kill() {
				debug!(terminal_id = %terminal_id, error = %err, "kill after exit");
			}
			child.wait().await
		}
	};

	let status = match status {
		Ok(status) => TerminalExitStatus::from_status(status),
		Err(err) => {
			warn!(terminal_id = %terminal_id, error = %err, "failed to wait on terminal process");
			TerminalExitStatus::default()
		}
	};

	// Background children can hold the pipes open; they get one grace period in total.
	let deadline = Instant::now() + READER_DRAIN_TIMEOUT;
	for mut reader in readers {
		if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
			reader.abort();
			debug!(
				terminal_id = %terminal_id,
				"terminal output still open after exit, discarding the rest"
			);
		}
	}

	info!(
		terminal_id = %terminal_id,
		exit_code = ?status.exit_code,
		signal = ?status.signal,
		"terminal exited"
	);
	exit.send_replace(Some(status));
}

/// One observation of a terminal by [`poll_terminal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalPoll {
	Running(TerminalOutput),
	Exited(TerminalOutput),
	NotFound,
}

impl TerminalPoll {
	pub fn is_final(&self) -> bool {
		!matches!(self, TerminalPoll::Running(_))
	}
}

/// Poll a terminal at `interval` until it exits or disappears.
///
/// `on_poll` sees every observation, the final one included, which is also
/// returned.
pub async fn poll_terminal<F>(
	proxy: &TerminalProxy,
	terminal_id: &str,
	interval: Duration,
	mut on_poll: F,
) -> TerminalPoll
where
	F: FnMut(&TerminalPoll),
{
	let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
	loop {
		ticker.tick().await;
		let poll = match proxy.output(terminal_id).await {
			Ok(output) if output.exit_status.is_some() => TerminalPoll::Exited(output),
			Ok(output) => TerminalPoll::Running(output),
			Err(_) => TerminalPoll::NotFound,
		};
		on_poll(&poll);
		if poll.is_final() {
			return poll;
		}
	}
}
