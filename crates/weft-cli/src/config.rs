// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Command-line arguments layered over an optional TOML file.
//!
//! Precedence: flags and `WEFT_*` environment variables, then the file, then
//! built-in defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use weft_acp_client::ClientOptions;

/// Weft - drive an ACP coding agent from the terminal
#[derive(Parser, Debug)]
#[command(name = "weft", version)]
pub struct Args {
	/// Agent command line, e.g. "claude-code-acp" (or set WEFT_AGENT)
	#[arg(long, env = "WEFT_AGENT")]
	pub agent: Option<String>,

	/// Extra argument passed to the agent (repeatable)
	#[arg(long = "agent-arg", allow_hyphen_values = true)]
	pub agent_args: Vec<String>,

	/// Config file (defaults to $XDG_CONFIG_HOME/weft/config.toml)
	#[arg(long, env = "WEFT_CONFIG")]
	pub config: Option<PathBuf>,

	/// Session working directory
	#[arg(long, env = "WEFT_WORKING_DIR")]
	pub working_dir: Option<PathBuf>,

	/// Answer permission requests automatically
	#[arg(long, env = "WEFT_AUTO_ALLOW")]
	pub auto_allow: bool,

	/// Bytes of output kept per terminal
	#[arg(long, env = "WEFT_TERMINAL_OUTPUT_LIMIT")]
	pub terminal_output_limit: Option<usize>,

	/// Terminal poll interval in milliseconds
	#[arg(long, env = "WEFT_POLL_INTERVAL_MS")]
	pub poll_interval_ms: Option<u64>,

	/// Emit logs as JSON
	#[arg(long, env = "WEFT_LOG_JSON")]
	pub log_json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("missing required setting: {0}")]
	MissingField(String),

	#[error("invalid value for {field}: {message}")]
	InvalidValue { field: String, message: String },
}

/// config.toml format
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
	pub agent: AgentSection,
	pub client: ClientSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AgentSection {
	pub command: Option<String>,
	pub args: Vec<String>,
	pub env: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClientSection {
	pub auto_allow_permissions: Option<bool>,
	pub working_dir: Option<PathBuf>,
	pub terminal_output_limit: Option<usize>,
	pub terminal_poll_interval_ms: Option<u64>,
}

impl FileConfig {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
	pub program: String,
	pub args: Vec<String>,
	pub env: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct WeftConfig {
	pub agent: AgentCommand,
	pub client: ClientOptions,
	pub log_json: bool,
}

pub fn default_config_path() -> Option<PathBuf> {
	std::env::var_os("XDG_CONFIG_HOME")
		.map(PathBuf::from)
		.or_else(dirs::config_dir)
		.map(|dir| dir.join("weft/config.toml"))
}

impl Args {
	/// An explicit `--config` must exist; the default location is optional.
	pub fn load_file(&self) -> Result<FileConfig, ConfigError> {
		match &self.config {
			Some(path) => FileConfig::load(path),
			None => match default_config_path() {
				Some(path) if path.exists() => {
					tracing::debug!(path = %path.display(), "loading config file");
					FileConfig::load(&path)
				}
				_ => Ok(FileConfig::default()),
			},
		}
	}

	pub fn resolve(&self, file: FileConfig) -> Result<WeftConfig, ConfigError> {
		let command_line = self
			.agent
			.clone()
			.or(file.agent.command)
			.ok_or_else(|| {
				ConfigError::MissingField("agent (--agent, WEFT_AGENT or agent.command)".into())
			})?;

		let mut words = command_line.split_whitespace().map(str::to_string);
		let program = words.next().ok_or_else(|| ConfigError::InvalidValue {
			field: "agent".into(),
			message: "command is empty".into(),
		})?;
		let mut args: Vec<String> = words.collect();
		if self.agent_args.is_empty() {
			args.extend(file.agent.args);
		} else {
			args.extend(self.agent_args.iter().cloned());
		}

		let defaults = ClientOptions::default();
		let working_dir = self
			.working_dir
			.clone()
			.or(file.client.working_dir)
			.unwrap_or(defaults.working_dir);
		if !working_dir.is_dir() {
			return Err(ConfigError::InvalidValue {
				field: "working_dir".into(),
				message: format!("{} is not a directory", working_dir.display()),
			});
		}

		let poll_interval_ms = self
			.poll_interval_ms
			.or(file.client.terminal_poll_interval_ms);
		if poll_interval_ms == Some(0) {
			return Err(ConfigError::InvalidValue {
				field: "terminal_poll_interval_ms".into(),
				message: "must be greater than zero".into(),
			});
		}

		let client = ClientOptions {
			auto_allow_permissions: self.auto_allow
				|| file.client.auto_allow_permissions.unwrap_or(false),
			working_dir,
			terminal_output_limit: self
				.terminal_output_limit
				.or(file.client.terminal_output_limit)
				.unwrap_or(defaults.terminal_output_limit),
			terminal_poll_interval: poll_interval_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.terminal_poll_interval),
		};

		Ok(WeftConfig {
			agent: AgentCommand {
				program,
				args,
				env: file.agent.env,
			},
			client,
			log_json: self.log_json,
		})
	}
}
