// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the ACP host.

use std::fmt;

use agent_client_protocol as acp;
use serde_json::json;
use thiserror::Error;

/// Errors raised by the terminal proxy.
#[derive(Debug, Error)]
pub enum TerminalError {
	#[error("terminal not found: {0}")]
	NotFound(String),

	#[error("failed to spawn `{command}`: {source}")]
	Spawn {
		command: String,
		#[source]
		source: std::io::Error,
	},
}

/// Errors returned to the agent from inbound requests.
#[derive(Debug, Error)]
pub enum ClientError {
	#[error(transparent)]
	Terminal(#[from] TerminalError),

	#[error("unsupported client method: {0}")]
	Unsupported(String),
}

impl From<ClientError> for acp::Error {
	fn from(err: ClientError) -> Self {
		match err {
			ClientError::Terminal(TerminalError::NotFound(terminal_id)) => {
				acp::Error::invalid_params()
					.data(json!({ "reason": "terminal not found", "terminalId": terminal_id }))
			}
			ClientError::Terminal(err @ TerminalError::Spawn { .. }) => {
				acp::Error::internal_error().data(err.to_string())
			}
			ClientError::Unsupported(method) => acp::Error::method_not_found().data(method),
		}
	}
}

/// Coarse buckets for agent-side failures, each with a remediation hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
	Configuration,
	Connection,
	Authentication,
	Communication,
	RateLimit,
}

impl ErrorCategory {
	pub fn as_str(self) -> &'static str {
		match self {
			ErrorCategory::Configuration => "configuration",
			ErrorCategory::Connection => "connection",
			ErrorCategory::Authentication => "authentication",
			ErrorCategory::Communication => "communication",
			ErrorCategory::RateLimit => "rate_limit",
		}
	}

	pub fn suggestion(self) -> &'static str {
		match self {
			ErrorCategory::Configuration => {
				"Check the agent command, its arguments and the working directory."
			}
			ErrorCategory::Connection => "The agent process may have exited. Restart the session.",
			ErrorCategory::Authentication => {
				"Log in to the agent or provide the credentials it expects."
			}
			ErrorCategory::Communication => {
				"Retry the prompt. If it keeps failing, restart the agent."
			}
			ErrorCategory::RateLimit => "Wait a moment before sending another prompt.",
		}
	}

	/// Bucket a failure by the text the agent reported.
	pub fn classify(detail: &str) -> Self {
		let detail = detail.to_lowercase();
		let has = |needles: &[&str]| needles.iter().any(|needle| detail.contains(needle));

		if has(&["rate limit", "rate_limit", "429", "too many requests", "quota"]) {
			ErrorCategory::RateLimit
		} else if has(&["auth", "unauthorized", "api key", "credential", "login", "401", "403"]) {
			ErrorCategory::Authentication
		} else if has(&["connection", "broken pipe", "closed", "eof", "timed out", "timeout"]) {
			ErrorCategory::Connection
		} else if has(&["no such file", "not found", "enoent", "config", "invalid argument"]) {
			ErrorCategory::Configuration
		} else {
			ErrorCategory::Communication
		}
	}
}

impl fmt::Display for ErrorCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A categorized failure of an outbound call to the agent.
#[derive(Debug, Clone, Error)]
#[error("{category} error: {message}")]
pub struct AgentError {
	pub category: ErrorCategory,
	pub message: String,
	pub suggestion: &'static str,
}

impl AgentError {
	pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
		Self {
			category,
			message: message.into(),
			suggestion: category.suggestion(),
		}
	}

	pub fn from_protocol(operation: &str, error: &acp::Error) -> Self {
		let detail = describe_protocol_error(error);
		let category = ErrorCategory::classify(&detail);
		Self::new(category, format!("{operation} failed: {detail}"))
	}

	pub fn no_session() -> Self {
		Self::new(ErrorCategory::Configuration, "no active session")
	}
}

/// Message plus data payload, the only parts of an agent error surfaced to users.
pub fn describe_protocol_error(error: &acp::Error) -> String {
	match &error.data {
		Some(serde_json::Value::String(data)) => format!("{}: {data}", error.message),
		Some(data) => format!("{}: {data}", error.message),
		None => error.message.clone(),
	}
}
