// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parsing of interactive input lines.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
	Empty,
	Quit,
	Cancel,
	Approve { request_id: String, option_id: String },
	AutoAllow(bool),
	Pending,
	Help,
	Prompt(String),
	Invalid(String),
}

pub const HELP: &str = "\
commands:
  /approve <request> <option>  answer a permission request
  /cancel                      cancel the running turn
  /auto-allow on|off           answer permission requests automatically
  /pending                     list unanswered permission requests
  /quit                        end the session
anything else is sent to the agent as a prompt";

impl Input {
	pub fn parse(line: &str) -> Self {
		let trimmed = line.trim();
		if trimmed.is_empty() {
			return Input::Empty;
		}
		let Some(command) = trimmed.strip_prefix('/') else {
			return Input::Prompt(trimmed.to_string());
		};

		let mut words = command.split_whitespace();
		match (words.next(), words.next(), words.next(), words.next()) {
			(Some("quit" | "exit"), None, ..) => Input::Quit,
			(Some("cancel"), None, ..) => Input::Cancel,
			(Some("pending"), None, ..) => Input::Pending,
			(Some("help"), None, ..) => Input::Help,
			(Some("approve"), Some(request_id), Some(option_id), None) => Input::Approve {
				request_id: request_id.to_string(),
				option_id: option_id.to_string(),
			},
			(Some("approve"), ..) => Input::Invalid("usage: /approve <request> <option>".into()),
			(Some("auto-allow"), Some("on"), None, _) => Input::AutoAllow(true),
			(Some("auto-allow"), Some("off"), None, _) => Input::AutoAllow(false),
			(Some("auto-allow"), ..) => Input::Invalid("usage: /auto-allow on|off".into()),
			// Paths such as "/tmp is full" are prompts, not commands.
			_ => Input::Prompt(trimmed.to_string()),
		}
	}
}
