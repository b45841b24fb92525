// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Line-oriented rendering of transcript changes.
//!
//! Updates re-deliver whole messages, so [`RenderState`] remembers what was
//! already printed per message and only emits what is new.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Mutex;

use tokio::sync::mpsc;
use weft_acp_client::transcript::{
	ContentBlock, Message, PermissionRequest, PlanEntry, PlanEntryStatus, Role, ToolCallBlock,
	ToolCallStatus, TranscriptChange,
};
use weft_acp_client::TranscriptObserver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
	/// Streamed text, printed without a trailing newline.
	Text(String),
	Line(String),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Rendered {
	pub fragments: Vec<Fragment>,
	pub new_terminals: Vec<String>,
}

#[derive(Debug, Default)]
struct MessageState {
	text_len: usize,
	thought_len: usize,
	tool_status: HashMap<String, Option<ToolCallStatus>>,
	permissions_shown: HashSet<String>,
	permissions_resolved: HashSet<String>,
	plan: Option<Vec<PlanEntry>>,
	terminals: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct RenderState {
	messages: HashMap<usize, MessageState>,
}

impl RenderState {
	pub fn render(&mut self, change: &TranscriptChange) -> Rendered {
		let mut out = Rendered::default();
		match change {
			TranscriptChange::MessageAdded { index, message }
			| TranscriptChange::MessageUpdated { index, message } => {
				let state = self.messages.entry(*index).or_default();
				render_message(state, message, &mut out);
			}
			TranscriptChange::Cleared => {
				self.messages.clear();
				out.fragments.push(Fragment::Line("[transcript cleared]".into()));
			}
		}
		out
	}
}

fn render_message(state: &mut MessageState, message: &Message, out: &mut Rendered) {
	// The user typed it; echoing it back adds nothing.
	if message.role == Role::User {
		return;
	}

	for block in &message.content {
		match block {
			ContentBlock::Text { text } => {
				if let Some(delta) = text.get(state.text_len..).filter(|d| !d.is_empty()) {
					out.fragments.push(Fragment::Text(delta.to_string()));
					state.text_len = text.len();
				}
			}
			ContentBlock::AgentThought { text } => {
				if let Some(delta) = text.get(state.thought_len..).filter(|d| !d.is_empty()) {
					for line in delta.lines().filter(|line| !line.is_empty()) {
						out.fragments.push(Fragment::Line(format!("  (thinking) {line}")));
					}
					state.thought_len = text.len();
				}
			}
			ContentBlock::ToolCall(call) => render_tool_call(state, call, out),
			ContentBlock::Plan { entries } => {
				if state.plan.as_ref() != Some(entries) {
					out.fragments.push(Fragment::Line("[plan]".into()));
					for entry in entries {
						let mark = match entry.status {
							PlanEntryStatus::Completed => "x",
							PlanEntryStatus::InProgress => "~",
							PlanEntryStatus::Pending => " ",
						};
						out.fragments
							.push(Fragment::Line(format!("  [{mark}] {}", entry.content)));
					}
					state.plan = Some(entries.clone());
				}
			}
			ContentBlock::PermissionRequest(request) => {
				render_permission(state, "agent action", request, out);
			}
			ContentBlock::Terminal { terminal_id } => render_terminal(state, terminal_id, out),
		}
	}
}

fn render_tool_call(state: &mut MessageState, call: &ToolCallBlock, out: &mut Rendered) {
	let title = call.title.as_deref().unwrap_or("tool call");
	let previous = state.tool_status.insert(call.tool_call_id.clone(), call.status);
	if previous != Some(call.status) {
		let status = match call.status {
			Some(ToolCallStatus::Pending) | None => "pending",
			Some(ToolCallStatus::InProgress) => "running",
			Some(ToolCallStatus::Completed) => "done",
			Some(ToolCallStatus::Failed) => "failed",
		};
		out.fragments
			.push(Fragment::Line(format!("[tool] {title}: {status}")));
	}

	for terminal_id in call.terminal_ids() {
		render_terminal(state, terminal_id, out);
	}
	if let Some(request) = &call.permission_request {
		render_permission(state, title, request, out);
	}
}

fn render_terminal(state: &mut MessageState, terminal_id: &str, out: &mut Rendered) {
	if state.terminals.insert(terminal_id.to_string()) {
		out.fragments
			.push(Fragment::Line(format!("[terminal {terminal_id}] started")));
		out.new_terminals.push(terminal_id.to_string());
	}
}

fn render_permission(
	state: &mut MessageState,
	title: &str,
	request: &PermissionRequest,
	out: &mut Rendered,
) {
	let id = &request.request_id;
	if state.permissions_shown.insert(id.clone()) && !request.is_resolved() {
		out.fragments
			.push(Fragment::Line(format!("[permission {id}] {title}")));
		for option in &request.options {
			out.fragments.push(Fragment::Line(format!(
				"  {}: {}",
				option.option_id, option.name
			)));
		}
		out.fragments.push(Fragment::Line(format!(
			"  answer with /approve {id} <option>"
		)));
	}

	if request.is_resolved() && state.permissions_resolved.insert(id.clone()) {
		let line = match &request.selected_option_id {
			Some(option_id) => format!("[permission {id}] selected {option_id}"),
			None => format!("[permission {id}] cancelled"),
		};
		out.fragments.push(Fragment::Line(line));
	}
}

/// Prints transcript changes to stdout and reports terminals to poll.
pub struct LineRenderer {
	state: Mutex<RenderState>,
	at_line_start: Mutex<bool>,
	terminals: mpsc::UnboundedSender<String>,
}

impl LineRenderer {
	pub fn new(terminals: mpsc::UnboundedSender<String>) -> Self {
		Self {
			state: Mutex::new(RenderState::default()),
			at_line_start: Mutex::new(true),
			terminals,
		}
	}

	pub fn line(&self, text: impl AsRef<str>) {
		self.write(&[Fragment::Line(text.as_ref().to_string())]);
	}

	fn write(&self, fragments: &[Fragment]) {
		let Ok(mut at_line_start) = self.at_line_start.lock() else {
			return;
		};
		let mut stdout = std::io::stdout().lock();
		for fragment in fragments {
			let _ = match fragment {
				Fragment::Text(text) => {
					*at_line_start = text.ends_with('\n');
					write!(stdout, "{text}")
				}
				Fragment::Line(line) => {
					let separator = if *at_line_start { "" } else { "\n" };
					*at_line_start = true;
					writeln!(stdout, "{separator}{line}")
				}
			};
		}
		let _ = stdout.flush();
	}
}

impl TranscriptObserver for LineRenderer {
	fn on_change(&self, change: &TranscriptChange) {
		let rendered = match self.state.lock() {
			Ok(mut state) => state.render(change),
			Err(_) => return,
		};
		self.write(&rendered.fragments);
		for terminal_id in rendered.new_terminals {
			if self.terminals.send(terminal_id).is_err() {
				tracing::debug!("terminal poller is gone");
			}
		}
	}
}
