// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Conversions between ACP wire types and the host's transcript model.
//!
//! Everything here is pure. Unknown enum values from newer agents degrade to
//! `Other` or are skipped instead of failing the whole update.

use std::path::Path;

use agent_client_protocol as acp;

use crate::permission::PermissionOutcome;
use crate::terminal::{TerminalCommand, TerminalExitStatus, TerminalOutput};
use crate::transcript::{
	ChunkKind, PermissionOption, PermissionOptionKind, PlanEntry, PlanEntryPriority,
	PlanEntryStatus, ToolCallBlock, ToolCallContent, ToolCallPatch, ToolCallStatus, ToolKind,
};

/// A session update reduced to what the transcript understands.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
	Chunk { kind: ChunkKind, text: String },
	ToolCall(ToolCallBlock),
	ToolCallUpdate(ToolCallPatch),
	Plan(Vec<PlanEntry>),
	Ignored(&'static str),
}

pub fn session_update_to_event(update: acp::SessionUpdate) -> SessionEvent {
	match update {
		acp::SessionUpdate::AgentMessageChunk(chunk) => chunk_event(ChunkKind::Text, chunk),
		acp::SessionUpdate::AgentThoughtChunk(chunk) => chunk_event(ChunkKind::AgentThought, chunk),
		acp::SessionUpdate::ToolCall(call) => SessionEvent::ToolCall(tool_call_to_block(call)),
		acp::SessionUpdate::ToolCallUpdate(update) => {
			SessionEvent::ToolCallUpdate(tool_call_update_to_patch(update))
		}
		acp::SessionUpdate::Plan(plan) => {
			SessionEvent::Plan(plan.entries.into_iter().map(plan_entry_from_acp).collect())
		}
		acp::SessionUpdate::UserMessageChunk(_) => SessionEvent::Ignored("user_message_chunk"),
		_ => SessionEvent::Ignored("unsupported_update"),
	}
}

fn chunk_event(kind: ChunkKind, chunk: acp::ContentChunk) -> SessionEvent {
	match chunk.content {
		acp::ContentBlock::Text(text) => SessionEvent::Chunk {
			kind,
			text: text.text,
		},
		_ => SessionEvent::Ignored("non_text_chunk"),
	}
}

pub fn tool_call_to_block(call: acp::ToolCall) -> ToolCallBlock {
	ToolCallBlock {
		tool_call_id: call.tool_call_id.0.to_string(),
		title: Some(call.title),
		kind: Some(tool_kind_from_acp(call.kind)),
		status: Some(tool_status_from_acp(call.status)),
		content: call
			.content
			.into_iter()
			.filter_map(tool_content_from_acp)
			.collect(),
		permission_request: None,
	}
}

pub fn tool_call_update_to_patch(update: acp::ToolCallUpdate) -> ToolCallPatch {
	let fields = update.fields;
	ToolCallPatch {
		tool_call_id: update.tool_call_id.0.to_string(),
		title: fields.title,
		kind: fields.kind.map(tool_kind_from_acp),
		status: fields.status.map(tool_status_from_acp),
		content: fields
			.content
			.map(|content| content.into_iter().filter_map(tool_content_from_acp).collect()),
		permission_request: None,
	}
}

/// Only diffs and terminal references are tracked; plain content is dropped.
pub fn tool_content_from_acp(content: acp::ToolCallContent) -> Option<ToolCallContent> {
	match content {
		acp::ToolCallContent::Diff(diff) => Some(ToolCallContent::Diff {
			path: diff.path,
			old_text: diff.old_text,
			new_text: diff.new_text,
		}),
		acp::ToolCallContent::Terminal(terminal) => Some(ToolCallContent::Terminal {
			terminal_id: terminal.terminal_id.0.to_string(),
		}),
		_ => None,
	}
}

pub fn tool_kind_from_acp(kind: acp::ToolKind) -> ToolKind {
	match kind {
		acp::ToolKind::Read => ToolKind::Read,
		acp::ToolKind::Edit => ToolKind::Edit,
		acp::ToolKind::Delete => ToolKind::Delete,
		acp::ToolKind::Move => ToolKind::Move,
		acp::ToolKind::Search => ToolKind::Search,
		acp::ToolKind::Execute => ToolKind::Execute,
		acp::ToolKind::Think => ToolKind::Think,
		acp::ToolKind::Fetch => ToolKind::Fetch,
		acp::ToolKind::SwitchMode => ToolKind::SwitchMode,
		_ => ToolKind::Other,
	}
}

pub fn tool_status_from_acp(status: acp::ToolCallStatus) -> ToolCallStatus {
	match status {
		acp::ToolCallStatus::Pending => ToolCallStatus::Pending,
		acp::ToolCallStatus::InProgress => ToolCallStatus::InProgress,
		acp::ToolCallStatus::Completed => ToolCallStatus::Completed,
		acp::ToolCallStatus::Failed => ToolCallStatus::Failed,
		_ => ToolCallStatus::Pending,
	}
}

pub fn plan_entry_from_acp(entry: acp::PlanEntry) -> PlanEntry {
	PlanEntry {
		content: entry.content,
		status: match entry.status {
			acp::PlanEntryStatus::InProgress => PlanEntryStatus::InProgress,
			acp::PlanEntryStatus::Completed => PlanEntryStatus::Completed,
			_ => PlanEntryStatus::Pending,
		},
		priority: match entry.priority {
			acp::PlanEntryPriority::High => PlanEntryPriority::High,
			acp::PlanEntryPriority::Low => PlanEntryPriority::Low,
			_ => PlanEntryPriority::Medium,
		},
	}
}

pub fn permission_option_from_acp(option: acp::PermissionOption) -> PermissionOption {
	PermissionOption {
		option_id: option.option_id.0.to_string(),
		name: option.name,
		kind: match option.kind {
			acp::PermissionOptionKind::AllowOnce => PermissionOptionKind::AllowOnce,
			acp::PermissionOptionKind::AllowAlways => PermissionOptionKind::AllowAlways,
			acp::PermissionOptionKind::RejectOnce => PermissionOptionKind::RejectOnce,
			acp::PermissionOptionKind::RejectAlways => PermissionOptionKind::RejectAlways,
			_ => PermissionOptionKind::Other,
		},
	}
}

pub fn permission_outcome_to_acp(outcome: PermissionOutcome) -> acp::RequestPermissionResponse {
	let outcome = match outcome {
		PermissionOutcome::Selected(option_id) => acp::RequestPermissionOutcome::Selected(
			acp::SelectedPermissionOutcome::new(acp::PermissionOptionId::new(option_id)),
		),
		PermissionOutcome::Cancelled => acp::RequestPermissionOutcome::Cancelled,
	};
	acp::RequestPermissionResponse::new(outcome)
}

/// Falls back to `working_dir` when the agent gives no cwd.
pub fn terminal_command_from_acp(
	request: acp::CreateTerminalRequest,
	working_dir: &Path,
) -> TerminalCommand {
	TerminalCommand {
		command: request.command,
		args: request.args,
		env: request
			.env
			.into_iter()
			.map(|variable| (variable.name, variable.value))
			.collect(),
		cwd: request.cwd.unwrap_or_else(|| working_dir.to_path_buf()),
		output_byte_limit: request
			.output_byte_limit
			.and_then(|limit| usize::try_from(limit).ok()),
	}
}

pub fn exit_status_to_acp(status: &TerminalExitStatus) -> acp::TerminalExitStatus {
	let mut exit = acp::TerminalExitStatus::default();
	exit.exit_code = status.exit_code;
	exit.signal = status.signal.clone();
	exit
}

pub fn terminal_output_to_acp(output: TerminalOutput) -> acp::TerminalOutputResponse {
	let mut response = acp::TerminalOutputResponse::new(output.output, output.truncated);
	response.exit_status = output.exit_status.as_ref().map(exit_status_to_acp);
	response
}
