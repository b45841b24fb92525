// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Transcript data model and the merge rules applied to it.
//!
//! [`Transcript::apply`] is the only way to mutate a transcript. Every call
//! returns the [`TranscriptChange`]s it produced so the owner can forward them
//! to the presentation layer. The tool-call merge itself is the pure function
//! [`merge_tool_call`].

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	User,
	Assistant,
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	pub id: String,
	pub role: Role,
	pub content: Vec<ContentBlock>,
	pub timestamp: DateTime<Utc>,
}

impl Message {
	pub fn new(role: Role) -> Self {
		Self {
			id: Uuid::new_v4().to_string(),
			role,
			content: Vec::new(),
			timestamp: Utc::now(),
		}
	}

	/// The first block of the given chunk kind, concatenated text included.
	pub fn text_of(&self, kind: ChunkKind) -> Option<&str> {
		self.content.iter().find_map(|block| match (kind, block) {
			(ChunkKind::Text, ContentBlock::Text { text })
			| (ChunkKind::AgentThought, ContentBlock::AgentThought { text }) => Some(text.as_str()),
			_ => None,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
	Text {
		text: String,
	},
	AgentThought {
		text: String,
	},
	ToolCall(ToolCallBlock),
	Plan {
		entries: Vec<PlanEntry>,
	},
	PermissionRequest(PermissionRequest),
	#[serde(rename_all = "camelCase")]
	Terminal {
		terminal_id: String,
	},
}

impl ContentBlock {
	fn permission_request_mut(&mut self) -> Option<&mut PermissionRequest> {
		match self {
			ContentBlock::PermissionRequest(request) => Some(request),
			ContentBlock::ToolCall(call) => call.permission_request.as_mut(),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
	Read,
	Edit,
	Delete,
	Move,
	Search,
	Execute,
	Think,
	Fetch,
	SwitchMode,
	Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
	Pending,
	InProgress,
	Completed,
	Failed,
}

/// Sub-content attached to a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallContent {
	#[serde(rename_all = "camelCase")]
	Diff {
		path: PathBuf,
		old_text: Option<String>,
		new_text: String,
	},
	#[serde(rename_all = "camelCase")]
	Terminal { terminal_id: String },
}

impl ToolCallContent {
	pub fn is_diff(&self) -> bool {
		matches!(self, ToolCallContent::Diff { .. })
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBlock {
	pub tool_call_id: String,
	pub title: Option<String>,
	pub kind: Option<ToolKind>,
	pub status: Option<ToolCallStatus>,
	pub content: Vec<ToolCallContent>,
	pub permission_request: Option<PermissionRequest>,
}

impl ToolCallBlock {
	pub fn new(tool_call_id: impl Into<String>) -> Self {
		Self {
			tool_call_id: tool_call_id.into(),
			..Default::default()
		}
	}

	/// Terminal ids referenced from this call's sub-content.
	pub fn terminal_ids(&self) -> impl Iterator<Item = &str> {
		self.content.iter().filter_map(|content| match content {
			ToolCallContent::Terminal { terminal_id } => Some(terminal_id.as_str()),
			ToolCallContent::Diff { .. } => None,
		})
	}
}

/// An incremental update to a tool call. `None` means "keep what is there".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallPatch {
	pub tool_call_id: String,
	pub title: Option<String>,
	pub kind: Option<ToolKind>,
	pub status: Option<ToolCallStatus>,
	pub content: Option<Vec<ToolCallContent>>,
	pub permission_request: Option<PermissionRequest>,
}

impl ToolCallPatch {
	pub fn new(tool_call_id: impl Into<String>) -> Self {
		Self {
			tool_call_id: tool_call_id.into(),
			..Default::default()
		}
	}

	/// Materialize a patch that has no prior block to merge into.
	pub fn into_block(self) -> ToolCallBlock {
		ToolCallBlock {
			tool_call_id: self.tool_call_id,
			title: self.title,
			kind: self.kind,
			status: self.status,
			content: self.content.unwrap_or_default(),
			permission_request: self.permission_request,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntryStatus {
	Pending,
	InProgress,
	Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanEntryPriority {
	High,
	Medium,
	Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
	pub content: String,
	pub status: PlanEntryStatus,
	pub priority: PlanEntryPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
	AllowOnce,
	AllowAlways,
	RejectOnce,
	RejectAlways,
	#[serde(other)]
	Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
	pub option_id: String,
	pub name: String,
	pub kind: PermissionOptionKind,
}

impl PermissionOption {
	pub fn new(
		option_id: impl Into<String>,
		name: impl Into<String>,
		kind: PermissionOptionKind,
	) -> Self {
		Self {
			option_id: option_id.into(),
			name: name.into(),
			kind,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
	pub request_id: String,
	pub options: Vec<PermissionOption>,
	pub selected_option_id: Option<String>,
	#[serde(default)]
	pub is_cancelled: bool,
}

impl PermissionRequest {
	pub fn new(request_id: impl Into<String>, options: Vec<PermissionOption>) -> Self {
		Self {
			request_id: request_id.into(),
			options,
			selected_option_id: None,
			is_cancelled: false,
		}
	}

	/// Selected and cancelled requests are final.
	pub fn is_resolved(&self) -> bool {
		self.selected_option_id.is_some() || self.is_cancelled
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
	Text,
	AgentThought,
}

/// Everything that can happen to a transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
	UserMessage(String),
	Chunk {
		kind: ChunkKind,
		text: String,
	},
	ToolCall(ToolCallBlock),
	ToolCallUpdate(ToolCallPatch),
	Plan(Vec<PlanEntry>),
	PermissionRequested {
		tool_call: ToolCallPatch,
		request: PermissionRequest,
	},
	PermissionSelected {
		request_id: String,
		option_id: String,
	},
	PermissionCancelled {
		request_id: String,
	},
	PermissionsCancelled,
	ResetTurn,
	Clear,
}

/// A change the presentation layer needs to reflect.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptChange {
	MessageAdded { index: usize, message: Message },
	MessageUpdated { index: usize, message: Message },
	Cleared,
}

/// Result of applying one event.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ApplyOutcome {
	pub changes: Vec<TranscriptChange>,
	/// An unresolved permission request displaced from its tool call.
	pub superseded_request: Option<String>,
}

impl ApplyOutcome {
	fn single(change: TranscriptChange) -> Self {
		Self {
			changes: vec![change],
			superseded_request: None,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.changes.is_empty()
	}
}

/// Merge an update into a tool call.
///
/// Scalars are overwritten only when the patch defines them. When the patch
/// carries any diff, every earlier diff is dropped first; other sub-content
/// accumulates.
pub fn merge_tool_call(previous: &ToolCallBlock, patch: ToolCallPatch) -> ToolCallBlock {
	let ToolCallPatch {
		title,
		kind,
		status,
		content,
		permission_request,
		..
	} = patch;

	ToolCallBlock {
		tool_call_id: previous.tool_call_id.clone(),
		title: title.or_else(|| previous.title.clone()),
		kind: kind.or(previous.kind),
		status: status.or(previous.status),
		content: match content {
			Some(incoming) => merge_tool_content(&previous.content, incoming),
			None => previous.content.clone(),
		},
		permission_request: permission_request.or_else(|| previous.permission_request.clone()),
	}
}

pub fn merge_tool_content(
	previous: &[ToolCallContent],
	incoming: Vec<ToolCallContent>,
) -> Vec<ToolCallContent> {
	let replaces_diffs = incoming.iter().any(ToolCallContent::is_diff);
	previous
		.iter()
		.filter(|content| !(replaces_diffs && content.is_diff()))
		.cloned()
		.chain(incoming)
		.collect()
}

/// The ordered message list plus the turn boundary marker.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
	messages: Vec<Message>,
	/// Set by [`TranscriptEvent::ResetTurn`]; the next assistant content opens a new message.
	fresh_turn: bool,
}

impl Transcript {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn messages(&self) -> &[Message] {
		&self.messages
	}

	pub fn len(&self) -> usize {
		self.messages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.messages.is_empty()
	}

	pub fn tool_call(&self, tool_call_id: &str) -> Option<&ToolCallBlock> {
		let (message, block) = self.find_tool_call(tool_call_id)?;
		match &self.messages[message].content[block] {
			ContentBlock::ToolCall(call) => Some(call),
			_ => None,
		}
	}

	/// Requests still waiting on the user, oldest first.
	pub fn unresolved_permissions(&self) -> Vec<&PermissionRequest> {
		self.messages
			.iter()
			.flat_map(|message| message.content.iter())
			.filter_map(|block| match block {
				ContentBlock::PermissionRequest(request) => Some(request),
				ContentBlock::ToolCall(call) => call.permission_request.as_ref(),
				_ => None,
			})
			.filter(|request| !request.is_resolved())
			.collect()
	}

	pub fn apply(&mut self, event: TranscriptEvent) -> ApplyOutcome {
		match event {
			TranscriptEvent::UserMessage(text) => self.push_user_message(text),
			TranscriptEvent::Chunk { kind, text } => self.append_chunk(kind, text),
			TranscriptEvent::ToolCall(call) => self.push_tool_call(call),
			TranscriptEvent::ToolCallUpdate(patch) => self.merge_into_tool_call(patch),
			TranscriptEvent::Plan(entries) => self.replace_plan(entries),
			TranscriptEvent::PermissionRequested { tool_call, request } => {
				self.attach_permission(tool_call, request)
			}
			TranscriptEvent::PermissionSelected {
				request_id,
				option_id,
			} => self.resolve_request(&request_id, |request| {
				request.selected_option_id = Some(option_id);
			}),
			TranscriptEvent::PermissionCancelled { request_id } => {
				self.resolve_request(&request_id, |request| request.is_cancelled = true)
			}
			TranscriptEvent::PermissionsCancelled => self.cancel_unresolved_permissions(),
			TranscriptEvent::ResetTurn => {
				self.fresh_turn = true;
				ApplyOutcome::default()
			}
			TranscriptEvent::Clear => {
				self.messages.clear();
				self.fresh_turn = false;
				ApplyOutcome::single(TranscriptChange::Cleared)
			}
		}
	}

	fn push_user_message(&mut self, text: String) -> ApplyOutcome {
		let mut message = Message::new(Role::User);
		message.content.push(ContentBlock::Text { text });
		self.push_message(message)
	}

	fn push_message(&mut self, message: Message) -> ApplyOutcome {
		self.messages.push(message.clone());
		ApplyOutcome::single(TranscriptChange::MessageAdded {
			index: self.messages.len() - 1,
			message,
		})
	}

	/// Index of the assistant message receiving content, and whether it was just created.
	fn current_assistant_message(&mut self) -> (usize, bool) {
		let reusable = !self.fresh_turn
			&& matches!(self.messages.last(), Some(message) if message.role == Role::Assistant);
		if reusable {
			return (self.messages.len() - 1, false);
		}
		self.messages.push(Message::new(Role::Assistant));
		self.fresh_turn = false;
		(self.messages.len() - 1, true)
	}

	fn change_for(&self, index: usize, created: bool) -> TranscriptChange {
		let message = self.messages[index].clone();
		if created {
			TranscriptChange::MessageAdded { index, message }
		} else {
			TranscriptChange::MessageUpdated { index, message }
		}
	}

	fn append_chunk(&mut self, kind: ChunkKind, chunk: String) -> ApplyOutcome {
		let (index, created) = self.current_assistant_message();
		let message = &mut self.messages[index];

		let existing = message.content.iter_mut().find_map(|block| match (kind, block) {
			(ChunkKind::Text, ContentBlock::Text { text })
			| (ChunkKind::AgentThought, ContentBlock::AgentThought { text }) => Some(text),
			_ => None,
		});

		match existing {
			Some(text) => {
				if kind == ChunkKind::AgentThought {
					text.push('\n');
				}
				text.push_str(&chunk);
			}
			None => message.content.push(match kind {
				ChunkKind::Text => ContentBlock::Text { text: chunk },
				ChunkKind::AgentThought => ContentBlock::AgentThought { text: chunk },
			}),
		}

		ApplyOutcome::single(self.change_for(index, created))
	}

	fn push_tool_call(&mut self, call: ToolCallBlock) -> ApplyOutcome {
		// A permission request may have created the block before the call itself arrived.
		if self.find_tool_call(&call.tool_call_id).is_some() {
			return self.merge_into_tool_call(ToolCallPatch {
				tool_call_id: call.tool_call_id,
				title: call.title,
				kind: call.kind,
				status: call.status,
				content: Some(call.content),
				permission_request: call.permission_request,
			});
		}

		let mut message = Message::new(Role::Assistant);
		message.content.push(ContentBlock::ToolCall(call));
		self.fresh_turn = false;
		self.push_message(message)
	}

	fn find_tool_call(&self, tool_call_id: &str) -> Option<(usize, usize)> {
		self.messages.iter().enumerate().rev().find_map(|(m, message)| {
			message
				.content
				.iter()
				.position(|block| match block {
					ContentBlock::ToolCall(call) => call.tool_call_id == tool_call_id,
					_ => false,
				})
				.map(|b| (m, b))
		})
	}

	fn merge_into_tool_call(&mut self, patch: ToolCallPatch) -> ApplyOutcome {
		let Some((message, block)) = self.find_tool_call(&patch.tool_call_id) else {
			return ApplyOutcome::default();
		};
		let slot = &mut self.messages[message].content[block];
		if let ContentBlock::ToolCall(previous) = slot {
			*previous = merge_tool_call(previous, patch);
		}
		ApplyOutcome::single(self.change_for(message, false))
	}

	fn replace_plan(&mut self, entries: Vec<PlanEntry>) -> ApplyOutcome {
		let (index, created) = self.current_assistant_message();
		let message = &mut self.messages[index];

		let latest = message.content.iter_mut().rev().find_map(|block| match block {
			ContentBlock::Plan { entries } => Some(entries),
			_ => None,
		});
		match latest {
			Some(existing) => *existing = entries,
			None => message.content.push(ContentBlock::Plan { entries }),
		}

		ApplyOutcome::single(self.change_for(index, created))
	}

	fn attach_permission(
		&mut self,
		mut tool_call: ToolCallPatch,
		request: PermissionRequest,
	) -> ApplyOutcome {
		let Some((message, block)) = self.find_tool_call(&tool_call.tool_call_id) else {
			tool_call.permission_request = Some(request);
			let mut message = Message::new(Role::Assistant);
			message.content.push(ContentBlock::ToolCall(tool_call.into_block()));
			self.fresh_turn = false;
			return self.push_message(message);
		};

		let superseded_request = match &self.messages[message].content[block] {
			ContentBlock::ToolCall(ToolCallBlock {
				permission_request: Some(existing),
				..
			}) if !existing.is_resolved() && existing.request_id != request.request_id => {
				Some(existing.request_id.clone())
			}
			_ => None,
		};

		tool_call.permission_request = Some(request);
		let mut outcome = self.merge_into_tool_call(tool_call);
		outcome.superseded_request = superseded_request;
		outcome
	}

	/// Applies `resolve` to the request if it is still unresolved.
	fn resolve_request(
		&mut self,
		request_id: &str,
		resolve: impl FnOnce(&mut PermissionRequest),
	) -> ApplyOutcome {
		let mut selected = None;
		for (index, message) in self.messages.iter_mut().enumerate() {
			let request = message
				.content
				.iter_mut()
				.filter_map(ContentBlock::permission_request_mut)
				.find(|request| request.request_id == request_id);
			if let Some(request) = request {
				if !request.is_resolved() {
					resolve(request);
					selected = Some(index);
				}
				break;
			}
		}

		match selected {
			Some(index) => ApplyOutcome::single(self.change_for(index, false)),
			None => ApplyOutcome::default(),
		}
	}

	fn cancel_unresolved_permissions(&mut self) -> ApplyOutcome {
		let mut touched = Vec::new();
		for (index, message) in self.messages.iter_mut().enumerate() {
			let mut changed = false;
			for request in message
				.content
				.iter_mut()
				.filter_map(ContentBlock::permission_request_mut)
				.filter(|request| !request.is_resolved())
			{
				request.is_cancelled = true;
				changed = true;
			}
			if changed {
				touched.push(index);
			}
		}

		ApplyOutcome {
			changes: touched
				.into_iter()
				.map(|index| self.change_for(index, false))
				.collect(),
			superseded_request: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn chunk(kind: ChunkKind, text: &str) -> TranscriptEvent {
		TranscriptEvent::Chunk {
			kind,
			text: text.to_string(),
		}
	}

	fn diff(path: &str, new_text: &str) -> ToolCallContent {
		ToolCallContent::Diff {
			path: PathBuf::from(path),
			old_text: None,
			new_text: new_text.to_string(),
		}
	}

	fn terminal(id: &str) -> ToolCallContent {
		ToolCallContent::Terminal {
			terminal_id: id.to_string(),
		}
	}

	fn edit_call(id: &str) -> ToolCallBlock {
		ToolCallBlock {
			tool_call_id: id.to_string(),
			title: Some("Edit main.rs".to_string()),
			kind: Some(ToolKind::Edit),
			status: Some(ToolCallStatus::InProgress),
			content: vec![diff("src/main.rs", "fn main() {}")],
			permission_request: None,
		}
	}

	fn options() -> Vec<PermissionOption> {
		vec![
			PermissionOption::new("allow", "Allow", PermissionOptionKind::AllowOnce),
			PermissionOption::new("reject", "Reject", PermissionOptionKind::RejectOnce),
		]
	}

	/// **Property: a status-only update preserves every other field**
	#[test]
	fn test_status_only_update_preserves_fields() {
		let mut transcript = Transcript::new();
		transcript.apply(TranscriptEvent::ToolCall(edit_call("call-1")));

		let mut patch = ToolCallPatch::new("call-1");
		patch.status = Some(ToolCallStatus::Completed);
		let outcome = transcript.apply(TranscriptEvent::ToolCallUpdate(patch));
		assert!(!outcome.is_empty());

		let call = transcript.tool_call("call-1").unwrap();
		assert_eq!(call.status, Some(ToolCallStatus::Completed));
		assert_eq!(call.title.as_deref(), Some("Edit main.rs"));
		assert_eq!(call.kind, Some(ToolKind::Edit));
		assert_eq!(call.content, vec![diff("src/main.rs", "fn main() {}")]);
	}

	/// **Property: a new diff replaces prior diffs but keeps terminal references**
	#[test]
	fn test_diff_replaces_prior_diffs_only() {
		let previous = ToolCallBlock {
			content: vec![diff("a.rs", "v1"), terminal("term-1"), diff("b.rs", "v1")],
			..edit_call("call-1")
		};
		let mut patch = ToolCallPatch::new("call-1");
		patch.content = Some(vec![diff("a.rs", "v2")]);

		let merged = merge_tool_call(&previous, patch);
		assert_eq!(merged.content, vec![terminal("term-1"), diff("a.rs", "v2")]);
	}

	/// **Property: non-diff sub-content accumulates**
	#[test]
	fn test_terminal_content_accumulates() {
		let previous = ToolCallBlock {
			content: vec![diff("a.rs", "v1"), terminal("term-1")],
			..edit_call("call-1")
		};
		let mut patch = ToolCallPatch::new("call-1");
		patch.content = Some(vec![terminal("term-2")]);

		let merged = merge_tool_call(&previous, patch);
		assert_eq!(
			merged.content,
			vec![diff("a.rs", "v1"), terminal("term-1"), terminal("term-2")]
		);
	}

	/// **Property: updates for unknown tool calls change nothing**
	#[test]
	fn test_update_for_unknown_tool_call_is_noop() {
		let mut transcript = Transcript::new();
		transcript.apply(chunk(ChunkKind::Text, "hello"));
		let before = transcript.messages().to_vec();

		let mut patch = ToolCallPatch::new("missing");
		patch.status = Some(ToolCallStatus::Failed);
		let outcome = transcript.apply(TranscriptEvent::ToolCallUpdate(patch));

		assert!(outcome.is_empty());
		assert_eq!(transcript.messages(), before.as_slice());
	}

	#[test]
	fn test_tool_call_opens_new_message() {
		let mut transcript = Transcript::new();
		transcript.apply(chunk(ChunkKind::Text, "Let me edit that."));
		transcript.apply(TranscriptEvent::ToolCall(edit_call("call-1")));

		assert_eq!(transcript.len(), 2);
		assert!(matches!(
			transcript.messages()[1].content.as_slice(),
			[ContentBlock::ToolCall(_)]
		));
	}

	#[test]
	fn test_thought_chunks_join_with_newline() {
		let mut transcript = Transcript::new();
		transcript.apply(chunk(ChunkKind::AgentThought, "first"));
		transcript.apply(chunk(ChunkKind::AgentThought, "second"));

		let message = &transcript.messages()[0];
		assert_eq!(message.text_of(ChunkKind::AgentThought), Some("first\nsecond"));
	}

	#[test]
	fn test_user_message_ends_assistant_turn() {
		let mut transcript = Transcript::new();
		transcript.apply(chunk(ChunkKind::Text, "one"));
		transcript.apply(TranscriptEvent::UserMessage("next".to_string()));
		transcript.apply(chunk(ChunkKind::Text, "two"));

		let roles: Vec<Role> = transcript.messages().iter().map(|m| m.role).collect();
		assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
		assert_eq!(transcript.messages()[2].text_of(ChunkKind::Text), Some("two"));
	}

	#[test]
	fn test_reset_turn_starts_new_assistant_message() {
		let mut transcript = Transcript::new();
		transcript.apply(chunk(ChunkKind::Text, "one"));
		transcript.apply(TranscriptEvent::ResetTurn);
		let outcome = transcript.apply(chunk(ChunkKind::Text, "two"));

		assert_eq!(transcript.len(), 2);
		assert!(matches!(
			outcome.changes.as_slice(),
			[TranscriptChange::MessageAdded { index: 1, .. }]
		));
	}

	/// **Property: plans are snapshots, not deltas**
	#[test]
	fn test_plan_entries_are_replaced() {
		let entry = |content: &str, status| PlanEntry {
			content: content.to_string(),
			status,
			priority: PlanEntryPriority::Medium,
		};
		let mut transcript = Transcript::new();
		transcript.apply(TranscriptEvent::Plan(vec![
			entry("read", PlanEntryStatus::InProgress),
			entry("write", PlanEntryStatus::Pending),
		]));
		transcript.apply(TranscriptEvent::Plan(vec![entry(
			"write",
			PlanEntryStatus::Completed,
		)]));

		let plans: Vec<&Vec<PlanEntry>> = transcript.messages()[0]
			.content
			.iter()
			.filter_map(|block| match block {
				ContentBlock::Plan { entries } => Some(entries),
				_ => None,
			})
			.collect();
		assert_eq!(plans, vec![&vec![entry("write", PlanEntryStatus::Completed)]]);
	}

	#[test]
	fn test_permission_for_unseen_tool_call_creates_block() {
		let mut transcript = Transcript::new();
		let mut tool_call = ToolCallPatch::new("call-9");
		tool_call.title = Some("Run tests".to_string());
		transcript.apply(TranscriptEvent::PermissionRequested {
			tool_call,
			request: PermissionRequest::new("req-1", options()),
		});

		let call = transcript.tool_call("call-9").unwrap();
		assert_eq!(call.title.as_deref(), Some("Run tests"));
		assert_eq!(
			call.permission_request.as_ref().map(|r| r.request_id.as_str()),
			Some("req-1")
		);
	}

	#[test]
	fn test_late_tool_call_merges_into_permission_block() {
		let mut transcript = Transcript::new();
		transcript.apply(TranscriptEvent::PermissionRequested {
			tool_call: ToolCallPatch::new("call-1"),
			request: PermissionRequest::new("req-1", options()),
		});
		transcript.apply(TranscriptEvent::ToolCall(edit_call("call-1")));

		assert_eq!(transcript.len(), 1);
		let call = transcript.tool_call("call-1").unwrap();
		assert_eq!(call.kind, Some(ToolKind::Edit));
		assert!(call.permission_request.is_some());
	}

	/// **Property: a tool call holds at most one unresolved permission request**
	#[test]
	fn test_second_permission_supersedes_unresolved_one() {
		let mut transcript = Transcript::new();
		transcript.apply(TranscriptEvent::ToolCall(edit_call("call-1")));
		transcript.apply(TranscriptEvent::PermissionRequested {
			tool_call: ToolCallPatch::new("call-1"),
			request: PermissionRequest::new("req-1", options()),
		});
		let outcome = transcript.apply(TranscriptEvent::PermissionRequested {
			tool_call: ToolCallPatch::new("call-1"),
			request: PermissionRequest::new("req-2", options()),
		});

		assert_eq!(outcome.superseded_request.as_deref(), Some("req-1"));
		let request = transcript
			.tool_call("call-1")
			.and_then(|call| call.permission_request.clone())
			.unwrap();
		assert_eq!(request.request_id, "req-2");
	}

	/// **Property: a resolved permission is never resolved twice**
	#[test]
	fn test_selection_is_final() {
		let mut transcript = Transcript::new();
		transcript.apply(TranscriptEvent::PermissionRequested {
			tool_call: ToolCallPatch::new("call-1"),
			request: PermissionRequest::new("req-1", options()),
		});

		let first = transcript.apply(TranscriptEvent::PermissionSelected {
			request_id: "req-1".to_string(),
			option_id: "allow".to_string(),
		});
		let second = transcript.apply(TranscriptEvent::PermissionSelected {
			request_id: "req-1".to_string(),
			option_id: "reject".to_string(),
		});
		let cancelled = transcript.apply(TranscriptEvent::PermissionsCancelled);

		assert!(!first.is_empty());
		assert!(second.is_empty());
		assert!(cancelled.is_empty());
		let request = transcript
			.tool_call("call-1")
			.and_then(|call| call.permission_request.clone())
			.unwrap();
		assert_eq!(request.selected_option_id.as_deref(), Some("allow"));
		assert!(!request.is_cancelled);
	}

	#[test]
	fn test_single_cancel_leaves_other_requests_pending() {
		let mut transcript = Transcript::new();
		for (call, request) in [("call-1", "req-1"), ("call-2", "req-2")] {
			transcript.apply(TranscriptEvent::PermissionRequested {
				tool_call: ToolCallPatch::new(call),
				request: PermissionRequest::new(request, options()),
			});
		}

		let outcome = transcript.apply(TranscriptEvent::PermissionCancelled {
			request_id: "req-1".to_string(),
		});
		assert_eq!(outcome.changes.len(), 1);

		let unresolved: Vec<_> = transcript
			.unresolved_permissions()
			.into_iter()
			.map(|request| request.request_id.clone())
			.collect();
		assert_eq!(unresolved, vec!["req-2".to_string()]);
		let first = transcript.tool_call("call-1").unwrap();
		assert!(first.permission_request.as_ref().unwrap().is_cancelled);
	}

	#[test]
	fn test_cancel_marks_only_unresolved_requests() {
		let mut transcript = Transcript::new();
		for (call, request) in [("call-1", "req-1"), ("call-2", "req-2")] {
			transcript.apply(TranscriptEvent::PermissionRequested {
				tool_call: ToolCallPatch::new(call),
				request: PermissionRequest::new(request, options()),
			});
		}
		transcript.apply(TranscriptEvent::PermissionSelected {
			request_id: "req-1".to_string(),
			option_id: "allow".to_string(),
		});

		let outcome = transcript.apply(TranscriptEvent::PermissionsCancelled);
		assert_eq!(outcome.changes.len(), 1);

		let first = transcript.tool_call("call-1").unwrap();
		let second = transcript.tool_call("call-2").unwrap();
		assert!(!first.permission_request.as_ref().unwrap().is_cancelled);
		assert!(second.permission_request.as_ref().unwrap().is_cancelled);
	}

	#[test]
	fn test_clear_empties_transcript() {
		let mut transcript = Transcript::new();
		transcript.apply(chunk(ChunkKind::Text, "hello"));
		let outcome = transcript.apply(TranscriptEvent::Clear);

		assert!(transcript.is_empty());
		assert_eq!(outcome.changes, vec![TranscriptChange::Cleared]);
	}

	#[test]
	fn test_content_block_serializes_with_type_tag() {
		let block = ContentBlock::Terminal {
			terminal_id: "term-1".to_string(),
		};
		let json = serde_json::to_value(&block).unwrap();
		assert_eq!(
			json,
			serde_json::json!({"type": "terminal", "terminalId": "term-1"})
		);
	}

	proptest! {
		/// Text chunks of one turn concatenate in delivery order.
		#[test]
		fn text_chunks_concatenate_in_order(chunks in proptest::collection::vec(".{0,12}", 1..20)) {
			let mut transcript = Transcript::new();
			for text in &chunks {
				transcript.apply(chunk(ChunkKind::Text, text));
			}
			prop_assert_eq!(transcript.len(), 1);
			let expected = chunks.concat();
			prop_assert_eq!(
				transcript.messages()[0].text_of(ChunkKind::Text),
				Some(expected.as_str())
			);
		}

		/// Interleaved thought and text chunks build two independent blocks.
		#[test]
		fn interleaved_chunks_stay_independent(
			pairs in proptest::collection::vec(("[a-z]{1,8}", "[A-Z]{1,8}"), 1..12)
		) {
			let mut transcript = Transcript::new();
			for (text, thought) in &pairs {
				transcript.apply(chunk(ChunkKind::Text, text));
				transcript.apply(chunk(ChunkKind::AgentThought, thought));
			}

			let texts: Vec<&str> = pairs.iter().map(|(text, _)| text.as_str()).collect();
			let thoughts: Vec<&str> = pairs.iter().map(|(_, thought)| thought.as_str()).collect();
			let expected_text = texts.concat();
			let expected_thought = thoughts.join("\n");
			let message = &transcript.messages()[0];
			prop_assert_eq!(message.content.len(), 2);
			prop_assert_eq!(message.text_of(ChunkKind::Text), Some(expected_text.as_str()));
			prop_assert_eq!(
				message.text_of(ChunkKind::AgentThought),
				Some(expected_thought.as_str())
			);
		}
	}
}
