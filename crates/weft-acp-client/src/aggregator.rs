// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared owner of the session transcript.
//!
//! The aggregator serializes every mutation behind one lock and hands the
//! resulting changes to a [`TranscriptObserver`] while still holding it, so
//! observers see changes in the order they were applied.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::transcript::{
	ApplyOutcome, ChunkKind, Message, PermissionRequest, PlanEntry, ToolCallBlock, ToolCallPatch,
	Transcript, TranscriptChange, TranscriptEvent,
};

/// Receives every transcript change in application order.
pub trait TranscriptObserver: Send + Sync {
	fn on_change(&self, change: &TranscriptChange);
}

impl<F> TranscriptObserver for F
where
	F: Fn(&TranscriptChange) + Send + Sync,
{
	fn on_change(&self, change: &TranscriptChange) {
		self(change)
	}
}

#[derive(Default)]
pub struct MessageAggregator {
	transcript: Mutex<Transcript>,
	observer: Option<Arc<dyn TranscriptObserver>>,
}

impl std::fmt::Debug for MessageAggregator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MessageAggregator")
			.field("has_observer", &self.observer.is_some())
			.finish_non_exhaustive()
	}
}

impl MessageAggregator {
	pub fn new(observer: Option<Arc<dyn TranscriptObserver>>) -> Self {
		Self {
			transcript: Mutex::new(Transcript::new()),
			observer,
		}
	}

	pub async fn apply(&self, event: TranscriptEvent) -> ApplyOutcome {
		let mut transcript = self.transcript.lock().await;
		let outcome = transcript.apply(event);
		trace!(
			changes = outcome.changes.len(),
			messages = transcript.len(),
			"applied transcript event"
		);
		if let Some(observer) = &self.observer {
			for change in &outcome.changes {
				observer.on_change(change);
			}
		}
		outcome
	}

	pub async fn add_user_message(&self, text: impl Into<String>) {
		self.apply(TranscriptEvent::UserMessage(text.into())).await;
	}

	pub async fn append_chunk(&self, kind: ChunkKind, text: impl Into<String>) {
		self.apply(TranscriptEvent::Chunk {
			kind,
			text: text.into(),
		})
		.await;
	}

	pub async fn add_tool_call(&self, call: ToolCallBlock) {
		self.apply(TranscriptEvent::ToolCall(call)).await;
	}

	/// Returns false when no tool call with the patch's id exists.
	pub async fn merge_tool_call(&self, patch: ToolCallPatch) -> bool {
		let tool_call_id = patch.tool_call_id.clone();
		let merged = !self
			.apply(TranscriptEvent::ToolCallUpdate(patch))
			.await
			.is_empty();
		if !merged {
			warn!(tool_call_id = %tool_call_id, "ignoring update for unknown tool call");
		}
		merged
	}

	pub async fn replace_plan(&self, entries: Vec<PlanEntry>) {
		self.apply(TranscriptEvent::Plan(entries)).await;
	}

	/// Returns the id of an unresolved request this one displaced, if any.
	pub async fn attach_permission(
		&self,
		tool_call: ToolCallPatch,
		request: PermissionRequest,
	) -> Option<String> {
		self.apply(TranscriptEvent::PermissionRequested { tool_call, request })
			.await
			.superseded_request
	}

	pub async fn record_permission_selection(&self, request_id: &str, option_id: &str) -> bool {
		!self
			.apply(TranscriptEvent::PermissionSelected {
				request_id: request_id.to_string(),
				option_id: option_id.to_string(),
			})
			.await
			.is_empty()
	}

	/// Marks one request cancelled. Returns false when it is unknown or already resolved.
	pub async fn cancel_permission(&self, request_id: &str) -> bool {
		!self
			.apply(TranscriptEvent::PermissionCancelled {
				request_id: request_id.to_string(),
			})
			.await
			.is_empty()
	}

	pub async fn cancel_pending_permissions(&self) {
		self.apply(TranscriptEvent::PermissionsCancelled).await;
	}

	pub async fn reset_current_message(&self) {
		self.apply(TranscriptEvent::ResetTurn).await;
	}

	pub async fn clear(&self) {
		self.apply(TranscriptEvent::Clear).await;
	}

	pub async fn snapshot(&self) -> Vec<Message> {
		self.transcript.lock().await.messages().to_vec()
	}

	pub async fn unresolved_permissions(&self) -> Vec<PermissionRequest> {
		self.transcript
			.lock()
			.await
			.unresolved_permissions()
			.into_iter()
			.cloned()
			.collect()
	}

	pub async fn tool_call(&self, tool_call_id: &str) -> Option<ToolCallBlock> {
		self.transcript.lock().await.tool_call(tool_call_id).cloned()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex as StdMutex;

	use crate::transcript::ToolCallStatus;

	fn recording() -> (Arc<StdMutex<Vec<TranscriptChange>>>, MessageAggregator) {
		let seen = Arc::new(StdMutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		let observer: Arc<dyn TranscriptObserver> =
			Arc::new(move |change: &TranscriptChange| sink.lock().unwrap().push(change.clone()));
		(seen, MessageAggregator::new(Some(observer)))
	}

	#[tokio::test]
	async fn test_observer_sees_added_then_updated() {
		let (seen, aggregator) = recording();
		aggregator.append_chunk(ChunkKind::Text, "Hel").await;
		aggregator.append_chunk(ChunkKind::Text, "lo").await;

		let seen = seen.lock().unwrap();
		assert_eq!(seen.len(), 2);
		assert!(matches!(seen[0], TranscriptChange::MessageAdded { index: 0, .. }));
		match &seen[1] {
			TranscriptChange::MessageUpdated { index, message } => {
				assert_eq!(*index, 0);
				assert_eq!(message.text_of(ChunkKind::Text), Some("Hello"));
			}
			other => panic!("unexpected change: {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_merge_unknown_tool_call_reports_false() {
		let (seen, aggregator) = recording();
		let mut patch = ToolCallPatch::new("nope");
		patch.status = Some(ToolCallStatus::Completed);

		assert!(!aggregator.merge_tool_call(patch).await);
		assert!(seen.lock().unwrap().is_empty());
		assert!(aggregator.snapshot().await.is_empty());
	}

	#[tokio::test]
	async fn test_cancel_permission_resolves_a_late_attach() {
		let aggregator = MessageAggregator::default();
		aggregator
			.attach_permission(
				ToolCallPatch::new("call-1"),
				PermissionRequest::new("req-1", vec![]),
			)
			.await;
		// The bulk sweep already ran before this request was attached.
		aggregator.cancel_pending_permissions().await;
		aggregator
			.attach_permission(
				ToolCallPatch::new("call-2"),
				PermissionRequest::new("req-2", vec![]),
			)
			.await;

		assert!(aggregator.cancel_permission("req-2").await);
		assert!(!aggregator.cancel_permission("req-2").await);
		assert!(aggregator.unresolved_permissions().await.is_empty());
	}

	#[tokio::test]
	async fn test_concurrent_chunks_all_land() {
		let aggregator = Arc::new(MessageAggregator::default());
		let mut handles = Vec::new();
		for _ in 0..16 {
			let aggregator = Arc::clone(&aggregator);
			handles.push(tokio::spawn(async move {
				aggregator.append_chunk(ChunkKind::Text, "x").await;
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}

		let snapshot = aggregator.snapshot().await;
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].text_of(ChunkKind::Text), Some("x".repeat(16).as_str()));
	}

	#[tokio::test]
	async fn test_clear_notifies_observer() {
		let (seen, aggregator) = recording();
		aggregator.add_user_message("hi").await;
		aggregator.clear().await;

		assert!(aggregator.snapshot().await.is_empty());
		assert_eq!(seen.lock().unwrap().last(), Some(&TranscriptChange::Cleared));
	}
}
