// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The host side of an ACP connection.
//!
//! [`ProtocolClient`] answers the agent's inbound calls and owns the
//! aggregator, the permission coordinator and the terminal proxy. Clones share
//! that state, so the presentation layer can hold one while the connection
//! holds another.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_client_protocol as acp;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::aggregator::{MessageAggregator, TranscriptObserver};
use crate::bridge::{
	exit_status_to_acp, permission_option_from_acp, permission_outcome_to_acp,
	session_update_to_event, terminal_command_from_acp, terminal_output_to_acp,
	tool_call_update_to_patch, SessionEvent,
};
use crate::error::ClientError;
use crate::options::ClientOptions;
use crate::permission::{select_auto_allow_option, PermissionCoordinator, PermissionOutcome};
use crate::terminal::TerminalProxy;
use crate::transcript::{Message, PermissionOption, PermissionRequest, ToolCallPatch};

#[derive(Clone)]
pub struct ProtocolClient {
	aggregator: Arc<MessageAggregator>,
	permissions: Arc<PermissionCoordinator>,
	terminals: Arc<TerminalProxy>,
	working_dir: PathBuf,
}

impl std::fmt::Debug for ProtocolClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProtocolClient")
			.field("working_dir", &self.working_dir)
			.field("auto_allow", &self.permissions.auto_allow())
			.finish_non_exhaustive()
	}
}

impl ProtocolClient {
	pub fn new(options: ClientOptions, observer: Option<Arc<dyn TranscriptObserver>>) -> Self {
		Self {
			aggregator: Arc::new(MessageAggregator::new(observer)),
			permissions: Arc::new(PermissionCoordinator::new(options.auto_allow_permissions)),
			terminals: Arc::new(TerminalProxy::new(options.terminal_output_limit)),
			working_dir: options.working_dir,
		}
	}

	pub fn aggregator(&self) -> &MessageAggregator {
		&self.aggregator
	}

	pub fn permissions(&self) -> &PermissionCoordinator {
		&self.permissions
	}

	pub fn terminals(&self) -> Arc<TerminalProxy> {
		Arc::clone(&self.terminals)
	}

	pub fn working_dir(&self) -> &Path {
		&self.working_dir
	}

	pub async fn handle_session_event(&self, event: SessionEvent) {
		match event {
			SessionEvent::Chunk { kind, text } => self.aggregator.append_chunk(kind, text).await,
			SessionEvent::ToolCall(call) => self.aggregator.add_tool_call(call).await,
			SessionEvent::ToolCallUpdate(patch) => {
				self.aggregator.merge_tool_call(patch).await;
			}
			SessionEvent::Plan(entries) => self.aggregator.replace_plan(entries).await,
			SessionEvent::Ignored(kind) => debug!(kind, "ignoring session update"),
		}
	}

	/// Resolves once the user answers, the request is superseded, or everything is cancelled.
	#[instrument(skip(self, tool_call, options), fields(tool_call_id = %tool_call.tool_call_id))]
	pub async fn handle_permission_request(
		&self,
		tool_call: ToolCallPatch,
		options: Vec<PermissionOption>,
	) -> PermissionOutcome {
		if self.permissions.auto_allow() {
			if let Some(option) = select_auto_allow_option(&options) {
				info!(option_id = %option.option_id, "auto-allowing permission request");
				return PermissionOutcome::Selected(option.option_id.clone());
			}
			debug!("no options to auto-allow, asking the user");
		}

		let request_id = Uuid::new_v4().to_string();
		let pending = self.permissions.register(request_id.clone()).await;
		let superseded = self
			.aggregator
			.attach_permission(tool_call, PermissionRequest::new(request_id.clone(), options))
			.await;
		if let Some(superseded) = superseded {
			info!(
				request_id = %superseded,
				replaced_by = %request_id,
				"permission request superseded"
			);
			self.permissions.cancel(&superseded).await;
		}
		// A cancel-all between register and attach swept the transcript too early.
		if !self.permissions.is_pending(&request_id).await {
			self.aggregator.cancel_permission(&request_id).await;
		}

		let outcome = pending.outcome().await;
		debug!(request_id = %request_id, outcome = ?outcome, "permission request finished");
		outcome
	}

	/// Apply the user's choice. False when the request is unknown or already resolved.
	pub async fn handle_permission_response(&self, request_id: &str, option_id: &str) -> bool {
		if !self.permissions.resolve(request_id, option_id).await {
			return false;
		}
		self.aggregator
			.record_permission_selection(request_id, option_id)
			.await;
		true
	}

	pub async fn pending_permissions(&self) -> Vec<PermissionRequest> {
		self.aggregator.unresolved_permissions().await
	}

	pub async fn reset_current_message(&self) {
		self.aggregator.reset_current_message().await;
	}

	pub async fn clear_transcript(&self) {
		self.aggregator.clear().await;
	}

	/// Cancel pending permissions and kill running terminals.
	pub async fn cancel_all_operations(&self) {
		let cancelled = self.permissions.cancel_all().await;
		self.aggregator.cancel_pending_permissions().await;
		self.terminals.kill_all().await;
		debug!(cancelled, "cancelled outstanding operations");
	}

	pub async fn snapshot(&self) -> Vec<Message> {
		self.aggregator.snapshot().await
	}
}

#[async_trait::async_trait(?Send)]
impl acp::Client for ProtocolClient {
	async fn request_permission(
		&self,
		args: acp::RequestPermissionRequest,
	) -> acp::Result<acp::RequestPermissionResponse> {
		let tool_call = tool_call_update_to_patch(args.tool_call);
		let options = args
			.options
			.into_iter()
			.map(permission_option_from_acp)
			.collect();
		let outcome = self.handle_permission_request(tool_call, options).await;
		Ok(permission_outcome_to_acp(outcome))
	}

	async fn session_notification(&self, args: acp::SessionNotification) -> acp::Result<()> {
		self.handle_session_event(session_update_to_event(args.update))
			.await;
		Ok(())
	}

	// The handshake declines filesystem access, so these only answer agents
	// that call them anyway.
	async fn write_text_file(
		&self,
		args: acp::WriteTextFileRequest,
	) -> acp::Result<acp::WriteTextFileResponse> {
		debug!(path = %args.path.display(), "ignoring fs/write_text_file");
		Ok(acp::WriteTextFileResponse::default())
	}

	async fn read_text_file(
		&self,
		args: acp::ReadTextFileRequest,
	) -> acp::Result<acp::ReadTextFileResponse> {
		debug!(path = %args.path.display(), "ignoring fs/read_text_file");
		Ok(acp::ReadTextFileResponse::new(String::new()))
	}

	async fn create_terminal(
		&self,
		args: acp::CreateTerminalRequest,
	) -> acp::Result<acp::CreateTerminalResponse> {
		let command = terminal_command_from_acp(args, &self.working_dir);
		let terminal_id = self
			.terminals
			.create(command)
			.await
			.map_err(ClientError::from)?;
		Ok(acp::CreateTerminalResponse::new(acp::TerminalId::new(
			terminal_id,
		)))
	}

	async fn terminal_output(
		&self,
		args: acp::TerminalOutputRequest,
	) -> acp::Result<acp::TerminalOutputResponse> {
		let output = self
			.terminals
			.output(args.terminal_id.0.as_ref())
			.await
			.map_err(ClientError::from)?;
		Ok(terminal_output_to_acp(output))
	}

	async fn release_terminal(
		&self,
		args: acp::ReleaseTerminalRequest,
	) -> acp::Result<acp::ReleaseTerminalResponse> {
		self.terminals.release(args.terminal_id.0.as_ref()).await;
		Ok(acp::ReleaseTerminalResponse::default())
	}

	async fn wait_for_terminal_exit(
		&self,
		args: acp::WaitForTerminalExitRequest,
	) -> acp::Result<acp::WaitForTerminalExitResponse> {
		let status = self
			.terminals
			.wait_for_exit(args.terminal_id.0.as_ref())
			.await
			.map_err(ClientError::from)?;
		Ok(acp::WaitForTerminalExitResponse::new(exit_status_to_acp(
			&status,
		)))
	}

	async fn kill_terminal_command(
		&self,
		args: acp::KillTerminalCommandRequest,
	) -> acp::Result<acp::KillTerminalCommandResponse> {
		self.terminals
			.kill(args.terminal_id.0.as_ref())
			.await
			.map_err(ClientError::from)?;
		Ok(acp::KillTerminalCommandResponse::default())
	}

	async fn ext_method(&self, args: acp::ExtRequest) -> acp::Result<acp::ExtResponse> {
		warn!(method = %args.method, "unsupported extension method");
		Err(ClientError::Unsupported(args.method.to_string()).into())
	}

	async fn ext_notification(&self, args: acp::ExtNotification) -> acp::Result<()> {
		debug!(method = %args.method, "ignoring extension notification");
		Ok(())
	}
}
