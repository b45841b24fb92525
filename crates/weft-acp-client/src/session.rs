// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbound half of the session: initialize, session setup, prompts and
//! cancellation.
//!
//! [`AgentConnection`] is the seam between the session logic and the wire.
//! It is implemented for [`acp::ClientSideConnection`] and for test doubles.

use std::cell::RefCell;
use std::path::PathBuf;

use agent_client_protocol as acp;
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::client::ProtocolClient;
use crate::error::{describe_protocol_error, AgentError};

const CLIENT_NAME: &str = "weft";

/// Requests the host sends to the agent.
#[async_trait(?Send)]
pub trait AgentConnection {
	async fn initialize(&self, request: acp::InitializeRequest)
		-> acp::Result<acp::InitializeResponse>;

	async fn new_session(
		&self,
		request: acp::NewSessionRequest,
	) -> acp::Result<acp::NewSessionResponse>;

	async fn authenticate(
		&self,
		request: acp::AuthenticateRequest,
	) -> acp::Result<acp::AuthenticateResponse>;

	async fn prompt(&self, request: acp::PromptRequest) -> acp::Result<acp::PromptResponse>;

	async fn cancel(&self, notification: acp::CancelNotification) -> acp::Result<()>;
}

#[async_trait(?Send)]
impl AgentConnection for acp::ClientSideConnection {
	async fn initialize(
		&self,
		request: acp::InitializeRequest,
	) -> acp::Result<acp::InitializeResponse> {
		acp::Agent::initialize(self, request).await
	}

	async fn new_session(
		&self,
		request: acp::NewSessionRequest,
	) -> acp::Result<acp::NewSessionResponse> {
		acp::Agent::new_session(self, request).await
	}

	async fn authenticate(
		&self,
		request: acp::AuthenticateRequest,
	) -> acp::Result<acp::AuthenticateResponse> {
		acp::Agent::authenticate(self, request).await
	}

	async fn prompt(&self, request: acp::PromptRequest) -> acp::Result<acp::PromptResponse> {
		acp::Agent::prompt(self, request).await
	}

	async fn cancel(&self, notification: acp::CancelNotification) -> acp::Result<()> {
		acp::Agent::cancel(self, notification).await
	}
}

/// How a prompt turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptOutcome {
	Completed(acp::StopReason),
	/// The agent finished without producing any response text.
	EmptyResponse,
}

/// One conversation with one agent.
pub struct AgentSession<C> {
	connection: C,
	client: ProtocolClient,
	session_id: RefCell<Option<acp::SessionId>>,
	auth_methods: RefCell<Vec<acp::AuthMethodId>>,
}

impl<C> std::fmt::Debug for AgentSession<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AgentSession")
			.field("session_id", &self.session_id.borrow())
			.field("auth_methods", &self.auth_methods.borrow().len())
			.finish_non_exhaustive()
	}
}

impl<C: AgentConnection> AgentSession<C> {
	pub fn new(connection: C, client: ProtocolClient) -> Self {
		Self {
			connection,
			client,
			session_id: RefCell::new(None),
			auth_methods: RefCell::new(Vec::new()),
		}
	}

	pub fn client(&self) -> &ProtocolClient {
		&self.client
	}

	pub fn connection(&self) -> &C {
		&self.connection
	}

	pub fn session_id(&self) -> Option<acp::SessionId> {
		self.session_id.borrow().clone()
	}

	/// Advertises terminal support only; filesystem access stays with the agent.
	#[instrument(skip(self))]
	pub async fn initialize(&self) -> Result<acp::InitializeResponse, AgentError> {
		let mut capabilities = acp::ClientCapabilities::default();
		capabilities.fs.read_text_file = false;
		capabilities.fs.write_text_file = false;
		capabilities.terminal = true;

		let mut request = acp::InitializeRequest::new(acp::ProtocolVersion::V1);
		request.client_capabilities = capabilities;
		request.client_info = Some(acp::Implementation::new(
			CLIENT_NAME,
			env!("CARGO_PKG_VERSION"),
		));

		let response = self
			.connection
			.initialize(request)
			.await
			.map_err(|err| AgentError::from_protocol("initialize", &err))?;

		let methods: Vec<acp::AuthMethodId> = response
			.auth_methods
			.iter()
			.map(|method| method.id.clone())
			.collect();
		info!(
			protocol_version = ?response.protocol_version,
			auth_methods = methods.len(),
			"agent initialized"
		);
		*self.auth_methods.borrow_mut() = methods;
		Ok(response)
	}

	/// Starts a session rooted at `cwd`. The transcript starts empty.
	#[instrument(skip(self))]
	pub async fn new_session(&self, cwd: PathBuf) -> Result<acp::SessionId, AgentError> {
		let response = self
			.connection
			.new_session(acp::NewSessionRequest::new(cwd))
			.await
			.map_err(|err| AgentError::from_protocol("session/new", &err))?;

		self.client.clear_transcript().await;
		info!(session_id = %response.session_id.0, "session created");
		*self.session_id.borrow_mut() = Some(response.session_id.clone());
		Ok(response.session_id)
	}

	pub async fn authenticate(&self, method_id: acp::AuthMethodId) -> Result<(), AgentError> {
		info!(method_id = %method_id.0, "authenticating with agent");
		self.connection
			.authenticate(acp::AuthenticateRequest::new(method_id))
			.await
			.map_err(|err| AgentError::from_protocol("authenticate", &err))?;
		Ok(())
	}

	/// The only advertised auth method, if there is exactly one.
	fn sole_auth_method(&self) -> Option<acp::AuthMethodId> {
		match self.auth_methods.borrow().as_slice() {
			[method] => Some(method.clone()),
			_ => None,
		}
	}

	/// Send one user turn and wait for the agent to finish it.
	///
	/// A failed prompt is retried once after authenticating when the agent
	/// advertised exactly one auth method.
	#[instrument(skip(self, text), fields(chars = text.len()))]
	pub async fn send_prompt(&self, text: &str) -> Result<PromptOutcome, AgentError> {
		let session_id = self.session_id().ok_or_else(AgentError::no_session)?;

		self.client.reset_current_message().await;
		self.client.aggregator().add_user_message(text).await;

		let request = || {
			acp::PromptRequest::new(
				session_id.clone(),
				vec![acp::ContentBlock::Text(acp::TextContent::new(text))],
			)
		};

		let err = match self.connection.prompt(request()).await {
			Ok(response) => return Ok(completed(response)),
			Err(err) if is_empty_response(&err) => return Ok(empty_response()),
			Err(err) => err,
		};

		let Some(method_id) = self.sole_auth_method() else {
			return Err(AgentError::from_protocol("prompt", &err));
		};
		warn!(
			error = %describe_protocol_error(&err),
			"prompt failed, authenticating and retrying once"
		);
		self.authenticate(method_id).await?;

		match self.connection.prompt(request()).await {
			Ok(response) => Ok(completed(response)),
			Err(err) if is_empty_response(&err) => Ok(empty_response()),
			Err(err) => Err(AgentError::from_protocol("prompt", &err)),
		}
	}

	/// Tells the agent to stop and cancels local work, even if the notification fails.
	#[instrument(skip(self))]
	pub async fn cancel(&self) {
		if let Some(session_id) = self.session_id() {
			if let Err(err) = self
				.connection
				.cancel(acp::CancelNotification::new(session_id))
				.await
			{
				warn!(
					error = %describe_protocol_error(&err),
					"failed to notify agent of cancellation"
				);
			}
		}
		self.client.cancel_all_operations().await;
	}

	pub async fn shutdown(&self) {
		self.cancel().await;
		self.session_id.borrow_mut().take();
		debug!("session shut down");
	}
}

fn completed(response: acp::PromptResponse) -> PromptOutcome {
	debug!(stop_reason = ?response.stop_reason, "prompt finished");
	PromptOutcome::Completed(response.stop_reason)
}

fn empty_response() -> PromptOutcome {
	info!("agent finished without response text");
	PromptOutcome::EmptyResponse
}

fn is_empty_response(err: &acp::Error) -> bool {
	describe_protocol_error(err)
		.to_lowercase()
		.contains("empty response text")
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::Cell;
	use std::collections::VecDeque;

	use crate::error::ErrorCategory;
	use crate::options::ClientOptions;
	use crate::permission::PermissionOutcome;
	use crate::transcript::{ChunkKind, PermissionOption, PermissionOptionKind, Role, ToolCallPatch};

	#[derive(Default)]
	struct MockConnection {
		auth_methods: Vec<&'static str>,
		prompts: RefCell<VecDeque<acp::Result<acp::PromptResponse>>>,
		prompt_calls: Cell<usize>,
		auth_calls: Cell<usize>,
		cancel_fails: bool,
		cancels: Cell<usize>,
	}

	impl MockConnection {
		fn with_prompts(prompts: Vec<acp::Result<acp::PromptResponse>>) -> Self {
			Self {
				prompts: RefCell::new(prompts.into()),
				..Self::default()
			}
		}
	}

	#[async_trait(?Send)]
	impl AgentConnection for MockConnection {
		async fn initialize(
			&self,
			request: acp::InitializeRequest,
		) -> acp::Result<acp::InitializeResponse> {
			assert!(request.client_capabilities.terminal);
			let methods: Vec<serde_json::Value> = self
				.auth_methods
				.iter()
				.map(|id| serde_json::json!({ "id": id, "name": id }))
				.collect();
			Ok(serde_json::from_value(serde_json::json!({
				"protocolVersion": 1,
				"authMethods": methods,
			}))
			.unwrap())
		}

		async fn new_session(
			&self,
			_request: acp::NewSessionRequest,
		) -> acp::Result<acp::NewSessionResponse> {
			Ok(acp::NewSessionResponse::new(acp::SessionId::new("sess-1")))
		}

		async fn authenticate(
			&self,
			_request: acp::AuthenticateRequest,
		) -> acp::Result<acp::AuthenticateResponse> {
			self.auth_calls.set(self.auth_calls.get() + 1);
			Ok(acp::AuthenticateResponse::default())
		}

		async fn prompt(&self, _request: acp::PromptRequest) -> acp::Result<acp::PromptResponse> {
			self.prompt_calls.set(self.prompt_calls.get() + 1);
			self.prompts
				.borrow_mut()
				.pop_front()
				.unwrap_or_else(|| Ok(acp::PromptResponse::new(acp::StopReason::EndTurn)))
		}

		async fn cancel(&self, _notification: acp::CancelNotification) -> acp::Result<()> {
			self.cancels.set(self.cancels.get() + 1);
			if self.cancel_fails {
				return Err(acp::Error::internal_error().data("connection closed"));
			}
			Ok(())
		}
	}

	fn session(connection: MockConnection) -> AgentSession<MockConnection> {
		let client = ProtocolClient::new(
			ClientOptions {
				working_dir: std::env::temp_dir(),
				..ClientOptions::default()
			},
			None,
		);
		AgentSession::new(connection, client)
	}

	async fn ready(connection: MockConnection) -> AgentSession<MockConnection> {
		let session = session(connection);
		session.initialize().await.unwrap();
		session.new_session(std::env::temp_dir()).await.unwrap();
		session
	}

	#[tokio::test]
	async fn test_prompt_requires_session() {
		let session = session(MockConnection::default());
		let err = session.send_prompt("hello").await.unwrap_err();
		assert_eq!(err.category, ErrorCategory::Configuration);
	}

	#[tokio::test]
	async fn test_prompt_records_user_message() {
		let session = ready(MockConnection::default()).await;
		let outcome = session.send_prompt("hello").await.unwrap();
		assert_eq!(outcome, PromptOutcome::Completed(acp::StopReason::EndTurn));

		let snapshot = session.client().snapshot().await;
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].role, Role::User);
		assert_eq!(snapshot[0].text_of(ChunkKind::Text), Some("hello"));
	}

	#[tokio::test]
	async fn test_responses_after_prompt_open_new_message() {
		let session = ready(MockConnection::default()).await;
		let client = session.client().clone();
		client.aggregator().append_chunk(ChunkKind::Text, "before").await;

		session.send_prompt("next").await.unwrap();
		client.aggregator().append_chunk(ChunkKind::Text, "after").await;

		let roles: Vec<Role> = client.snapshot().await.iter().map(|m| m.role).collect();
		assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
	}

	/// **Property: an empty agent response is not an error**
	#[tokio::test]
	async fn test_empty_response_is_swallowed() {
		let session = ready(MockConnection::with_prompts(vec![Err(
			acp::Error::internal_error().data("Empty response text"),
		)]))
		.await;

		let outcome = session.send_prompt("hello").await.unwrap();
		assert_eq!(outcome, PromptOutcome::EmptyResponse);
		assert_eq!(session.connection().auth_calls.get(), 0);
	}

	#[tokio::test]
	async fn test_single_auth_method_retries_once() {
		let mut connection = MockConnection::with_prompts(vec![Err(
			acp::Error::internal_error().data("authentication required"),
		)]);
		connection.auth_methods = vec!["login"];
		let session = ready(connection).await;

		let outcome = session.send_prompt("hello").await.unwrap();
		assert_eq!(outcome, PromptOutcome::Completed(acp::StopReason::EndTurn));
		assert_eq!(session.connection().auth_calls.get(), 1);
		assert_eq!(session.connection().prompt_calls.get(), 2);
	}

	#[tokio::test]
	async fn test_retry_failure_is_classified() {
		let mut connection = MockConnection::with_prompts(vec![
			Err(acp::Error::internal_error().data("authentication required")),
			Err(acp::Error::internal_error().data("429 Too Many Requests")),
		]);
		connection.auth_methods = vec!["login"];
		let session = ready(connection).await;

		let err = session.send_prompt("hello").await.unwrap_err();
		assert_eq!(err.category, ErrorCategory::RateLimit);
		assert_eq!(session.connection().prompt_calls.get(), 2);
	}

	#[tokio::test]
	async fn test_no_retry_with_several_auth_methods() {
		let mut connection = MockConnection::with_prompts(vec![Err(
			acp::Error::internal_error().data("unauthorized"),
		)]);
		connection.auth_methods = vec!["login", "api-key"];
		let session = ready(connection).await;

		let err = session.send_prompt("hello").await.unwrap_err();
		assert_eq!(err.category, ErrorCategory::Authentication);
		assert_eq!(session.connection().auth_calls.get(), 0);
		assert_eq!(session.connection().prompt_calls.get(), 1);
	}

	#[tokio::test]
	async fn test_cancel_cleans_up_even_when_notification_fails() {
		let connection = MockConnection {
			cancel_fails: true,
			..MockConnection::default()
		};
		let session = ready(connection).await;
		let client = session.client().clone();

		let pending = tokio::spawn({
			let client = client.clone();
			async move {
				let options = vec![PermissionOption::new(
					"allow",
					"Allow",
					PermissionOptionKind::AllowOnce,
				)];
				client
					.handle_permission_request(ToolCallPatch::new("call-1"), options)
					.await
			}
		});
		while client.pending_permissions().await.is_empty() {
			tokio::task::yield_now().await;
		}

		session.cancel().await;
		let outcome = pending.await.unwrap();

		assert_eq!(outcome, PermissionOutcome::Cancelled);
		assert_eq!(session.connection().cancels.get(), 1);
	}

	#[tokio::test]
	async fn test_new_session_clears_transcript() {
		let session = ready(MockConnection::default()).await;
		session.send_prompt("hello").await.unwrap();
		assert_eq!(
			session.session_id().map(|id| id.0.to_string()).as_deref(),
			Some("sess-1")
		);

		session.new_session(std::env::temp_dir()).await.unwrap();
		assert!(session.client().snapshot().await.is_empty());
	}
}
