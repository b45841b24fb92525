// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Agent Client Protocol (ACP) host for Weft.
//!
//! This crate is the client side of an ACP connection: it drives a coding
//! agent over stdio, turns its streamed updates into a transcript, asks the
//! user before the agent acts, and runs the commands the agent requests.
//!
//! # Architecture
//!
//! ```text
//! Agent process  <--->  ProtocolClient  <--->  MessageAggregator  --->  TranscriptObserver
//!     stdio             acp::Client       |--> PermissionCoordinator
//!                                         |--> TerminalProxy
//! ```
//!
//! [`AgentSession`] sends prompts and cancellations to the agent, while
//! [`ProtocolClient`] answers what the agent sends back:
//! - Session updates are merged into the transcript
//! - Permission requests suspend until the user answers or cancels
//! - Terminal requests spawn and track local child processes

pub mod aggregator;
pub mod bridge;
pub mod client;
pub mod error;
pub mod options;
pub mod permission;
pub mod session;
pub mod terminal;
pub mod transcript;

pub use aggregator::{MessageAggregator, TranscriptObserver};
pub use client::ProtocolClient;
pub use error::{AgentError, ClientError, ErrorCategory, TerminalError};
pub use options::ClientOptions;
pub use permission::{PermissionCoordinator, PermissionOutcome};
pub use session::{AgentConnection, AgentSession, PromptOutcome};
pub use terminal::{poll_terminal, TerminalPoll, TerminalProxy};
pub use transcript::{ContentBlock, Message, Role, TranscriptChange};
