// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Suspends agent permission requests until the user answers them.
//!
//! Every pending request owns a oneshot sender keyed by its request id. Each
//! request resolves exactly once: the first of select, cancel or supersede
//! removes the sender, and later attempts find nothing to resolve.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

use crate::transcript::{PermissionOption, PermissionOptionKind};

/// What the agent is told about a permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
	Selected(String),
	Cancelled,
}

/// The waiting half of a registered request.
#[derive(Debug)]
pub struct PendingPermission {
	receiver: oneshot::Receiver<PermissionOutcome>,
}

impl PendingPermission {
	/// A coordinator dropped without answering reads as cancellation.
	pub async fn outcome(self) -> PermissionOutcome {
		self.receiver.await.unwrap_or(PermissionOutcome::Cancelled)
	}
}

#[derive(Debug, Default)]
pub struct PermissionCoordinator {
	pending: Mutex<HashMap<String, oneshot::Sender<PermissionOutcome>>>,
	auto_allow: AtomicBool,
}

impl PermissionCoordinator {
	pub fn new(auto_allow: bool) -> Self {
		Self {
			pending: Mutex::new(HashMap::new()),
			auto_allow: AtomicBool::new(auto_allow),
		}
	}

	pub fn auto_allow(&self) -> bool {
		self.auto_allow.load(Ordering::Relaxed)
	}

	pub fn set_auto_allow(&self, enabled: bool) {
		self.auto_allow.store(enabled, Ordering::Relaxed);
	}

	pub async fn register(&self, request_id: impl Into<String>) -> PendingPermission {
		let request_id = request_id.into();
		let (sender, receiver) = oneshot::channel();
		let displaced = self.pending.lock().await.insert(request_id.clone(), sender);
		if displaced.is_some() {
			debug!(request_id = %request_id, "replaced pending permission with the same id");
		}
		PendingPermission { receiver }
	}

	/// Returns false when the request is unknown or already resolved.
	pub async fn resolve(&self, request_id: &str, option_id: &str) -> bool {
		let Some(sender) = self.pending.lock().await.remove(request_id) else {
			debug!(request_id = %request_id, "no pending permission to resolve");
			return false;
		};
		info!(request_id = %request_id, option_id = %option_id, "permission resolved");
		sender
			.send(PermissionOutcome::Selected(option_id.to_string()))
			.is_ok()
	}

	pub async fn cancel(&self, request_id: &str) -> bool {
		let Some(sender) = self.pending.lock().await.remove(request_id) else {
			return false;
		};
		debug!(request_id = %request_id, "permission cancelled");
		sender.send(PermissionOutcome::Cancelled).is_ok()
	}

	/// Cancels every outstanding request and returns how many there were.
	pub async fn cancel_all(&self) -> usize {
		let drained: Vec<_> = self.pending.lock().await.drain().collect();
		let count = drained.len();
		for (_, sender) in drained {
			let _ = sender.send(PermissionOutcome::Cancelled);
		}
		if count > 0 {
			info!(count, "cancelled pending permissions");
		}
		count
	}

	pub async fn pending_count(&self) -> usize {
		self.pending.lock().await.len()
	}

	pub async fn is_pending(&self, request_id: &str) -> bool {
		self.pending.lock().await.contains_key(request_id)
	}
}

/// Pick the option auto-allow answers with.
///
/// Preference order: allow-once, allow-always, any option whose name contains
/// "allow", then whatever comes first. `None` only for an empty list.
pub fn select_auto_allow_option(options: &[PermissionOption]) -> Option<&PermissionOption> {
	let of_kind = |kind: PermissionOptionKind| options.iter().find(|option| option.kind == kind);

	of_kind(PermissionOptionKind::AllowOnce)
		.or_else(|| of_kind(PermissionOptionKind::AllowAlways))
		.or_else(|| {
			options
				.iter()
				.find(|option| option.name.to_lowercase().contains("allow"))
		})
		.or_else(|| options.first())
}
