// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::terminal::DEFAULT_OUTPUT_BYTE_LIMIT;

/// Host behaviour for one agent session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
	/// Answer permission requests without asking.
	pub auto_allow_permissions: bool,
	/// Used as the session cwd and for terminals that name none.
	pub working_dir: PathBuf,
	pub terminal_output_limit: usize,
	#[serde(with = "duration_millis")]
	pub terminal_poll_interval: Duration,
}

impl Default for ClientOptions {
	fn default() -> Self {
		Self {
			auto_allow_permissions: false,
			working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
			terminal_output_limit: DEFAULT_OUTPUT_BYTE_LIMIT,
			terminal_poll_interval: Duration::from_millis(500),
		}
	}
}

mod duration_millis {
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use std::time::Duration;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		u64::try_from(duration.as_millis())
			.unwrap_or(u64::MAX)
			.serialize(serializer)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let millis = u64::deserialize(deserializer)?;
		Ok(Duration::from_millis(millis))
	}
}
