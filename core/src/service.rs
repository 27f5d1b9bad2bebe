//! Service records and the signals that drive them.

use std::{path::PathBuf, time::SystemTime};

use strum::{Display, EnumIs};
use tokio::time::Instant;

/// Where a service is in its compose lifecycle.
///
/// `Starting`, `Restarting` and `Stopping` only exist while a compose action
/// is in flight for the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumIs)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
	#[default]
	Absent,
	Starting,
	Running,
	Restarting,
	Stopping,
	/// Last action failed; stays here until the next signal for the service.
	Failed,
}

impl LifecycleState {
	pub const fn is_transient(self) -> bool {
		matches!(self, Self::Starting | Self::Restarting | Self::Stopping)
	}
}

/// What happened to a service folder during one debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIs)]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
	Appeared,
	Disappeared,
	Updated,
}

impl ChangeKind {
	/// Combine an older change with a newer one: removal of the folder wins,
	/// otherwise the newest change does.
	#[must_use]
	pub const fn merge(self, newer: Self) -> Self {
		match (self, newer) {
			(Self::Disappeared, _) | (_, Self::Disappeared) => Self::Disappeared,
			(_, newer) => newer,
		}
	}
}

/// Coalesced signal for a single service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceChanged {
	pub name: String,
	pub kind: ChangeKind,
	/// When the debounce timer that produced this signal was due.
	pub deadline: Instant,
}

impl ServiceChanged {
	pub fn new(name: impl Into<String>, kind: ChangeKind) -> Self {
		Self {
			name: name.into(),
			kind,
			deadline: Instant::now(),
		}
	}

	/// Collapse `newer` into this signal, keeping the latest deadline.
	#[must_use]
	pub fn merge(self, newer: Self) -> Self {
		Self {
			kind: self.kind.merge(newer.kind),
			deadline: self.deadline.max(newer.deadline),
			name: newer.name,
		}
	}
}

/// A service folder known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
	pub name: String,
	pub path: PathBuf,
	pub state: LifecycleState,
	/// A signal is queued behind the action currently in flight.
	pub pending_restart: bool,
	pub last_debounce_deadline: Option<Instant>,
	pub compose_file_modified: Option<SystemTime>,
}

impl Service {
	pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
		Self {
			name: name.into(),
			path: path.into(),
			state: LifecycleState::Absent,
			pending_restart: false,
			last_debounce_deadline: None,
			compose_file_modified: None,
		}
	}
}
