use cs_fs_watcher::FsWatcherConfig;

use std::{path::PathBuf, time::Duration};

pub const DEFAULT_BASE_PATH: &str = "/opt/iombian-services";
pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
	/// Directory whose immediate subdirectories are the services.
	pub base_path: PathBuf,
	/// Quiet period a service must see before its change is acted on.
	pub wait: Duration,
	/// Upper bound for a single compose action, restart included.
	pub action_timeout: Duration,
	pub watcher: FsWatcherConfig,
}

impl SupervisorConfig {
	pub fn new(base_path: impl Into<PathBuf>) -> Self {
		Self {
			base_path: base_path.into(),
			..Default::default()
		}
	}

	#[must_use]
	pub const fn with_wait(mut self, wait: Duration) -> Self {
		self.wait = wait;
		self
	}

	#[must_use]
	pub const fn with_action_timeout(mut self, action_timeout: Duration) -> Self {
		self.action_timeout = action_timeout;
		self
	}

	#[must_use]
	pub const fn with_watcher(mut self, watcher: FsWatcherConfig) -> Self {
		self.watcher = watcher;
		self
	}
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			base_path: PathBuf::from(DEFAULT_BASE_PATH),
			wait: DEFAULT_WAIT,
			action_timeout: DEFAULT_ACTION_TIMEOUT,
			watcher: FsWatcherConfig::default(),
		}
	}
}
