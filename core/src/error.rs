use cs_compose::{ComposeAction, ComposeError};
use cs_fs_watcher::FsWatcherError;

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Why a single compose action didn't bring its service where it was headed.
#[derive(Error, Debug)]
pub enum ActionError {
	#[error(transparent)]
	Compose(#[from] ComposeError),
	#[error("compose {action} did not finish within {timeout:?}")]
	TimedOut {
		action: ComposeAction,
		timeout: Duration,
	},
}

#[derive(Error, Debug)]
pub enum SupervisorError {
	#[error("unable to watch the services directory: {0}")]
	Watcher(#[from] FsWatcherError),
	#[error("unable to scan the services directory: <path='{}'>", .path.display())]
	Scan {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("lost the watch on the services directory: {0}")]
	WatchLost(#[source] FsWatcherError),
}
