//! Normalized filesystem events

use std::{
	path::{Path, PathBuf},
	time::SystemTime,
};

use notify::{
	event::{AccessKind, AccessMode, ModifyKind, RenameMode},
	Event, EventKind,
};
use strum::{Display, EnumIs};

/// Kind of change observed on a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIs)]
#[strum(serialize_all = "snake_case")]
pub enum FsEventKind {
	Created,
	Modified,
	Deleted,
	/// One side of a rename; whether the path was moved in or out is only
	/// known by looking at the disk afterwards.
	Renamed,
}

/// A single change on a single path, as seen by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
	pub kind: FsEventKind,
	pub path: PathBuf,
	pub timestamp: SystemTime,
}

impl FsEvent {
	pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
		Self {
			kind,
			path: path.into(),
			timestamp: SystemTime::now(),
		}
	}

	pub fn created(path: impl Into<PathBuf>) -> Self {
		Self::new(FsEventKind::Created, path)
	}

	pub fn modified(path: impl Into<PathBuf>) -> Self {
		Self::new(FsEventKind::Modified, path)
	}

	pub fn deleted(path: impl Into<PathBuf>) -> Self {
		Self::new(FsEventKind::Deleted, path)
	}

	pub fn renamed(path: impl Into<PathBuf>) -> Self {
		Self::new(FsEventKind::Renamed, path)
	}

	/// Translate a raw notify event into zero or more normalized events.
	///
	/// Platforms report the same operation differently (see the notes in
	/// the watcher tests), so anything that does not map cleanly onto a
	/// create, write, delete or rename is dropped here.
	pub fn from_notify(event: Event) -> Vec<Self> {
		let kind = match event.kind {
			EventKind::Create(_) => FsEventKind::Created,
			EventKind::Remove(_) => FsEventKind::Deleted,
			EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
				// inotify pairs both sides of a rename in a single event
				return event.paths.into_iter().map(Self::renamed).collect();
			}
			EventKind::Modify(ModifyKind::Name(_)) => FsEventKind::Renamed,
			EventKind::Modify(_) => FsEventKind::Modified,
			// A file closed after being written was either created or updated
			EventKind::Access(AccessKind::Close(AccessMode::Write)) => FsEventKind::Modified,
			EventKind::Access(_) | EventKind::Any | EventKind::Other => return vec![],
		};

		event
			.paths
			.into_iter()
			.map(|path| Self::new(kind, path))
			.collect()
	}

	/// Editor swap files and desktop metadata never affect a compose project.
	pub fn should_process(&self) -> bool {
		!is_editor_artifact(&self.path)
	}
}

fn is_editor_artifact(path: &Path) -> bool {
	path.file_name()
		.map(|name| name.to_string_lossy())
		.is_some_and(|name| {
			name.ends_with(".swp")
				|| name.ends_with(".swx")
				|| name.ends_with('~')
				|| name == ".DS_Store"
		})
}
