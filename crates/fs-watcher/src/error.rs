use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsWatcherError>;

#[derive(Error, Debug)]
pub enum FsWatcherError {
	#[error("watch root is unavailable: <path='{}'>", .path.display())]
	RootUnavailable {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("watch root is not a directory: <path='{}'>", .0.display())]
	NotADirectory(PathBuf),
	#[error("notify error: {0}")]
	Notify(#[from] notify::Error),
	#[error("lost watch on root and could not re-establish it after {attempts} attempts: <path='{}'>", .path.display())]
	RootLost { path: PathBuf, attempts: usize },
}
