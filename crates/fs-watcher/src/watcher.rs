use crate::{FsEvent, FsWatcherError, Result};

use std::{
	path::{Path, PathBuf},
	pin::pin,
	time::Duration,
};

use async_channel as chan;
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{
	spawn,
	task::JoinHandle,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

const ONE_SECOND: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsWatcherConfig {
	/// How often the root is checked for liveness, and how often a lost watch is retried.
	pub rewatch_interval: Duration,
	/// Consecutive failed re-watch attempts before giving up.
	pub max_rewatch_attempts: usize,
}

impl Default for FsWatcherConfig {
	fn default() -> Self {
		Self {
			rewatch_interval: ONE_SECOND,
			max_rewatch_attempts: 30,
		}
	}
}

/// What the watcher reports to its consumer.
#[derive(Debug)]
pub enum WatcherMessage {
	Event(FsEvent),
	/// The root stopped existing; no events are observed until it comes back.
	RootLost,
	/// The root is back and watched again. Changes made while it was gone were
	/// not observed, so consumers should rescan.
	Reestablished,
	/// The backend dropped events (e.g. inotify queue overflow). The watch is
	/// still armed but consumers should rescan.
	Rescan,
	/// The watch could not be re-established; the watcher task has exited.
	Failed(FsWatcherError),
}

/// Owns the recursive notify watch on a single root directory.
#[derive(Debug)]
pub struct FsWatcher {
	root: PathBuf,
	handle: Option<JoinHandle<()>>,
	stop_tx: chan::Sender<()>,
}

impl FsWatcher {
	/// Start watching `root` recursively, forwarding normalized events to `messages_tx`.
	///
	/// Fails if the root does not exist, is not a directory, or cannot be watched.
	#[instrument(skip_all, fields(root = %root.as_ref().display()), err)]
	pub fn new(
		root: impl AsRef<Path>,
		config: FsWatcherConfig,
		messages_tx: chan::Sender<WatcherMessage>,
	) -> Result<Self> {
		let root = root
			.as_ref()
			.canonicalize()
			.map_err(|source| FsWatcherError::RootUnavailable {
				path: root.as_ref().to_path_buf(),
				source,
			})?;

		if !root.is_dir() {
			return Err(FsWatcherError::NotADirectory(root));
		}

		let (events_tx, events_rx) = chan::unbounded();
		let (stop_tx, stop_rx) = chan::bounded(1);

		let mut watcher = RecommendedWatcher::new(
			move |result| {
				if !events_tx.is_closed() {
					// SAFETY: we are not blocking the thread as this is an unbounded channel
					if events_tx.send_blocking(result).is_err() {
						error!("Unable to send watcher event to the watch loop;");
					}
				} else {
					error!("Tried to send file system events to a closed channel;");
				}
			},
			Config::default(),
		)?;

		watcher.watch(&root, RecursiveMode::Recursive)?;
		debug!("Now watching root");

		let handle = spawn(
			handle_watch_events(
				root.clone(),
				watcher,
				config,
				events_rx,
				stop_rx,
				messages_tx,
			)
			.in_current_span(),
		);

		Ok(Self {
			root,
			handle: Some(handle),
			stop_tx,
		})
	}

	/// Canonical path of the watched root; every emitted event path starts with it.
	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Stop observing and wait for the watch task to release the notify watch.
	pub async fn stop(mut self) {
		if let Some(handle) = self.handle.take() {
			// The task may already be gone after a terminal failure
			let _ = self.stop_tx.send(()).await;

			if let Err(e) = handle.await {
				error!(?e, "Failed to join watcher task;");
			}
		}
	}
}

impl Drop for FsWatcher {
	fn drop(&mut self) {
		if let Some(handle) = self.handle.take() {
			let stop_tx = self.stop_tx.clone();
			spawn(async move {
				let _ = stop_tx.send(()).await;

				if let Err(e) = handle.await {
					error!(?e, "Failed to join watcher task;");
				}
			});
		}
	}
}

enum RootState {
	Watching,
	Lost { attempts: usize },
}

async fn handle_watch_events(
	root: PathBuf,
	mut watcher: RecommendedWatcher,
	config: FsWatcherConfig,
	events_rx: chan::Receiver<notify::Result<Event>>,
	stop_rx: chan::Receiver<()>,
	messages_tx: chan::Sender<WatcherMessage>,
) {
	enum StreamMessage {
		NewEvent(notify::Result<Event>),
		Tick,
		Stop,
	}

	let mut state = RootState::Watching;

	let mut liveness_interval = interval_at(
		Instant::now() + config.rewatch_interval,
		config.rewatch_interval,
	);
	liveness_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

	let mut msg_stream = pin!((
		events_rx.map(StreamMessage::NewEvent),
		IntervalStream::new(liveness_interval).map(|_| StreamMessage::Tick),
		stop_rx.map(|()| StreamMessage::Stop),
	)
		.merge());

	while let Some(msg) = msg_stream.next().await {
		let outgoing = match msg {
			StreamMessage::NewEvent(Ok(event)) => translate(&root, event),

			StreamMessage::NewEvent(Err(e)) => {
				error!(?e, "Watcher error;");
				vec![]
			}

			StreamMessage::Tick => match check_root(&root, &mut watcher, &config, &mut state) {
				Some(message) => vec![message],
				None => vec![],
			},

			StreamMessage::Stop => {
				debug!("Stopping watch loop");
				break;
			}
		};

		for message in outgoing {
			let terminal = matches!(message, WatcherMessage::Failed(_));

			if messages_tx.send(message).await.is_err() {
				warn!("Watcher consumer is gone, stopping watch loop");
				return;
			}

			if terminal {
				return;
			}
		}
	}

	if let Err(e) = watcher.unwatch(&root) {
		// The root may already be gone, in which case there is nothing left to unwatch
		debug!(?e, "Unable to unwatch root;");
	}

	info!("Watcher gracefully shutdown");
}

fn translate(root: &Path, event: Event) -> Vec<WatcherMessage> {
	trace!(?event, "Received raw event;");

	if event.need_rescan() {
		warn!(root = %root.display(), "Watcher dropped events, a rescan is needed;");
		return vec![WatcherMessage::Rescan];
	}

	FsEvent::from_notify(event)
		.into_iter()
		// The root itself vanishing is handled by the liveness check
		.filter(|event| event.path != root)
		.map(WatcherMessage::Event)
		.collect()
}

fn check_root(
	root: &Path,
	watcher: &mut RecommendedWatcher,
	config: &FsWatcherConfig,
	state: &mut RootState,
) -> Option<WatcherMessage> {
	match state {
		RootState::Watching => {
			if root.is_dir() {
				return None;
			}

			error!(root = %root.display(), "Watched root is gone, no changes are observed until it is back;");
			// The kernel usually drops the watch along with the directory
			let _ = watcher.unwatch(root);
			*state = RootState::Lost { attempts: 0 };

			Some(WatcherMessage::RootLost)
		}

		RootState::Lost { attempts } => {
			let result = if root.is_dir() {
				watcher
					.watch(root, RecursiveMode::Recursive)
					.map_err(FsWatcherError::from)
			} else {
				Err(FsWatcherError::NotADirectory(root.to_path_buf()))
			};

			match result {
				Ok(()) => {
					info!(root = %root.display(), "Watch on root re-established");
					*state = RootState::Watching;
					Some(WatcherMessage::Reestablished)
				}
				Err(e) => {
					*attempts += 1;
					if *attempts >= config.max_rewatch_attempts {
						error!(?e, attempts = *attempts, "Giving up on re-establishing watch;");
						Some(WatcherMessage::Failed(FsWatcherError::RootLost {
							path: root.to_path_buf(),
							attempts: *attempts,
						}))
					} else {
						warn!(?e, attempts = *attempts, "Unable to re-establish watch on root;");
						None
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::FsEventKind;

	use notify::{
		event::{CreateKind, Flag},
		EventKind,
	};

	#[test]
	fn overflow_asks_for_a_rescan() {
		let overflow = Event::new(EventKind::Other).set_flag(Flag::Rescan);

		let messages = translate(Path::new("/srv/services"), overflow);

		assert!(matches!(messages.as_slice(), [WatcherMessage::Rescan]));
	}

	#[test]
	fn events_on_the_root_itself_are_dropped() {
		let root = Path::new("/srv/services");
		let event = Event::new(EventKind::Create(CreateKind::Folder))
			.add_path(root.to_path_buf())
			.add_path(root.join("web"));

		let messages = translate(root, event);

		assert!(matches!(
			messages.as_slice(),
			[WatcherMessage::Event(event)]
				if event.kind == FsEventKind::Created && event.path == root.join("web")
		));
	}
}
