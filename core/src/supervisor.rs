use crate::{
	reconcile::reconcile, Controller, Debouncer, ServiceChanged, ServiceRegistry, SupervisorConfig,
	SupervisorError,
};

use cs_compose::ComposeExecutor;
use cs_fs_watcher::{FsEvent, FsWatcher, WatcherMessage};

use std::{
	future::{pending, Future},
	path::{Path, PathBuf},
	pin::pin,
	sync::Arc,
};

use async_channel as chan;
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use tokio::{spawn, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn, Instrument};

/// Stop channel and handle of one of the supervisor's tasks.
struct Task {
	name: &'static str,
	stop_tx: chan::Sender<()>,
	handle: JoinHandle<()>,
}

impl Task {
	fn spawn<F>(name: &'static str, run: impl FnOnce(chan::Receiver<()>) -> F) -> Self
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let (stop_tx, stop_rx) = chan::bounded(1);

		Self {
			name,
			stop_tx,
			handle: spawn(run(stop_rx).in_current_span()),
		}
	}

	async fn stop(self) {
		// A task that already finished has dropped its receiver
		if self.stop_tx.send(()).await.is_err() {
			debug!(task = self.name, "Task already finished;");
		}

		if let Err(e) = self.handle.await {
			error!(task = self.name, ?e, "Failed to join supervisor task;");
		}
	}
}

/// The running pipeline: filesystem watcher, debouncer and controller, wired
/// together over a single service registry.
pub struct Supervisor {
	root: PathBuf,
	registry: Arc<ServiceRegistry>,
	watcher: FsWatcher,
	watch_loop: Task,
	debouncer: Task,
	controller: Task,
	fatal_rx: chan::Receiver<SupervisorError>,
}

impl Supervisor {
	/// Watch `config.base_path`, register every service folder already in it
	/// and start bringing them up.
	///
	/// Fails if the base path can't be watched or scanned.
	#[instrument(skip_all, fields(base_path = %config.base_path.display()), err)]
	pub async fn start(
		config: SupervisorConfig,
		executor: Arc<dyn ComposeExecutor>,
	) -> Result<Self, SupervisorError> {
		let (messages_tx, messages_rx) = chan::unbounded();

		// Armed before the scan, so nothing created in between goes unnoticed
		let watcher = FsWatcher::new(&config.base_path, config.watcher, messages_tx)?;
		let root = watcher.root().to_path_buf();

		let registry = Arc::new(ServiceRegistry::new());
		let initial = reconcile(&root, &registry).await?;

		info!(
			root = %root.display(),
			services = initial.len(),
			"Services directory scanned;"
		);

		let (events_tx, events_rx) = chan::unbounded();
		let (signals_tx, signals_rx) = chan::unbounded();
		let (fatal_tx, fatal_rx) = chan::bounded(1);

		let controller = Task::spawn("controller", {
			let controller = Controller::new(
				Arc::clone(&registry),
				executor,
				root.clone(),
				config.action_timeout,
			);
			move |stop_rx| controller.run(signals_rx, stop_rx)
		});

		let debouncer = Task::spawn("debouncer", {
			let debouncer = Debouncer::new(root.clone(), config.wait, signals_tx.clone());
			move |stop_rx| debouncer.run(events_rx, stop_rx)
		});

		for signal in initial {
			if signals_tx.send(signal).await.is_err() {
				error!("Controller is gone, unable to send startup signal;");
			}
		}

		let watch_loop = Task::spawn("watch_loop", {
			let root = root.clone();
			let registry = Arc::clone(&registry);
			move |stop_rx| {
				watch_loop(
					root,
					registry,
					messages_rx,
					events_tx,
					signals_tx,
					fatal_tx,
					stop_rx,
				)
			}
		});

		info!("Supervisor started");

		Ok(Self {
			root,
			registry,
			watcher,
			watch_loop,
			debouncer,
			controller,
			fatal_rx,
		})
	}

	/// Canonical path of the watched base directory.
	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn registry(&self) -> Arc<ServiceRegistry> {
		Arc::clone(&self.registry)
	}

	/// Resolves once the supervisor can't keep going, which only happens when
	/// the base path is gone for good. Never resolves otherwise.
	pub async fn fatal_error(&self) -> SupervisorError {
		match self.fatal_rx.recv().await {
			Ok(e) => e,
			Err(_) => pending().await,
		}
	}

	/// Stop watching, drop pending debounce timers and wait for in-flight
	/// compose actions to finish.
	pub async fn shutdown(self) {
		info!("Shutting down supervisor");

		let Self {
			watcher,
			watch_loop,
			debouncer,
			controller,
			..
		} = self;

		watcher.stop().await;
		watch_loop.stop().await;
		debouncer.stop().await;
		controller.stop().await;

		info!("Supervisor stopped");
	}
}

#[instrument(name = "watch_loop", skip_all)]
async fn watch_loop(
	root: PathBuf,
	registry: Arc<ServiceRegistry>,
	messages_rx: chan::Receiver<WatcherMessage>,
	events_tx: chan::Sender<FsEvent>,
	signals_tx: chan::Sender<ServiceChanged>,
	fatal_tx: chan::Sender<SupervisorError>,
	stop_rx: chan::Receiver<()>,
) {
	enum StreamMessage {
		Watcher(WatcherMessage),
		Stop,
	}

	let mut msg_stream = pin!((
		messages_rx.map(StreamMessage::Watcher),
		stop_rx.map(|()| StreamMessage::Stop),
	)
		.merge());

	while let Some(msg) = msg_stream.next().await {
		match msg {
			StreamMessage::Watcher(WatcherMessage::Event(event)) => {
				if events_tx.send(event).await.is_err() {
					error!("Debouncer is gone, dropping filesystem event;");
				}
			}

			StreamMessage::Watcher(WatcherMessage::RootLost) => {
				warn!("Services directory is unavailable, services keep their state until it's back;");
			}

			StreamMessage::Watcher(WatcherMessage::Reestablished) => {
				info!("Watch re-established, resyncing services");
				resync(&root, &registry, &signals_tx).await;
			}

			StreamMessage::Watcher(WatcherMessage::Rescan) => {
				warn!("Filesystem events were dropped, resyncing services;");
				resync(&root, &registry, &signals_tx).await;
			}

			StreamMessage::Watcher(WatcherMessage::Failed(e)) => {
				error!(%e, "Watch on the services directory is lost for good;");
				if fatal_tx.send(SupervisorError::WatchLost(e)).await.is_err() {
					error!("Nobody is waiting for fatal errors;");
				}
				break;
			}

			StreamMessage::Stop => break,
		}
	}

	debug!("Watch loop stopped");
}

async fn resync(root: &Path, registry: &ServiceRegistry, signals_tx: &chan::Sender<ServiceChanged>) {
	match reconcile(root, registry).await {
		Ok(signals) => {
			debug!(signals = signals.len(), "Resync done;");
			for signal in signals {
				if signals_tx.send(signal).await.is_err() {
					error!("Controller is gone, unable to send resync signal;");
				}
			}
		}
		Err(e) => error!(%e, "Failed to resync services;"),
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	use crate::{ChangeKind, LifecycleState};

	use std::time::Duration;

	use tempfile::tempdir;
	use tokio::{fs, time::timeout};

	#[tokio::test]
	async fn dropped_events_trigger_a_resync() {
		let root = tempdir().unwrap();
		fs::create_dir(root.path().join("web")).await.unwrap();

		let registry = Arc::new(ServiceRegistry::new());
		registry.upsert("gone", root.path().join("gone")).await;
		registry.set_state("gone", LifecycleState::Running).await;

		let (messages_tx, messages_rx) = chan::unbounded();
		let (events_tx, _events_rx) = chan::unbounded();
		let (signals_tx, signals_rx) = chan::unbounded();
		let (fatal_tx, _fatal_rx) = chan::bounded(1);
		let (stop_tx, stop_rx) = chan::bounded(1);

		let handle = spawn(watch_loop(
			root.path().to_path_buf(),
			Arc::clone(&registry),
			messages_rx,
			events_tx,
			signals_tx,
			fatal_tx,
			stop_rx,
		));

		messages_tx.send(WatcherMessage::Rescan).await.unwrap();

		let mut signals = vec![];
		for _ in 0..2 {
			let signal = timeout(Duration::from_secs(5), signals_rx.recv())
				.await
				.unwrap()
				.unwrap();
			signals.push((signal.name, signal.kind));
		}
		assert_eq!(
			signals,
			[
				("gone".to_string(), ChangeKind::Disappeared),
				("web".to_string(), ChangeKind::Appeared)
			]
		);

		stop_tx.send(()).await.unwrap();
		handle.await.unwrap();
	}
}
