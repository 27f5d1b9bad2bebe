//! Turns coalesced service signals into compose actions.
//!
//! Each service has at most one action in flight. Signals arriving while its
//! action runs are collapsed into a single queued signal, which is planned
//! against the state the action left behind. Actions for different services
//! run concurrently.

use crate::{ActionError, ChangeKind, LifecycleState, ServiceChanged, ServiceRegistry};

use cs_compose::{compose_file_modified, project_name, ComposeAction, ComposeExecutor};

use std::{
	collections::HashMap,
	future::Future,
	panic::AssertUnwindSafe,
	path::{Path, PathBuf},
	pin::pin,
	sync::Arc,
	time::Duration,
};

use async_channel as chan;
use futures::{FutureExt, StreamExt};
use futures_concurrency::stream::Merge;
use tokio::{fs, spawn, time::timeout};
use tracing::{debug, error, info, instrument, warn, Instrument};

/// What a signal means for a service, given its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plan {
	/// Bring the project up (`Up`) or recreate it (`Restart`).
	Start(ComposeAction),
	/// Take the project down and forget the service.
	Stop,
	/// Forget a service that was never brought up.
	Forget,
	Ignore(&'static str),
}

pub(crate) const fn plan(state: Option<LifecycleState>, kind: ChangeKind, on_disk: bool) -> Plan {
	use LifecycleState::{Absent, Failed, Restarting, Running, Starting, Stopping};

	match (kind, state) {
		(ChangeKind::Appeared | ChangeKind::Updated, _) if !on_disk => {
			Plan::Ignore("service folder is not on disk")
		}

		(ChangeKind::Appeared | ChangeKind::Updated, None)
		| (ChangeKind::Appeared, Some(Absent)) => Plan::Start(ComposeAction::Up),
		(ChangeKind::Appeared, Some(Running)) => Plan::Ignore("service is already running"),
		(ChangeKind::Appeared, Some(Failed | Starting | Restarting | Stopping))
		| (ChangeKind::Updated, Some(_)) => Plan::Start(ComposeAction::Restart),

		(ChangeKind::Disappeared, None) => Plan::Ignore("service is not registered"),
		(ChangeKind::Disappeared, Some(Absent)) => Plan::Forget,
		(ChangeKind::Disappeared, Some(_)) => Plan::Stop,
	}
}

struct ActionDone {
	name: String,
	/// Signal the finished action produced for its own service.
	follow_up: Option<ServiceChanged>,
}

#[derive(Clone)]
struct ActionContext {
	registry: Arc<ServiceRegistry>,
	executor: Arc<dyn ComposeExecutor>,
	base_path: PathBuf,
	action_timeout: Duration,
}

pub struct Controller {
	ctx: ActionContext,
	/// Services with an action in flight, and the signal queued behind it.
	in_flight: HashMap<String, Option<ServiceChanged>>,
	done_tx: chan::Sender<ActionDone>,
	done_rx: chan::Receiver<ActionDone>,
}

impl Controller {
	pub fn new(
		registry: Arc<ServiceRegistry>,
		executor: Arc<dyn ComposeExecutor>,
		base_path: impl Into<PathBuf>,
		action_timeout: Duration,
	) -> Self {
		let (done_tx, done_rx) = chan::unbounded();

		Self {
			ctx: ActionContext {
				registry,
				executor,
				base_path: base_path.into(),
				action_timeout,
			},
			in_flight: HashMap::new(),
			done_tx,
			done_rx,
		}
	}

	/// Act on `signals_rx` until a stop signal arrives, then wait for in-flight
	/// actions to finish. Queued signals are dropped on stop.
	#[instrument(name = "controller", skip_all, fields(base_path = %self.ctx.base_path.display()))]
	pub async fn run(mut self, signals_rx: chan::Receiver<ServiceChanged>, stop_rx: chan::Receiver<()>) {
		enum StreamMessage {
			Signal(ServiceChanged),
			Done(ActionDone),
			Stop,
		}

		let done_rx = self.done_rx.clone();

		let mut msg_stream = pin!((
			signals_rx.map(StreamMessage::Signal),
			done_rx.map(StreamMessage::Done),
			stop_rx.map(|()| StreamMessage::Stop),
		)
			.merge());

		while let Some(msg) = msg_stream.next().await {
			match msg {
				StreamMessage::Signal(signal) => self.dispatch(signal).await,
				StreamMessage::Done(done) => self.complete(done).await,
				StreamMessage::Stop => break,
			}
		}

		if !self.in_flight.is_empty() {
			info!(
				in_flight = self.in_flight.len(),
				"Waiting for in-flight compose actions to finish;"
			);
		}

		while !self.in_flight.is_empty() {
			let Ok(done) = self.done_rx.recv().await else {
				break;
			};

			if let Some(Some(queued)) = self.in_flight.remove(&done.name) {
				warn!(service = %done.name, kind = %queued.kind, "Dropping queued signal on shutdown;");
			}
		}

		debug!("Controller stopped");
	}

	async fn dispatch(&mut self, signal: ServiceChanged) {
		if let Some(queued) = self.in_flight.get_mut(&signal.name) {
			debug!(service = %signal.name, kind = %signal.kind, "Action in flight, queueing signal;");

			let name = signal.name.clone();
			*queued = Some(match queued.take() {
				Some(older) => older.merge(signal),
				None => signal,
			});
			// Anything in flight was registered before it was spawned
			self.ctx.registry.set_pending_restart(&name, true).await;
		} else {
			self.start(signal).await;
		}
	}

	async fn complete(&mut self, ActionDone { name, follow_up }: ActionDone) {
		let queued = self.in_flight.remove(&name).flatten();

		let next = match (follow_up, queued) {
			(Some(follow_up), Some(queued)) => Some(follow_up.merge(queued)),
			(follow_up, queued) => follow_up.or(queued),
		};

		if let Some(next) = next {
			self.ctx.registry.set_pending_restart(&name, false).await;
			self.start(next).await;
		}
	}

	/// Plan `signal` against the registry and, when it calls for a compose
	/// action, move the service into its transient state and spawn the action.
	async fn start(&mut self, ServiceChanged { name, kind, deadline }: ServiceChanged) {
		let ctx = &self.ctx;
		let path = ctx.base_path.join(&name);

		let state = ctx.registry.get(&name).await.map(|service| service.state);

		match plan(state, kind, is_dir(&path).await) {
			Plan::Ignore(reason) => {
				debug!(service = %name, %kind, reason, "Nothing to do for signal;");
			}

			Plan::Forget => {
				ctx.registry.remove(&name).await;
				info!(service = %name, "Service folder removed, service forgotten;");
			}

			Plan::Start(action) => {
				ctx.registry.upsert(name.clone(), path.clone()).await;
				ctx.registry.record_debounce_deadline(&name, deadline).await;
				ctx.warn_on_shared_project(&name, &path).await;
				ctx.transition(
					&name,
					if action == ComposeAction::Up {
						LifecycleState::Starting
					} else {
						LifecycleState::Restarting
					},
				)
				.await;

				let ctx = ctx.clone();
				self.spawn_action(name.clone(), async move {
					ctx.bring_up(&name, action, &path).await;
					None
				});
			}

			Plan::Stop => {
				ctx.registry.record_debounce_deadline(&name, deadline).await;
				ctx.transition(&name, LifecycleState::Stopping).await;

				let ctx = ctx.clone();
				self.spawn_action(name.clone(), async move { ctx.take_down(name, &path).await });
			}
		}
	}

	fn spawn_action(
		&mut self,
		name: String,
		action: impl Future<Output = Option<ServiceChanged>> + Send + 'static,
	) {
		self.in_flight.insert(name.clone(), None);

		let registry = Arc::clone(&self.ctx.registry);
		let done_tx = self.done_tx.clone();

		spawn(
			async move {
				let follow_up = match AssertUnwindSafe(action).catch_unwind().await {
					Ok(follow_up) => follow_up,
					Err(_) => {
						error!(service = %name, "Compose action unexpectedly panicked");
						registry.set_state(&name, LifecycleState::Failed).await;
						None
					}
				};

				if done_tx.send(ActionDone { name, follow_up }).await.is_err() {
					error!("Controller is gone, unable to report finished action;");
				}
			}
			.in_current_span(),
		);
	}
}

impl ActionContext {
	async fn bring_up(&self, name: &str, action: ComposeAction, path: &Path) {
		match self.execute(action, path).await {
			Ok(()) => {
				self.registry
					.record_compose_file_modified(name, compose_file_modified(path))
					.await;
				self.transition(name, LifecycleState::Running).await;
			}
			Err(e) => {
				error!(service = %name, %action, %e, "Compose action failed;");
				self.transition(name, LifecycleState::Failed).await;
			}
		}
	}

	async fn take_down(&self, name: String, path: &Path) -> Option<ServiceChanged> {
		if let Err(e) = self.execute(ComposeAction::Down, path).await {
			error!(service = %name, %e, "Compose down failed, forgetting the service anyway;");
		}

		self.registry.remove(&name).await;
		info!(service = %name, "Service removed;");

		// The folder was recreated inside the same debounce window
		if is_dir(path).await {
			info!(service = %name, "Service folder is back, bringing it up again;");
			Some(ServiceChanged::new(name, ChangeKind::Appeared))
		} else {
			None
		}
	}

	/// Compose projects are keyed by normalized name, so `Web` and `web` end up
	/// driving the same containers.
	async fn warn_on_shared_project(&self, name: &str, path: &Path) {
		let Ok(project) = project_name(path) else {
			return;
		};

		for other in self.registry.list_all().await {
			if other.name != name && project_name(&other.path).is_ok_and(|other| other == project) {
				warn!(
					service = %name,
					other = %other.name,
					%project,
					"Services share compose project, their containers will clash;"
				);
			}
		}
	}

	async fn execute(&self, action: ComposeAction, path: &Path) -> Result<(), ActionError> {
		timeout(self.action_timeout, self.executor.run(action, path))
			.await
			.map_err(|_| ActionError::TimedOut {
				action,
				timeout: self.action_timeout,
			})?
			.map_err(Into::into)
	}

	async fn transition(&self, name: &str, to: LifecycleState) {
		if let Some(from) = self.registry.set_state(name, to).await {
			info!(service = %name, %from, %to, "Lifecycle transition;");
		}
	}
}

async fn is_dir(path: &Path) -> bool {
	fs::metadata(path)
		.await
		.is_ok_and(|metadata| metadata.is_dir())
}
