//! Per-service debouncing of raw filesystem events.
//!
//! Every raw event is attributed to the top-level service folder it belongs to
//! and (re)arms that service's timer. Each timer is its own tokio task, so a
//! service's timer firing never waits on, or delays, any other service.

use crate::{ChangeKind, ServiceChanged};

use cs_fs_watcher::{FsEvent, FsEventKind};

use std::{
	collections::HashMap,
	path::{Component, Path, PathBuf},
	pin::pin,
	time::Duration,
};

use async_channel as chan;
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use tokio::{
	spawn,
	task::JoinHandle,
	time::{sleep_until, Instant},
};
use tracing::{debug, instrument, trace, warn};

/// Attribute a raw event to its service folder and classify it.
///
/// Returns `None` for events that can't affect a service: the base path
/// itself, paths outside of it, hidden top-level entries, top-level regular
/// files and editor artifacts.
pub fn classify(base_path: &Path, event: &FsEvent) -> Option<(String, ChangeKind)> {
	if !event.should_process() {
		return None;
	}

	let mut components = event.path.strip_prefix(base_path).ok()?.components();

	let Component::Normal(name) = components.next()? else {
		return None;
	};

	let Some(name) = name.to_str() else {
		warn!(path = %event.path.display(), "Ignoring service folder with a non UTF-8 name;");
		return None;
	};

	if name.starts_with('.') {
		return None;
	}

	let kind = if components.next().is_some() {
		ChangeKind::Updated
	} else {
		match event.kind {
			FsEventKind::Created | FsEventKind::Modified | FsEventKind::Renamed
				if event.path.is_file() =>
			{
				return None;
			}
			FsEventKind::Created => ChangeKind::Appeared,
			FsEventKind::Modified => ChangeKind::Updated,
			FsEventKind::Deleted => ChangeKind::Disappeared,
			// Moved in or moved out, the disk tells which one
			FsEventKind::Renamed if event.path.is_dir() => ChangeKind::Appeared,
			FsEventKind::Renamed => ChangeKind::Disappeared,
		}
	};

	Some((name.to_string(), kind))
}

#[derive(Debug)]
struct PendingSignal {
	kind: ChangeKind,
	generation: u64,
	deadline: Instant,
	timer: JoinHandle<()>,
}

#[derive(Debug)]
struct TimerFired {
	name: String,
	generation: u64,
}

/// Owns one cancellable timer per service and turns bursts of raw events into
/// a single [`ServiceChanged`] per service.
#[derive(Debug)]
pub struct Debouncer {
	base_path: PathBuf,
	wait: Duration,
	timers: HashMap<String, PendingSignal>,
	next_generation: u64,
	fired_tx: chan::Sender<TimerFired>,
	fired_rx: chan::Receiver<TimerFired>,
	signals_tx: chan::Sender<ServiceChanged>,
}

impl Debouncer {
	pub fn new(
		base_path: impl Into<PathBuf>,
		wait: Duration,
		signals_tx: chan::Sender<ServiceChanged>,
	) -> Self {
		let (fired_tx, fired_rx) = chan::unbounded();

		Self {
			base_path: base_path.into(),
			wait,
			timers: HashMap::new(),
			next_generation: 0,
			fired_tx,
			fired_rx,
			signals_tx,
		}
	}

	/// Number of services with a live timer.
	pub fn pending(&self) -> usize {
		self.timers.len()
	}

	/// Feed a raw event, resetting the owning service's timer.
	///
	/// Returns the service and the change the event was classified as.
	pub fn push(&mut self, event: &FsEvent) -> Option<(String, ChangeKind)> {
		let (name, kind) = classify(&self.base_path, event)?;
		trace!(service = %name, %kind, path = %event.path.display(), "Classified event;");

		self.arm(name.clone(), kind);

		Some((name, kind))
	}

	fn arm(&mut self, name: String, kind: ChangeKind) {
		let deadline = Instant::now() + self.wait;
		let generation = self.next_generation;
		self.next_generation += 1;

		let kind = match self.timers.remove(&name) {
			Some(previous) => {
				previous.timer.abort();
				let merged = previous.kind.merge(kind);
				debug!(service = %name, kind = %merged, "Debounce timer reset;");
				merged
			}
			None => {
				debug!(service = %name, %kind, "Debounce timer armed;");
				kind
			}
		};

		let timer = spawn({
			let fired_tx = self.fired_tx.clone();
			let name = name.clone();
			async move {
				sleep_until(deadline).await;
				// Only fails when the debouncer itself is gone
				let _ = fired_tx.send(TimerFired { name, generation }).await;
			}
		});

		self.timers.insert(
			name,
			PendingSignal {
				kind,
				generation,
				deadline,
				timer,
			},
		);
	}

	async fn fire(&mut self, TimerFired { name, generation }: TimerFired) {
		// A timer that was reset after it already fired is stale
		if self
			.timers
			.get(&name)
			.map_or(true, |pending| pending.generation != generation)
		{
			trace!(service = %name, generation, "Discarding stale timer;");
			return;
		}

		let Some(pending) = self.timers.remove(&name) else {
			return;
		};

		debug!(service = %name, kind = %pending.kind, "Debounce window closed;");

		if self
			.signals_tx
			.send(ServiceChanged {
				name,
				kind: pending.kind,
				deadline: pending.deadline,
			})
			.await
			.is_err()
		{
			warn!("Controller is gone, dropping coalesced signal");
		}
	}

	/// Cancel every live timer, dropping their signals. Returns how many were cancelled.
	pub fn cancel_all(&mut self) -> usize {
		let cancelled = self.timers.len();
		for (_, pending) in self.timers.drain() {
			pending.timer.abort();
		}
		cancelled
	}

	/// Debounce `events_rx` until a stop signal arrives.
	#[instrument(name = "debouncer", skip_all, fields(base_path = %self.base_path.display(), wait = ?self.wait))]
	pub async fn run(mut self, events_rx: chan::Receiver<FsEvent>, stop_rx: chan::Receiver<()>) {
		enum StreamMessage {
			NewEvent(FsEvent),
			Fired(TimerFired),
			Stop,
		}

		let fired_rx = self.fired_rx.clone();

		let mut msg_stream = pin!((
			events_rx.map(StreamMessage::NewEvent),
			fired_rx.map(StreamMessage::Fired),
			stop_rx.map(|()| StreamMessage::Stop),
		)
			.merge());

		while let Some(msg) = msg_stream.next().await {
			match msg {
				StreamMessage::NewEvent(event) => {
					self.push(&event);
				}
				StreamMessage::Fired(fired) => self.fire(fired).await,
				StreamMessage::Stop => break,
			}
		}

		let cancelled = self.cancel_all();
		if cancelled > 0 {
			warn!(cancelled, "Debouncer stopped with pending timers, their changes are dropped;");
		} else {
			debug!("Debouncer stopped");
		}
	}
}

impl Drop for Debouncer {
	fn drop(&mut self) {
		self.cancel_all();
	}
}
