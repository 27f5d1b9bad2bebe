#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

use cs_core::{ComposeAction, ComposeError, ComposeExecutor, LifecycleState, ServiceRegistry};

use std::{
	collections::{HashMap, HashSet},
	path::Path,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Mutex,
	},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use tokio::time::{sleep, timeout, Instant};

pub const PATIENCE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
	pub action: ComposeAction,
	pub service: String,
}

impl Call {
	pub fn new(action: ComposeAction, service: &str) -> Self {
		Self {
			action,
			service: service.to_string(),
		}
	}
}

/// Executor double that records every action instead of running compose.
///
/// Actions take `delay` to finish unless the service has its own delay,
/// services listed as failing always fail, and overlapping actions on the
/// same service are tracked.
pub struct RecordingExecutor {
	delay: Duration,
	delays: HashMap<String, Duration>,
	failing: HashSet<String>,
	calls_tx: chan::Sender<Call>,
	active: Mutex<HashMap<String, usize>>,
	max_overlap: AtomicUsize,
}

impl RecordingExecutor {
	pub fn new(delay: Duration) -> (Self, chan::Receiver<Call>) {
		let (calls_tx, calls_rx) = chan::unbounded();

		(
			Self {
				delay,
				delays: HashMap::new(),
				failing: HashSet::new(),
				calls_tx,
				active: Mutex::new(HashMap::new()),
				max_overlap: AtomicUsize::new(0),
			},
			calls_rx,
		)
	}

	#[must_use]
	pub fn failing(mut self, service: &str) -> Self {
		self.failing.insert(service.to_string());
		self
	}

	#[must_use]
	pub fn slow(mut self, service: &str, delay: Duration) -> Self {
		self.delays.insert(service.to_string(), delay);
		self
	}

	/// Most actions ever seen running at once for a single service.
	pub fn max_overlap(&self) -> usize {
		self.max_overlap.load(Ordering::SeqCst)
	}

	async fn record(&self, action: ComposeAction, service_path: &Path) -> Result<(), ComposeError> {
		let service = service_path
			.file_name()
			.unwrap()
			.to_string_lossy()
			.into_owned();

		{
			let mut active = self.active.lock().unwrap();
			let count = active.entry(service.clone()).or_default();
			*count += 1;
			self.max_overlap.fetch_max(*count, Ordering::SeqCst);
		}

		self.calls_tx
			.send(Call {
				action,
				service: service.clone(),
			})
			.await
			.unwrap();

		sleep(self.delays.get(&service).copied().unwrap_or(self.delay)).await;

		*self.active.lock().unwrap().get_mut(&service).unwrap() -= 1;

		if self.failing.contains(&service) {
			Err(ComposeError::Failed {
				action,
				code: Some(1),
				output: format!("{service} is broken"),
			})
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl ComposeExecutor for RecordingExecutor {
	async fn up(&self, service_path: &Path) -> Result<(), ComposeError> {
		self.record(ComposeAction::Up, service_path).await
	}

	async fn down(&self, service_path: &Path) -> Result<(), ComposeError> {
		self.record(ComposeAction::Down, service_path).await
	}

	async fn restart(&self, service_path: &Path) -> Result<(), ComposeError> {
		self.record(ComposeAction::Restart, service_path).await
	}
}

pub async fn next_call(calls_rx: &chan::Receiver<Call>) -> Call {
	timeout(PATIENCE, calls_rx.recv())
		.await
		.expect("no compose action arrived in time")
		.unwrap()
}

/// Assert no compose action arrives for `quiet`.
pub async fn assert_no_call(calls_rx: &chan::Receiver<Call>, quiet: Duration) {
	if let Ok(Ok(call)) = timeout(quiet, calls_rx.recv()).await {
		panic!("unexpected compose action: {call:?}");
	}
}

/// Poll until `service` reaches `state`; `None` waits for it to be forgotten.
pub async fn wait_for_state(registry: &ServiceRegistry, service: &str, state: Option<LifecycleState>) {
	let deadline = Instant::now() + PATIENCE;

	loop {
		let current = registry.get(service).await.map(|service| service.state);
		if current == state {
			return;
		}

		assert!(
			Instant::now() < deadline,
			"{service} stuck in {current:?}, expected {state:?}"
		);

		sleep(Duration::from_millis(10)).await;
	}
}
