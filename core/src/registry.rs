use crate::{LifecycleState, Service};

use std::{collections::HashMap, mem, path::PathBuf, time::SystemTime};

use tokio::{sync::RwLock, time::Instant};

/// Authoritative in-memory map of known services.
///
/// Readers always get cloned snapshots. Lifecycle fields are only written by
/// the controller, through the crate-private setters.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
	services: RwLock<HashMap<String, Service>>,
}

impl ServiceRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a new service in the `absent` state, or update the path of a known one.
	pub async fn upsert(&self, name: impl Into<String>, path: impl Into<PathBuf>) -> Service {
		let name = name.into();
		let path = path.into();

		self.services
			.write()
			.await
			.entry(name.clone())
			.and_modify(|service| service.path.clone_from(&path))
			.or_insert_with(|| Service::new(name, path))
			.clone()
	}

	pub async fn remove(&self, name: &str) -> Option<Service> {
		self.services.write().await.remove(name)
	}

	pub async fn get(&self, name: &str) -> Option<Service> {
		self.services.read().await.get(name).cloned()
	}

	/// Snapshot of every service, sorted by name.
	pub async fn list_all(&self) -> Vec<Service> {
		let mut services = self
			.services
			.read()
			.await
			.values()
			.cloned()
			.collect::<Vec<_>>();

		services.sort_unstable_by(|a, b| a.name.cmp(&b.name));
		services
	}

	pub async fn len(&self) -> usize {
		self.services.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.services.read().await.is_empty()
	}

	async fn update<T>(&self, name: &str, update: impl FnOnce(&mut Service) -> T + Send) -> Option<T> {
		self.services.write().await.get_mut(name).map(update)
	}

	/// Returns the previous state, or `None` for unknown services.
	pub(crate) async fn set_state(&self, name: &str, state: LifecycleState) -> Option<LifecycleState> {
		self.update(name, |service| mem::replace(&mut service.state, state))
			.await
	}

	pub(crate) async fn set_pending_restart(&self, name: &str, pending: bool) -> Option<()> {
		self.update(name, |service| service.pending_restart = pending)
			.await
	}

	pub(crate) async fn record_debounce_deadline(&self, name: &str, deadline: Instant) -> Option<()> {
		self.update(name, |service| {
			service.last_debounce_deadline = Some(deadline);
		})
		.await
	}

	pub(crate) async fn record_compose_file_modified(
		&self,
		name: &str,
		modified: Option<SystemTime>,
	) -> Option<()> {
		self.update(name, |service| service.compose_file_modified = modified)
			.await
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn upsert_inserts_absent_services() {
		let registry = ServiceRegistry::new();

		let service = registry.upsert("web", "/srv/web").await;

		assert_eq!(service.name, "web");
		assert_eq!(service.path, PathBuf::from("/srv/web"));
		assert_eq!(service.state, LifecycleState::Absent);
		assert!(!service.pending_restart);
		assert_eq!(registry.get("web").await, Some(service));
	}

	#[tokio::test]
	async fn upsert_keeps_lifecycle_of_known_services() {
		let registry = ServiceRegistry::new();
		registry.upsert("web", "/srv/web").await;
		assert_eq!(
			registry.set_state("web", LifecycleState::Running).await,
			Some(LifecycleState::Absent)
		);

		let service = registry.upsert("web", "/mnt/web").await;

		assert_eq!(service.state, LifecycleState::Running);
		assert_eq!(service.path, PathBuf::from("/mnt/web"));
		assert_eq!(registry.len().await, 1);
	}

	#[tokio::test]
	async fn remove_and_list() {
		let registry = ServiceRegistry::new();
		registry.upsert("b", "/srv/b").await;
		registry.upsert("a", "/srv/a").await;
		registry.upsert("c", "/srv/c").await;

		let removed = registry.remove("b").await.unwrap();
		assert_eq!(removed.name, "b");
		assert!(registry.remove("b").await.is_none());

		let names = registry
			.list_all()
			.await
			.into_iter()
			.map(|service| service.name)
			.collect::<Vec<_>>();
		assert_eq!(names, ["a", "c"]);
	}

	#[tokio::test]
	async fn setters_ignore_unknown_services() {
		let registry = ServiceRegistry::new();

		assert_eq!(registry.set_state("ghost", LifecycleState::Running).await, None);
		assert_eq!(registry.set_pending_restart("ghost", true).await, None);
		assert!(registry.is_empty().await);
	}

	#[tokio::test]
	async fn snapshots_do_not_alias_the_registry() {
		let registry = ServiceRegistry::new();
		registry.upsert("web", "/srv/web").await;

		let mut snapshot = registry.get("web").await.unwrap();
		snapshot.state = LifecycleState::Failed;

		assert_eq!(
			registry.get("web").await.unwrap().state,
			LifecycleState::Absent
		);
	}
}
