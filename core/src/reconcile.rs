//! Brings the registry in line with what is on disk.
//!
//! Runs once at startup, and again whenever the watch on the base path is
//! re-established, since changes made while the watch was down produced no
//! events at all.

use crate::{ChangeKind, ServiceChanged, ServiceRegistry, SupervisorError};

use cs_compose::compose_file_modified;

use std::path::Path;

use tokio::fs;
use tracing::{debug, trace, warn};

/// Names of the service folders currently under `base_path`, sorted.
///
/// Hidden entries, regular files and names that aren't valid UTF-8 are skipped.
pub async fn scan_services(base_path: &Path) -> Result<Vec<String>, SupervisorError> {
	let scan_error = |source| SupervisorError::Scan {
		path: base_path.to_path_buf(),
		source,
	};

	let mut read_dir = fs::read_dir(base_path).await.map_err(scan_error)?;
	let mut names = vec![];

	while let Some(entry) = read_dir.next_entry().await.map_err(scan_error)? {
		let Ok(name) = entry.file_name().into_string() else {
			warn!(path = %entry.path().display(), "Ignoring service folder with a non UTF-8 name;");
			continue;
		};

		if name.starts_with('.') {
			trace!(%name, "Skipping hidden entry;");
			continue;
		}

		// Follows symlinks, a linked service folder is still a service
		match fs::metadata(entry.path()).await {
			Ok(metadata) if metadata.is_dir() => names.push(name),
			Ok(_) => trace!(%name, "Skipping top-level file;"),
			Err(e) => warn!(%name, ?e, "Unable to stat entry, skipping it;"),
		}
	}

	names.sort_unstable();
	Ok(names)
}

/// Upsert every service folder on disk and produce the signals that bring
/// the controller up to date.
///
/// Folders on disk get an `appeared` signal, which the controller ignores for
/// services already running. Running services whose compose file no longer
/// matches the one they were started from get `updated` instead. Registered
/// services whose folder is gone get a `disappeared` signal.
pub async fn reconcile(
	base_path: &Path,
	registry: &ServiceRegistry,
) -> Result<Vec<ServiceChanged>, SupervisorError> {
	let on_disk = scan_services(base_path).await?;

	let mut signals = Vec::with_capacity(on_disk.len());

	for service in registry.list_all().await {
		if on_disk.binary_search(&service.name).is_err() {
			debug!(service = %service.name, "Registered service has no folder anymore;");
			signals.push(ServiceChanged::new(service.name, ChangeKind::Disappeared));
		}
	}

	for name in on_disk {
		let path = base_path.join(&name);
		let service = registry.upsert(name.clone(), path.clone()).await;

		let kind = if service.state.is_running()
			&& service.compose_file_modified != compose_file_modified(&path)
		{
			debug!(service = %name, "Compose file changed while unwatched;");
			ChangeKind::Updated
		} else {
			ChangeKind::Appeared
		};

		signals.push(ServiceChanged::new(name, kind));
	}

	Ok(signals)
}
