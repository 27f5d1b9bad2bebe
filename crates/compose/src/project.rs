//! Mapping between a service folder and its compose project.

use crate::ComposeError;

use std::{
	path::{Path, PathBuf},
	time::SystemTime,
};

/// File names compose looks for in a project directory, in lookup order.
pub const COMPOSE_FILE_NAMES: [&str; 4] = [
	"compose.yaml",
	"compose.yml",
	"docker-compose.yaml",
	"docker-compose.yml",
];

/// Compose file of the service folder, if it has one.
pub fn find_compose_file(service_path: &Path) -> Option<PathBuf> {
	COMPOSE_FILE_NAMES
		.iter()
		.map(|name| service_path.join(name))
		.find(|path| path.is_file())
}

/// Last modification time of the service's compose file.
pub fn compose_file_modified(service_path: &Path) -> Option<SystemTime> {
	find_compose_file(service_path)
		.and_then(|path| path.metadata().ok())
		.and_then(|metadata| metadata.modified().ok())
}

/// Compose project name for a service folder.
///
/// Compose only accepts lowercase alphanumerics, `-` and `_`, starting with a
/// letter or digit, so the folder name is normalized the same way compose
/// normalizes directory names.
pub fn project_name(service_path: &Path) -> Result<String, ComposeError> {
	let folder_name = service_path
		.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_default();

	let normalized = folder_name
		.to_lowercase()
		.chars()
		.filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
		.collect::<String>()
		.trim_start_matches(['-', '_'])
		.to_string();

	if normalized.is_empty() {
		Err(ComposeError::InvalidProjectName(folder_name))
	} else {
		Ok(normalized)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	use std::fs;

	use tempfile::tempdir;

	#[test]
	fn project_names_follow_compose_rules() {
		assert_eq!(project_name(Path::new("/srv/web")).unwrap(), "web");
		assert_eq!(project_name(Path::new("/srv/Node-RED")).unwrap(), "node-red");
		assert_eq!(project_name(Path::new("/srv/my app.v2")).unwrap(), "myappv2");
		assert_eq!(project_name(Path::new("/srv/_db")).unwrap(), "db");
	}

	#[test]
	fn unusable_folder_names_are_rejected() {
		assert!(matches!(
			project_name(Path::new("/srv/...")),
			Err(ComposeError::InvalidProjectName(name)) if name == "..."
		));
		assert!(matches!(
			project_name(Path::new("/")),
			Err(ComposeError::InvalidProjectName(_))
		));
	}

	#[test]
	fn compose_file_lookup_order() {
		let dir = tempdir().unwrap();
		assert_eq!(find_compose_file(dir.path()), None);
		assert_eq!(compose_file_modified(dir.path()), None);

		fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").unwrap();
		assert_eq!(
			find_compose_file(dir.path()),
			Some(dir.path().join("docker-compose.yml"))
		);

		fs::write(dir.path().join("compose.yaml"), "services: {}\n").unwrap();
		assert_eq!(
			find_compose_file(dir.path()),
			Some(dir.path().join("compose.yaml"))
		);
		assert!(compose_file_modified(dir.path()).is_some());
	}

	#[test]
	fn directories_are_not_compose_files() {
		let dir = tempdir().unwrap();
		fs::create_dir(dir.path().join("compose.yaml")).unwrap();

		assert_eq!(find_compose_file(dir.path()), None);
	}
}
