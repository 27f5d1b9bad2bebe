use crate::{find_compose_file, project_name, ComposeAction, ComposeError, ComposeExecutor};

use std::{
	ffi::OsString,
	path::{Path, PathBuf},
	process::Stdio,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

const DEFAULT_PROGRAM: &str = "docker";

/// [`ComposeExecutor`] backed by the `docker compose` plugin.
///
/// Every call spawns a fresh process that is killed if the returned future is
/// dropped, so wrapping a call in a timeout also bounds the external process.
#[derive(Debug, Clone)]
pub struct DockerCompose {
	program: String,
	program_args: Vec<String>,
}

impl Default for DockerCompose {
	fn default() -> Self {
		Self::new(DEFAULT_PROGRAM)
	}
}

impl DockerCompose {
	/// `program` is invoked as `<program> compose ...`.
	pub fn new(program: impl Into<String>) -> Self {
		Self::with_program_args(program, ["compose"])
	}

	/// Fully custom invocation prefix, e.g. `podman compose` or a standalone `docker-compose`
	/// binary with no arguments.
	pub fn with_program_args(
		program: impl Into<String>,
		program_args: impl IntoIterator<Item = impl Into<String>>,
	) -> Self {
		Self {
			program: program.into(),
			program_args: program_args.into_iter().map(Into::into).collect(),
		}
	}

	fn project_args(
		service_path: &Path,
		compose_file: Option<&Path>,
	) -> Result<Vec<OsString>, ComposeError> {
		let mut args = vec!["--project-name".into(), project_name(service_path)?.into()];

		if let Some(compose_file) = compose_file {
			args.push("--project-directory".into());
			args.push(service_path.into());
			args.push("--file".into());
			args.push(compose_file.into());
		}

		Ok(args)
	}

	#[instrument(skip(self, args), fields(program = %self.program))]
	async fn execute(
		&self,
		action: ComposeAction,
		service_path: &Path,
		args: Vec<OsString>,
	) -> Result<(), ComposeError> {
		debug!(?args, "Running compose;");

		let mut command = Command::new(&self.program);
		command
			.args(&self.program_args)
			.args(args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		// A deleted service folder can't be the working directory anymore
		if service_path.is_dir() {
			command.current_dir(service_path);
		}

		let output = command
			.output()
			.await
			.map_err(|source| ComposeError::Spawn {
				program: self.program.clone(),
				source,
			})?;

		if output.status.success() {
			Ok(())
		} else {
			Err(ComposeError::Failed {
				action,
				code: output.status.code(),
				output: collect_output(&output.stderr, &output.stdout),
			})
		}
	}
}

#[async_trait]
impl ComposeExecutor for DockerCompose {
	async fn up(&self, service_path: &Path) -> Result<(), ComposeError> {
		let compose_file = find_compose_file(service_path)
			.ok_or_else(|| ComposeError::MissingComposeFile(service_path.to_path_buf()))?;

		let mut args = Self::project_args(service_path, Some(&compose_file))?;
		args.extend(["up", "--detach", "--remove-orphans"].map(OsString::from));

		self.execute(ComposeAction::Up, service_path, args).await
	}

	async fn down(&self, service_path: &Path) -> Result<(), ComposeError> {
		// Without a compose file, compose resolves the project from its name alone,
		// which is what stops the containers of a folder that was just deleted.
		let compose_file: Option<PathBuf> = find_compose_file(service_path);

		let project_args = Self::project_args(service_path, compose_file.as_deref())?;

		// `down` leaves anonymous volumes behind, they go with their containers
		let mut rm_args = project_args.clone();
		rm_args.extend(["rm", "--stop", "--force", "--volumes"].map(OsString::from));
		if let Err(e) = self.execute(ComposeAction::Down, service_path, rm_args).await {
			warn!(%e, "Unable to remove containers with their anonymous volumes, taking the project down anyway;");
		}

		let mut args = project_args;
		args.extend(["down", "--remove-orphans"].map(OsString::from));

		self.execute(ComposeAction::Down, service_path, args).await
	}
}

fn collect_output(stderr: &[u8], stdout: &[u8]) -> String {
	[stderr, stdout]
		.iter()
		.map(|stream| String::from_utf8_lossy(stream).trim().to_string())
		.filter(|stream| !stream.is_empty())
		.collect::<Vec<_>>()
		.join("\n")
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
	use super::*;

	use std::fs;

	use tempfile::tempdir;

	/// Runs `script` through `sh`; the compose arguments end up in `$@`.
	fn scripted(script: &str) -> DockerCompose {
		DockerCompose::with_program_args("sh", ["-c", script, "compose"])
	}

	fn service_dir(root: &Path, name: &str) -> PathBuf {
		let path = root.join(name);
		fs::create_dir(&path).unwrap();
		fs::write(path.join("compose.yaml"), "services: {}\n").unwrap();
		path
	}

	#[tokio::test]
	async fn up_passes_project_context() {
		let root = tempdir().unwrap();
		let service = service_dir(root.path(), "Web");

		let result = scripted(r#"echo "$@"; exit 3"#).up(&service).await;

		let Err(ComposeError::Failed {
			action,
			code,
			output,
		}) = result
		else {
			panic!("expected a failed up action");
		};

		assert_eq!(action, ComposeAction::Up);
		assert_eq!(code, Some(3));
		assert_eq!(
			output,
			format!(
				"--project-name web --project-directory {dir} --file {dir}/compose.yaml up --detach --remove-orphans",
				dir = service.display()
			)
		);
	}

	#[tokio::test]
	async fn up_without_compose_file_fails_before_spawning() {
		let root = tempdir().unwrap();
		let service = root.path().join("broken");
		fs::create_dir(&service).unwrap();
		fs::write(service.join("README"), "not a compose project").unwrap();

		let result = scripted("exit 0").up(&service).await;

		assert!(matches!(result, Err(ComposeError::MissingComposeFile(path)) if path == service));
	}

	#[tokio::test]
	async fn down_of_deleted_folder_uses_project_name_only() {
		let root = tempdir().unwrap();
		let service = root.path().join("gone");

		let result = scripted(r#"echo "$@" >&2; exit 1"#).down(&service).await;

		assert!(matches!(
			result,
			Err(ComposeError::Failed { action: ComposeAction::Down, output, .. })
				if output == "--project-name gone down --remove-orphans"
		));
	}

	#[tokio::test]
	async fn down_removes_anonymous_volumes_before_taking_project_down() {
		let root = tempdir().unwrap();
		let service = service_dir(root.path(), "db");
		let log = root.path().join("calls.log");

		let script = format!(r#"echo "$@" >> '{}'"#, log.display());
		scripted(&script).down(&service).await.unwrap();

		let project = format!(
			"--project-name db --project-directory {dir} --file {dir}/compose.yaml",
			dir = service.display()
		);
		assert_eq!(
			fs::read_to_string(&log).unwrap(),
			format!("{project} rm --stop --force --volumes\n{project} down --remove-orphans\n")
		);
	}

	#[tokio::test]
	async fn down_still_runs_when_container_removal_fails() {
		let root = tempdir().unwrap();
		let service = service_dir(root.path(), "db");
		let log = root.path().join("calls.log");

		let script = format!(
			r#"case "$*" in *" rm "*) exit 1;; esac; echo "$@" >> '{}'"#,
			log.display()
		);
		scripted(&script).down(&service).await.unwrap();

		assert!(fs::read_to_string(&log)
			.unwrap()
			.ends_with("down --remove-orphans\n"));
	}

	#[tokio::test]
	async fn successful_actions() {
		let root = tempdir().unwrap();
		let service = service_dir(root.path(), "db");
		let compose = scripted("exit 0");

		compose.up(&service).await.unwrap();
		compose.down(&service).await.unwrap();
		compose.restart(&service).await.unwrap();
		compose.run(ComposeAction::Restart, &service).await.unwrap();
	}

	#[tokio::test]
	async fn restart_stops_before_starting() {
		let root = tempdir().unwrap();
		let service = service_dir(root.path(), "db");
		let log = root.path().join("calls.log");

		let script = format!(
			r#"for arg in "$@"; do case $arg in up|down) echo $arg >> '{}';; esac; done"#,
			log.display()
		);
		scripted(&script).restart(&service).await.unwrap();

		assert_eq!(fs::read_to_string(&log).unwrap(), "down\nup\n");
	}

	#[tokio::test]
	async fn missing_program_is_a_spawn_error() {
		let root = tempdir().unwrap();
		let service = service_dir(root.path(), "db");

		let result = DockerCompose::new("/nonexistent/docker").up(&service).await;

		assert!(matches!(result, Err(ComposeError::Spawn { program, .. }) if program == "/nonexistent/docker"));
	}

	#[test]
	fn output_prefers_stderr_and_skips_empty_streams() {
		assert_eq!(collect_output(b"  boom\n", b""), "boom");
		assert_eq!(collect_output(b"warn", b"detail\n"), "warn\ndetail");
		assert_eq!(collect_output(b"", b""), "");
	}
}
