use crate::ComposeError;

use std::path::Path;

use async_trait::async_trait;
use strum::Display;

/// Lifecycle action invoked against a compose project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ComposeAction {
	Up,
	Down,
	Restart,
}

/// Runs compose lifecycle actions for a single service folder.
///
/// Implementations must be idempotent: `up` on a running project and `down`
/// on a stopped (or already deleted) one both succeed. Calls may take as long
/// as the external tool needs, callers are expected to bound them.
#[async_trait]
pub trait ComposeExecutor: Send + Sync + 'static {
	async fn up(&self, service_path: &Path) -> Result<(), ComposeError>;

	async fn down(&self, service_path: &Path) -> Result<(), ComposeError>;

	/// Recreates the project from scratch, so changes to the compose file, `.env`
	/// or any other file-based config are always picked up.
	async fn restart(&self, service_path: &Path) -> Result<(), ComposeError> {
		self.down(service_path).await?;
		self.up(service_path).await
	}

	async fn run(&self, action: ComposeAction, service_path: &Path) -> Result<(), ComposeError> {
		match action {
			ComposeAction::Up => self.up(service_path).await,
			ComposeAction::Down => self.down(service_path).await,
			ComposeAction::Restart => self.restart(service_path).await,
		}
	}
}
