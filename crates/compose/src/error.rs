use crate::ComposeAction;

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComposeError {
	#[error("no compose file found in service folder: <path='{}'>", .0.display())]
	MissingComposeFile(PathBuf),
	#[error("folder name can't be used as a compose project name: <name='{0}'>")]
	InvalidProjectName(String),
	#[error("unable to run compose program: <program='{program}'>")]
	Spawn {
		program: String,
		#[source]
		source: io::Error,
	},
	#[error("compose {action} exited with {}: {output}", exit_code_display(.code))]
	Failed {
		action: ComposeAction,
		code: Option<i32>,
		output: String,
	},
}

fn exit_code_display(code: &Option<i32>) -> String {
	code.map_or_else(
		|| "no exit code (killed by signal)".to_string(),
		|code| format!("code {code}"),
	)
}
