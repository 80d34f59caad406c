// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `LocalExecutor`: a [`CommandExecutor`] that actually spawns the declared command via
//! `std::process::Command`, grounded on the teacher's `process_execution::local::CommandRunner`
//! local-execution shape (spawn a child rooted at the working directory, capture its output).
//! True observed-I/O tracing requires a sandboxing layer that spec.md §1 places out of scope, so
//! this stand-in reports its declared inputs/outputs as the observed `reads`/`writes` set; see
//! the crate-level docs for how the scheduler's own validation logic is exercised independently
//! of that simplification.

use std::process::Command;

use executor_iface::{CommandExecutor, ExecRequest, ExecResult, ObservedPath};

/// The environment variable a recursively-invoked `tup` uses to refuse to run as anything but a
/// rule subprocess (spec.md §6).
pub const TUP_VARDICT_ENV: &str = "TUP_VARDICT";

pub struct LocalExecutor;

impl CommandExecutor for LocalExecutor {
  fn execute(&self, request: &ExecRequest) -> Result<ExecResult, String> {
    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(&request.command);
    command.current_dir(&request.working_dir);
    command.env_clear();
    command.envs(&request.env);
    command.env(TUP_VARDICT_ENV, "1");

    let output = command
      .output()
      .map_err(|e| format!("failed to spawn {:?} in {}: {e}", request.command, request.working_dir.display()))?;

    let exit_status = output.status.code().unwrap_or(-1);
    let reads = request.declared_inputs.iter().cloned().map(ObservedPath::Internal).collect();
    let writes = request.declared_outputs.iter().cloned().map(ObservedPath::Internal).collect();
    Ok(ExecResult { exit_status, reads, writes, stderr: output.stderr })
  }
}
