// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A scripted [`CommandExecutor`] for exercising the scheduler's own logic without spawning real
//! subprocesses, grounded on the teacher's `process_execution::InstrumentedProcessExecutor` test
//! doubles. Kept public so the planned engine-level integration tests can reuse it.

use std::collections::HashMap;
use std::sync::Mutex;

use executor_iface::{CommandExecutor, ExecRequest, ExecResult, ObservedPath};

/// Records every request it receives and answers from a table of scripted responses keyed by
/// command string. A command with no scripted response defaults to `LocalExecutor`'s convention:
/// exit 0, declared inputs/outputs reported back as observed.
pub struct MockExecutor {
  responses: Mutex<HashMap<String, ExecResult>>,
  calls: Mutex<Vec<ExecRequest>>,
}

impl MockExecutor {
  pub fn new() -> MockExecutor {
    MockExecutor { responses: Mutex::new(HashMap::new()), calls: Mutex::new(Vec::new()) }
  }

  pub fn set_response(&self, command: &str, result: ExecResult) {
    self.responses.lock().unwrap().insert(command.to_string(), result);
  }

  pub fn calls(&self) -> Vec<ExecRequest> {
    self.calls.lock().unwrap().clone()
  }
}

impl Default for MockExecutor {
  fn default() -> MockExecutor {
    MockExecutor::new()
  }
}

impl CommandExecutor for MockExecutor {
  fn execute(&self, request: &ExecRequest) -> Result<ExecResult, String> {
    self.calls.lock().unwrap().push(request.clone());

    if let Some(scripted) = self.responses.lock().unwrap().get(&request.command) {
      return Ok(scripted.clone());
    }

    let reads = request.declared_inputs.iter().cloned().map(ObservedPath::Internal).collect();
    let writes = request.declared_outputs.iter().cloned().map(ObservedPath::Internal).collect();
    Ok(ExecResult { exit_status: 0, reads, writes, stderr: Vec::new() })
  }
}
