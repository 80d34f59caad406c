// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The `tup` binary: parses the CLI surface of spec.md §6 and dispatches to one `engine::Engine`
//! method per subcommand. Everything here is orchestration glue; the Graph Store, Scanner,
//! Parse/Execute Schedulers and Ghost Collector live in their own crates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use engine::Engine;
use execute_scheduler::local::LocalExecutor;
use parse_scheduler::line_parser::LineParser;

/// The `TUP_VARDICT` environment variable (spec.md §6): set by the core on every spawned rule
/// subprocess, so a `tup` binary invoked recursively from inside a rule command can tell it is
/// not a genuine top-level invocation and refuse to run.
const TUP_VARDICT_ENV: &str = "TUP_VARDICT";

#[derive(Parser)]
#[command(name = "tup", about = "A file-based build system with a persistent dependency graph")]
struct Cli {
  #[command(subcommand)]
  command: Command,

  /// The project directory to operate in (spec.md §9 "Sub-directory anchor"). Defaults to the
  /// current directory.
  #[arg(long, global = true)]
  dir: Option<PathBuf>,

  /// Suppress informational logging; only warnings and errors are printed.
  #[arg(long, global = true)]
  quiet: bool,
}

#[derive(Subcommand)]
enum Command {
  /// Create `.tup` and initialize the schema.
  Init,
  /// Run the Scanner, then the Ghost Collector.
  Scan,
  /// Stop after the Scanner (alias for `scan`'s graph-visible effects without a rebuild).
  Read,
  /// Drain the create-flag queue via the Parse Scheduler, then the Ghost Collector.
  Parse,
  /// Scanner (unless a Monitor is current) -> Parse Scheduler -> Execute Scheduler.
  Upd,
  /// Parse in refactor mode: any non-empty graph diff is a `RefactorViolation`.
  #[command(alias = "ref")]
  Refactor,
  /// Print the Commands that currently carry the modify-flag.
  Todo,
  /// Emit the current graph in `dot` format.
  Graph {
    /// Write to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
  },
  /// Create a variant directory linked to each given `tup.config`-style config file.
  Variant { config_files: Vec<PathBuf> },
}

fn main() {
  let cli = Cli::parse();

  if std::env::var(TUP_VARDICT_ENV).is_ok() {
    eprintln!(
      "tup: refusing to start a new top-level invocation from inside a rule command \
       ({TUP_VARDICT_ENV} is already set)"
    );
    exit(1);
  }

  let level = if cli.quiet { log::LevelFilter::Warn } else { log::LevelFilter::Info };
  // No terminal-detection crate appears anywhere in the retrieval pack for this purpose; this
  // colours unconditionally and leaves redirection to the shell, same as the teacher's `logging`.
  logging::init(level, true);

  let project_root = cli.dir.unwrap_or_else(|| PathBuf::from("."));

  let code = match run(&cli.command, &project_root) {
    Ok(()) => 0,
    Err(e) => {
      log::error!("{e}");
      e.exit_code()
    }
  };
  exit(code);
}

fn run(command: &Command, project_root: &Path) -> Result<(), engine::EngineError> {
  if let Command::Init = command {
    Engine::init(project_root)?;
    println!("initialized {}", project_root.join(".tup").display());
    return Ok(());
  }

  let engine = Engine::open(project_root)?;
  logging::set_log_file(&engine.dot_tup_dir().join("tup.log")).map_err(engine::EngineError::from)?;
  let env: HashMap<String, String> = std::env::vars().collect();
  let parser = LineParser;
  let executor = Arc::new(LocalExecutor);

  match command {
    Command::Init => unreachable!("handled above"),
    Command::Scan | Command::Read => {
      let report = engine.scan()?;
      println!(
        "scan: {} created, {} modified, {} ghosted, {} removed, {} directories visited{}",
        report.created,
        report.modified,
        report.ghosted,
        report.removed,
        report.directories_visited,
        if report.skipped { " (skipped: monitor is current)" } else { "" }
      );
      Ok(())
    }
    Command::Parse => {
      let report = engine.parse(&parser, &env)?;
      println!("parse: {} directories parsed, {} errors", report.parsed, report.errors.len());
      if !report.errors.is_empty() {
        exit(1);
      }
      Ok(())
    }
    Command::Refactor => {
      let report = engine.parse_refactor(&parser, &env)?;
      if report.errors.is_empty() {
        println!("refactor: no-op, graph unchanged");
        Ok(())
      } else {
        for (dir, err) in &report.errors {
          log::error!("{}: {err}", dir.display());
        }
        exit(1);
      }
    }
    Command::Upd => {
      let report = engine.upd(&parser, executor, &env)?;
      println!(
        "upd: scan({} created, {} modified) parse({} dirs) exec({} run, {} failed, {} upstream-failed, {} remaining)",
        report.scan.created,
        report.scan.modified,
        report.parse.parsed,
        report.exec.executed,
        report.exec.failed,
        report.exec.upstream_failed,
        report.exec.remaining,
      );
      if report.exec.failed > 0 || !report.parse.errors.is_empty() {
        exit(1);
      }
      Ok(())
    }
    Command::Todo => {
      for command in engine.todo()? {
        println!("{command}");
      }
      Ok(())
    }
    Command::Graph { output } => {
      match output {
        Some(path) => {
          let mut file = std::fs::File::create(path).map_err(engine::EngineError::from)?;
          engine.graph(&mut file)?;
        }
        None => {
          let mut stdout = std::io::stdout();
          engine.graph(&mut stdout)?;
        }
      }
      Ok(())
    }
    Command::Variant { config_files } => {
      for config_file in config_files {
        let variant_id = engine.variant(config_file)?;
        println!("{}: variant node {}", config_file.display(), variant_id);
      }
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser as _;

  fn parse(args: &[&str]) -> Cli {
    let mut full_args = vec!["tup"];
    full_args.extend(args);
    Cli::try_parse_from(full_args).unwrap()
  }

  #[test]
  fn upd_takes_the_global_dir_flag() {
    let cli = parse(&["--dir", "/srv/project", "upd"]);
    assert_eq!(cli.dir, Some(PathBuf::from("/srv/project")));
    assert!(matches!(cli.command, Command::Upd));
  }

  #[test]
  fn ref_is_an_alias_for_refactor() {
    let cli = parse(&["ref"]);
    assert!(matches!(cli.command, Command::Refactor));
  }

  #[test]
  fn graph_accepts_an_optional_output_path() {
    let cli = parse(&["graph", "--output", "out.dot"]);
    match cli.command {
      Command::Graph { output } => assert_eq!(output, Some(PathBuf::from("out.dot"))),
      _ => panic!("expected Graph"),
    }

    let cli = parse(&["graph"]);
    match cli.command {
      Command::Graph { output } => assert_eq!(output, None),
      _ => panic!("expected Graph"),
    }
  }

  #[test]
  fn variant_collects_one_or_more_config_files() {
    let cli = parse(&["variant", "a/tup.config", "b/tup.config"]);
    match cli.command {
      Command::Variant { config_files } => {
        assert_eq!(config_files, vec![PathBuf::from("a/tup.config"), PathBuf::from("b/tup.config")]);
      }
      _ => panic!("expected Variant"),
    }
  }

  #[test]
  fn quiet_defaults_to_false() {
    let cli = parse(&["scan"]);
    assert!(!cli.quiet);
  }
}
