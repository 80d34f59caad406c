// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A small line-oriented declaration format sufficient to drive the end-to-end scenarios of
//! spec.md §8 and to give [`parser_iface::Parser`] a real, testable implementation. It is
//! explicitly not a reimplementation of Tup's expression language (spec.md §1 Non-goal): no
//! `foreach`, no `ifeq`, no recursive Tupfile includes.
//!
//! Grammar, one non-blank, non-`#` line at a time:
//! - `group(NAME)` declares a group.
//! - `!PATTERN` declares a gitignore-style exclusion for this directory.
//! - `reparse DIR` asks that `DIR` (relative to the project root) be re-parsed too.
//! - `: inputs |> command |> outputs` declares a rule. An input or output token wrapped in
//!   `<angle brackets>` names a group instead of a path; an output token suffixed with `?` is
//!   optional (need not be written by a successful run).

use parser_iface::{CommandDecl, Declarations, EnvSnapshot, GroupDecl, ParseError, Parser};
use store::vars::VarDb;

pub struct LineParser;

fn substitute_env(template: &str, env: &EnvSnapshot) -> String {
  let mut out = String::with_capacity(template.len());
  let mut rest = template;
  while let Some(start) = rest.find('$') {
    out.push_str(&rest[..start]);
    let after = &rest[start + 1..];
    let end = after
      .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
      .unwrap_or(after.len());
    if end == 0 {
      out.push('$');
      rest = after;
      continue;
    }
    let name = &after[..end];
    if let Some(value) = env.get(name) {
      out.push_str(value);
    } else {
      out.push('$');
      out.push_str(name);
    }
    rest = &after[end..];
  }
  out.push_str(rest);
  out
}

fn group_name(token: &str) -> Option<&str> {
  token.strip_prefix('<').and_then(|rest| rest.strip_suffix('>'))
}

impl Parser for LineParser {
  fn parse(
    &self,
    dir_path: &str,
    tupfile_contents: &str,
    vardb: &VarDb,
    env: &EnvSnapshot,
  ) -> Result<Declarations, ParseError> {
    let mut decls = Declarations::default();

    for (idx, raw_line) in tupfile_contents.lines().enumerate() {
      let line_no = idx + 1;
      let line = raw_line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }

      if let Some(name) = line.strip_prefix("group(").and_then(|rest| rest.strip_suffix(')')) {
        decls.groups.push(GroupDecl { name: name.trim().to_string() });
        continue;
      }

      if let Some(pattern) = line.strip_prefix('!') {
        decls.exclusions.push(pattern.trim().to_string());
        continue;
      }

      if let Some(dir) = line.strip_prefix("reparse ") {
        decls.reparse_dirs.push(dir.trim().to_string());
        continue;
      }

      let parts: Vec<&str> = line.splitn(3, "|>").collect();
      let [inputs_part, command_part, outputs_part] = parts.as_slice() else {
        return Err(ParseError {
          file: format!("{dir_path}/Tupfile"),
          line: line_no,
          message: format!("expected \": inputs |> command |> outputs\", got {line:?}"),
        });
      };

      let inputs_part = inputs_part.trim().trim_start_matches(':').trim();
      let mut inputs = Vec::new();
      let mut group_inputs = Vec::new();
      for token in inputs_part.split_whitespace() {
        match group_name(token) {
          Some(name) => group_inputs.push(name.to_string()),
          None => inputs.push(vardb.substitute(token)),
        }
      }

      let command = substitute_env(&vardb.substitute(command_part.trim()), env);
      if command.is_empty() {
        return Err(ParseError {
          file: format!("{dir_path}/Tupfile"),
          line: line_no,
          message: "empty command".to_string(),
        });
      }

      let mut outputs = Vec::new();
      let mut optional_outputs = Vec::new();
      let mut group_output = None;
      for token in outputs_part.trim().split_whitespace() {
        if let Some(name) = group_name(token) {
          group_output = Some(name.to_string());
          continue;
        }
        let substituted = vardb.substitute(token);
        if let Some(name) = substituted.strip_suffix('?') {
          optional_outputs.push(name.to_string());
          outputs.push(name.to_string());
        } else {
          outputs.push(substituted);
        }
      }
      if outputs.is_empty() {
        return Err(ParseError {
          file: format!("{dir_path}/Tupfile"),
          line: line_no,
          message: "a rule must declare at least one output".to_string(),
        });
      }

      decls.commands.push(CommandDecl {
        command,
        display: None,
        inputs,
        outputs,
        optional_outputs,
        group_inputs,
        group_output,
      });
    }

    Ok(decls)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn empty_env() -> EnvSnapshot {
    HashMap::new()
  }

  #[test]
  fn parses_a_hello_world_rule() {
    let decls = LineParser
      .parse("", ": hello.c |> gcc %f -o %o |> hello", &VarDb::default(), &empty_env())
      .unwrap();
    assert_eq!(decls.commands.len(), 1);
    let cmd = &decls.commands[0];
    assert_eq!(cmd.inputs, vec!["hello.c".to_string()]);
    assert_eq!(cmd.outputs, vec!["hello".to_string()]);
    assert_eq!(cmd.command, "gcc %f -o %o");
  }

  #[test]
  fn skips_blank_and_comment_lines() {
    let decls = LineParser
      .parse("", "# a comment\n\n: a.c |> cc a.c |> a.o", &VarDb::default(), &empty_env())
      .unwrap();
    assert_eq!(decls.commands.len(), 1);
  }

  #[test]
  fn parses_groups_and_exclusions_and_reparse_requests() {
    let contents = "group(OBJS)\n!*.tmp\nreparse sub/other\n";
    let decls = LineParser.parse("", contents, &VarDb::default(), &empty_env()).unwrap();
    assert_eq!(decls.groups.len(), 1);
    assert_eq!(decls.groups[0].name, "OBJS");
    assert_eq!(decls.exclusions, vec!["*.tmp".to_string()]);
    assert_eq!(decls.reparse_dirs, vec!["sub/other".to_string()]);
  }

  #[test]
  fn group_input_and_output_tokens_are_not_treated_as_paths() {
    let decls = LineParser
      .parse("", ": a.o <OBJS> |> ld -o out a.o |> <OUT>", &VarDb::default(), &empty_env())
      .unwrap();
    let cmd = &decls.commands[0];
    assert_eq!(cmd.inputs, vec!["a.o".to_string()]);
    assert_eq!(cmd.group_inputs, vec!["OBJS".to_string()]);
    assert_eq!(cmd.group_output.as_deref(), Some("OUT"));
  }

  #[test]
  fn a_trailing_question_mark_marks_an_output_optional() {
    let decls = LineParser
      .parse("", ": a.c |> cc a.c |> a.o coverage.gcda?", &VarDb::default(), &empty_env())
      .unwrap();
    let cmd = &decls.commands[0];
    assert_eq!(cmd.outputs, vec!["a.o".to_string(), "coverage.gcda".to_string()]);
    assert_eq!(cmd.optional_outputs, vec!["coverage.gcda".to_string()]);
  }

  #[test]
  fn malformed_rule_lines_produce_a_located_parse_error() {
    let err = LineParser.parse("sub", "this is not a rule", &VarDb::default(), &empty_env()).unwrap_err();
    assert_eq!(err.file, "sub/Tupfile");
    assert_eq!(err.line, 1);
  }

  #[test]
  fn a_rule_with_no_outputs_is_rejected() {
    let err = LineParser.parse("", ": a.c |> cc a.c |>", &VarDb::default(), &empty_env()).unwrap_err();
    assert!(err.message.contains("output"));
  }

  #[test]
  fn env_and_var_substitution_both_apply_to_the_command() {
    let mut env = HashMap::new();
    env.insert("CC".to_string(), "clang".to_string());
    let decls = LineParser
      .parse("", ": a.c |> $CC @FLAGS@ -o a.o a.c |> a.o", &VarDb::default(), &env)
      .unwrap();
    assert!(decls.commands[0].command.starts_with("clang"));
    assert!(decls.commands[0].command.contains("@FLAGS@"));
  }
}
