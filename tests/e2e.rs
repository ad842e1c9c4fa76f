use std::fs;
use std::process::Command;

use assert_cmd::cargo;
use predicates::prelude::*;
use serial_test::file_serial;

fn log_path(name: &str) -> std::path::PathBuf {
  std::env::temp_dir().join(format!("tracer-test-{name}-{}.tsv", std::process::id()))
}

#[test]
#[file_serial]
fn echo_hi_logs_clean_run_and_forwards_output() -> Result<(), Box<dyn std::error::Error>> {
  let log = log_path("echo");
  let mut cmd = Command::new(cargo::cargo_bin!());
  cmd.arg("-o").arg(&log).arg("/bin/echo").arg("hi");
  cmd.assert().success().stdout(predicate::str::contains("hi\n"));

  let contents = fs::read_to_string(&log)?;
  let lines: Vec<&str> = contents.lines().collect();
  assert!(lines[0].contains("\ttrace_child\t"));
  assert!(lines.iter().any(|l| l.contains("\texit_status\t0")));
  assert!(lines.last().unwrap().contains("trace_end"));
  let _ = fs::remove_file(&log);
  Ok(())
}

#[test]
#[file_serial]
fn self_sent_term_signal_is_logged() -> Result<(), Box<dyn std::error::Error>> {
  let log = log_path("termsig");
  let mut cmd = Command::new(cargo::cargo_bin!());
  cmd
    .arg("-o")
    .arg(&log)
    .arg("/bin/sh")
    .arg("-c")
    .arg("kill -TERM $$");
  cmd.assert().success();

  let contents = fs::read_to_string(&log)?;
  assert!(contents.contains("term_sig\t15\tSIGTERM"));
  assert!(contents.trim_end().ends_with("trace_end"));
  let _ = fs::remove_file(&log);
  Ok(())
}

#[test]
#[file_serial]
fn descendant_limit_breach_kills_excess_children() -> Result<(), Box<dyn std::error::Error>> {
  let log = log_path("climit");
  let mut cmd = Command::new(cargo::cargo_bin!());
  cmd
    .arg("-c")
    .arg("2")
    .arg("-o")
    .arg(&log)
    .arg("/bin/sh")
    .arg("-c")
    .arg("/bin/sh -c '/bin/sh -c :'");
  cmd.assert().failure();

  let contents = fs::read_to_string(&log)?;
  let fork_children = contents.matches("fork_child").count();
  assert!(fork_children >= 2);
  assert!(contents.contains("trace_error"));
  assert!(contents.contains("killed"));
  let _ = fs::remove_file(&log);
  Ok(())
}

#[test]
#[file_serial]
fn output_limit_truncates_stdout() -> Result<(), Box<dyn std::error::Error>> {
  let log = log_path("olimit");
  let mut cmd = Command::new(cargo::cargo_bin!());
  cmd
    .arg("-l")
    .arg("4")
    .arg("-o")
    .arg(&log)
    .arg("/bin/sh")
    .arg("-c")
    .arg("printf 0123456789");
  cmd
    .assert()
    .success()
    .stdout(predicate::str::contains("0123\n[output truncated]\n"));

  let contents = fs::read_to_string(&log)?;
  assert!(contents.trim_end().ends_with("trace_end"));
  let _ = fs::remove_file(&log);
  Ok(())
}

#[test]
#[file_serial]
fn background_job_is_traced_through_wait() -> Result<(), Box<dyn std::error::Error>> {
  let log = log_path("bg");
  let mut cmd = Command::new(cargo::cargo_bin!());
  cmd
    .arg("-o")
    .arg(&log)
    .arg("/bin/sh")
    .arg("-c")
    .arg("sleep 0.1 & wait");
  cmd.assert().success();

  let contents = fs::read_to_string(&log)?;
  assert!(contents.contains("fork_child"));
  assert!(contents.matches("exit_status\t0").count() >= 2);
  assert!(contents.trim_end().ends_with("trace_end"));
  let _ = fs::remove_file(&log);
  Ok(())
}

#[test]
#[file_serial]
fn false_command_exit_status_is_logged() -> Result<(), Box<dyn std::error::Error>> {
  let log = log_path("false");
  let mut cmd = Command::new(cargo::cargo_bin!());
  cmd.arg("-o").arg(&log).arg("/bin/false");
  cmd.assert().success();

  let contents = fs::read_to_string(&log)?;
  assert!(contents.contains("exit_status\t1"));
  assert!(contents.trim_end().ends_with("trace_end"));
  let _ = fs::remove_file(&log);
  Ok(())
}
