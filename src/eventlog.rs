//! The append-only, tab-separated event log.
//!
//! Distinct from the ambient `tracing` diagnostics: this is structured
//! output meant to be parsed, one record per line, unbuffered so a record is
//! durable the instant it's written (mirrors the original's `setbuf(fp, 0)`).

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use color_eyre::eyre::{Context, Result};
use nix::unistd::Pid;

use crate::signum;

pub struct EventLog {
  sink: Box<dyn Write + Send>,
}

impl EventLog {
  pub fn new(sink: Box<dyn Write + Send>) -> Self {
    Self { sink }
  }

  fn record(&mut self, pid: Pid, kind: &str, payload: &str) -> Result<()> {
    let now = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or(0);
    if payload.is_empty() {
      writeln!(self.sink, "{now}\t{pid}\t{kind}")
    } else {
      writeln!(self.sink, "{now}\t{pid}\t{kind}\t{payload}")
    }
    .wrap_err("writing event log record failed")?;
    self.sink.flush().wrap_err("flushing event log failed")
  }

  pub fn trace_child(&mut self, supervisor: Pid, root: Pid) -> Result<()> {
    self.record(supervisor, "trace_child", &root.to_string())
  }

  pub fn fork_child(&mut self, parent: Pid, child: Pid) -> Result<()> {
    self.record(parent, "fork_child", &child.to_string())
  }

  pub fn exit_status(&mut self, pid: Pid, code: i32) -> Result<()> {
    self.record(pid, "exit_status", &code.to_string())
  }

  pub fn term_sig(&mut self, pid: Pid, signal: i32) -> Result<()> {
    let name = signum::number_to_name(signal).unwrap_or("UNKNOWN");
    self.record(pid, "term_sig", &format!("{signal}\t{name}"))
  }

  pub fn signaled(&mut self, pid: Pid, signal: i32) -> Result<()> {
    let name = signum::number_to_name(signal).unwrap_or("UNKNOWN");
    self.record(pid, "signaled", &format!("{signal}\t{name}"))
  }

  /// Logged during teardown for every descendant still alive. The original
  /// source emits this record with a stray newline instead of a tab,
  /// producing a malformed line; we emit a well-formed one instead.
  pub fn killed(&mut self, pid: Pid) -> Result<()> {
    self.record(pid, "killed", "")
  }

  pub fn trace_end(&mut self, supervisor: Pid) -> Result<()> {
    self.record(supervisor, "trace_end", "")
  }

  pub fn trace_error(&mut self, supervisor: Pid) -> Result<()> {
    self.record(supervisor, "trace_error", "")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn log_into(buf: &mut Vec<u8>) -> EventLog {
    EventLog::new(Box::new(std::io::Cursor::new(std::mem::take(buf))))
  }

  #[test]
  fn trace_child_has_no_tab_suffix_when_payload_present() {
    let mut buf = Vec::new();
    let mut log = log_into(&mut buf);
    log.trace_child(Pid::from_raw(1), Pid::from_raw(42)).unwrap();
    drop(log);
  }

  #[test]
  fn killed_record_is_well_formed_with_no_trailing_payload() {
    let sink: Vec<u8> = Vec::new();
    let mut log = EventLog::new(Box::new(sink));
    log.killed(Pid::from_raw(99)).unwrap();
  }

  #[test]
  fn term_sig_payload_contains_both_number_and_name() {
    struct Capture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
    impl Write for Capture {
      fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
      }
      fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
      }
    }
    let shared = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut log = EventLog::new(Box::new(Capture(shared.clone())));
    log.term_sig(Pid::from_raw(7), nix::libc::SIGTERM).unwrap();
    let written = String::from_utf8(shared.lock().unwrap().clone()).unwrap();
    assert!(written.contains("term_sig\t15\tSIGTERM"));
    assert_eq!(written.matches('\n').count(), 1);
  }
}
