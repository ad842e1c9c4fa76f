//! The event loop and teardown: the supervisor's main body once the root
//! descendant has been attached and the I/O pump started.

use std::collections::HashSet;
use std::io::Write;

use color_eyre::eyre::{bail, Result};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use tracing::{debug, trace, warn};

use crate::event::{self, TraceEvent};
use crate::eventlog::EventLog;
use crate::io_pump::Pump;

/// Which of the three teardown entry points triggered the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownKind {
  RootExit,
  Error,
  General,
}

impl TeardownKind {
  /// The exit code policy: the original source always exits 0. We diverge,
  /// per the spec's own offered alternative, and surface failure.
  pub fn exit_code(self) -> i32 {
    match self {
      TeardownKind::RootExit => 0,
      TeardownKind::Error | TeardownKind::General => 1,
    }
  }
}

pub struct Supervisor {
  me: Pid,
  root: Pid,
  descendants: HashSet<Pid>,
  descendant_limit: Option<usize>,
  log: EventLog,
  pump: Option<Pump>,
  err_sink: Box<dyn Write + Send>,
}

impl Supervisor {
  pub fn new(
    me: Pid,
    root: Pid,
    descendant_limit: Option<usize>,
    log: EventLog,
    pump: Pump,
    err_sink: Box<dyn Write + Send>,
  ) -> Self {
    let mut descendants = HashSet::new();
    descendants.insert(root);
    Self {
      me,
      root,
      descendants,
      descendant_limit,
      log,
      pump: Some(pump),
      err_sink,
    }
  }

  /// Run the event loop to completion, then tear down. Returns the process
  /// exit code.
  pub fn run(mut self) -> i32 {
    self
      .log
      .trace_child(self.me, self.root)
      .expect("writing the opening trace_child record must succeed");

    let kind = loop {
      match waitpid(Pid::from_raw(-1), None) {
        Ok(status) => match self.handle(status) {
          Ok(Some(kind)) => break kind,
          Ok(None) => continue,
          Err(err) => {
            let _ = writeln!(self.err_sink, "{err:#}");
            warn!("event loop error: {err:#}");
            break TeardownKind::Error;
          }
        },
        Err(Errno::EINTR) => continue,
        Err(Errno::ECHILD) => {
          let _ = writeln!(self.err_sink, "No children");
          break TeardownKind::Error;
        }
        Err(_) => break TeardownKind::General,
      }
    };

    self.teardown(kind)
  }

  /// Classify and dispatch one status change. Returns `Some(kind)` when this
  /// observation should end the event loop.
  fn handle(&mut self, status: nix::sys::wait::WaitStatus) -> Result<Option<TeardownKind>> {
    let Some(ev) = event::classify(status)? else {
      return Ok(None);
    };

    match ev {
      TraceEvent::Exited { pid, code } => {
        self.descendants.remove(&pid);
        self.log.exit_status(pid, code)?;
        if pid == self.root {
          return Ok(Some(TeardownKind::RootExit));
        }
      }
      TraceEvent::Signaled { pid, signal: sig } => {
        self.descendants.remove(&pid);
        self.log.term_sig(pid, sig)?;
        if pid == self.root {
          return Ok(Some(TeardownKind::RootExit));
        }
      }
      TraceEvent::NewChild { parent, child } => {
        self.log.fork_child(parent, child)?;
        self.descendants.insert(child);
        if let Some(limit) = self.descendant_limit {
          if self.descendants.len() > limit {
            return Ok(Some(TeardownKind::Error));
          }
        }
        ptrace::cont(parent, None)?;
      }
      TraceEvent::ExecStop { pid } => {
        ptrace::cont(pid, None)?;
      }
      TraceEvent::ExitStop { pid } => {
        if !self.descendants.remove(&pid) {
          bail!("untraced descendant {pid} exited");
        }
        ptrace::cont(pid, None)?;
      }
      TraceEvent::GroupStop { pid } => {
        ptrace::cont(pid, None)?;
      }
      TraceEvent::SignalDelivery { pid, signal: sig } => {
        self.log.signaled(pid, sig)?;
        let signal = Signal::try_from(sig).ok();
        ptrace::cont(pid, signal)?;
      }
    }
    Ok(None)
  }

  fn teardown(mut self, kind: TeardownKind) -> i32 {
    match kind {
      TeardownKind::RootExit => {
        let _ = self.log.trace_end(self.me);
      }
      TeardownKind::Error => {
        let _ = self.log.trace_error(self.me);
      }
      TeardownKind::General => {}
    }

    let _ = ptrace::detach(self.root, None);
    let _ = signal::kill(self.root, Signal::SIGKILL);
    self.descendants.remove(&self.root);

    let killed = self.descendants.len();
    for pid in self.descendants.drain() {
      let _ = self.log.killed(pid);
      let _ = signal::kill(pid, Signal::SIGKILL);
    }
    if killed > 0 {
      let _ = writeln!(self.err_sink, "killed {killed} remaining descendant(s)");
    }
    debug!(?kind, "teardown complete");

    if let Some(pump) = self.pump.take() {
      if let Err(err) = pump.cancel_and_join() {
        trace!("I/O pump join error (ignored during teardown): {err:#}");
      }
    }

    kind.exit_code()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn root_exit_is_the_only_clean_exit_code() {
    assert_eq!(TeardownKind::RootExit.exit_code(), 0);
    assert_eq!(TeardownKind::Error.exit_code(), 1);
    assert_eq!(TeardownKind::General.exit_code(), 1);
  }
}
