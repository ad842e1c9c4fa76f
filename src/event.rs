//! Classifies a raw `waitpid` status into the handful of events the
//! supervisor's event loop cares about.
//!
//! The supervisor never tracks syscall-stops and always resumes with plain
//! `PTRACE_CONT`, so none of the group-stop/signal-delivery ambiguity that a
//! syscall-tracing engine has to resolve applies here: `nix`'s own
//! `WaitStatus` decode is already unambiguous for our use.

use color_eyre::eyre::{bail, Result};
use nix::sys::ptrace;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

#[derive(Debug, Clone, Copy)]
pub enum TraceEvent {
  /// The tracee ran to completion.
  Exited { pid: Pid, code: i32 },
  /// The tracee was killed by a signal.
  Signaled { pid: Pid, signal: i32 },
  /// A new descendant appeared via fork/vfork/clone.
  NewChild { parent: Pid, child: Pid },
  /// Post-exec stop; nothing to do but resume.
  ExecStop { pid: Pid },
  /// PTRACE_EVENT_EXIT: the tracee is about to exit, still queryable.
  ExitStop { pid: Pid },
  /// PTRACE_EVENT_STOP: group-stop or equivalent, not a real signal.
  GroupStop { pid: Pid },
  /// Stopped by an ordinary signal that must be logged and re-delivered.
  SignalDelivery { pid: Pid, signal: i32 },
}

/// Turn a raw `waitpid(-1, ..., 0)` result into a `TraceEvent`.
pub fn classify(status: WaitStatus) -> Result<Option<TraceEvent>> {
  use nix::sys::signal::Signal;

  Ok(Some(match status {
    WaitStatus::Exited(pid, code) => TraceEvent::Exited { pid, code },
    WaitStatus::Signaled(pid, sig, _) => TraceEvent::Signaled {
      pid,
      signal: sig as i32,
    },
    WaitStatus::PtraceEvent(pid, Signal::SIGTRAP, raw_event) => {
      match raw_event {
        nix::libc::PTRACE_EVENT_CLONE | nix::libc::PTRACE_EVENT_FORK | nix::libc::PTRACE_EVENT_VFORK => {
          let child = ptrace::getevent(pid)? as i32;
          TraceEvent::NewChild {
            parent: pid,
            child: Pid::from_raw(child),
          }
        }
        nix::libc::PTRACE_EVENT_EXEC => TraceEvent::ExecStop { pid },
        nix::libc::PTRACE_EVENT_EXIT => TraceEvent::ExitStop { pid },
        nix::libc::PTRACE_EVENT_STOP => TraceEvent::GroupStop { pid },
        other => bail!("unrecognized ptrace event {other} for pid {pid}"),
      }
    }
    WaitStatus::Stopped(pid, sig) => TraceEvent::SignalDelivery {
      pid,
      signal: sig as i32,
    },
    WaitStatus::PtraceSyscall(pid) => TraceEvent::SignalDelivery { pid, signal: 0 },
    WaitStatus::Continued(_) => return Ok(None),
    WaitStatus::StillAlive => return Ok(None),
    other => bail!("unexpected wait status in event loop: {other:?}"),
  }))
}
