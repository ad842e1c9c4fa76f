//! The child launcher and the trace-attach handshake.
//!
//! The supervisor forks once. The child self-stops and waits to be traced;
//! the parent seizes it once it observes the stop, then the child goes on to
//! set up its session/controlling-terminal/uid/gid and exec the requested
//! command. Nothing between fork and exec in the child branch may return: a
//! failure there is fatal to the child and is reported on stderr before
//! `_exit`.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::path::Path;

use color_eyre::eyre::{bail, Context, Result};
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::{SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Gid, Pid, Uid, User};

use crate::pty;

/// The signal mask captured before fork, restored in the child just before
/// exec. Never unblocked in the parent: the event loop relies on the full
/// mask staying blocked for its entire lifetime.
pub struct SignalMaskGuard {
  old: SigSet,
}

impl SignalMaskGuard {
  pub fn block_all() -> Result<Self> {
    let full = SigSet::all();
    let old = full
      .thread_swap_mask(SigmaskHow::SIG_SETMASK)
      .wrap_err("sigprocmask(SIG_SETMASK) failed")?;
    Ok(Self { old })
  }

  /// Restore the pre-fork mask. Only ever called from the child, just before exec.
  fn restore(&self) -> Result<()> {
    self
      .old
      .thread_set_mask()
      .wrap_err("sigprocmask(SIG_SETMASK) failed")
  }
}

pub struct ChildSpec<'a> {
  pub command: &'a [String],
  pub replica_path: &'a Path,
  pub run_as: Option<&'a str>,
}

/// Fork the supervised command. Returns the root pid once it has been seized
/// and resumed; the child branch never returns.
pub fn fork_and_attach(spec: &ChildSpec, mask: &SignalMaskGuard) -> Result<Pid> {
  match unsafe { unistd::fork() }.wrap_err("fork failed")? {
    ForkResult::Child => match run_child(spec, mask) {
      Ok(never) => match never {},
      Err(err) => {
        eprintln!("tracer: {err:#}");
        std::process::exit(1);
      }
    },
    ForkResult::Parent { child } => {
      attach(child)?;
      Ok(child)
    }
  }
}

fn run_child(spec: &ChildSpec, mask: &SignalMaskGuard) -> Result<Infallible> {
  unistd::raise(Signal::SIGSTOP).wrap_err("raise(SIGSTOP) failed")?;

  unistd::setsid().wrap_err("setsid failed")?;
  let replica = pty::open_replica(spec.replica_path)?;
  unsafe {
    if nix::libc::ioctl(replica.as_raw_fd(), nix::libc::TIOCSCTTY as _, 0) < 0 {
      bail!(
        "ioctl(TIOCSCTTY) failed: {}",
        std::io::Error::last_os_error()
      );
    }
  }
  unistd::tcsetpgrp(&replica, unistd::getpgrp()).wrap_err("tcsetpgrp failed")?;
  for fd in 0..=2 {
    unistd::dup2(replica.as_raw_fd(), fd).wrap_err("dup2 onto stdio failed")?;
  }
  drop(replica);

  mask.restore()?;

  if let Some(name) = spec.run_as {
    drop_privileges(name)?;
  }

  let argv: Vec<CString> = spec
    .command
    .iter()
    .map(|a| CString::new(a.as_str()).wrap_err("argument contains a NUL byte"))
    .collect::<Result<_>>()?;
  let program = &argv[0];
  unistd::execvp(program, &argv).wrap_err_with(|| format!("exec of {:?} failed", spec.command[0]))?;
  unreachable!("execvp only returns on error, which is handled above")
}

fn drop_privileges(name: &str) -> Result<()> {
  let user = User::from_name(name)
    .wrap_err("looking up user failed")?
    .ok_or_else(|| color_eyre::eyre::eyre!("no such user: {name}"))?;
  unistd::setgroups(&[]).wrap_err("setgroups failed")?;
  unistd::setgid(Gid::from_raw(user.gid.as_raw())).wrap_err("setgid failed")?;
  unistd::setuid(Uid::from_raw(user.uid.as_raw())).wrap_err("setuid failed")?;
  Ok(())
}

/// Wait for the freshly forked child to stop itself, then seize it with the
/// event options the rest of the supervisor depends on, and resume it.
fn attach(pid: Pid) -> Result<()> {
  loop {
    match waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
      Ok(WaitStatus::Stopped(_, _)) => break,
      Ok(WaitStatus::Exited(_, code)) => {
        bail!("child exited with code {code} before it could be traced")
      }
      Ok(WaitStatus::Signaled(_, sig, _)) => {
        bail!("child terminated by signal {sig} before it could be traced")
      }
      Ok(other) => bail!("unexpected wait status before trace attach: {other:?}"),
      Err(nix::errno::Errno::EINTR) => continue,
      Err(e) => return Err(e).wrap_err("waitpid on new child failed"),
    }
  }

  let options = Options::PTRACE_O_TRACESYSGOOD
    | Options::PTRACE_O_TRACEEXIT
    | Options::PTRACE_O_TRACEEXEC
    | Options::PTRACE_O_TRACECLONE
    | Options::PTRACE_O_TRACEFORK
    | Options::PTRACE_O_TRACEVFORK
    | Options::PTRACE_O_EXITKILL;
  ptrace::seize(pid, options).wrap_err("ptrace(PTRACE_SEIZE) failed")?;
  ptrace::cont(pid, None).wrap_err("ptrace(PTRACE_CONT) failed")?;
  Ok(())
}
