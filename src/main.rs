//! `tracer`: supervise a command under a PTY, tracing its whole descendant
//! tree and emitting a structured event log.

mod cli;
mod diagnostics;
mod event;
mod eventlog;
mod io_pump;
mod launch;
mod pty;
mod signum;
mod supervisor;

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use nix::unistd::{self, Pid};
use tracing::info;

use crate::cli::Args;
use crate::eventlog::EventLog;
use crate::launch::{ChildSpec, SignalMaskGuard};
use crate::supervisor::Supervisor;

fn main() -> Result<()> {
  diagnostics::install()?;
  let args = Args::parse();

  let log_sink = open_sink(args.log_path.as_deref(), || Box::new(io::stdout()))?;
  let err_sink = open_sink(args.err_path.as_deref(), || Box::new(io::stderr()))?;

  let code = run(args, log_sink, err_sink)?;
  std::process::exit(code);
}

fn run(
  args: Args,
  log_sink: Box<dyn Write + Send>,
  err_sink: Box<dyn Write + Send>,
) -> Result<i32> {
  let me = unistd::getpid();

  let mask = SignalMaskGuard::block_all()?;
  let pty = pty::open()?;

  let spec = ChildSpec {
    command: &args.command,
    replica_path: &pty.replica_path,
    run_as: args.user.as_deref(),
  };
  let root = launch::fork_and_attach(&spec, &mask)?;
  info!(%root, "traced root descendant attached");

  let attrs = pty::configure_canonical(&pty.manager)?;
  let manager_fd = unsafe { OwnedFd::from_raw_fd(pty.manager.into_raw_fd()) };
  let pump = io_pump::spawn(manager_fd, attrs, args.output_limit)?;

  let log = EventLog::new(log_sink);
  let sup = Supervisor::new(
    me,
    root,
    args.descendant_limit,
    log,
    pump,
    err_sink,
  );
  Ok(sup.run())
}

fn open_sink(
  path: Option<&Path>,
  default: impl FnOnce() -> Box<dyn Write + Send>,
) -> Result<Box<dyn Write + Send>> {
  match path {
    None => Ok(default()),
    Some(path) => {
      let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .custom_flags(nix::libc::O_CLOEXEC)
        .open(path)
        .wrap_err_with(|| format!("opening {} failed", path.display()))?;
      Ok(Box::new(file))
    }
  }
}
