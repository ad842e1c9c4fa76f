//! Bidirectional byte relay between the supervisor's stdio and the PTY
//! manager side, run on its own blocking OS thread.
//!
//! `std::sync::mpsc` has no pollable file descriptor, so cancellation is a
//! self-pipe: teardown writes a byte to it, the pump's `poll(2)` wakes up,
//! and the pump exits its loop without touching the PTY fds again. This is
//! the concrete shape of the "channel closed on teardown, polled alongside
//! the two file descriptors" design the rest of the supervisor relies on.

use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::thread::JoinHandle;

use color_eyre::eyre::{Context, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{LocalFlags, Termios};
use nix::unistd;

const BUF_SIZE: usize = 8192;
const TRUNCATION_NOTICE: &[u8] = b"\n[output truncated]\n";

pub struct Pump {
  handle: JoinHandle<Result<()>>,
  cancel_write: OwnedFd,
}

impl Pump {
  /// Signal the pump to stop and wait for it to finish. Idempotent enough
  /// for a single teardown call; not meant to be called twice.
  pub fn cancel_and_join(self) -> Result<()> {
    let _ = unistd::write(&self.cancel_write, &[0u8]);
    match self.handle.join() {
      Ok(result) => result,
      Err(_) => color_eyre::eyre::bail!("I/O pump thread panicked"),
    }
  }
}

/// Start the pump. `manager` is the PTY manager fd, `attrs` the canonical
/// line-discipline attributes captured right after the PTY was configured
/// (used to find the EOF character to inject on stdin closure).
pub fn spawn(manager: OwnedFd, attrs: Termios, output_limit: Option<u64>) -> Result<Pump> {
  let (cancel_read, cancel_write) = unistd::pipe().wrap_err("pipe for pump cancellation failed")?;

  let handle = std::thread::Builder::new()
    .name("io-pump".into())
    .spawn(move || run(manager, cancel_read, attrs, output_limit))
    .wrap_err("spawning I/O pump thread failed")?;

  Ok(Pump {
    handle,
    cancel_write,
  })
}

fn run(manager: OwnedFd, cancel_read: OwnedFd, attrs: Termios, output_limit: Option<u64>) -> Result<()> {
  let mut remaining = output_limit;
  let mut stdin_closed = false;
  let stdin = std::io::stdin();
  let mut buf = [0u8; BUF_SIZE];

  loop {
    let mut fds = vec![
      PollFd::new(manager.as_fd(), PollFlags::POLLIN),
      PollFd::new(cancel_read.as_fd(), PollFlags::POLLIN),
    ];
    if !stdin_closed {
      fds.push(PollFd::new(stdin.as_fd(), PollFlags::POLLIN));
    }

    match poll(&mut fds, PollTimeout::NONE) {
      Ok(_) => {}
      Err(Errno::EINTR) => continue,
      Err(e) => return Err(e).wrap_err("poll in I/O pump failed"),
    }

    if !fds[1].revents().unwrap_or(PollFlags::empty()).is_empty() {
      return Ok(());
    }

    let manager_revents = fds[0].revents().unwrap_or(PollFlags::empty());
    if manager_revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
      match unistd::read(manager.as_raw_fd(), &mut buf) {
        Ok(0) => return Ok(()),
        Ok(n) => forward_output(&buf[..n], &mut remaining)?,
        Err(Errno::EIO) => return Ok(()),
        Err(e) => return Err(e).wrap_err("reading from PTY manager failed"),
      }
    }

    if !stdin_closed {
      if let Some(pollfd) = fds.get(2) {
        let revents = pollfd.revents().unwrap_or(PollFlags::empty());
        if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
          let n = (&stdin).read(&mut buf).wrap_err("reading stdin failed")?;
          if n == 0 {
            if attrs.local_flags.contains(LocalFlags::ICANON) {
              let eof_char = attrs.control_chars[nix::libc::VEOF];
              write_all_fd(&manager, &[eof_char]).wrap_err("writing EOF character failed")?;
            }
            stdin_closed = true;
          }
          write_all_fd(&manager, &buf[..n])?;
        }
      }
    }
  }
}

/// Relay tracee output to stdout, enforcing the byte budget. `None` means
/// unlimited and disables accounting entirely; `Some(0)` means the budget is
/// already exhausted and all further output is suppressed. Unlike the
/// original source, truncated bytes are written before the notice: the
/// budget-exhausted branch there drops them because a later guard checks
/// the already-zeroed budget.
fn forward_output(data: &[u8], remaining: &mut Option<u64>) -> Result<()> {
  let Some(budget) = remaining else {
    write_all(&std::io::stdout(), data)?;
    return Ok(());
  };
  if *budget == 0 {
    return Ok(());
  }

  if data.len() as u64 >= *budget {
    let keep = *budget as usize;
    write_all(&std::io::stdout(), &data[..keep])?;
    write_all(&std::io::stdout(), TRUNCATION_NOTICE)?;
    *budget = 0;
  } else {
    *budget -= data.len() as u64;
    write_all(&std::io::stdout(), data)?;
  }
  Ok(())
}

fn write_all(mut w: impl Write, mut data: &[u8]) -> Result<()> {
  while !data.is_empty() {
    let n = w.write(data).wrap_err("write failed")?;
    data = &data[n..];
  }
  Ok(())
}

/// Like `write_all`, but for a raw fd that has no `std::io::Write` impl
/// (the PTY manager fd, passed around as `OwnedFd`).
fn write_all_fd(fd: &OwnedFd, mut data: &[u8]) -> Result<()> {
  while !data.is_empty() {
    let n = unistd::write(fd, data).wrap_err("write failed")?;
    data = &data[n..];
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn forward_output_writes_full_buffer_under_budget() {
    let mut remaining = Some(100u64);
    forward_output(b"hello", &mut remaining).unwrap();
    assert_eq!(remaining, Some(95));
  }

  #[test]
  fn forward_output_truncates_at_budget() {
    let mut remaining = Some(4u64);
    forward_output(b"0123456789", &mut remaining).unwrap();
    assert_eq!(remaining, Some(0));
  }

  #[test]
  fn forward_output_suppresses_once_exhausted() {
    let mut remaining = Some(0u64);
    forward_output(b"anything", &mut remaining).unwrap();
    assert_eq!(remaining, Some(0));
  }

  #[test]
  fn forward_output_unlimited_always_writes() {
    let mut remaining = None;
    forward_output(b"anything", &mut remaining).unwrap();
    assert_eq!(remaining, None);
  }
}
