//! PTY provisioning: opens a multiplexer device and hands the replica side to the child.

use color_eyre::eyre::{Context, Result};
use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, InputFlags, LocalFlags, SetArg, Termios};
use std::os::fd::FromRawFd;
use std::path::PathBuf;

/// The manager side of a freshly allocated PTY pair, plus the path the child
/// should `open(2)` to obtain its replica.
pub struct Pty {
  pub manager: PtyMaster,
  pub replica_path: PathBuf,
}

/// Allocate a PTY pair. The manager fd is opened read/write, does not become
/// our controlling terminal, and is close-on-exec.
pub fn open() -> Result<Pty> {
  let manager = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)
    .wrap_err("posix_openpt failed")?;
  grantpt(&manager).wrap_err("grantpt failed")?;
  unlockpt(&manager).wrap_err("unlockpt failed")?;
  let replica_path = nix::pty::ptsname_r(&manager)
    .wrap_err("ptsname_r failed")?
    .into();
  Ok(Pty {
    manager,
    replica_path,
  })
}

/// Open the replica device by path. Called from the child, after the manager
/// has granted and unlocked it.
pub fn open_replica(path: &std::path::Path) -> Result<std::os::fd::OwnedFd> {
  nix::fcntl::open(path, OFlag::O_RDWR, Mode::empty())
    .map(|fd| unsafe { std::os::fd::OwnedFd::from_raw_fd(fd) })
    .wrap_err("opening replica failed")
}

/// Put the manager side into canonical-mode line discipline (canonical
/// input, signal generation, echo, echoed newline, UTF-8 input) and return
/// the resulting attributes, so the I/O pump can read the EOF character back
/// out of them later.
pub fn configure_canonical(manager: &PtyMaster) -> Result<Termios> {
  let mut attrs = termios::tcgetattr(manager).wrap_err("tcgetattr on manager failed")?;
  attrs.local_flags |=
    LocalFlags::ICANON | LocalFlags::ISIG | LocalFlags::ECHO | LocalFlags::ECHONL;
  attrs.input_flags |= InputFlags::IUTF8;
  termios::tcsetattr(manager, SetArg::TCSANOW, &attrs).wrap_err("tcsetattr on manager failed")?;
  Ok(attrs)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn open_allocates_a_usable_replica_path() {
    let pty = open().expect("posix_openpt should work in test sandboxes");
    assert!(pty.replica_path.starts_with("/dev"));
  }

  #[test]
  fn configure_canonical_sets_expected_flags() {
    let pty = open().unwrap();
    let attrs = configure_canonical(&pty.manager).unwrap();
    assert!(attrs.local_flags.contains(LocalFlags::ICANON));
    assert!(attrs.local_flags.contains(LocalFlags::ISIG));
    assert!(attrs.local_flags.contains(LocalFlags::ECHO));
  }
}
