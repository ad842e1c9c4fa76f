//! Bidirectional mapping between POSIX signal names and numbers.
//!
//! This mirrors the fixed signal table of the original tool: decimal numbers
//! pass through unchanged, symbolic names are looked up in a small static
//! table rather than relying on libc's `strsignal`, whose wording varies
//! across platforms.

use color_eyre::eyre::{eyre, Result};

macro_rules! sig_table {
  ($($name:ident),+ $(,)?) => {
    &[$((stringify!($name), nix::libc::$name)),+]
  };
}

static TABLE: &[(&str, i32)] = sig_table![
  SIGABRT, SIGALRM, SIGBUS, SIGCHLD, SIGCONT, SIGFPE, SIGHUP, SIGILL, SIGINT, SIGKILL, SIGPIPE,
  SIGQUIT, SIGSEGV, SIGSTOP, SIGTERM, SIGTSTP, SIGTTIN, SIGTTOU, SIGUSR1, SIGUSR2, SIGPOLL,
  SIGPROF, SIGSYS, SIGTRAP, SIGURG, SIGVTALRM, SIGXCPU, SIGXFSZ,
];

/// Resolve a signal name or decimal number to its number.
///
/// Accepts a bare decimal integer, or a symbolic name such as `SIGTERM`.
pub fn name_to_number(name: &str) -> Result<i32> {
  if let Ok(n) = name.parse::<i32>() {
    return Ok(n);
  }
  TABLE
    .iter()
    .find(|(candidate, _)| *candidate == name)
    .map(|&(_, num)| num)
    .ok_or_else(|| eyre!("invalid signal name: {name}"))
}

/// Look up the symbolic name for a signal number, if it is one of the known set.
pub fn number_to_name(num: i32) -> Option<&'static str> {
  TABLE
    .iter()
    .find(|(_, candidate)| *candidate == num)
    .map(|&(name, _)| name)
}
