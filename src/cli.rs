//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
  name = "tracer",
  about = "Supervise a command under a PTY and trace its whole descendant tree"
)]
pub struct Args {
  /// Drop privileges to this user before exec.
  #[arg(short = 'u', value_name = "USER")]
  pub user: Option<String>,

  /// Maximum number of simultaneously-live traced descendants.
  #[arg(short = 'c', value_name = "N", value_parser = positive_usize)]
  pub descendant_limit: Option<usize>,

  /// Maximum bytes forwarded to stdout before output is suppressed.
  #[arg(short = 'l', value_name = "N", value_parser = positive_u64)]
  pub output_limit: Option<u64>,

  /// Event log sink. Defaults to stdout.
  #[arg(short = 'o', value_name = "PATH")]
  pub log_path: Option<PathBuf>,

  /// Error sink. Defaults to stderr.
  #[arg(short = 'e', value_name = "PATH")]
  pub err_path: Option<PathBuf>,

  /// The command to run, and its arguments.
  #[arg(required = true, allow_hyphen_values = true, trailing_var_arg = true)]
  pub command: Vec<String>,
}

fn positive_usize(s: &str) -> Result<usize, String> {
  let n: usize = s.parse().map_err(|_| format!("not a decimal integer: {s}"))?;
  if n == 0 {
    return Err("must be a positive integer".into());
  }
  Ok(n)
}

fn positive_u64(s: &str) -> Result<u64, String> {
  let n: u64 = s.parse().map_err(|_| format!("not a decimal integer: {s}"))?;
  if n == 0 {
    return Err("must be a positive integer".into());
  }
  Ok(n)
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  #[test]
  fn parses_minimal_invocation() {
    let args = Args::parse_from(["tracer", "/bin/echo", "hi"]);
    assert_eq!(args.command, vec!["/bin/echo", "hi"]);
    assert!(args.descendant_limit.is_none());
    assert!(args.output_limit.is_none());
  }

  #[test]
  fn parses_all_flags() {
    let args = Args::parse_from([
      "tracer", "-u", "nobody", "-c", "4", "-l", "128", "-o", "log.tsv", "-e", "err.txt",
      "/bin/sh", "-c", "true",
    ]);
    assert_eq!(args.user.as_deref(), Some("nobody"));
    assert_eq!(args.descendant_limit, Some(4));
    assert_eq!(args.output_limit, Some(128));
    assert_eq!(args.log_path, Some(PathBuf::from("log.tsv")));
    assert_eq!(args.err_path, Some(PathBuf::from("err.txt")));
    assert_eq!(args.command, vec!["/bin/sh", "-c", "true"]);
  }

  #[rstest]
  #[case("0")]
  #[case("-1")]
  #[case("nope")]
  fn invalid_descendant_limits_are_rejected(#[case] input: &str) {
    assert!(positive_usize(input).is_err());
  }

  #[rstest]
  #[case("0")]
  #[case("nope")]
  fn invalid_output_limits_are_rejected(#[case] input: &str) {
    assert!(positive_u64(input).is_err());
  }
}
