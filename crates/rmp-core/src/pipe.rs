//! Pipe-based subprocess capture for signer and probe invocations.
//!
//! Every external tool is run with an argv vector, never through a
//! shell. Stdout and stderr are both captured so callers can grep the
//! combined output the way the signer's diagnostics require.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

/// Result of a captured subprocess run.
pub struct Captured {
    /// Exit code; -1 when the child was killed by a signal.
    pub status: i32,
    /// Stdout followed by stderr.
    pub output: Vec<u8>,
}

impl Captured {
    /// Case-sensitive substring search over the combined output.
    pub fn contains(&self, needle: &str) -> bool {
        self.output
            .windows(needle.len())
            .any(|w| w == needle.as_bytes())
    }

    /// Combined output line by line, lossily decoded for logging.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.output
            .split(|&b| b == b'\n')
            .filter(|l| !l.is_empty())
            .map(|l| String::from_utf8_lossy(l).into_owned())
    }
}

/// Run `program` with `args`, capturing stdout+stderr. Spawn failure
/// (fork, pipe, missing binary) surfaces as the `io::Error`; a child
/// that runs and exits non-zero is reported through `Captured::status`.
pub fn run_capture<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> io::Result<Captured> {
    let out = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    let mut output = out.stdout;
    output.extend_from_slice(&out.stderr);
    Ok(Captured {
        status: out.status.code().unwrap_or(-1),
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn captures_stdout_and_exit_code() {
        let r = run_capture(&PathBuf::from("/bin/sh"), &["-c", "echo hello; exit 3"]).unwrap();
        assert_eq!(r.status, 3);
        assert!(r.contains("hello"));
    }

    #[test]
    fn captures_stderr_too() {
        let r = run_capture(&PathBuf::from("/bin/sh"), &["-c", "echo oops >&2"]).unwrap();
        assert_eq!(r.status, 0);
        assert!(r.contains("oops"));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        assert!(run_capture(&PathBuf::from("/no/such/binary"), &["x"]).is_err());
    }

    #[test]
    fn lines_iterates_output() {
        let r = run_capture(&PathBuf::from("/bin/sh"), &["-c", "printf 'a\\nb\\n'"]).unwrap();
        let lines: Vec<String> = r.lines().collect();
        assert_eq!(lines, vec!["a", "b"]);
    }
}
