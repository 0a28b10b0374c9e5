//! Synchronous external-process runner.
//!
//! [`run`] starts a program directly (no shell), forwards every stdout and
//! stderr line to a [`LineSink`], blocks until the program exits and returns
//! its exit code with the wall-clock time it took. There is no timeout: a
//! hung tool hangs the caller.

use parking_lot::Mutex;
use sp_error::Result;
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Consumer of a child process's output lines.
///
/// stderr is drained on a helper thread while stdout is drained on the
/// caller's, so implementations must tolerate calls from both.
pub trait LineSink: Sync {
    fn stdout_line(&self, line: &str);
    fn stderr_line(&self, line: &str);
}

/// Result of one finished process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub elapsed: Duration,
}

/// Default sink: stdout at info, stderr at warn, tagged with the tool name.
///
/// The last few stderr lines are retained so a failing invocation can be
/// reported with the tool's own explanation.
#[derive(Debug)]
pub struct TracingSink {
    tool: String,
    stderr_tail: Mutex<VecDeque<String>>,
}

impl TracingSink {
    const TAIL_LINES: usize = 16;

    #[must_use]
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            stderr_tail: Mutex::new(VecDeque::with_capacity(Self::TAIL_LINES)),
        }
    }

    /// Most recent stderr lines, oldest first.
    #[must_use]
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().iter().cloned().collect()
    }
}

impl LineSink for TracingSink {
    fn stdout_line(&self, line: &str) {
        info!(target: "sp::spawn::output", tool = %self.tool, "{line}");
    }

    fn stderr_line(&self, line: &str) {
        warn!(target: "sp::spawn::output", tool = %self.tool, "{line}");
        let mut tail = self.stderr_tail.lock();
        if tail.len() == Self::TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.to_owned());
    }
}

/// Run `program` with `args`, streaming its output into `sink`.
pub fn run<P, I, S>(program: P, args: I, sink: &dyn LineSink) -> Result<ProcessOutcome>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    info!(
        target: "sp::spawn::runner",
        program = %program.to_string_lossy(),
        args = ?args,
        "launching"
    );

    let start = Instant::now();
    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let forwarded = std::thread::scope(|scope| -> io::Result<()> {
        let stderr_reader = stderr
            .map(|pipe| scope.spawn(move || forward_lines(pipe, |line| sink.stderr_line(line))));
        let stdout_result = match stdout {
            Some(pipe) => forward_lines(pipe, |line| sink.stdout_line(line)),
            None => Ok(()),
        };
        let stderr_result = match stderr_reader {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stderr reader panicked"))),
            None => Ok(()),
        };
        stdout_result.and(stderr_result)
    });

    // Reap the child even if forwarding failed.
    let status = child.wait()?;
    forwarded?;

    let outcome = ProcessOutcome {
        exit_code: exit_code_of(status),
        elapsed: start.elapsed(),
    };
    info!(
        target: "sp::spawn::runner",
        program = %program.to_string_lossy(),
        exit_code = outcome.exit_code,
        elapsed_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
        "finished"
    );
    Ok(outcome)
}

fn forward_lines<R: Read>(pipe: R, mut emit: impl FnMut(&str)) -> io::Result<()> {
    // Tools like robocopy write in the console code page, not UTF-8.
    for raw in BufReader::new(pipe).split(b'\n') {
        let raw = raw?;
        let line = String::from_utf8_lossy(&raw);
        emit(line.trim_end_matches('\r'));
    }
    Ok(())
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CollectingSink {
        stdout: Mutex<Vec<String>>,
        stderr: Mutex<Vec<String>>,
    }

    impl LineSink for CollectingSink {
        fn stdout_line(&self, line: &str) {
            self.stdout.lock().push(line.to_owned());
        }

        fn stderr_line(&self, line: &str) {
            self.stderr.lock().push(line.to_owned());
        }
    }

    #[test]
    fn tracing_sink_keeps_bounded_stderr_tail() {
        let sink = TracingSink::new("tool");
        for i in 0..40 {
            sink.stderr_line(&format!("line {i}"));
        }
        sink.stdout_line("ignored");
        let tail = sink.stderr_tail();
        assert_eq!(tail.len(), TracingSink::TAIL_LINES);
        assert_eq!(tail.first().map(String::as_str), Some("line 24"));
        assert_eq!(tail.last().map(String::as_str), Some("line 39"));
    }

    #[test]
    fn forward_lines_strips_crlf_and_tolerates_non_utf8() {
        let input: &[u8] = b"first\r\nsecond\n\xffthird";
        let mut lines = Vec::new();
        forward_lines(input, |l| lines.push(l.to_owned())).unwrap();
        assert_eq!(lines, vec!["first", "second", "\u{fffd}third"]);
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let sink = CollectingSink::default();
        let err = run("sp-definitely-not-installed-tool", ["x"], &sink).unwrap_err();
        assert!(matches!(err, sp_error::SpError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[cfg(unix)]
    #[test]
    fn captures_both_streams_and_exit_code() {
        let sink = CollectingSink::default();
        let outcome = run(
            "sh",
            ["-c", "echo out1; echo err1 >&2; echo out2; exit 3"],
            &sink,
        )
        .unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(*sink.stdout.lock(), vec!["out1", "out2"]);
        assert_eq!(*sink.stderr.lock(), vec!["err1"]);
    }

    #[cfg(unix)]
    #[test]
    fn arguments_are_not_shell_interpreted() {
        let sink = CollectingSink::default();
        let outcome = run("echo", ["$HOME", "a;b", "*"], &sink).unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(*sink.stdout.lock(), vec!["$HOME a;b *"]);
    }

    #[cfg(unix)]
    #[test]
    fn signal_exit_maps_above_128() {
        let sink = CollectingSink::default();
        let outcome = run("sh", ["-c", "kill -9 $$"], &sink).unwrap();
        assert_eq!(outcome.exit_code, 128 + 9);
    }

    #[cfg(windows)]
    #[test]
    fn captures_exit_code_on_windows() {
        let sink = CollectingSink::default();
        let outcome = run("cmd", ["/C", "echo out1 & exit 3"], &sink).unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(sink.stdout.lock().first().map(|l| l.trim()), Some("out1"));
    }
}
