//! Output capture for launched envoy processes
//!
//! Design:
//! 1. The child is spawned with piped stdout/stderr
//! 2. One detached reader thread per pipe
//! 3. Each line becomes a `tracing` event under target `envoy`
//! 4. Threads end on their own when the pipe closes (process exit)

use std::io::{BufRead, BufReader, Read};
use std::process::Child;
use std::thread;

/// Which stream a captured line came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Take the child's piped stdout/stderr and forward them to the logger
pub fn forward_output(child: &mut Child, component: &'static str) {
    let pid = child.id();
    if let Some(stdout) = child.stdout.take() {
        spawn_forwarder(stdout, Stream::Stdout, component, pid);
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_forwarder(stderr, Stream::Stderr, component, pid);
    }
}

fn spawn_forwarder<R>(reader: R, stream: Stream, component: &'static str, pid: u32)
where
    R: Read + Send + 'static,
{
    let name = format!("{}-{}-{}", component, pid, stream.as_str());
    let spawned = thread::Builder::new().name(name).spawn(move || {
        forward_lines(reader, |line| {
            tracing::info!(target: "envoy", component, pid, stream = stream.as_str(), "{}", line);
        })
    });
    if let Err(e) = spawned {
        tracing::warn!(component, pid, error = %e, "failed to spawn output forwarder");
    }
}

/// Feed every line of `reader` to `sink`, lossily decoded. Returns the line count.
pub fn forward_lines<R, F>(reader: R, mut sink: F) -> usize
where
    R: Read,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink(line.trim_end_matches(['\n', '\r']));
                count += 1;
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_lines_splits_and_trims() {
        let input: &[u8] = b"first\r\nsecond\nlast-without-newline";
        let mut lines = Vec::new();
        let count = forward_lines(input, |l| lines.push(l.to_string()));
        assert_eq!(count, 3);
        assert_eq!(lines, vec!["first", "second", "last-without-newline"]);
    }

    #[test]
    fn test_forward_lines_invalid_utf8() {
        let input: &[u8] = b"ok \xff\n";
        let mut lines = Vec::new();
        forward_lines(input, |l| lines.push(l.to_string()));
        assert_eq!(lines, vec!["ok \u{fffd}"]);
    }

    #[test]
    fn test_forward_lines_empty() {
        let input: &[u8] = b"";
        assert_eq!(forward_lines(input, |_| panic!("no lines expected")), 0);
    }

    #[test]
    fn test_forward_output_takes_pipes() {
        use std::process::{Command, Stdio};

        let mut child = Command::new("sh")
            .args(["-c", "echo out; echo err >&2"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        forward_output(&mut child, "test");
        assert!(child.stdout.is_none());
        assert!(child.stderr.is_none());
        child.wait().unwrap();
    }
}
