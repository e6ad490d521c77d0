//! OS process helpers shared by the daemon supervisor and the executor:
//! bounded output capture, process-group signalling and graceful stop.

use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tracing::debug;

/// Default cap on captured output per stream (1 MB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Marker prefixed to output that was cut.
pub const TRUNCATION_MARKER: &str = "[output truncated]\n";

/// Append to a buffer, keeping roughly the last `max_bytes`.
///
/// The buffer grows to twice the limit before it is cut back, and the cut
/// never splits a UTF-8 sequence.
pub fn append_with_truncation(buffer: &mut Vec<u8>, data: &[u8], max_bytes: usize) -> bool {
    buffer.extend_from_slice(data);
    if buffer.len() <= max_bytes.saturating_mul(2) {
        return false;
    }
    let keep_from = buffer.len() - max_bytes;
    let safe_keep_from = (keep_from..buffer.len())
        .find(|&i| buffer.get(i).is_none_or(|b| (*b as i8) >= -64))
        .unwrap_or(buffer.len());
    buffer.drain(0..safe_keep_from);
    true
}

/// Keep the last `max_bytes` of `data` as text, on a UTF-8 boundary.
pub fn truncate_output_tail(data: &[u8], max_bytes: usize) -> String {
    if data.len() <= max_bytes {
        return String::from_utf8_lossy(data).into_owned();
    }
    let keep_from = data.len() - max_bytes;
    let safe_keep_from = (keep_from..data.len())
        .find(|&i| data.get(i).is_none_or(|b| (*b as i8) >= -64))
        .unwrap_or(data.len());
    format!(
        "{}{}",
        TRUNCATION_MARKER,
        String::from_utf8_lossy(&data[safe_keep_from..])
    )
}

/// Cut a string to its last `max_bytes`, marking the cut.
pub fn truncate_text(text: &str, max_bytes: usize) -> String {
    truncate_output_tail(text.as_bytes(), max_bytes)
}

/// Read a stream to the end, keeping a bounded tail.
pub async fn read_stream_with_limit<R>(mut reader: R, max_bytes: usize) -> std::io::Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        truncated |= append_with_truncation(&mut buffer, &chunk[..n], max_bytes);
    }

    let text = truncate_output_tail(&buffer, max_bytes);
    if truncated && !text.starts_with(TRUNCATION_MARKER) {
        return Ok(format!("{}{}", TRUNCATION_MARKER, text));
    }
    Ok(text)
}

/// Send a signal to a process group.
pub fn signal_group(pgid: u32, signal: Signal) -> nix::Result<()> {
    let pgid = i32::try_from(pgid).map_err(|_| nix::errno::Errno::EINVAL)?;
    killpg(Pid::from_raw(pgid), signal)
}

/// Terminate a child that leads its own process group: SIGTERM to the group,
/// then SIGKILL if it is still alive after `grace`.
pub async fn graceful_stop(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        // Already reaped
        return child.wait().await;
    };
    debug!(pid, "sending SIGTERM to process group");
    let _ = signal_group(pid, Signal::SIGTERM);

    tokio::select! {
        status = child.wait() => status,
        _ = tokio::time::sleep(grace) => {
            debug!(pid, "grace period elapsed, sending SIGKILL");
            let _ = signal_group(pid, Signal::SIGKILL);
            child.wait().await
        }
    }
}

/// Exit code, or 128 + signal number for signalled processes.
pub fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}

/// Signal that terminated the process, if any.
pub fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

/// Name for a signal number (`TERM`, `KILL`).
pub fn signal_name(signo: i32) -> String {
    match Signal::try_from(signo) {
        Ok(sig) => sig.as_str().trim_start_matches("SIG").to_string(),
        Err(_) => signo.to_string(),
    }
}

/// Parse `TERM`, `SIGTERM`, `term` or `15`.
pub fn parse_signal(spec: &str) -> Option<Signal> {
    if let Ok(n) = spec.parse::<i32>() {
        return Signal::try_from(n).ok();
    }
    let upper = spec.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    name.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[test]
    fn test_append_with_truncation_keeps_tail() {
        let mut buf = Vec::new();
        assert!(!append_with_truncation(&mut buf, b"abcd", 4));
        assert!(!append_with_truncation(&mut buf, b"efgh", 4));
        assert!(append_with_truncation(&mut buf, b"ij", 4));
        assert_eq!(buf, b"ghij");
    }

    #[test]
    fn test_truncation_respects_utf8() {
        let text = "ééééé";
        let out = truncate_output_tail(text.as_bytes(), 3);
        assert!(out.starts_with(TRUNCATION_MARKER));
        assert_eq!(out.trim_start_matches(TRUNCATION_MARKER), "é");
        assert_eq!(truncate_output_tail(b"short", 10), "short");
    }

    #[tokio::test]
    async fn test_read_stream_with_limit() {
        let data = vec![b'x'; 10_000];
        let out = read_stream_with_limit(&data[..], 100).await.unwrap();
        assert!(out.starts_with(TRUNCATION_MARKER));
        assert_eq!(out.len(), TRUNCATION_MARKER.len() + 100);

        let out = read_stream_with_limit(&b"hello\n"[..], 100).await.unwrap();
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(parse_signal("TERM"), Some(Signal::SIGTERM));
        assert_eq!(parse_signal("sigkill"), Some(Signal::SIGKILL));
        assert_eq!(parse_signal("2"), Some(Signal::SIGINT));
        assert_eq!(parse_signal("BOGUS"), None);
        assert_eq!(signal_name(15), "TERM");
    }

    #[tokio::test]
    async fn test_graceful_stop_terminates_group() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30")
            .stdout(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();
        let status = graceful_stop(&mut child, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(exit_signal(status), Some(15));
        assert_eq!(exit_code(status), 143);
    }

    #[tokio::test]
    async fn test_graceful_stop_escalates() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 30")
            .stdout(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = graceful_stop(&mut child, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(exit_signal(status), Some(9));
    }
}
