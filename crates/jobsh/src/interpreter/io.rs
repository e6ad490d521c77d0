//! Standard streams and redirection targets.

use std::fs::File;
use std::io::Write;

use super::ExecResult;

/// Text fed to a command's standard input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputBuffer {
    data: String,
    pos: usize,
}

impl InputBuffer {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    /// Next line including its newline, or `None` at end of input.
    pub fn read_line(&mut self) -> Option<String> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let end = rest.find('\n').map_or(rest.len(), |i| i + 1);
        let line = rest[..end].to_string();
        self.pos += end;
        Some(line)
    }

    /// Everything not yet consumed.
    pub fn take_rest(&mut self) -> String {
        let rest = self.data[self.pos..].to_string();
        self.pos = self.data.len();
        rest
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Where a command's standard input comes from.
#[derive(Debug, Default)]
pub enum StdinSource {
    /// Text already in memory: pipe from a builtin, here-document, file
    Buffer(InputBuffer),
    /// The shell process's own stdin
    Process,
    /// Nothing (background jobs, library use)
    #[default]
    Null,
}

impl StdinSource {
    pub fn text(data: impl Into<String>) -> Self {
        StdinSource::Buffer(InputBuffer::new(data))
    }

    /// Read one line, `None` at end of input.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        match self {
            StdinSource::Buffer(buf) => Ok(buf.read_line()),
            StdinSource::Null => Ok(None),
            StdinSource::Process => {
                let line = tokio::task::spawn_blocking(|| {
                    let mut line = String::new();
                    std::io::stdin().read_line(&mut line).map(|n| (n, line))
                })
                .await
                .map_err(std::io::Error::other)??;
                Ok((line.0 > 0).then_some(line.1))
            }
        }
    }

    /// Read everything that remains.
    pub async fn read_all(&mut self) -> std::io::Result<String> {
        match self {
            StdinSource::Buffer(buf) => Ok(buf.take_rest()),
            StdinSource::Null => Ok(String::new()),
            StdinSource::Process => tokio::task::spawn_blocking(|| {
                let mut data = String::new();
                std::io::Read::read_to_string(&mut std::io::stdin(), &mut data).map(|_| data)
            })
            .await
            .map_err(std::io::Error::other)?,
        }
    }
}

/// Destination for fd 1 or fd 2 after redirections.
#[derive(Debug)]
pub enum OutTarget {
    /// Whatever stdout currently is (captured or the terminal)
    Stdout,
    /// Whatever stderr currently is
    Stderr,
    File(File),
    Null,
}

impl OutTarget {
    pub fn try_clone(&self) -> std::io::Result<Self> {
        Ok(match self {
            OutTarget::Stdout => OutTarget::Stdout,
            OutTarget::Stderr => OutTarget::Stderr,
            OutTarget::File(f) => OutTarget::File(f.try_clone()?),
            OutTarget::Null => OutTarget::Null,
        })
    }
}

/// Standard input after redirections.
#[derive(Debug)]
pub enum InTarget {
    Text(String),
    File(File),
}

/// Resolved redirections for one command.
#[derive(Debug)]
pub struct RedirectPlan {
    pub stdin: Option<InTarget>,
    pub stdout: OutTarget,
    pub stderr: OutTarget,
}

impl Default for RedirectPlan {
    fn default() -> Self {
        Self {
            stdin: None,
            stdout: OutTarget::Stdout,
            stderr: OutTarget::Stderr,
        }
    }
}

impl RedirectPlan {
    /// Whether output stays on the default streams.
    pub fn is_default_output(&self) -> bool {
        matches!(self.stdout, OutTarget::Stdout) && matches!(self.stderr, OutTarget::Stderr)
    }

    /// Route a captured result's output through fd 1 and fd 2.
    pub fn route(&mut self, result: &mut ExecResult) -> std::io::Result<()> {
        let stdout = std::mem::take(&mut result.stdout);
        let stderr = std::mem::take(&mut result.stderr);
        write_target(&mut self.stdout, &stdout, result)?;
        write_target(&mut self.stderr, &stderr, result)?;
        Ok(())
    }
}

fn write_target(target: &mut OutTarget, text: &str, result: &mut ExecResult) -> std::io::Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    match target {
        OutTarget::Stdout => result.stdout.push_str(text),
        OutTarget::Stderr => result.stderr.push_str(text),
        OutTarget::File(file) => file.write_all(text.as_bytes())?,
        OutTarget::Null => {}
    }
    Ok(())
}

/// Write captured output to the process's real streams.
pub fn flush_to_terminal(result: &mut ExecResult) {
    if !result.stdout.is_empty() {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(result.stdout.as_bytes());
        let _ = out.flush();
        result.stdout.clear();
    }
    if !result.stderr.is_empty() {
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(result.stderr.as_bytes());
        let _ = err.flush();
        result.stderr.clear();
    }
}
