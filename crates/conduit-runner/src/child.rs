//! Child-process abstraction unifying pipe-based and PTY-based spawning.
//!
//! Direct and container modes talk to the child over plain tokio pipes.
//! PTY mode hands the child a controlling terminal via `portable-pty`,
//! whose reader/writer are blocking; the reader is bridged onto a
//! dedicated OS thread that forwards chunks over an `mpsc` channel, and
//! writes are dispatched through `spawn_blocking`.

use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::errors::{Result, RunnerError};
use crate::options::{ChildCommand, SpawnMode};

const READ_CHUNK_SIZE: usize = 8192;
const PTY_CHANNEL_CAPACITY: usize = 64;

/// Process exit information, normalized across spawn modes.
pub(crate) struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// A spawned child, abstracted over its transport.
pub(crate) enum ChildHandle {
    Direct {
        child: tokio::process::Child,
        stdin: tokio::process::ChildStdin,
        stdout: tokio::process::ChildStdout,
    },
    Pty {
        pty_child: Box<dyn portable_pty::Child + Send + Sync>,
        writer: Arc<SyncMutex<Box<dyn Write + Send>>>,
        reader_rx: mpsc::Receiver<Vec<u8>>,
    },
}

impl ChildHandle {
    pub fn spawn(cmd: &ChildCommand) -> Result<Self> {
        match cmd.mode {
            SpawnMode::Pty => Self::spawn_pty(cmd),
            _ => Self::spawn_direct(cmd),
        }
    }

    fn spawn_direct(cmd: &ChildCommand) -> Result<Self> {
        let mut builder = Command::new(&cmd.program);
        builder
            .args(&cmd.args)
            .current_dir(&cmd.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &cmd.env {
            builder.env(k, v);
        }

        let mut child = builder
            .spawn()
            .map_err(|e| RunnerError::ChildSpawnFailed(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::ChildSpawnFailed("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::ChildSpawnFailed("child has no stdout".into()))?;
        Ok(Self::Direct { child, stdin, stdout })
    }

    fn spawn_pty(cmd: &ChildCommand) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize { rows: 40, cols: 120, pixel_width: 0, pixel_height: 0 })
            .map_err(|e| RunnerError::ChildSpawnFailed(e.to_string()))?;

        let mut builder = CommandBuilder::new(&cmd.program);
        for arg in &cmd.args {
            builder.arg(arg);
        }
        builder.cwd(&cmd.working_dir);
        for (k, v) in &cmd.env {
            builder.env(k, v);
        }

        let pty_child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| RunnerError::ChildSpawnFailed(e.to_string()))?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| RunnerError::ChildSpawnFailed(e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RunnerError::ChildSpawnFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(PTY_CHANNEL_CAPACITY);
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self::Pty { pty_child, writer: Arc::new(SyncMutex::new(writer)), reader_rx: rx })
    }

    /// Write one NDJSON frame, appending the trailing newline.
    pub async fn write_frame(&mut self, frame: String) -> Result<()> {
        match self {
            Self::Direct { stdin, .. } => {
                stdin.write_all(frame.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await?;
                Ok(())
            }
            Self::Pty { writer, .. } => {
                let writer = Arc::clone(writer);
                tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                    let mut guard = writer.lock();
                    guard.write_all(frame.as_bytes())?;
                    guard.write_all(b"\n")?;
                    guard.flush()
                })
                .await
                .map_err(|e| RunnerError::Io(std::io::Error::other(e)))??;
                Ok(())
            }
        }
    }

    /// Write raw bytes with no frame wrapping, for interactive passthrough.
    pub async fn write_raw(&mut self, bytes: Vec<u8>) -> Result<()> {
        match self {
            Self::Direct { stdin, .. } => {
                stdin.write_all(&bytes).await?;
                stdin.flush().await?;
                Ok(())
            }
            Self::Pty { writer, .. } => {
                let writer = Arc::clone(writer);
                tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                    let mut guard = writer.lock();
                    guard.write_all(&bytes)?;
                    guard.flush()
                })
                .await
                .map_err(|e| RunnerError::Io(std::io::Error::other(e)))??;
                Ok(())
            }
        }
    }

    /// Read the next available chunk of output, or `None` on EOF.
    pub async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Direct { stdout, .. } => {
                let mut buf = [0u8; READ_CHUNK_SIZE];
                let n = stdout.read(&mut buf).await?;
                if n == 0 { Ok(None) } else { Ok(Some(buf[..n].to_vec())) }
            }
            Self::Pty { reader_rx, .. } => Ok(reader_rx.recv().await),
        }
    }

    pub async fn wait(&mut self) -> Result<ExitInfo> {
        match self {
            Self::Direct { child, .. } => {
                let status = child.wait().await?;
                #[cfg(unix)]
                let signal = {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal()
                };
                #[cfg(not(unix))]
                let signal = None;
                Ok(ExitInfo { code: status.code(), signal })
            }
            Self::Pty { pty_child, .. } => {
                let status = pty_child
                    .wait()
                    .map_err(|e| RunnerError::Io(std::io::Error::other(e)))?;
                Ok(ExitInfo { code: Some(i32::try_from(status.exit_code()).unwrap_or(-1)), signal: None })
            }
        }
    }

    pub fn start_kill(&mut self) -> Result<()> {
        match self {
            Self::Direct { child, .. } => Ok(child.start_kill()?),
            Self::Pty { pty_child, .. } => {
                pty_child.kill().map_err(|e| RunnerError::Io(std::io::Error::other(e)))
            }
        }
    }
}
