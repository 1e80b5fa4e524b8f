//! FIFO-based pane output capture via `tmux pipe-pane`.
//!
//! Each [`PaneTap`] manages the lifecycle of a capture stream for a single
//! tmux pane. On the local host the flow is:
//!
//! 1. `start()` — creates `/tmp/agtmux/pane-tap-{pid}-{pane_id}.fifo`,
//!    then runs `tmux pipe-pane -t {pane_id} -O "exec cat > {fifo}"`.
//! 2. `read()` — async, non-blocking read of up to 16 KiB from the FIFO.
//! 3. `stop()` — detaches pipe-pane, removes the FIFO.
//!
//! For ssh targets the FIFO lives on the remote host and a long-running
//! `ssh <alias> cat <fifo>` child streams it back; `read()` pulls from the
//! child's stdout. `Drop` performs best-effort cleanup.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

const FIFO_DIR: &str = "/tmp/agtmux";
const READ_BUF_SIZE: usize = 16 * 1024; // 16 KiB
const SSH_READ_TIMEOUT_MS: u64 = 20;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PaneTapError {
    #[error("fifo creation failed: {0}")]
    FifoCreation(String),
    #[error("tmux pipe-pane failed: {0}")]
    PipePaneSetup(String),
    #[error("ssh tap stream failed: {0}")]
    SshStream(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

enum TapTransport {
    Local {
        tmux_bin: String,
        reader: Option<File>,
    },
    Ssh {
        ssh_args: Vec<String>,
        tmux_bin: String,
        child: Option<Child>,
        stdout: Option<ChildStdout>,
    },
}

// ---------------------------------------------------------------------------
// PaneTap
// ---------------------------------------------------------------------------

pub struct PaneTap {
    pane_id: String,
    fifo_path: PathBuf,
    transport: TapTransport,
    active: bool,
}

impl PaneTap {
    /// Tap for a pane on the local host, using the default `"tmux"` binary.
    ///
    /// Does **not** start capturing yet — call [`start()`](Self::start).
    pub fn local(pane_id: &str) -> Self {
        Self::local_with_tmux_bin(pane_id, "tmux")
    }

    /// Local tap with a custom tmux binary path.
    pub fn local_with_tmux_bin(pane_id: &str, tmux_bin: impl Into<String>) -> Self {
        Self {
            pane_id: pane_id.to_owned(),
            fifo_path: fifo_path_for(pane_id),
            transport: TapTransport::Local {
                tmux_bin: tmux_bin.into(),
                reader: None,
            },
            active: false,
        }
    }

    /// Tap for a pane on an ssh target. `ssh_args` is the full argument
    /// prefix up to and including the host alias (BatchMode, ControlPath,
    /// …), shared with the target's command runner.
    pub fn ssh(pane_id: &str, ssh_args: Vec<String>, tmux_bin: impl Into<String>) -> Self {
        Self {
            pane_id: pane_id.to_owned(),
            fifo_path: fifo_path_for(pane_id),
            transport: TapTransport::Ssh {
                ssh_args,
                tmux_bin: tmux_bin.into(),
                child: None,
                stdout: None,
            },
            active: false,
        }
    }

    /// Start capturing output from the pane. Returns the FIFO path.
    pub async fn start(&mut self) -> Result<PathBuf, PaneTapError> {
        match &mut self.transport {
            TapTransport::Local { tmux_bin, .. } => {
                let tmux_bin = tmux_bin.clone();
                tokio::fs::create_dir_all(FIFO_DIR).await?;
                let _ = tokio::fs::remove_file(&self.fifo_path).await;
                mkfifo_local(&self.fifo_path).await?;
                attach_pipe_pane_local(&tmux_bin, &self.pane_id, &self.fifo_path).await?;
            }
            TapTransport::Ssh {
                ssh_args,
                tmux_bin,
                child,
                stdout,
            } => {
                let fifo = self.fifo_path.display().to_string();
                // One remote shell: prepare the FIFO, attach pipe-pane,
                // then stream the FIFO until the tap is stopped.
                let script = format!(
                    "mkdir -p {FIFO_DIR} && rm -f '{fifo}' && mkfifo '{fifo}' && \
                     {tmux_bin} pipe-pane -t '{pane}' -O 'exec cat > \"{fifo}\"' && \
                     exec cat '{fifo}'",
                    pane = self.pane_id,
                );
                let mut cmd = Command::new("ssh");
                cmd.args(ssh_args.iter());
                cmd.arg(script);
                cmd.stdout(Stdio::piped());
                cmd.stderr(Stdio::null());
                cmd.stdin(Stdio::null());
                cmd.kill_on_drop(true);
                let mut spawned = cmd
                    .spawn()
                    .map_err(|e| PaneTapError::SshStream(e.to_string()))?;
                *stdout = spawned.stdout.take();
                *child = Some(spawned);
            }
        }

        self.active = true;
        Ok(self.fifo_path.clone())
    }

    /// Stop capturing: detaches `pipe-pane` and removes the FIFO.
    pub async fn stop(&mut self) -> Result<(), PaneTapError> {
        if !self.active {
            return Ok(());
        }

        match &mut self.transport {
            TapTransport::Local { tmux_bin, reader } => {
                // Drop the reader before removing the FIFO so the fd is closed.
                reader.take();
                let tmux_bin = tmux_bin.clone();
                detach_pipe_pane_local(&tmux_bin, &self.pane_id).await?;
                if self.fifo_path.exists() {
                    tokio::fs::remove_file(&self.fifo_path).await?;
                }
            }
            TapTransport::Ssh {
                ssh_args,
                tmux_bin,
                child,
                stdout,
            } => {
                stdout.take();
                if let Some(mut c) = child.take() {
                    let _ = c.kill().await;
                }
                // One-shot remote cleanup: detach pipe-pane, remove FIFO.
                let fifo = self.fifo_path.display().to_string();
                let script =
                    format!("{tmux_bin} pipe-pane -t '{}'; rm -f '{fifo}'", self.pane_id);
                let _ = Command::new("ssh")
                    .args(ssh_args.iter())
                    .arg(script)
                    .output()
                    .await;
            }
        }

        self.active = false;
        Ok(())
    }

    /// Read available bytes (non-blocking, up to 16 KiB).
    ///
    /// Returns `Ok(None)` if no data is currently available.
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>, PaneTapError> {
        if !self.active {
            return Ok(None);
        }

        match &mut self.transport {
            TapTransport::Local { reader, .. } => {
                // Lazily open the FIFO for reading.
                if reader.is_none() {
                    let file = tokio::fs::OpenOptions::new()
                        .read(true)
                        .custom_flags(libc::O_NONBLOCK)
                        .open(&self.fifo_path)
                        .await?;
                    *reader = Some(file);
                }

                let Some(file) = reader.as_mut() else {
                    return Ok(None);
                };
                let mut buf = vec![0u8; READ_BUF_SIZE];
                match file.read(&mut buf).await {
                    Ok(0) => Ok(None),
                    Ok(n) => {
                        buf.truncate(n);
                        Ok(Some(buf))
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                    Err(e) => Err(PaneTapError::Io(e)),
                }
            }
            TapTransport::Ssh { stdout, .. } => {
                let Some(out) = stdout.as_mut() else {
                    return Ok(None);
                };
                let mut buf = vec![0u8; READ_BUF_SIZE];
                let read = tokio::time::timeout(
                    std::time::Duration::from_millis(SSH_READ_TIMEOUT_MS),
                    out.read(&mut buf),
                );
                match read.await {
                    Err(_) => Ok(None), // no data inside the poll window
                    Ok(Ok(0)) => Err(PaneTapError::SshStream("remote stream closed".into())),
                    Ok(Ok(n)) => {
                        buf.truncate(n);
                        Ok(Some(buf))
                    }
                    Ok(Err(e)) => Err(PaneTapError::Io(e)),
                }
            }
        }
    }

    /// Path to the FIFO file (remote path for ssh taps).
    pub fn fifo_path(&self) -> &PathBuf {
        &self.fifo_path
    }

    /// Whether this tap is currently active (capturing).
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn pane_id(&self) -> &str {
        &self.pane_id
    }
}

impl Drop for PaneTap {
    /// Best-effort cleanup: remove the local FIFO file. We intentionally
    /// do NOT spawn processes in Drop; callers should `stop()` for a
    /// clean teardown. The ssh child is reaped via `kill_on_drop`.
    fn drop(&mut self) {
        if let TapTransport::Local { reader, .. } = &mut self.transport {
            reader.take();
            let _ = std::fs::remove_file(&self.fifo_path);
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn fifo_path_for(pane_id: &str) -> PathBuf {
    let pid = std::process::id();
    // Sanitize pane_id: tmux pane ids look like %0, %1 etc.
    let safe_id = pane_id.replace('%', "");
    PathBuf::from(FIFO_DIR).join(format!("pane-tap-{pid}-{safe_id}.fifo"))
}

async fn mkfifo_local(path: &PathBuf) -> Result<(), PaneTapError> {
    let output = Command::new("mkfifo")
        .arg(path)
        .output()
        .await
        .map_err(|e| PaneTapError::FifoCreation(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PaneTapError::FifoCreation(format!(
            "mkfifo exited {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim(),
        )));
    }
    Ok(())
}

async fn attach_pipe_pane_local(
    tmux_bin: &str,
    pane_id: &str,
    fifo_path: &PathBuf,
) -> Result<(), PaneTapError> {
    let cat_cmd = format!(
        "exec cat > '{}'",
        fifo_path.display().to_string().replace('\'', "'\\''"),
    );

    let output = Command::new(tmux_bin)
        .args(["pipe-pane", "-t", pane_id, "-O", &cat_cmd])
        .output()
        .await
        .map_err(|e| PaneTapError::PipePaneSetup(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PaneTapError::PipePaneSetup(format!(
            "tmux pipe-pane exited {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim(),
        )));
    }
    Ok(())
}

async fn detach_pipe_pane_local(tmux_bin: &str, pane_id: &str) -> Result<(), PaneTapError> {
    let output = Command::new(tmux_bin)
        .args(["pipe-pane", "-t", pane_id])
        .output()
        .await
        .map_err(|e| PaneTapError::PipePaneSetup(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PaneTapError::PipePaneSetup(format!(
            "tmux pipe-pane detach exited {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim(),
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
