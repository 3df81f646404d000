//! Child-process helpers shared across the workspace.
//!
//! External tools (yt-dlp, ffmpeg, ffprobe) are always spawned through these
//! helpers so that every invocation is windowless on Windows, is killed when
//! its handle is dropped, and can be bounded by a hard timeout.

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
pub use bounded::{BoundedOutput, output_with_timeout, tokio_command};

#[cfg(feature = "tokio")]
mod bounded {
    use std::ffi::OsStr;
    use std::process::{ExitStatus, Stdio};
    use std::time::{Duration, Instant};

    use super::NoWindowExt;

    impl NoWindowExt for tokio::process::Command {
        fn no_window(&mut self) {
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                self.as_std_mut().creation_flags(super::CREATE_NO_WINDOW);
            }
        }
    }

    /// Create a `tokio::process::Command` that is windowless on Windows and
    /// killed when the owning future is dropped.
    pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.no_window();
        cmd.kill_on_drop(true);
        cmd
    }

    /// Result of a child process run under a deadline.
    #[derive(Debug)]
    pub struct BoundedOutput {
        /// Exit status, `None` when the deadline expired and the child was killed.
        pub status: Option<ExitStatus>,
        pub stdout: Vec<u8>,
        pub stderr: Vec<u8>,
        pub elapsed: Duration,
    }

    impl BoundedOutput {
        /// Whether the deadline expired before the child exited.
        pub fn timed_out(&self) -> bool {
            self.status.is_none()
        }

        /// Whether the child exited with status zero.
        pub fn success(&self) -> bool {
            self.status.is_some_and(|s| s.success())
        }

        /// Exit code, if the child exited normally.
        pub fn code(&self) -> Option<i32> {
            self.status.and_then(|s| s.code())
        }

        pub fn stdout_lossy(&self) -> String {
            String::from_utf8_lossy(&self.stdout).into_owned()
        }

        pub fn stderr_lossy(&self) -> String {
            String::from_utf8_lossy(&self.stderr).into_owned()
        }
    }

    /// Spawn `cmd` with piped output and wait for it for at most `timeout`.
    ///
    /// On expiry the child is killed (via `kill_on_drop`) and the returned
    /// output has no status and empty buffers. Spawn failures are returned
    /// as `Err`.
    pub async fn output_with_timeout(
        cmd: &mut tokio::process::Command,
        timeout: Duration,
    ) -> std::io::Result<BoundedOutput> {
        let start = Instant::now();

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(BoundedOutput {
                    status: Some(output.status),
                    stdout: output.stdout,
                    stderr: output.stderr,
                    elapsed: start.elapsed(),
                })
            }
            Err(_) => Ok(BoundedOutput {
                status: None,
                stdout: Vec::new(),
                stderr: Vec::new(),
                elapsed: start.elapsed(),
            }),
        }
    }
}
