//! Shared helper for the converters that drive an opaque external
//! subprocess (ffmpeg, fluidsynth) under a hard timeout.

use std::time::{Duration, Instant};

use duct::cmd;

pub enum SubprocessOutcome {
    Success,
    NotFound,
    NonZeroExit { stderr: String },
    Timeout,
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn run_with_timeout(program: &str, args: &[String], timeout: Duration) -> SubprocessOutcome {
    let expression = cmd(program, args)
        .stderr_to_stdout()
        .stdout_capture()
        .unchecked();

    let handle = match expression.start() {
        Ok(handle) => handle,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SubprocessOutcome::NotFound,
        Err(_) => return SubprocessOutcome::NotFound,
    };

    let deadline = Instant::now() + timeout;
    loop {
        match handle.try_wait() {
            Ok(Some(output)) => {
                return if output.status.success() {
                    SubprocessOutcome::Success
                } else {
                    SubprocessOutcome::NonZeroExit {
                        stderr: String::from_utf8_lossy(&output.stdout).into_owned(),
                    }
                };
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = handle.kill();
                    return SubprocessOutcome::Timeout;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(_) => return SubprocessOutcome::NotFound,
        }
    }
}
