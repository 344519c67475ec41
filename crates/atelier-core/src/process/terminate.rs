//! Graceful-then-forceful child termination

use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

/// Ask `child` to exit, wait up to `grace`, then kill it.
///
/// Returns the exit status when one could be collected.
pub async fn terminate_child(
    child: &mut Child,
    label: &str,
    grace: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    if let Some(status) = child.try_wait()? {
        debug!("{} already exited: {}", label, status);
        return Ok(Some(status));
    }

    if signal_graceful(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!("{} exited after SIGTERM: {}", label, status);
                return Ok(Some(status));
            }
            Err(_) => {
                warn!(
                    "{} did not exit within {:?}, escalating to SIGKILL",
                    label, grace
                );
            }
        }
    }

    child.kill().await?;
    let status = child.try_wait()?;
    debug!("{} killed: {:?}", label, status);
    Ok(status)
}

#[cfg(unix)]
fn signal_graceful(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };

    // SAFETY: `pid` is our own unreaped child, so it cannot have been recycled.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    rc == 0
}

#[cfg(not(unix))]
fn signal_graceful(_child: &Child) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_terminate_cooperative_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();

        let status = terminate_child(&mut child, "sleep", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(status.is_some());
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_terminate_escalates_when_sigterm_ignored() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let status = terminate_child(&mut child, "stubborn", Duration::from_millis(300))
            .await
            .unwrap();

        assert!(status.is_some());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_terminate_already_exited() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().await.unwrap();

        let status = terminate_child(&mut child, "true", Duration::from_millis(100))
            .await
            .unwrap();
        assert!(status.unwrap().success());
    }
}
