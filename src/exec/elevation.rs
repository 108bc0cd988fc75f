// src/exec/elevation.rs

//! The session's single privilege-escalation entry point.
//!
//! Only one grant exists per session. An elevated Operation acquires it once
//! and keeps it for all of its steps; anyone else asking in the meantime
//! waits in FIFO order (Tokio semaphores are fair).

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::ElevationSection;
use crate::errors::{Result, WardenError};
use crate::exec::handle::ProcessHandle;

#[derive(Debug, Clone)]
pub struct ElevationGate {
    program: String,
    args: Vec<String>,
    permit: Arc<Semaphore>,
}

impl ElevationGate {
    pub fn new(section: &ElevationSection) -> Self {
        Self {
            program: section.program.clone(),
            args: section.args.clone(),
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait for the session's elevation grant.
    pub async fn acquire(&self) -> Result<ElevationGrant> {
        if self.is_busy() {
            debug!(program = %self.program, "elevation grant busy; queueing");
        }

        let permit = Arc::clone(&self.permit)
            .acquire_owned()
            .await
            .map_err(|e| WardenError::Other(anyhow::anyhow!("elevation gate closed: {e}")))?;

        Ok(ElevationGrant {
            program: self.program.clone(),
            args: self.args.clone(),
            _permit: permit,
        })
    }

    /// Whether some Operation currently holds the grant.
    pub fn is_busy(&self) -> bool {
        self.permit.available_permits() == 0
    }
}

/// Held for as long as an Operation runs elevated steps.
#[derive(Debug)]
pub struct ElevationGrant {
    program: String,
    args: Vec<String>,
    _permit: OwnedSemaphorePermit,
}

impl ElevationGrant {
    /// Prefix the handle's argv with the elevation program.
    ///
    /// `[program, args.., original argv..]`: the original argv stays intact
    /// as separate arguments.
    pub fn wrap(&self, handle: &ProcessHandle) -> ProcessHandle {
        let mut wrapped = handle.clone();
        let mut argv = Vec::with_capacity(1 + self.args.len() + handle.argv.len());
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv.extend(handle.argv.iter().cloned());
        wrapped.argv = argv;
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gate() -> ElevationGate {
        ElevationGate::new(&ElevationSection {
            program: "sudo".to_string(),
            args: vec!["-n".to_string()],
        })
    }

    #[tokio::test]
    async fn wrap_prefixes_argv_without_joining() {
        let gate = gate();
        let grant = gate.acquire().await.unwrap();
        let handle = ProcessHandle::new("mount").args(["/dev/sdb1", "/mnt/my disk"]);

        let wrapped = grant.wrap(&handle);
        assert_eq!(wrapped.argv, vec!["sudo", "-n", "mount", "/dev/sdb1", "/mnt/my disk"]);
    }

    #[tokio::test]
    async fn second_request_waits_for_release() {
        let gate = gate();
        let first = gate.acquire().await.unwrap();
        assert!(gate.is_busy());

        let waiting = tokio::time::timeout(Duration::from_millis(50), gate.acquire()).await;
        assert!(waiting.is_err(), "second grant must queue while the first is held");

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(50), gate.acquire()).await;
        assert!(second.is_ok());
    }
}
