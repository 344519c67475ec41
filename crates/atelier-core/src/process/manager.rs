//! Auxiliary worker fleet supervisor

use super::managed::{ManagedProcess, SupervisedProcess};
use crate::error::{Error, ProcessError, Result};
use crate::types::{ProcessSpec, ProcessStatus};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Outcome of [`ProcessManager::stop_all`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// Names in the order they were stopped
    pub stopped: Vec<String>,
    /// (name, error) for every stop that failed
    pub failures: Vec<(String, String)>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Supervises a fixed, ordered set of named worker processes.
///
/// Declared order is start order; shutdown runs in exact reverse.
pub struct ProcessManager {
    processes: Vec<Arc<dyn SupervisedProcess>>,
}

impl ProcessManager {
    pub fn new(processes: Vec<Arc<dyn SupervisedProcess>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for process in &processes {
            if !seen.insert(process.name().to_string()) {
                return Err(Error::InvalidConfig(format!(
                    "Duplicate process name: {}",
                    process.name()
                )));
            }
        }
        Ok(Self { processes })
    }

    /// Build OS-backed workers from launch specs
    pub fn from_specs(specs: &[ProcessSpec], stderr_lines: usize, grace: Duration) -> Result<Self> {
        let processes = specs
            .iter()
            .cloned()
            .map(|spec| {
                Arc::new(ManagedProcess::new(spec, stderr_lines, grace)) as Arc<dyn SupervisedProcess>
            })
            .collect();
        Self::new(processes)
    }

    pub fn empty() -> Self {
        Self {
            processes: Vec::new(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.processes.iter().map(|p| p.name()).collect()
    }

    /// Start every worker in declared order.
    ///
    /// Stops at the first failure; workers started before it keep running.
    pub async fn start_sequence(&self, project_id: &str) -> Result<()> {
        info!(
            "Starting worker sequence for project {}: {:?}",
            project_id,
            self.names()
        );

        for process in &self.processes {
            if process.is_running().await {
                debug!("{} already running, skipping", process.name());
                continue;
            }

            if let Err(e) = process.start(project_id).await {
                error!("Worker sequence aborted at {}: {}", process.name(), e);
                return Err(match e {
                    err @ Error::Process(ProcessError::StartFailed { .. }) => err,
                    other => Error::Process(ProcessError::StartFailed {
                        name: process.name().to_string(),
                        reason: other.to_string(),
                    }),
                });
            }
        }

        info!("Worker sequence started for project {}", project_id);
        Ok(())
    }

    /// Stop every running worker in reverse start order.
    ///
    /// Best-effort: a failure is recorded and the remaining workers are
    /// still attempted.
    pub async fn stop_all(&self) -> StopReport {
        let mut report = StopReport::default();

        for process in self.processes.iter().rev() {
            if !process.is_running().await {
                debug!("{} not running, skipping stop", process.name());
                continue;
            }

            match process.stop().await {
                Ok(()) => report.stopped.push(process.name().to_string()),
                Err(e) => {
                    error!("Error stopping {}: {}", process.name(), e);
                    report
                        .failures
                        .push((process.name().to_string(), e.to_string()));
                }
            }
        }

        report
    }

    pub async fn status(&self) -> Vec<ProcessStatus> {
        let mut statuses = Vec::with_capacity(self.processes.len());
        for process in &self.processes {
            statuses.push(process.status().await);
        }
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct FakeProcess {
        name: String,
        running: AtomicBool,
        fail_start: bool,
        fail_stop: bool,
        starts: CallLog,
        stops: CallLog,
    }

    impl FakeProcess {
        fn new(name: &str, starts: &CallLog, stops: &CallLog) -> Self {
            Self {
                name: name.to_string(),
                running: AtomicBool::new(false),
                fail_start: false,
                fail_stop: false,
                starts: Arc::clone(starts),
                stops: Arc::clone(stops),
            }
        }
    }

    #[async_trait]
    impl SupervisedProcess for FakeProcess {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self, _project_id: &str) -> Result<()> {
            self.starts.lock().push(self.name.clone());
            if self.fail_start {
                return Err(Error::Process(ProcessError::StartFailed {
                    name: self.name.clone(),
                    reason: "boom".to_string(),
                }));
            }
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stops.lock().push(self.name.clone());
            self.running.store(false, Ordering::SeqCst);
            if self.fail_stop {
                return Err(Error::Process(ProcessError::StopFailed {
                    name: self.name.clone(),
                    reason: "stuck".to_string(),
                }));
            }
            Ok(())
        }

        async fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        async fn status(&self) -> ProcessStatus {
            ProcessStatus {
                name: self.name.clone(),
                running: self.running.load(Ordering::SeqCst),
                pid: None,
                last_stderr: String::new(),
            }
        }
    }

    const FLEET: [&str; 4] = ["unity", "unity_bridge", "blender", "blender_bridge"];

    fn fleet(starts: &CallLog, stops: &CallLog, tweak: impl Fn(&mut FakeProcess)) -> ProcessManager {
        let processes = FLEET
            .iter()
            .map(|name| {
                let mut fake = FakeProcess::new(name, starts, stops);
                tweak(&mut fake);
                Arc::new(fake) as Arc<dyn SupervisedProcess>
            })
            .collect();
        ProcessManager::new(processes).unwrap()
    }

    #[tokio::test]
    async fn test_stop_all_reverses_start_order() {
        let starts = CallLog::default();
        let stops = CallLog::default();
        let manager = fleet(&starts, &stops, |_| {});

        manager.start_sequence("demo").await.unwrap();
        assert_eq!(*starts.lock(), FLEET.to_vec());

        let report = manager.stop_all().await;
        assert!(report.is_clean());
        assert_eq!(
            *stops.lock(),
            vec!["blender_bridge", "blender", "unity_bridge", "unity"]
        );
        assert_eq!(report.stopped, *stops.lock());
    }

    #[tokio::test]
    async fn test_start_failure_aborts_without_rollback() {
        let starts = CallLog::default();
        let stops = CallLog::default();
        let manager = fleet(&starts, &stops, |p| p.fail_start = p.name == "blender");

        let err = manager.start_sequence("demo").await.unwrap_err();
        match err {
            Error::Process(ProcessError::StartFailed { name, .. }) => assert_eq!(name, "blender"),
            other => panic!("Expected StartFailed, got {:?}", other),
        }

        assert_eq!(*starts.lock(), vec!["unity", "unity_bridge", "blender"]);
        assert!(stops.lock().is_empty());

        let running: Vec<String> = manager
            .status()
            .await
            .into_iter()
            .filter(|s| s.running)
            .map(|s| s.name)
            .collect();
        assert_eq!(running, vec!["unity", "unity_bridge"]);
    }

    #[tokio::test]
    async fn test_stop_failure_does_not_block_rest() {
        let starts = CallLog::default();
        let stops = CallLog::default();
        let manager = fleet(&starts, &stops, |p| p.fail_stop = p.name == "blender");

        manager.start_sequence("demo").await.unwrap();
        let report = manager.stop_all().await;

        assert_eq!(
            *stops.lock(),
            vec!["blender_bridge", "blender", "unity_bridge", "unity"]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "blender");
    }

    #[tokio::test]
    async fn test_running_processes_not_restarted() {
        let starts = CallLog::default();
        let stops = CallLog::default();
        let manager = fleet(&starts, &stops, |_| {});

        manager.start_sequence("demo").await.unwrap();
        manager.start_sequence("demo").await.unwrap();
        assert_eq!(starts.lock().len(), FLEET.len());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let starts = CallLog::default();
        let stops = CallLog::default();
        let processes: Vec<Arc<dyn SupervisedProcess>> = vec![
            Arc::new(FakeProcess::new("unity", &starts, &stops)),
            Arc::new(FakeProcess::new("unity", &starts, &stops)),
        ];
        assert!(ProcessManager::new(processes).is_err());
    }
}
