use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// A scheduled recipe execution job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    /// Path to the recipe file driving this job.
    pub source: String,
    pub cron: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub currently_running: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_start_time: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn new(id: impl Into<String>, source: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            cron: cron.into(),
            last_run: None,
            currently_running: false,
            paused: false,
            current_session_id: None,
            process_start_time: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {0} already exists")]
    JobExists(String),
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("invalid cron expression: {0}")]
    CronError(String),
    #[error("recipe error: {0}")]
    RecipeError(String),
    #[error("storage error: {0}")]
    StorageError(String),
    #[error("{0}")]
    Internal(String),
}

/// The sole seam through which the scheduler touches the rest of the system.
/// Must be cancellable at its await points and return the session id it ran.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &ScheduledJob) -> anyhow::Result<String>;
}

struct JobEntry {
    job: ScheduledJob,
    cron_id: uuid::Uuid,
}

struct SchedulerInner {
    cron: Mutex<JobScheduler>,
    jobs: RwLock<HashMap<String, JobEntry>>,
    running: Mutex<HashMap<String, AbortHandle>>,
    storage_path: PathBuf,
    scheduled_dir: PathBuf,
    executor: Arc<dyn JobExecutor>,
}

/// Cron-driven recipe executor with at-most-one-run-per-job semantics and a
/// JSON file as its system of record.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

/// Normalise a 5-field (minute-first) expression to the 6-field form the
/// cron runtime expects by prefixing a seconds field. Whitespace runs
/// (spaces and tabs) separate fields.
pub fn normalize_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

/// Validate a cron expression by constructing a throwaway runtime job.
fn validate_cron(expr: &str) -> Result<(), SchedulerError> {
    Job::new_async(normalize_cron(expr).as_str(), |_uuid, _l| {
        Box::pin(async move {})
    })
    .map(|_| ())
    .map_err(|e| SchedulerError::CronError(e.to_string()))
}

impl Scheduler {
    pub async fn new(
        data_dir: &Path,
        executor: Arc<dyn JobExecutor>,
    ) -> Result<Self, SchedulerError> {
        let storage_path = data_dir.join("schedules.json");
        let scheduled_dir = data_dir.join("scheduled_recipes");
        std::fs::create_dir_all(data_dir)
            .map_err(|e| SchedulerError::StorageError(e.to_string()))?;
        std::fs::create_dir_all(&scheduled_dir)
            .map_err(|e| SchedulerError::StorageError(e.to_string()))?;

        let cron = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Internal(e.to_string()))?;

        let scheduler = Self {
            inner: Arc::new(SchedulerInner {
                cron: Mutex::new(cron),
                jobs: RwLock::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                storage_path,
                scheduled_dir,
                executor,
            }),
        };

        scheduler.load_from_storage().await?;

        scheduler
            .inner
            .cron
            .lock()
            .await
            .start()
            .await
            .map_err(|e| SchedulerError::Internal(e.to_string()))?;

        Ok(scheduler)
    }

    async fn register_cron(&self, job_id: &str, cron_expr: &str) -> Result<uuid::Uuid, SchedulerError> {
        let weak = Arc::downgrade(&self.inner);
        let id = job_id.to_string();
        let cron_job = Job::new_async(normalize_cron(cron_expr).as_str(), move |_uuid, mut _l| {
            let weak = weak.clone();
            let id = id.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    SchedulerInner::cron_fire(inner, &id).await;
                }
            })
        })
        .map_err(|e| SchedulerError::CronError(e.to_string()))?;

        self.inner
            .cron
            .lock()
            .await
            .add(cron_job)
            .await
            .map_err(|e| SchedulerError::Internal(e.to_string()))
    }

    /// Add a job. Optionally copies the recipe into the scheduled directory,
    /// resolving filename collisions with a numeric suffix.
    pub async fn add_job(
        &self,
        mut job: ScheduledJob,
        copy_recipe: bool,
    ) -> Result<(), SchedulerError> {
        {
            let jobs = self.inner.jobs.read().await;
            if jobs.contains_key(&job.id) {
                return Err(SchedulerError::JobExists(job.id));
            }
        }

        validate_cron(&job.cron)?;

        if copy_recipe {
            job.source = self.copy_recipe_file(&job.source)?;
        }
        if !Path::new(&job.source).exists() {
            return Err(SchedulerError::RecipeError(format!(
                "recipe file not found: {}",
                job.source
            )));
        }

        let cron_id = self.register_cron(&job.id, &job.cron).await?;

        let mut jobs = self.inner.jobs.write().await;
        if jobs.contains_key(&job.id) {
            // Lost a race with a concurrent add of the same id.
            let _ = self.inner.cron.lock().await.remove(&cron_id).await;
            return Err(SchedulerError::JobExists(job.id));
        }
        info!(job_id = %job.id, cron = %job.cron, "schedule added");
        jobs.insert(job.id.clone(), JobEntry { job, cron_id });
        self.persist(&jobs).await
    }

    /// Remove a job, cancelling any in-flight run first. The recipe file is
    /// only deleted when it lives under the scheduled directory.
    pub async fn remove_job(&self, id: &str, remove_recipe: bool) -> Result<(), SchedulerError> {
        let entry = {
            let mut jobs = self.inner.jobs.write().await;
            jobs.remove(id)
                .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?
        };

        if let Some(handle) = self.inner.running.lock().await.remove(id) {
            handle.abort();
        }

        let _ = self.inner.cron.lock().await.remove(&entry.cron_id).await;

        if remove_recipe {
            let source = Path::new(&entry.job.source);
            if source.parent() == Some(self.inner.scheduled_dir.as_path()) {
                let _ = std::fs::remove_file(source);
            }
        }

        info!(job_id = %id, "schedule removed");
        let jobs = self.inner.jobs.read().await;
        self.persist(&jobs).await
    }

    /// Re-register a job with a new cron expression. Forbidden while the job
    /// is running.
    pub async fn update_cron(&self, id: &str, new_cron: &str) -> Result<(), SchedulerError> {
        validate_cron(new_cron)?;

        let old_cron_id = {
            let jobs = self.inner.jobs.read().await;
            let entry = jobs
                .get(id)
                .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
            if entry.job.currently_running {
                return Err(SchedulerError::Internal(
                    "cannot update running job".into(),
                ));
            }
            entry.cron_id
        };

        let _ = self.inner.cron.lock().await.remove(&old_cron_id).await;
        let cron_id = self.register_cron(id, new_cron).await?;

        let mut jobs = self.inner.jobs.write().await;
        if let Some(entry) = jobs.get_mut(id) {
            entry.job.cron = new_cron.to_string();
            entry.cron_id = cron_id;
        }
        self.persist(&jobs).await
    }

    pub async fn pause_job(&self, id: &str) -> Result<(), SchedulerError> {
        let mut jobs = self.inner.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        if entry.job.currently_running {
            return Err(SchedulerError::Internal("cannot pause running job".into()));
        }
        entry.job.paused = true;
        self.persist(&jobs).await
    }

    pub async fn unpause_job(&self, id: &str) -> Result<(), SchedulerError> {
        let mut jobs = self.inner.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        entry.job.paused = false;
        self.persist(&jobs).await
    }

    /// Run a job immediately through the same path as a cron fire, returning
    /// the executor's session id. Rejects if it is already running.
    pub async fn run_now(&self, id: &str) -> Result<String, SchedulerError> {
        {
            let jobs = self.inner.jobs.read().await;
            let entry = jobs
                .get(id)
                .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
            if entry.job.currently_running {
                return Err(SchedulerError::Internal("job is already running".into()));
            }
        }
        SchedulerInner::run(self.inner.clone(), id).await
    }

    /// Cancel an in-flight run and clear the running state.
    pub async fn kill_running_job(&self, id: &str) -> Result<(), SchedulerError> {
        let handle = self.inner.running.lock().await.remove(id);
        let Some(handle) = handle else {
            return Err(SchedulerError::Internal("job is not running".into()));
        };
        handle.abort();

        let mut jobs = self.inner.jobs.write().await;
        if let Some(entry) = jobs.get_mut(id) {
            entry.job.currently_running = false;
            entry.job.current_session_id = None;
            entry.job.process_start_time = None;
        }
        info!(job_id = %id, "running job killed");
        self.persist(&jobs).await
    }

    pub async fn list_jobs(&self) -> Vec<ScheduledJob> {
        let jobs = self.inner.jobs.read().await;
        jobs.values().map(|entry| entry.job.clone()).collect()
    }

    pub async fn get_job(&self, id: &str) -> Result<ScheduledJob, SchedulerError> {
        let jobs = self.inner.jobs.read().await;
        jobs.get(id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))
    }

    /// Session id and start time of the current run, if any.
    pub async fn get_running_job_info(
        &self,
        id: &str,
    ) -> Result<(Option<String>, Option<DateTime<Utc>>), SchedulerError> {
        let jobs = self.inner.jobs.read().await;
        let entry = jobs
            .get(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        if !entry.job.currently_running {
            return Ok((None, None));
        }
        Ok((
            entry.job.current_session_id.clone(),
            entry.job.process_start_time,
        ))
    }

    /// Cancel every running task, then drain and stop the cron engine.
    pub async fn stop(&self) {
        let handles: Vec<AbortHandle> = {
            let mut running = self.inner.running.lock().await;
            running.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.abort();
        }
        if let Err(e) = self.inner.cron.lock().await.shutdown().await {
            warn!("cron engine shutdown failed: {}", e);
        }
    }

    fn copy_recipe_file(&self, source: &str) -> Result<String, SchedulerError> {
        let content = std::fs::read(source)
            .map_err(|e| SchedulerError::RecipeError(format!("failed to read recipe: {}", e)))?;

        let file_name = Path::new(source)
            .file_name()
            .ok_or_else(|| SchedulerError::RecipeError(format!("invalid source path: {}", source)))?;
        let mut dest = self.inner.scheduled_dir.join(file_name);

        let stem = dest
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = dest
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let mut counter = 1;
        while dest.exists() {
            dest = self
                .inner
                .scheduled_dir
                .join(format!("{}_{}{}", stem, counter, ext));
            counter += 1;
        }

        std::fs::write(&dest, content)
            .map_err(|e| SchedulerError::StorageError(format!("failed to copy recipe: {}", e)))?;
        Ok(dest.to_string_lossy().into_owned())
    }

    async fn load_from_storage(&self) -> Result<(), SchedulerError> {
        let raw = match std::fs::read_to_string(&self.inner.storage_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(SchedulerError::StorageError(e.to_string())),
        };
        let loaded: Vec<ScheduledJob> = serde_json::from_str(&raw)
            .map_err(|e| SchedulerError::StorageError(e.to_string()))?;

        for mut job in loaded {
            if !Path::new(&job.source).exists() {
                warn!(job_id = %job.id, source = %job.source, "skipping job with missing recipe");
                continue;
            }

            // Running state never survives a restart.
            job.currently_running = false;
            job.current_session_id = None;
            job.process_start_time = None;

            let cron_id = match self.register_cron(&job.id, &job.cron).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(job_id = %job.id, "skipping job with invalid cron: {}", e);
                    continue;
                }
            };
            self.inner
                .jobs
                .write()
                .await
                .insert(job.id.clone(), JobEntry { job, cron_id });
        }
        Ok(())
    }

    async fn persist(
        &self,
        jobs: &HashMap<String, JobEntry>,
    ) -> Result<(), SchedulerError> {
        let list: Vec<&ScheduledJob> = jobs.values().map(|entry| &entry.job).collect();
        let data = serde_json::to_string_pretty(&list)
            .map_err(|e| SchedulerError::StorageError(e.to_string()))?;
        std::fs::write(&self.inner.storage_path, data)
            .map_err(|e| SchedulerError::StorageError(e.to_string()))
    }
}

impl SchedulerInner {
    async fn cron_fire(inner: Arc<Self>, id: &str) {
        {
            let jobs = inner.jobs.read().await;
            let Some(entry) = jobs.get(id) else { return };
            if entry.job.paused || entry.job.currently_running {
                return;
            }
        }
        if let Err(e) = Self::run(inner, id).await {
            error!(job_id = %id, "scheduled run failed: {}", e);
        }
    }

    /// Shared execution path for cron fires and run-now.
    async fn run(inner: Arc<Self>, id: &str) -> Result<String, SchedulerError> {
        let start_time = Utc::now();

        let job_snapshot = {
            let mut jobs = inner.jobs.write().await;
            let entry = jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
            if entry.job.currently_running {
                return Err(SchedulerError::Internal("job is already running".into()));
            }
            entry.job.currently_running = true;
            entry.job.process_start_time = Some(start_time);
            entry.job.clone()
        };

        let executor = inner.executor.clone();
        let handle = tokio::spawn(async move { executor.execute(&job_snapshot).await });
        inner
            .running
            .lock()
            .await
            .insert(id.to_string(), handle.abort_handle());

        let result = handle.await;

        inner.running.lock().await.remove(id);
        let mut jobs = inner.jobs.write().await;
        let outcome = if let Some(entry) = jobs.get_mut(id) {
            entry.job.currently_running = false;
            entry.job.last_run = Some(start_time);
            entry.job.process_start_time = None;
            match result {
                Ok(Ok(session_id)) => {
                    entry.job.current_session_id = Some(session_id.clone());
                    Ok(session_id)
                }
                Ok(Err(e)) => {
                    error!(job_id = %id, "executor failed: {}", e);
                    Err(SchedulerError::Internal(e.to_string()))
                }
                Err(join_err) => {
                    // Aborted by kill; the kill path already cleared state.
                    Err(SchedulerError::Internal(format!(
                        "job was cancelled: {}",
                        join_err
                    )))
                }
            }
        } else {
            Err(SchedulerError::JobNotFound(id.to_string()))
        };

        let list: Vec<&ScheduledJob> = jobs.values().map(|entry| &entry.job).collect();
        if let Ok(data) = serde_json::to_string_pretty(&list) {
            if let Err(e) = std::fs::write(&inner.storage_path, data) {
                warn!("failed to persist schedules: {}", e);
            }
        }

        outcome
    }
}
