//! Instance records and the instance manager
//!
//! Every `run` creates one instance under `containers/<id>/state.json`.
//! The record outlives the process so `ps` and `status` can report the
//! exit code afterwards.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tracing::debug;
use uuid::Uuid;

use super::lifecycle::Lifecycle;
use crate::error::{BerthError, Result};
use crate::image::{short_digest, write_atomic, ImageRecord, ImageStore};
use crate::probe::HealthState;

/// Instance directory inside the store
pub const CONTAINERS_DIR: &str = "containers";
/// State file inside an instance directory
pub const STATE_FILE: &str = "state.json";

const ID_LEN: usize = 12;

/// A container instance: one image, one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub name: String,
    /// Digest of the image the instance runs
    pub image: String,
    pub tag: Option<String>,
    pub lifecycle: Lifecycle,
    pub address: String,
    pub port: u16,
    pub command: Vec<String>,
    pub pid: Option<u32>,
    pub health: Option<HealthState>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Unset while running, or when the launcher died before the process
    pub exit_code: Option<i32>,
}

impl InstanceRecord {
    pub fn short_image(&self) -> &str {
        short_digest(&self.image)
    }

    pub fn mark_running(&mut self, pid: u32) -> Result<()> {
        self.lifecycle = self.lifecycle.advance(Lifecycle::Running)?;
        self.pid = Some(pid);
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_exited(&mut self, exit_code: Option<i32>) -> Result<()> {
        self.lifecycle = self.lifecycle.advance(Lifecycle::Exited)?;
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// Where and how an instance will listen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub address: String,
    pub port: u16,
}

/// Creates, persists and looks up instances in a store
#[derive(Debug, Clone)]
pub struct InstanceManager {
    root: PathBuf,
}

impl InstanceManager {
    pub fn new(store: &ImageStore) -> Self {
        Self {
            root: store.root().join(CONTAINERS_DIR),
        }
    }

    fn state_path(&self, id: &str) -> PathBuf {
        self.root.join(id).join(STATE_FILE)
    }

    /// Create and persist a new instance of a committed image
    pub fn create(
        &self,
        store: &ImageStore,
        image: &ImageRecord,
        tag: Option<String>,
        name: Option<&str>,
        binding: Binding,
        command: Vec<String>,
    ) -> Result<InstanceRecord> {
        if !store.contains(&image.digest) {
            return Err(BerthError::ImageNotFound(image.digest.clone()));
        }
        let lifecycle = Lifecycle::NotBuilt.advance(Lifecycle::Built)?;

        let id = new_id();
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("{}-{}", tag.as_deref().unwrap_or(image.short_id()), &id[..6]),
        };
        let record = InstanceRecord {
            id,
            name,
            image: image.digest.clone(),
            tag,
            lifecycle,
            address: binding.address,
            port: binding.port,
            command,
            pid: None,
            health: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
        };
        self.save(&record)?;
        debug!(id = %record.id, name = %record.name, "created instance");
        Ok(record)
    }

    pub fn save(&self, record: &InstanceRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.state_path(&record.id), &json)
    }

    /// Drop an instance that never started
    pub fn remove(&self, id: &str) -> Result<()> {
        let dir = self.root.join(id);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn load(&self, id: &str) -> Result<InstanceRecord> {
        let path = self.state_path(id);
        let text = fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| BerthError::parse(path, e))
    }

    /// All instances, newest first
    pub fn list(&self) -> Result<Vec<InstanceRecord>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().join(STATE_FILE).is_file() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            let record = self.load(&id)?;
            records.push(self.reconcile(record)?);
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Look up by id, unique id prefix, or name (newest wins)
    pub fn get(&self, reference: &str) -> Result<InstanceRecord> {
        let records = self.list()?;
        if let Some(record) = records.iter().find(|r| r.id == reference) {
            return Ok(record.clone());
        }
        let by_prefix: Vec<_> = records.iter().filter(|r| r.id.starts_with(reference)).collect();
        if by_prefix.len() == 1 {
            return Ok(by_prefix[0].clone());
        }
        records
            .into_iter()
            .find(|r| r.name == reference)
            .ok_or_else(|| BerthError::ContainerNotFound(reference.to_string()))
    }

    /// A record left in `running` whose process is gone lost its launcher;
    /// close it without an exit code.
    fn reconcile(&self, mut record: InstanceRecord) -> Result<InstanceRecord> {
        if record.lifecycle != Lifecycle::Running {
            return Ok(record);
        }
        let alive = record.pid.map(process_alive).unwrap_or(false);
        if !alive {
            debug!(id = %record.id, "instance process is gone");
            record.mark_exited(None)?;
            self.save(&record)?;
        }
        Ok(record)
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()[..ID_LEN].to_string()
}

pub fn process_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid))
}
