//! Image builder
//!
//! Every step writes into a staging directory under the store's `tmp/`.
//! Only after all steps succeed is the staging image renamed into
//! `images/<digest>`; dropping the staging directory on any error means a
//! failed build leaves nothing behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::digest::{copy_tree, dir_size, image_digest, sha256_hex, IgnoreRules};
use super::spec::{plan, BuildStep, HealthcheckSpec, ImageSpec, APP_DIR};
use super::store::{short_digest, validate_tag, write_atomic, ImageRecord, ImageStore, RECORD_FILE, ROOTFS_DIR};
use crate::config::Project;
use crate::error::{BerthError, Result};
use crate::lock::{self, LockedSet, SpecifierSet, Version};

/// Result of a build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub digest: String,
    pub short_id: String,
    pub tag: Option<String>,
    /// An identical image already existed and was kept
    pub reused: bool,
    pub steps: Vec<String>,
    pub files: usize,
    pub packages: usize,
    pub size_bytes: u64,
}

/// Builds images for one project into one store
pub struct ImageBuilder<'a> {
    project: &'a Project,
    store: &'a ImageStore,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(project: &'a Project, store: &'a ImageStore) -> Self {
        Self { project, store }
    }

    /// Validate inputs and return the steps a build would run, without writing anything
    pub fn check(&self) -> Result<Vec<BuildStep>> {
        let locked = self.verify_lock()?;
        let lock_bytes = fs::read(self.project.lock_path())?;

        let steps = plan(self.project)
            .into_iter()
            .map(|step| match step {
                BuildStep::LockedInstall {
                    manifest,
                    lock,
                    installer,
                    ..
                } => BuildStep::LockedInstall {
                    manifest,
                    lock,
                    lock_sha256: sha256_hex(&lock_bytes),
                    installer,
                    packages: locked.packages.clone(),
                },
                other => other,
            })
            .collect();

        let source = self.project.source_path();
        if !source.is_dir() {
            return Err(BerthError::SourceNotFound(source));
        }
        Ok(steps)
    }

    /// Build, commit, and tag an image
    pub fn build(&self, tag: Option<&str>) -> Result<BuildReport> {
        if let Some(tag) = tag {
            validate_tag(tag)?;
        }
        self.store.init()?;

        let staging = tempfile::Builder::new()
            .prefix("build-")
            .tempdir_in(self.store.tmp_dir())?;
        let image_dir = staging.path().join("image");
        let rootfs = image_dir.join(ROOTFS_DIR);
        let app_dir = rootfs.join(APP_DIR);
        fs::create_dir_all(&app_dir)?;
        debug!(staging = %staging.path().display(), "created build staging directory");

        let launch = &self.project.launch;
        let env = &launch.image.env;
        let mut steps = Vec::new();

        info!("[1/7] base runtime {}", self.project.runtime);
        steps.push(BuildStep::Base {
            runtime: self.project.runtime.to_string(),
        });

        let packages = &launch.image.system_packages;
        if packages.is_empty() {
            info!("[2/7] no system packages");
        } else if launch.image.system_install.is_empty() {
            info!("[2/7] recording system packages: {}", packages.join(" "));
        } else {
            info!("[2/7] installing system packages: {}", packages.join(" "));
            run_build_command("system-packages", &launch.image.system_install, packages, &app_dir, &rootfs, env)?;
        }
        steps.push(BuildStep::SystemPackages {
            packages: packages.clone(),
            installer: launch.image.system_install.clone(),
        });

        info!("[3/7] verifying {} against {}", launch.dependencies.lock.display(), launch.dependencies.manifest.display());
        let locked = self.verify_lock()?;
        let lock_bytes = fs::read(self.project.lock_path())?;
        copy_into(&self.project.manifest_path(), &app_dir, &launch.dependencies.manifest)?;
        copy_into(&self.project.lock_path(), &app_dir, &launch.dependencies.lock)?;
        if !launch.dependencies.install.is_empty() {
            info!("[3/7] installing locked dependencies: {}", launch.dependencies.install.join(" "));
            run_build_command("locked-install", &launch.dependencies.install, &[], &app_dir, &rootfs, env)?;
        }
        steps.push(BuildStep::LockedInstall {
            manifest: launch.dependencies.manifest.display().to_string(),
            lock: launch.dependencies.lock.display().to_string(),
            lock_sha256: sha256_hex(&lock_bytes),
            installer: launch.dependencies.install.clone(),
            packages: locked.packages.clone(),
        });

        let source = self.project.source_path();
        info!("[4/7] copying sources from {}", source.display());
        let rules = IgnoreRules::new(&launch.source.ignore)?.exclude(self.store.root());
        let files = copy_tree(&source, &app_dir, &rules)?;
        let file_count = files.len();
        steps.push(BuildStep::CopySources {
            destination: APP_DIR.to_string(),
            files,
        });

        info!("[5/7] declaring port {}", launch.network.port);
        steps.push(BuildStep::Expose {
            port: launch.network.port,
        });

        if launch.healthcheck.enabled {
            info!("[6/7] healthcheck GET {}", launch.healthcheck.path);
            steps.push(BuildStep::Healthcheck(HealthcheckSpec::from(&launch.healthcheck)));
        } else {
            info!("[6/7] healthcheck disabled");
        }

        info!("[7/7] entrypoint {}", launch.entrypoint.command.join(" "));
        steps.push(BuildStep::Entrypoint {
            command: launch.entrypoint.command.clone(),
            address: launch.network.address.clone(),
            env: env.clone(),
        });

        let spec = ImageSpec { steps };
        let digest = image_digest(&spec)?;
        let step_lines: Vec<String> = spec.steps.iter().map(|s| s.to_string()).collect();
        let package_count = spec.packages().len();

        let reused = self.store.contains(&digest);
        if reused {
            info!(digest = %short_digest(&digest), "identical image already present");
        } else {
            let record = ImageRecord {
                digest: digest.clone(),
                spec,
                created_at: Utc::now(),
                size_bytes: dir_size(&image_dir),
            };
            write_atomic(&image_dir.join(RECORD_FILE), &serde_json::to_vec_pretty(&record)?)?;
            self.commit(&image_dir, &digest)?;
            info!(digest = %short_digest(&digest), "committed image");
        }

        let tag = tag
            .map(str::to_string)
            .or_else(|| Some(locked.manifest.name.clone()).filter(|t| validate_tag(t).is_ok()));
        if let Some(tag) = &tag {
            self.store.tag(tag, &digest)?;
            debug!(tag = %tag, "tagged image");
        }

        let size_bytes = self.store.load(&digest)?.size_bytes;
        Ok(BuildReport {
            short_id: short_digest(&digest).to_string(),
            digest,
            tag,
            reused,
            steps: step_lines,
            files: file_count,
            packages: package_count,
            size_bytes,
        })
    }

    fn verify_lock(&self) -> Result<LockedSet> {
        let locked = lock::verify_files(&self.project.manifest_path(), &self.project.lock_path())?;
        check_runtime_python(self.project.runtime.short_name(), self.project.runtime.version(), &locked);
        Ok(locked)
    }

    fn commit(&self, staged: &Path, digest: &str) -> Result<()> {
        let target = self.store.image_dir(digest);
        match fs::rename(staged, &target) {
            Ok(()) => Ok(()),
            // A concurrent build of the same inputs won the race.
            Err(_) if self.store.contains(digest) => Ok(()),
            Err(e) => Err(BerthError::build("commit", format!("{}: {}", target.display(), e))),
        }
    }
}

/// Warn when a python base runtime falls outside the manifest's requires-python
fn check_runtime_python(name: &str, version: Option<String>, locked: &LockedSet) {
    if !name.starts_with("python") {
        return;
    }
    let (Some(version), Some(requires)) = (version, locked.manifest.requires_python.as_ref()) else {
        return;
    };
    if let Ok(parsed) = Version::parse(&version) {
        if !requires.matches(&parsed) {
            warn!(
                runtime = %version,
                requires_python = %SpecifierSet::canonical(requires),
                "base runtime does not satisfy requires-python"
            );
        }
    }
}

fn copy_into(source: &Path, app_dir: &Path, relative: &Path) -> Result<()> {
    let target = app_dir.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, &target)?;
    Ok(())
}

/// Variable naming the staging root filesystem for installer commands
const ROOTFS_ENV: &str = "BERTH_ROOTFS";

/// Run an installer inside the staging directory; any failure aborts the build.
///
/// Installers run on the host. They find the image's root filesystem in
/// `BERTH_ROOTFS` and must write there, not to host paths.
fn run_build_command(
    step: &str,
    argv: &[String],
    extra_args: &[String],
    cwd: &Path,
    rootfs: &Path,
    env: &BTreeMap<String, String>,
) -> Result<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| BerthError::build(step, "empty command"))?;
    let shown = argv.iter().chain(extra_args).cloned().collect::<Vec<_>>().join(" ");
    debug!(step, command = %shown, "running build command");

    let output = Command::new(program)
        .args(args)
        .args(extra_args)
        .current_dir(cwd)
        .envs(env)
        .env(ROOTFS_ENV, rootfs)
        .output()
        .map_err(|e| BerthError::build(step, format!("failed to run '{}': {}", shown, e)))?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        debug!(step, "{}", line);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines() {
        debug!(step, "{}", line);
    }

    if !output.status.success() {
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "a signal".to_string());
        return Err(BerthError::build(
            step,
            format!("'{}' exited with {}{}{}", shown, code, if tail.is_empty() { "" } else { ": " }, tail.join(" | ")),
        ));
    }
    Ok(())
}
