//! Dockerfile rendering, for hosts that run images with a container engine

use std::fmt::Write;

use crate::config::Project;
use crate::error::Result;
use crate::launcher::render_command;

use super::spec::APP_DIR;

/// Render the Dockerfile equivalent to a project's build steps
pub fn render(project: &Project) -> Result<String> {
    let launch = &project.launch;
    let mut out = String::new();

    writeln!(out, "# Generated by berth from {}", file_name(project)).ok();
    writeln!(out, "FROM {}", project.runtime).ok();
    for (key, value) in &launch.image.env {
        writeln!(out, "ENV {}={}", key, serde_json::to_string(value)?).ok();
    }

    let packages = &launch.image.system_packages;
    if !packages.is_empty() {
        if launch.image.system_install.is_empty() {
            writeln!(out, "# system packages: {}", packages.join(" ")).ok();
        } else {
            writeln!(out, "RUN {} {}", launch.image.system_install.join(" "), packages.join(" ")).ok();
        }
    }

    writeln!(out, "WORKDIR /{}", APP_DIR).ok();
    writeln!(
        out,
        "COPY {} {} ./",
        launch.dependencies.manifest.display(),
        launch.dependencies.lock.display()
    )
    .ok();
    if !launch.dependencies.install.is_empty() {
        writeln!(out, "RUN {}", launch.dependencies.install.join(" ")).ok();
    }
    writeln!(out, "COPY . .").ok();
    writeln!(out, "EXPOSE {}", launch.network.port).ok();

    let health = &launch.healthcheck;
    if health.enabled {
        writeln!(
            out,
            "HEALTHCHECK --interval={}s --timeout={}s --start-period={}s --retries={} CMD curl --fail http://localhost:{}{} || exit 1",
            health.interval_secs,
            health.timeout_secs,
            health.start_period_secs,
            health.retries,
            launch.network.port,
            health.path
        )
        .ok();
    } else {
        writeln!(out, "HEALTHCHECK NONE").ok();
    }

    let command = render_command(&launch.entrypoint.command, &launch.network.address, launch.network.port);
    writeln!(out, "ENTRYPOINT {}", serde_json::to_string(&command)?).ok();
    Ok(out)
}

fn file_name(project: &Project) -> String {
    project
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| project.path.display().to_string())
}
