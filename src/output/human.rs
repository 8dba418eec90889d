//! Human-readable output formatting

use crate::launcher::InstanceRecord;
use crate::output::formatter::Report;
use bytesize::ByteSize;
use chrono::{DateTime, Utc};

pub fn format_human(report: &Report) -> String {
    match report {
        Report::Init { path } => format!("Created {}", path.display()),
        Report::Build(info) => {
            let mut output = String::new();
            for (i, step) in info.steps.iter().enumerate() {
                output.push_str(&format!("Step {}/{}: {}\n", i + 1, info.steps.len(), step));
            }
            output.push('\n');
            if info.reused {
                output.push_str(&format!("Image {} is up to date\n", info.short_id));
            } else {
                output.push_str(&format!("Built image {}\n", info.short_id));
            }
            output.push_str(&format!(
                "Files: {} | Packages: {} | Size: {}\n",
                info.files,
                info.packages,
                ByteSize(info.size_bytes)
            ));
            if let Some(ref tag) = info.tag {
                output.push_str(&format!("Tagged {}\n", tag));
            }
            output
        }
        Report::Plan { steps, checked } => {
            let mut output = String::from("Build Plan\n----------\n");
            if *checked {
                output.push_str("[DRY RUN] Lock verified, nothing was built\n\n");
            }
            for (i, step) in steps.iter().enumerate() {
                output.push_str(&format!("{:>2}. {}\n", i + 1, step));
            }
            output
        }
        Report::Images(images) => {
            if images.is_empty() {
                return "No images found".to_string();
            }
            let mut output = format!(
                "{:<24} {:<14} {:<24} {:>6} {:>7} {:>10}  {}\n",
                "TAG", "IMAGE ID", "RUNTIME", "PORT", "FILES", "SIZE", "CREATED"
            );
            output.push_str(&"-".repeat(110));
            output.push('\n');
            for image in images {
                let tags = if image.tags.is_empty() {
                    "<none>".to_string()
                } else {
                    image.tags.join(",")
                };
                output.push_str(&format!(
                    "{:<24} {:<14} {:<24} {:>6} {:>7} {:>10}  {}\n",
                    truncate(&tags, 24),
                    crate::image::short_digest(&image.digest),
                    truncate(image.runtime.as_deref().unwrap_or("-"), 24),
                    image.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                    image.files,
                    ByteSize(image.size_bytes).to_string(),
                    timestamp(&image.created_at)
                ));
            }
            output
        }
        Report::Image { record, tags } => {
            let title = format!("Image {}", record.short_id());
            let mut output = format!("{}\n{}\n", title, "-".repeat(title.len()));
            output.push_str(&format!("Digest:   sha256:{}\n", record.digest));
            output.push_str(&format!(
                "Tags:     {}\n",
                if tags.is_empty() { "<none>".to_string() } else { tags.join(", ") }
            ));
            output.push_str(&format!("Runtime:  {}\n", record.spec.runtime().unwrap_or("-")));
            if let Some(port) = record.spec.port() {
                output.push_str(&format!("Port:     {}/tcp\n", port));
            }
            output.push_str(&format!("Size:     {}\n", ByteSize(record.size_bytes)));
            output.push_str(&format!("Created:  {}\n", timestamp(&record.created_at)));

            let packages = record.spec.packages();
            if !packages.is_empty() {
                output.push_str("\nPackages\n--------\n");
                for package in packages {
                    output.push_str(&format!("  {}=={}\n", package.name, package.version));
                }
            }

            output.push_str("\nSteps\n-----\n");
            for step in &record.spec.steps {
                output.push_str(&format!("  {}\n", step));
            }
            output
        }
        Report::Probe { url, result } => {
            let verdict = if result.healthy { "healthy" } else { "unhealthy" };
            format!("{}: {} ({} ms)\n  {}", verdict, url, result.elapsed_ms, result.message)
        }
        Report::Instances(records) => {
            if records.is_empty() {
                return "No instances found".to_string();
            }
            let mut output = format!(
                "{:<14} {:<24} {:<14} {:<10} {:<10} {:>6} {:>5}  {}\n",
                "ID", "NAME", "IMAGE", "STATUS", "HEALTH", "PORT", "EXIT", "CREATED"
            );
            output.push_str(&"-".repeat(106));
            output.push('\n');
            for record in records {
                output.push_str(&format!(
                    "{:<14} {:<24} {:<14} {:<10} {:<10} {:>6} {:>5}  {}\n",
                    record.id,
                    truncate(&record.name, 24),
                    record.short_image(),
                    record.lifecycle.to_string(),
                    health_label(record),
                    record.port,
                    record.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
                    timestamp(&record.created_at)
                ));
            }
            output
        }
        Report::Instance(record) => {
            let title = format!("Instance {}", record.name);
            let mut output = format!("{}\n{}\n", title, "-".repeat(title.len()));
            output.push_str(&format!("ID:       {}\n", record.id));
            output.push_str(&format!(
                "Image:    {}{}\n",
                record.short_image(),
                record.tag.as_ref().map(|t| format!(" ({})", t)).unwrap_or_default()
            ));
            output.push_str(&format!("Status:   {}\n", record.lifecycle));
            output.push_str(&format!("Bind:     {}:{}\n", record.address, record.port));
            output.push_str(&format!("Command:  {}\n", record.command.join(" ")));
            if let Some(pid) = record.pid {
                output.push_str(&format!("PID:      {}\n", pid));
            }
            if let Some(ref started) = record.started_at {
                output.push_str(&format!("Started:  {}\n", timestamp(started)));
            }
            if let Some(ref finished) = record.finished_at {
                output.push_str(&format!("Finished: {}\n", timestamp(finished)));
            }
            if let Some(code) = record.exit_code {
                output.push_str(&format!("Exit:     {}\n", code));
            }

            if let Some(ref health) = record.health {
                output.push_str(&format!(
                    "\nHealth: {} (failing streak {})\n",
                    health.status, health.failing_streak
                ));
                for result in &health.log {
                    output.push_str(&format!(
                        "  [{}] {}\n",
                        result.checked_at.format("%H:%M:%S"),
                        result.message
                    ));
                }
            }
            output
        }
        Report::Dockerfile(text) => text.clone(),
    }
}

fn health_label(record: &InstanceRecord) -> String {
    record
        .health
        .as_ref()
        .map(|h| h.status.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn timestamp(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
