//! Output formatting

use std::path::PathBuf;

use crate::image::{BuildReport, BuildStep, ImageRecord, ImageSummary};
use crate::launcher::InstanceRecord;
use crate::output::human::format_human;
use crate::output::json::format_json;
use crate::probe::ProbeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Anything a command prints on stdout
#[derive(Debug, Clone)]
pub enum Report {
    Init { path: PathBuf },
    Build(BuildReport),
    Plan { steps: Vec<BuildStep>, checked: bool },
    Images(Vec<ImageSummary>),
    Image { record: ImageRecord, tags: Vec<String> },
    Probe { url: String, result: ProbeResult },
    Instances(Vec<InstanceRecord>),
    Instance(InstanceRecord),
    Dockerfile(String),
}

pub fn format_output(report: &Report, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Human => format_human(report),
        OutputFormat::Json => format_json(report),
    }
}
