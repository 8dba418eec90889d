//! Berth - a reproducible container launcher for one web-server process
//!
//! Berth verifies a locked dependency set, assembles an immutable image
//! from a pinned runtime and a source tree, and runs the image's entrypoint
//! as the sole foreground process while probing its health endpoint.
//!
//! # Example
//!
//! ```no_run
//! use berth::{ImageBuilder, ImageStore, Launcher, Project, RunOptions};
//!
//! let project = Project::load("Berthfile.toml".as_ref()).unwrap();
//! let store = ImageStore::new(".berth");
//! let report = ImageBuilder::new(&project, &store).build(None).unwrap();
//! let instance = Launcher::new(&store).run(&report.digest, &RunOptions::default()).unwrap();
//! std::process::exit(instance.exit_code.unwrap_or(1));
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod launcher;
pub mod lock;
pub mod logging;
pub mod output;
pub mod probe;

pub use config::{Project, RuntimeRef};
pub use error::{BerthError, Result};
pub use image::{BuildReport, ImageBuilder, ImageRecord, ImageSpec, ImageStore};
pub use launcher::{InstanceManager, InstanceRecord, Launcher, Lifecycle, RunOptions};
pub use output::{format_output, OutputFormat, Report};
pub use probe::{probe_once, HealthStatus, ProbeResult, ProbeTarget};
