//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{DEFAULT_HEALTH_PATH, DEFAULT_PORT, DEFAULT_STORE_DIR, LAUNCH_FILE_NAME};

#[derive(Parser)]
#[command(name = "berth")]
#[command(author, version, about = "Build and launch a single web-server process as a reproducible container", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: SubCommand,

    /// Launch file
    #[arg(short = 'f', long = "file", global = true, env = "BERTH_FILE", default_value = LAUNCH_FILE_NAME)]
    pub file: PathBuf,

    /// Image and instance store directory
    #[arg(long, global = true, env = "BERTH_STORE", default_value = DEFAULT_STORE_DIR)]
    pub store: PathBuf,

    /// Output format as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum SubCommand {
    /// Write a default launch file
    Init {
        /// Overwrite an existing launch file
        #[arg(long)]
        force: bool,
    },

    /// Verify the lock file and build an image
    Build {
        /// Tag for the image (default: the project name)
        #[arg(long, short)]
        tag: Option<String>,

        /// Verify inputs and show the steps without building
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the build steps for the launch file
    Plan,

    /// List images in the store
    Images,

    /// Show an image record
    Inspect {
        /// Tag, digest, or digest prefix
        image: String,
    },

    /// Run an image as the foreground process
    Run {
        /// Tag, digest, or digest prefix
        image: String,

        /// Instance name
        #[arg(long)]
        name: Option<String>,

        /// Bind address passed to the process
        #[arg(long)]
        address: Option<String>,

        /// Port passed to the process (default: the image's declared port)
        #[arg(long, short)]
        port: Option<u16>,

        /// Do not run the health monitor
        #[arg(long)]
        no_healthcheck: bool,
    },

    /// Probe a health endpoint once; exits 0 when healthy, 1 otherwise
    Probe {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, short, default_value_t = DEFAULT_PORT)]
        port: u16,

        #[arg(long, default_value = DEFAULT_HEALTH_PATH)]
        path: String,

        /// Timeout in seconds
        #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
        timeout: u64,
    },

    /// List instances
    Ps,

    /// Show one instance
    Status {
        /// Instance id, id prefix, or name
        id: String,
    },

    /// Print the equivalent Dockerfile
    Dockerfile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["berth", "build"]).unwrap();
        assert_eq!(args.file, PathBuf::from(LAUNCH_FILE_NAME));
        assert_eq!(args.store, PathBuf::from(DEFAULT_STORE_DIR));
        assert!(matches!(args.command, SubCommand::Build { tag: None, dry_run: false }));
    }

    #[test]
    fn test_run_flags() {
        let args = Args::try_parse_from([
            "berth", "run", "whatsmyip", "--port", "9000", "--no-healthcheck", "--json",
        ])
        .unwrap();
        assert!(args.json);
        match args.command {
            SubCommand::Run {
                image,
                port,
                no_healthcheck,
                ..
            } => {
                assert_eq!(image, "whatsmyip");
                assert_eq!(port, Some(9000));
                assert!(no_healthcheck);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_probe_defaults() {
        let args = Args::try_parse_from(["berth", "probe"]).unwrap();
        match args.command {
            SubCommand::Probe { host, port, path, timeout } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 8501);
                assert_eq!(path, "/_stcore/health");
                assert_eq!(timeout, 5);
            }
            _ => panic!("expected probe"),
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(Args::try_parse_from(["berth", "probe", "--timeout", "0"]).is_err());
        assert!(Args::try_parse_from(["berth", "probe", "--timeout", "1"]).is_ok());
    }
}
