//! Berth CLI - build and launch a containerized web-server process

use std::time::Duration;

use berth::cli::{Args, SubCommand};
use berth::config::{write_default, Project};
use berth::image::{dockerfile, plan, ImageBuilder, ImageStore};
use berth::launcher::{InstanceManager, Launcher, RunOptions};
use berth::output::{format_output, OutputFormat, Report};
use berth::probe::{probe_once, ProbeTarget};
use clap::Parser;

fn main() {
    let args = Args::parse();
    berth::logging::init(args.verbose);

    let launching = matches!(args.command, SubCommand::Run { .. });
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            let code = if launching { e.launch_exit_code() } else { e.exit_code() };
            std::process::exit(code);
        }
    }
}

/// Execute a subcommand and return the process exit code
fn run(args: Args) -> berth::Result<i32> {
    let format = OutputFormat::from_json_flag(args.json);
    let store = ImageStore::new(&args.store);
    let print = |report: Report| println!("{}", format_output(&report, &format));

    match args.command {
        SubCommand::Init { force } => {
            write_default(&args.file, force)?;
            print(Report::Init { path: args.file.clone() });
            Ok(0)
        }

        SubCommand::Build { tag, dry_run } => {
            let project = Project::load(&args.file)?;
            let builder = ImageBuilder::new(&project, &store);
            if dry_run {
                let steps = builder.check()?;
                print(Report::Plan { steps, checked: true });
            } else {
                let report = builder.build(tag.as_deref())?;
                print(Report::Build(report));
            }
            Ok(0)
        }

        SubCommand::Plan => {
            let project = Project::load(&args.file)?;
            print(Report::Plan {
                steps: plan(&project),
                checked: false,
            });
            Ok(0)
        }

        SubCommand::Images => {
            print(Report::Images(store.list()?));
            Ok(0)
        }

        SubCommand::Inspect { image } => {
            let record = store.resolve(&image)?;
            let tags = store.tags_for(&record.digest)?;
            print(Report::Image { record, tags });
            Ok(0)
        }

        SubCommand::Run {
            image,
            name,
            address,
            port,
            no_healthcheck,
        } => {
            let options = RunOptions {
                name,
                address,
                port,
                no_healthcheck,
            };
            // stdout belongs to the application; the outcome is logged
            let instance = Launcher::new(&store).run(&image, &options)?;
            Ok(instance.exit_code.unwrap_or(berth::error::EXIT_LAUNCHER_FAILED))
        }

        SubCommand::Probe {
            host,
            port,
            path,
            timeout,
        } => {
            let target = ProbeTarget {
                host,
                port,
                path,
                timeout: Duration::from_secs(timeout),
            };
            let result = probe_once(&target)?;
            let healthy = result.healthy;
            print(Report::Probe {
                url: target.url(),
                result,
            });
            Ok(if healthy { 0 } else { 1 })
        }

        SubCommand::Ps => {
            print(Report::Instances(InstanceManager::new(&store).list()?));
            Ok(0)
        }

        SubCommand::Status { id } => {
            print(Report::Instance(InstanceManager::new(&store).get(&id)?));
            Ok(0)
        }

        SubCommand::Dockerfile => {
            let project = Project::load(&args.file)?;
            let text = dockerfile::render(&project)?;
            match format {
                OutputFormat::Human => print!("{}", text),
                OutputFormat::Json => print(Report::Dockerfile(text)),
            }
            Ok(0)
        }
    }
}
