//! Launching images
//!
//! An instance is created from a committed image and owns exactly one
//! process. Its lifecycle ends when that process exits.

mod instance;
mod lifecycle;
mod process;

pub use instance::{process_alive, Binding, InstanceManager, InstanceRecord, CONTAINERS_DIR, STATE_FILE};
pub use lifecycle::Lifecycle;
pub use process::{exit_code, Launcher, RunOptions};

/// Substitute `{address}` and `{port}` in an entrypoint template
pub fn render_command(template: &[String], address: &str, port: u16) -> Vec<String> {
    let port = port.to_string();
    template
        .iter()
        .map(|arg| arg.replace("{address}", address).replace("{port}", &port))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_command() {
        let template: Vec<String> = ["streamlit", "run", "app.py", "--server.port={port}", "--server.address={address}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            render_command(&template, "0.0.0.0", 8501),
            vec!["streamlit", "run", "app.py", "--server.port=8501", "--server.address=0.0.0.0"]
        );
    }

    #[test]
    fn test_render_leaves_other_braces() {
        let template = vec!["sh".to_string(), "-c".to_string(), "echo {name} {port}".to_string()];
        assert_eq!(render_command(&template, "::", 80)[2], "echo {name} 80");
    }
}
