//! sourcetree CLI: replays provider scenarios against the source store.
//!
//! # Usage
//!
//! ```text
//! sourcetree run demos/robot.yaml
//! sourcetree run demos/robot.yaml --json
//! sourcetree view demos/robot.yaml --expand-all
//! sourcetree normalize "/Drive/ Speed?"
//! ```

mod args;

use std::process;

use sourcetree_core::{normalize_key, render_text, Scenario, StoreError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use args::{parse_args, Command, USAGE};


fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = args[1..].iter().map(|s| s.as_str()).collect();

    let cmd = match parse_args(&arg_refs) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("sourcetree: {}", e);
            process::exit(1);
        }
    };

    debug!(command = ?cmd, "parsed command");
    match execute(cmd) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("sourcetree: {}", e);
            process::exit(1);
        }
    }
}


/// Logs go to stderr, filtered by `SOURCETREE_LOG` (default `warn`).
fn init_logging() {
    let filter = EnvFilter::try_from_env("SOURCETREE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}


fn execute(cmd: Command) -> Result<String, StoreError> {
    match cmd {
        Command::Run { file, json } => {
            let run = Scenario::load(&file)?.run()?;
            if json {
                return serde_json::to_string_pretty(&run)
                    .map_err(|e| StoreError::ScenarioParse(e.to_string()));
            }
            let mut lines: Vec<String> = run.transcript.iter().map(|e| e.to_string()).collect();
            for write in &run.writes {
                lines.push(format!("#{} write {} = {}", write.step, write.key, write.value));
            }
            Ok(lines.join("\n"))
        }
        Command::View { file, expand_all } => {
            let run = Scenario::load(&file)?.run()?;
            Ok(render_text(&run.view, expand_all).trim_end().to_string())
        }
        Command::Normalize { keys } => Ok(keys
            .iter()
            .map(|key| normalize_key(key))
            .collect::<Vec<_>>()
            .join("\n")),
        Command::Help => Ok(USAGE.to_string()),
    }
}
