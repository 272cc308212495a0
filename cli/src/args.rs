use std::path::PathBuf;


/// A parsed `sourcetree` invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Replay a scenario and print its transcript.
    Run { file: PathBuf, json: bool },
    /// Replay a scenario and print the final tree.
    View { file: PathBuf, expand_all: bool },
    /// Print the canonical form of each key.
    Normalize { keys: Vec<String> },
    Help,
}


/// Parse CLI arguments (without the program name) into a [`Command`].
pub fn parse_args(args: &[&str]) -> Result<Command, String> {
    if args.is_empty() {
        return Err("No command specified. Run 'sourcetree help' for usage.".into());
    }

    match args[0] {
        "run" => parse_run(args),
        "view" => parse_view(args),
        "normalize" => parse_normalize(args),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => Err(format!("Unknown command: '{}'", args[0])),
    }
}


pub const USAGE: &str = "\
Usage:
  sourcetree run <scenario> [--json]        replay a scenario, print notifications
  sourcetree view <scenario> [--expand-all] replay a scenario, print the final tree
  sourcetree normalize <key>...             print canonical keys
  sourcetree help

Set SOURCETREE_LOG (e.g. 'debug') to enable logging on stderr.";


// ---------------------------------------------------------------------------
// Sub-parsers
// ---------------------------------------------------------------------------

/// `sourcetree run <scenario> [--json]`
fn parse_run(args: &[&str]) -> Result<Command, String> {
    let (file, flags) = split_file(args, "Usage: sourcetree run <scenario> [--json]")?;
    let mut json = false;
    for flag in flags {
        match *flag {
            "--json" => json = true,
            other => return Err(format!("Unknown flag for run: '{}'", other)),
        }
    }
    Ok(Command::Run { file, json })
}

/// `sourcetree view <scenario> [--expand-all]`
fn parse_view(args: &[&str]) -> Result<Command, String> {
    let (file, flags) = split_file(args, "Usage: sourcetree view <scenario> [--expand-all]")?;
    let mut expand_all = false;
    for flag in flags {
        match *flag {
            "--expand-all" => expand_all = true,
            other => return Err(format!("Unknown flag for view: '{}'", other)),
        }
    }
    Ok(Command::View { file, expand_all })
}

/// `sourcetree normalize <key>...`
fn parse_normalize(args: &[&str]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("Usage: sourcetree normalize <key>...".into());
    }
    Ok(Command::Normalize {
        keys: args[1..].iter().map(|k| k.to_string()).collect(),
    })
}

fn split_file<'a, 'b>(
    args: &'a [&'b str],
    usage: &str,
) -> Result<(PathBuf, &'a [&'b str]), String> {
    if args.len() < 2 || args[1].starts_with("--") {
        return Err(usage.into());
    }
    Ok((PathBuf::from(args[1]), &args[2..]))
}
