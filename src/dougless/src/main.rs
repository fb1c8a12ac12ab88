use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::{env, io};

use anyhow::Context as _;
use clap::Parser;
use dougless::{
    CONFIG_FILE_NAME, PermissionManager, Runtime, RuntimeOptions, Script, TerminalPrompter, repl,
};
use tracing_subscriber::EnvFilter;

const EXAMPLES: &str = "\u{001b}[1;4mExamples:\u{001b}[0m
  Run a script:
    $ cat ./main.js
    setTimeout(() => console.log('hello from dougless'), 100);

    $ dougless ./main.js
    hello from dougless

  Grant the script's directory up front with a .douglessrc next to it:
    $ cat ./.douglessrc
    {
      \"permissions\": {
        \"read\": [\"./data\"]
      }
    }

  Start a REPL:
    $ dougless
    > 1 + 1
    2
";

/// Run a JavaScript script on the dougless event loop, or start a REPL.
///
/// Privileged operations (files, environment, subprocesses, HTTP) are gated
/// by the permission config and, on a terminal, interactive prompts.
#[derive(clap::Parser)]
#[command(version, about)]
#[clap(after_help = EXAMPLES)]
struct Cli {
    /// The path to the JavaScript script file. Omit it to start a REPL.
    script: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("DOUGLESS_LOG"))
        .with_writer(io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("dougless: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let interactive = io::stdin().is_terminal() && io::stderr().is_terminal();

    match cli.script {
        Some(path) => {
            let script = Script::from_file(&path)?;
            // Relative paths in the script (and in its config) resolve next
            // to it.
            if let Some(dir) = script.base_dir() {
                if !dir.as_os_str().is_empty() {
                    env::set_current_dir(dir).with_context(|| {
                        format!("setting current directory to {}", dir.display())
                    })?;
                }
            }
            let runtime = boot(interactive)?;
            runtime.execute(script)?;
            Ok(exit_code(runtime.run_to_completion()))
        }
        None => {
            let runtime = boot(interactive)?;
            repl::run(&runtime)?;
            runtime.stop();
            Ok(exit_code(runtime.run_to_completion()))
        }
    }
}

/// Load the permission config from the current directory and start the
/// runtime. A malformed config aborts startup with a diagnostic naming the
/// file and the parse position.
fn boot(interactive: bool) -> anyhow::Result<Runtime> {
    let config_path = env::current_dir()
        .context("determining the current directory")?
        .join(CONFIG_FILE_NAME);

    let mut builder = PermissionManager::builder().with_config_path(&config_path);
    if interactive {
        builder = builder.with_prompter(Arc::new(TerminalPrompter::new()));
    }
    let permissions = Arc::new(builder.build());
    permissions.load_config(&config_path)?;

    let runtime = Runtime::new(RuntimeOptions::new(permissions))?;
    Ok(runtime)
}

fn exit_code(status: dougless::ExitStatus) -> ExitCode {
    if status.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
