//! A line-oriented REPL.
//!
//! Deliberately plain: read a line, round-trip it through the event loop,
//! print the rendered result or the error, repeat until EOF or `.exit`.
//! The REPL holds a keep-alive tick so the loop survives the quiet moments
//! between lines.

use std::io::{self, BufRead, Write};

use crate::runtime::Runtime;

/// Drive the REPL over this process's standard streams until EOF.
pub fn run(runtime: &Runtime) -> anyhow::Result<()> {
    let guard = runtime.handle().work_guard();

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stdout = io::stdout();

    eprintln!("dougless {} — .exit or Ctrl-D to quit", env!("CARGO_PKG_VERSION"));
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            // EOF
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ".exit" {
            break;
        }

        match runtime.eval_blocking(line.to_string()) {
            Ok(Ok(rendered)) => println!("{rendered}"),
            Ok(Err(error)) => eprintln!("Uncaught {error}"),
            Err(err) => {
                eprintln!("dougless: {err}");
                break;
            }
        }
    }

    drop(guard);
    Ok(())
}
