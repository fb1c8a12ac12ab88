//! Interactive permission prompting.
//!
//! The prompter is one of the two substitution points of the core: anything
//! that can turn a [`PermissionDescriptor`] into a [`PromptResponse`] will
//! do. The default [`TerminalPrompter`] talks to the user on standard error
//! and reads answers from the controlling terminal (standard input when
//! there is none) through a dedicated reader thread, which is what lets a
//! prompt honor a deadline — a blocked `read_line` cannot be cancelled, but
//! a channel receive can time out.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Instant;

use crossbeam::channel::{Receiver, bounded};
use parking_lot::Mutex;

use crate::config::CONFIG_FILE_NAME;
use crate::kind::PermissionKind;

/// What a permission query is asking for, in prompt-friendly form.
#[derive(Debug, Clone)]
pub struct PermissionDescriptor {
    /// The permission kind being requested.
    pub kind: PermissionKind,
    /// The resource the request is about, as the caller named it.
    pub resource: String,
}

impl std::fmt::Display for PermissionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            PermissionKind::Read => write!(f, "read access to {:?}", self.resource),
            PermissionKind::Write => write!(f, "write access to {:?}", self.resource),
            PermissionKind::Net => write!(f, "network access to {:?}", self.resource),
            PermissionKind::Env => {
                write!(f, "access to the environment variable {:?}", self.resource)
            }
            PermissionKind::Run => write!(f, "permission to run {:?}", self.resource),
        }
    }
}

/// The user's answer to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptResponse {
    /// Whether the request is granted.
    pub granted: bool,
    /// Whether the decision should be remembered (cache + config file).
    pub persist: bool,
}

impl PromptResponse {
    pub(crate) const DENIED: PromptResponse = PromptResponse {
        granted: false,
        persist: false,
    };
}

/// Turns permission descriptors into grant/deny decisions, usually by asking
/// a human.
pub trait Prompter: Send + Sync {
    /// Ask for a decision. A `deadline` in the past, a timeout, or any
    /// failure to obtain an answer must resolve as a denial.
    fn prompt(&self, deadline: Option<Instant>, descriptor: &PermissionDescriptor)
    -> PromptResponse;
}

/// The default prompter: questions on stderr, answers from stdin.
///
/// Two questions are asked when the first answer is yes: grant, then
/// persist. A mutex serializes whole prompts so concurrent permission checks
/// from distinct async callers cannot interleave their reads.
pub struct TerminalPrompter {
    serialize: Mutex<()>,
    lines: Receiver<String>,
}

impl TerminalPrompter {
    /// Create a prompter reading from the controlling terminal when there is
    /// one, standard input otherwise. Going through the terminal keeps
    /// prompt answers apart from whatever else (the REPL, piped script
    /// input) is consuming stdin.
    pub fn new() -> Self {
        let (tx, rx) = bounded(8);
        // The reader thread parks in read_line between prompts; it exits on
        // EOF or when the prompter is dropped and the next send fails.
        let spawned = thread::Builder::new()
            .name("dougless-prompt-stdin".to_string())
            .spawn(move || {
                let mut input = open_answer_source();
                loop {
                    let mut line = String::new();
                    match input.read_line(&mut line) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            if tx.send(line.trim().to_string()).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(%err, "failed to spawn the prompt reader thread; prompts will deny");
        }
        Self::from_lines(rx)
    }

    /// Build a prompter over an arbitrary line source. Answer lines must
    /// already be trimmed.
    pub fn from_lines(lines: Receiver<String>) -> Self {
        Self {
            serialize: Mutex::new(()),
            lines,
        }
    }

    fn read_answer(&self, deadline: Option<Instant>) -> Option<String> {
        match deadline {
            None => self.lines.recv().ok(),
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    return None;
                }
                self.lines.recv_timeout(deadline - now).ok()
            }
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

/// The controlling terminal when it can be opened, stdin otherwise.
fn open_answer_source() -> Box<dyn BufRead + Send> {
    #[cfg(unix)]
    if let Ok(tty) = std::fs::File::open("/dev/tty") {
        return Box::new(io::BufReader::new(tty));
    }
    Box::new(io::BufReader::new(io::stdin()))
}

fn is_yes(answer: &str) -> bool {
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

impl Prompter for TerminalPrompter {
    fn prompt(
        &self,
        deadline: Option<Instant>,
        descriptor: &PermissionDescriptor,
    ) -> PromptResponse {
        let _serial = self.serialize.lock();

        // Discard input left over from an earlier timed-out prompt.
        while self.lines.try_recv().is_ok() {}

        let mut stderr = io::stderr();
        let _ = write!(stderr, "dougless requests {descriptor}. Grant? [y/N] ");
        let _ = stderr.flush();
        let Some(answer) = self.read_answer(deadline) else {
            let _ = writeln!(stderr);
            return PromptResponse::DENIED;
        };
        if !is_yes(&answer) {
            return PromptResponse::DENIED;
        }

        let _ = write!(
            stderr,
            "Remember this decision in {CONFIG_FILE_NAME}? [y/N] "
        );
        let _ = stderr.flush();
        let persist = self
            .read_answer(deadline)
            .map(|answer| is_yes(&answer))
            .unwrap_or(false);
        PromptResponse {
            granted: true,
            persist,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam::channel::unbounded;

    use super::*;

    fn descriptor() -> PermissionDescriptor {
        PermissionDescriptor {
            kind: PermissionKind::Read,
            resource: "/tmp/data".to_string(),
        }
    }

    #[test]
    fn yes_then_yes_grants_and_persists() {
        let (tx, rx) = unbounded();
        tx.send("y".to_string()).unwrap();
        tx.send("yes".to_string()).unwrap();
        let prompter = TerminalPrompter::from_lines(rx);

        let response = prompter.prompt(None, &descriptor());
        assert_eq!(
            response,
            PromptResponse {
                granted: true,
                persist: true
            }
        );
    }

    #[test]
    fn yes_then_no_grants_without_persisting() {
        let (tx, rx) = unbounded();
        tx.send("Y".to_string()).unwrap();
        tx.send("n".to_string()).unwrap();
        let prompter = TerminalPrompter::from_lines(rx);

        let response = prompter.prompt(None, &descriptor());
        assert_eq!(
            response,
            PromptResponse {
                granted: true,
                persist: false
            }
        );
    }

    #[test]
    fn a_no_answers_with_a_single_question() {
        let (tx, rx) = unbounded();
        tx.send("n".to_string()).unwrap();
        tx.send("y".to_string()).unwrap();
        let prompter = TerminalPrompter::from_lines(rx);

        assert_eq!(prompter.prompt(None, &descriptor()), PromptResponse::DENIED);

        // The "y" was never consumed as a persistence answer. It is stale
        // input now, and the next prompt discards it instead of reading it.
        drop(tx);
        assert_eq!(prompter.prompt(None, &descriptor()), PromptResponse::DENIED);
    }

    #[test]
    fn an_expired_deadline_denies() {
        let (_tx, rx) = unbounded();
        let prompter = TerminalPrompter::from_lines(rx);
        let deadline = Instant::now() - Duration::from_millis(1);
        assert_eq!(
            prompter.prompt(Some(deadline), &descriptor()),
            PromptResponse::DENIED
        );
    }

    #[test]
    fn a_timeout_waiting_for_input_denies() {
        let (_tx, rx) = unbounded();
        let prompter = TerminalPrompter::from_lines(rx);
        let deadline = Instant::now() + Duration::from_millis(30);
        let begin = Instant::now();
        assert_eq!(
            prompter.prompt(Some(deadline), &descriptor()),
            PromptResponse::DENIED
        );
        assert!(begin.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn closed_input_denies() {
        let (tx, rx) = unbounded();
        drop(tx);
        let prompter = TerminalPrompter::from_lines(rx);
        assert_eq!(prompter.prompt(None, &descriptor()), PromptResponse::DENIED);
    }
}
