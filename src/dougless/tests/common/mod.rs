#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use dougless::{
    PermissionManager, Runtime, RuntimeOptions, Script, TaskErrorSink, TaskFailure,
};
use parking_lot::Mutex;

/// A tempdir whose path is canonicalized, so granted patterns and the paths
/// scripts use agree even when the OS tempdir involves symlinks.
pub struct Sandbox {
    _dir: tempfile::TempDir,
    pub root: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let root = dir.path().canonicalize().expect("canonicalize tempdir");
        Self { _dir: dir, root }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// The path as it is spliced into scripts: a quoted JS string literal.
    pub fn js_path(&self, name: &str) -> String {
        format!("{:?}", self.path(name).display().to_string())
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.path(name)).unwrap_or_default()
    }

    pub fn write(&self, name: &str, content: &str) {
        std::fs::write(self.path(name), content).expect("write fixture");
    }
}

/// Run a script to completion with the given permission manager.
pub fn run_script(source: &str, permissions: Arc<PermissionManager>) -> dougless::ExitStatus {
    let runtime = Runtime::new(RuntimeOptions::new(permissions)).expect("start runtime");
    runtime
        .execute(Script::from_content(source))
        .expect("schedule script");
    runtime.run_to_completion()
}

/// An error sink that keeps what it saw.
#[derive(Default)]
pub struct CollectingSink(pub Mutex<Vec<String>>);

impl TaskErrorSink for CollectingSink {
    fn report(&self, failure: &TaskFailure) {
        self.0.lock().push(failure.to_string());
    }
}
