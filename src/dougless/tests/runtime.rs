//! Runtime lifecycle: evaluation, failure modes, the REPL round trip.

mod common;

use std::sync::Arc;

use common::{CollectingSink, Sandbox};
use dougless::{PermissionManager, Runtime, RuntimeOptions, Script};

fn bare_runtime() -> Runtime {
    let permissions = Arc::new(PermissionManager::builder().build());
    Runtime::new(RuntimeOptions::new(permissions)).expect("start runtime")
}

#[test]
fn eval_blocking_round_trips_an_expression() {
    let runtime = bare_runtime();
    assert_eq!(
        runtime.eval_blocking("1 + 1".to_string()).unwrap(),
        Ok("2".to_string())
    );
    assert_eq!(
        runtime
            .eval_blocking("({a: [1, 2]})".to_string())
            .unwrap(),
        Ok("{\"a\":[1,2]}".to_string())
    );
    let error = runtime
        .eval_blocking("undefinedVariable".to_string())
        .unwrap()
        .unwrap_err();
    assert!(error.contains("undefinedVariable"), "got: {error}");

    runtime.stop();
    assert!(runtime.run_to_completion().success());
}

#[test]
fn repl_state_persists_between_lines() {
    let runtime = bare_runtime();
    assert_eq!(
        runtime.eval_blocking("var counter = 41;".to_string()).unwrap(),
        Ok("undefined".to_string())
    );
    assert_eq!(
        runtime.eval_blocking("counter + 1".to_string()).unwrap(),
        Ok("42".to_string())
    );
    runtime.stop();
    runtime.run_to_completion();
}

#[test]
fn a_top_level_throw_fails_the_run() {
    let permissions = Arc::new(PermissionManager::builder().build());
    let status = common::run_script("throw new Error('nope');", permissions);
    assert!(!status.success());
    assert_eq!(status.code(), 1);
}

#[test]
fn a_syntax_error_fails_the_run() {
    let permissions = Arc::new(PermissionManager::builder().build());
    let status = common::run_script("function {", permissions);
    assert!(!status.success());
}

#[test]
fn an_uncaught_callback_error_is_reported_but_not_fatal() {
    let sandbox = Sandbox::new();
    let out = sandbox.js_path("alive.txt");
    let permissions = Arc::new(PermissionManager::builder().build());
    permissions
        .grant_write(&[sandbox.root.display().to_string()])
        .unwrap();
    let sink = Arc::new(CollectingSink::default());

    let source = format!(
        r#"
        setTimeout(() => {{ throw new Error("callback boom"); }}, 10);
        setTimeout(() => fs.writeFile({out}, "alive"), 60);
        "#
    );

    let runtime = Runtime::new(
        RuntimeOptions::new(permissions).with_error_sink(sink.clone()),
    )
    .unwrap();
    runtime.execute(Script::from_content(source)).unwrap();
    let status = runtime.run_to_completion();

    assert!(status.success(), "callback errors do not fail the run");
    assert_eq!(sandbox.read("alive.txt"), "alive");
    let reports = sink.0.lock();
    assert!(
        reports.iter().any(|report| report.contains("callback boom")),
        "the error sink should have seen the callback error: {reports:?}"
    );
}

#[test]
fn console_logging_is_available() {
    let permissions = Arc::new(PermissionManager::builder().build());
    let status = common::run_script(
        "console.log('a', 1, true); console.error('warned');",
        permissions,
    );
    assert!(status.success());
}
