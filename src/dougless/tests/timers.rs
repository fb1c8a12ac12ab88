//! End-to-end timer behavior through the JavaScript surface.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::Sandbox;
use dougless::{PermissionManager, Runtime, RuntimeOptions, Script};

fn write_granted(sandbox: &Sandbox) -> Arc<PermissionManager> {
    let permissions = Arc::new(PermissionManager::builder().build());
    permissions
        .grant_write(&[sandbox.root.display().to_string()])
        .unwrap();
    permissions
}

#[test]
fn timers_fire_in_deadline_order_within_wall_clock_bounds() {
    let sandbox = Sandbox::new();
    let out = sandbox.js_path("order.txt");
    let permissions = write_granted(&sandbox);

    let source = format!(
        r#"
        const events = [];
        setTimeout(() => events.push("a"), 50);
        setTimeout(() => {{
            events.push("c");
            fs.writeFile({out}, events.join(","));
        }}, 150);
        setTimeout(() => events.push("b"), 100);
        "#
    );

    let runtime = Runtime::new(RuntimeOptions::new(permissions)).unwrap();
    let begin = Instant::now();
    runtime.execute(Script::from_content(source)).unwrap();
    let status = runtime.run_to_completion();
    let elapsed = begin.elapsed();

    assert!(status.success());
    assert_eq!(sandbox.read("order.txt"), "a,b,c");
    assert!(elapsed >= Duration::from_millis(150), "elapsed {elapsed:?}");
    // The three waits overlap; serialized waits would take at least 300 ms.
    assert!(elapsed < Duration::from_millis(250), "elapsed {elapsed:?}");
}

#[test]
fn cancellation_wins_the_race_against_a_pending_firing() {
    let sandbox = Sandbox::new();
    let out = sandbox.js_path("cancelled.txt");
    let permissions = write_granted(&sandbox);

    let source = format!(
        r#"
        const id = setTimeout(() => fs.writeFile({out}, "fired"), 1000);
        clearTimeout(id);
        "#
    );

    let runtime = Runtime::new(RuntimeOptions::new(permissions)).unwrap();
    let begin = Instant::now();
    runtime.execute(Script::from_content(source)).unwrap();
    let status = runtime.run_to_completion();

    assert!(status.success());
    assert!(
        begin.elapsed() < Duration::from_millis(900),
        "a cleared timer must not hold the loop to its deadline"
    );
    assert_eq!(sandbox.read("cancelled.txt"), "");
}

#[test]
fn clearing_garbage_ids_is_a_silent_no_op() {
    let sandbox = Sandbox::new();
    let out = sandbox.js_path("garbage.txt");
    let permissions = write_granted(&sandbox);

    let source = format!(
        r#"
        clearTimeout("not-a-timer");
        clearTimeout(424242);
        clearInterval(undefined);
        clearInterval({{}});
        fs.writeFile({out}, "survived");
        "#
    );

    let status = common::run_script(&source, permissions);
    assert!(status.success());
    assert_eq!(sandbox.read("garbage.txt"), "survived");
}

#[test]
fn a_pending_timer_keeps_the_process_alive_until_it_fires() {
    let sandbox = Sandbox::new();
    let out = sandbox.js_path("late.txt");
    let permissions = write_granted(&sandbox);

    // The script itself finishes immediately; only the timer holds the loop.
    let source = format!(r#"setTimeout(() => fs.writeFile({out}, "late"), 200);"#);

    let runtime = Runtime::new(RuntimeOptions::new(permissions)).unwrap();
    let begin = Instant::now();
    runtime.execute(Script::from_content(source)).unwrap();
    let status = runtime.run_to_completion();

    assert!(status.success());
    assert!(begin.elapsed() >= Duration::from_millis(200));
    assert_eq!(sandbox.read("late.txt"), "late");
}

#[test]
fn an_interval_repeats_until_cleared_from_its_own_callback() {
    let sandbox = Sandbox::new();
    let out = sandbox.js_path("ticks.txt");
    let permissions = write_granted(&sandbox);

    let source = format!(
        r#"
        let ticks = 0;
        const id = setInterval(() => {{
            ticks += 1;
            if (ticks === 3) {{
                clearInterval(id);
                fs.writeFile({out}, "ticks:" + ticks);
            }}
        }}, 20);
        "#
    );

    let status = common::run_script(&source, permissions);
    assert!(status.success());
    assert_eq!(sandbox.read("ticks.txt"), "ticks:3");
}
