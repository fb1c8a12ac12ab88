//! The `process` global: permission-gated subprocess execution.

use std::io;

use dougless_permissions::PermissionKind;
use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Exception, FromJs, Function, Object, Value};
use serde_json::json;

use super::{js_fn, take_callback, take_string};
use crate::bridge::queue_op;
use crate::error::HostError;
use crate::realm::RealmCore;

pub(crate) fn setup(ctx: &Ctx<'_>, core: &RealmCore) -> rquickjs::Result<()> {
    let process = Object::new(ctx.clone())?;

    let run = {
        let core = core.clone();
        Function::new(ctx.clone(), js_fn(move |ctx, args| run(&core, ctx, args)))?
            .with_name("run")?
    };
    process.set("run", run)?;

    ctx.globals().set("process", process)
}

/// `process.run(program, args?, callback?)` resolves to
/// `{code, stdout, stderr}` once the program exits.
fn run<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let mut args = args.into_inner().into_iter();
    let program = take_string(&ctx, args.next(), "process.run", "program")?;

    let mut argv: Vec<String> = Vec::new();
    let mut callback = None;
    if let Some(value) = args.next() {
        if value.is_function() {
            callback = value.into_function();
        } else if !value.is_undefined() && !value.is_null() {
            argv = Vec::<String>::from_js(&ctx, value).map_err(|_| {
                Exception::throw_type(&ctx, "process.run: args must be an array of strings")
            })?;
            callback = take_callback(args.next());
        }
    }

    let resource = program.clone();
    queue_op(
        &ctx,
        core,
        "process.run",
        callback,
        vec![(PermissionKind::Run, resource)],
        move || match std::process::Command::new(&program).args(&argv).output() {
            Ok(output) => Ok(json!({
                "code": output.status.code(),
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(HostError::NotFound(format!("program {program:?}")))
            }
            Err(err) => Err(HostError::Io(format!("spawning {program:?}: {err}"))),
        },
    )
}
