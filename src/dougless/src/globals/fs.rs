//! The `fs` global: permission-gated file operations.

use std::io::{self, Write as _};

use dougless_permissions::PermissionKind;
use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use serde_json::json;

use super::{js_fn, take_callback, take_string, take_text};
use crate::bridge::queue_op;
use crate::error::HostError;
use crate::realm::RealmCore;

pub(crate) fn setup(ctx: &Ctx<'_>, core: &RealmCore) -> rquickjs::Result<()> {
    let fs = Object::new(ctx.clone())?;

    let read_file = {
        let core = core.clone();
        Function::new(ctx.clone(), js_fn(move |ctx, args| read_file(&core, ctx, args)))?
            .with_name("readFile")?
    };
    fs.set("readFile", read_file)?;

    let write_file = {
        let core = core.clone();
        Function::new(ctx.clone(), js_fn(move |ctx, args| write_file(&core, ctx, args)))?
            .with_name("writeFile")?
    };
    fs.set("writeFile", write_file)?;

    let append_file = {
        let core = core.clone();
        Function::new(ctx.clone(), js_fn(move |ctx, args| append_file(&core, ctx, args)))?
            .with_name("appendFile")?
    };
    fs.set("appendFile", append_file)?;

    let remove = {
        let core = core.clone();
        Function::new(ctx.clone(), js_fn(move |ctx, args| remove(&core, ctx, args)))?
            .with_name("remove")?
    };
    fs.set("remove", remove)?;

    let exists = {
        let core = core.clone();
        Function::new(ctx.clone(), js_fn(move |ctx, args| exists(&core, ctx, args)))?
            .with_name("exists")?
    };
    fs.set("exists", exists)?;

    ctx.globals().set("fs", fs)
}

/// Map an I/O fault to the host taxonomy: not-found keeps its identity,
/// everything else is an I/O failure.
fn io_error(action: &str, path: &str, err: io::Error) -> HostError {
    if err.kind() == io::ErrorKind::NotFound {
        HostError::NotFound(format!("{action} {path:?}: {err}"))
    } else {
        HostError::Io(format!("{action} {path:?}: {err}"))
    }
}

fn read_file<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let mut args = args.into_inner().into_iter();
    let path = take_string(&ctx, args.next(), "fs.readFile", "path")?;
    let callback = take_callback(args.next());
    let resource = path.clone();
    queue_op(
        &ctx,
        core,
        "fs.readFile",
        callback,
        vec![(PermissionKind::Read, resource)],
        move || match std::fs::read_to_string(&path) {
            Ok(text) => Ok(json!(text)),
            // A missing file reads as null so scripts can probe existence.
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(serde_json::Value::Null),
            Err(err) => Err(HostError::Io(format!("reading {path:?}: {err}"))),
        },
    )
}

fn write_file<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let mut args = args.into_inner().into_iter();
    let path = take_string(&ctx, args.next(), "fs.writeFile", "path")?;
    let data = take_text(&ctx, args.next(), "fs.writeFile", "data")?;
    let callback = take_callback(args.next());
    let resource = path.clone();
    queue_op(
        &ctx,
        core,
        "fs.writeFile",
        callback,
        vec![(PermissionKind::Write, resource)],
        move || match std::fs::write(&path, data.as_bytes()) {
            Ok(()) => Ok(serde_json::Value::Null),
            Err(err) => Err(io_error("writing", &path, err)),
        },
    )
}

fn append_file<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let mut args = args.into_inner().into_iter();
    let path = take_string(&ctx, args.next(), "fs.appendFile", "path")?;
    let data = take_text(&ctx, args.next(), "fs.appendFile", "data")?;
    let callback = take_callback(args.next());
    let resource = path.clone();
    queue_op(
        &ctx,
        core,
        "fs.appendFile",
        callback,
        vec![(PermissionKind::Write, resource)],
        move || {
            let appended = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut file| file.write_all(data.as_bytes()));
            match appended {
                Ok(()) => Ok(serde_json::Value::Null),
                Err(err) => Err(io_error("appending to", &path, err)),
            }
        },
    )
}

fn remove<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let mut args = args.into_inner().into_iter();
    let path = take_string(&ctx, args.next(), "fs.remove", "path")?;
    let callback = take_callback(args.next());
    let resource = path.clone();
    queue_op(
        &ctx,
        core,
        "fs.remove",
        callback,
        vec![(PermissionKind::Write, resource)],
        move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(serde_json::Value::Null),
            Err(err) => Err(io_error("removing", &path, err)),
        },
    )
}

fn exists<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let mut args = args.into_inner().into_iter();
    let path = take_string(&ctx, args.next(), "fs.exists", "path")?;
    let callback = take_callback(args.next());
    let resource = path.clone();
    queue_op(
        &ctx,
        core,
        "fs.exists",
        callback,
        vec![(PermissionKind::Read, resource)],
        move || match std::fs::metadata(&path) {
            Ok(_) => Ok(json!(true)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(json!(false)),
            Err(err) => Err(HostError::Io(format!("probing {path:?}: {err}"))),
        },
    )
}
