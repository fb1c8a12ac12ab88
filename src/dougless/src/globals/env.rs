//! The `env` global: permission-gated environment variable reads.
//!
//! Reads only. The runtime touches the OS environment exclusively through
//! this gate.

use dougless_permissions::PermissionKind;
use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use serde_json::json;

use super::{js_fn, take_callback, take_string};
use crate::bridge::queue_op;
use crate::error::HostError;
use crate::realm::RealmCore;

pub(crate) fn setup(ctx: &Ctx<'_>, core: &RealmCore) -> rquickjs::Result<()> {
    let env = Object::new(ctx.clone())?;

    let get = {
        let core = core.clone();
        Function::new(ctx.clone(), js_fn(move |ctx, args| get(&core, ctx, args)))?
            .with_name("get")?
    };
    env.set("get", get)?;

    let has = {
        let core = core.clone();
        Function::new(ctx.clone(), js_fn(move |ctx, args| has(&core, ctx, args)))?
            .with_name("has")?
    };
    env.set("has", has)?;

    ctx.globals().set("env", env)
}

fn get<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let mut args = args.into_inner().into_iter();
    let name = take_string(&ctx, args.next(), "env.get", "name")?;
    let callback = take_callback(args.next());
    let resource = name.clone();
    queue_op(
        &ctx,
        core,
        "env.get",
        callback,
        vec![(PermissionKind::Env, resource)],
        move || match std::env::var(&name) {
            Ok(value) => Ok(json!(value)),
            Err(std::env::VarError::NotPresent) => Ok(serde_json::Value::Null),
            Err(err) => Err(HostError::Io(format!("reading {name:?}: {err}"))),
        },
    )
}

fn has<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let mut args = args.into_inner().into_iter();
    let name = take_string(&ctx, args.next(), "env.has", "name")?;
    let callback = take_callback(args.next());
    let resource = name.clone();
    queue_op(
        &ctx,
        core,
        "env.has",
        callback,
        vec![(PermissionKind::Env, resource)],
        move || Ok(json!(std::env::var_os(&name).is_some())),
    )
}
