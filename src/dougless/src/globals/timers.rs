//! `setTimeout` / `setInterval` / `clearTimeout` / `clearInterval`.
//!
//! The registry owns the timer bookkeeping; the callback reference lives in
//! the realm's timer slots keyed by id, and is resolved again at dispatch
//! time. Clearing removes both, so an expiry that is already due when the
//! clear runs finds no slot and is silently suppressed.

use std::time::Duration;

use dougless_core::{TimerId, TimerKind};
use rquickjs::prelude::Rest;
use rquickjs::{Coerced, Ctx, Exception, FromJs, Function, IntoJs, Persistent, Value};

use super::js_fn;
use crate::realm::RealmCore;

pub(crate) fn setup(ctx: &Ctx<'_>, core: &RealmCore) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let set_timeout = {
        let core = core.clone();
        Function::new(
            ctx.clone(),
            js_fn(move |ctx, args| set_timer(&core, ctx, args, false)),
        )?
        .with_name("setTimeout")?
    };
    globals.set("setTimeout", set_timeout)?;

    let set_interval = {
        let core = core.clone();
        Function::new(
            ctx.clone(),
            js_fn(move |ctx, args| set_timer(&core, ctx, args, true)),
        )?
        .with_name("setInterval")?
    };
    globals.set("setInterval", set_interval)?;

    let clear_timeout = {
        let core = core.clone();
        Function::new(
            ctx.clone(),
            js_fn(move |ctx, args| clear_timer(&core, ctx, args)),
        )?
        .with_name("clearTimeout")?
    };
    globals.set("clearTimeout", clear_timeout)?;

    let clear_interval = {
        let core = core.clone();
        Function::new(
            ctx.clone(),
            js_fn(move |ctx, args| clear_timer(&core, ctx, args)),
        )?
        .with_name("clearInterval")?
    };
    globals.set("clearInterval", clear_interval)?;

    Ok(())
}

fn set_timer<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
    repeating: bool,
) -> rquickjs::Result<Value<'js>> {
    let api = if repeating { "setInterval" } else { "setTimeout" };
    let mut args = args.into_inner().into_iter();
    let callback = args
        .next()
        .and_then(|value| value.into_function())
        .ok_or_else(|| Exception::throw_type(&ctx, &format!("{api}: callback must be a function")))?;
    let millis = match args.next() {
        None => 0.0,
        Some(value) => {
            let Coerced(raw) = Coerced::<f64>::from_js(&ctx, value)?;
            if raw.is_finite() && raw > 0.0 { raw } else { 0.0 }
        }
    };
    let delay = Duration::from_millis(millis as u64);
    let kind = if repeating {
        TimerKind::Repeating {
            initial: delay,
            period: delay,
        }
    } else {
        TimerKind::Once { delay }
    };

    let id = core
        .timers
        .set(kind)
        .map_err(|err| Exception::throw_internal(&ctx, &format!("{api}: {err}")))?;
    core.timer_slots
        .borrow_mut()
        .insert(id, Persistent::save(&ctx, callback));
    (id.as_u64() as f64).into_js(&ctx)
}

fn clear_timer<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    // Unknown, already-cleared, and garbage ids are all silent no-ops.
    if let Some(value) = args.into_inner().into_iter().next()
        && let Ok(Coerced(raw)) = Coerced::<f64>::from_js(&ctx, value)
        && raw.is_finite()
        && raw >= 0.0
        && raw.fract() == 0.0
    {
        let id = TimerId::from_u64(raw as u64);
        core.timers.clear(id);
        core.timer_slots.borrow_mut().remove(&id);
    }
    Ok(Value::new_undefined(ctx))
}
