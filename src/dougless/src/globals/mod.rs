//! The JavaScript-visible surface installed into every realm.
//!
//! Each submodule contributes one global (or one family of global
//! functions) through a `setup` function; bindings that need the realm
//! capture a [`RealmCore`] clone. Scripts are evaluated in the global scope,
//! so there is no module loader here.

use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Exception, FromJs, Function, Value};

use crate::realm::RealmCore;

mod console;
mod env;
mod fs;
mod http;
mod process;
mod timers;

pub(crate) fn setup(ctx: &Ctx<'_>, core: &RealmCore) -> rquickjs::Result<()> {
    console::setup(ctx)?;
    timers::setup(ctx, core)?;
    fs::setup(ctx, core)?;
    env::setup(ctx, core)?;
    process::setup(ctx, core)?;
    http::setup(ctx, core)?;
    Ok(())
}

/// Coerce a closure so the returned `Value<'_>` shares the `Ctx<'_>`
/// lifetime. Rust cannot infer this for a bare closure; naming the
/// higher-ranked signature once here keeps every binding site clean.
pub(super) fn js_fn<F>(f: F) -> F
where
    F: for<'js> Fn(Ctx<'js>, Rest<Value<'js>>) -> rquickjs::Result<Value<'js>>,
{
    f
}

/// Next positional argument as a string, strictly: anything else (including
/// a missing argument) is a `TypeError` before any side effect.
pub(super) fn take_string<'js>(
    ctx: &Ctx<'js>,
    value: Option<Value<'js>>,
    api: &str,
    what: &str,
) -> rquickjs::Result<String> {
    let Some(value) = value else {
        return Err(Exception::throw_type(ctx, &format!("{api}: missing {what}")));
    };
    String::from_js(ctx, value)
        .map_err(|_| Exception::throw_type(ctx, &format!("{api}: {what} must be a string")))
}

/// Next positional argument coerced to text, for data-bearing arguments
/// where JavaScript's usual stringification is wanted.
pub(super) fn take_text<'js>(
    ctx: &Ctx<'js>,
    value: Option<Value<'js>>,
    api: &str,
    what: &str,
) -> rquickjs::Result<String> {
    let Some(value) = value else {
        return Err(Exception::throw_type(ctx, &format!("{api}: missing {what}")));
    };
    rquickjs::Coerced::<String>::from_js(ctx, value)
        .map(|coerced| coerced.0)
        .map_err(|_| Exception::throw_type(ctx, &format!("{api}: {what} must be stringifiable")))
}

/// The trailing optional callback, when the next argument is a function.
pub(super) fn take_callback<'js>(value: Option<Value<'js>>) -> Option<Function<'js>> {
    value.and_then(|value| value.into_function())
}
