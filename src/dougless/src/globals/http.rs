//! The `http` global: permission-gated HTTP requests.
//!
//! The URL is parsed eagerly on the JS thread so the permission resource
//! (`host` or `host:port`) is fixed before anything leaves the loop; the
//! request itself runs on a worker through the blocking client.

use dougless_permissions::PermissionKind;
use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use serde_json::json;
use url::Url;

use super::{js_fn, take_callback, take_string, take_text};
use crate::bridge::{fail_op, queue_op};
use crate::error::HostError;
use crate::realm::RealmCore;

pub(crate) fn setup(ctx: &Ctx<'_>, core: &RealmCore) -> rquickjs::Result<()> {
    let http = Object::new(ctx.clone())?;

    let get = {
        let core = core.clone();
        Function::new(ctx.clone(), js_fn(move |ctx, args| get(&core, ctx, args)))?
            .with_name("get")?
    };
    http.set("get", get)?;

    let post = {
        let core = core.clone();
        Function::new(ctx.clone(), js_fn(move |ctx, args| post(&core, ctx, args)))?
            .with_name("post")?
    };
    http.set("post", post)?;

    ctx.globals().set("http", http)
}

/// Parse and classify a request URL into its permission resource.
fn classify(raw: &str) -> Result<(String, Url), HostError> {
    let url = Url::parse(raw)
        .map_err(|err| HostError::InvalidArgument(format!("invalid url {raw:?}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HostError::InvalidArgument(format!(
            "unsupported scheme {:?}: only http(s) urls are supported",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| HostError::InvalidArgument(format!("url {raw:?} has no host")))?;
    let resource = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok((resource, url))
}

fn get<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let mut args = args.into_inner().into_iter();
    let raw = take_string(&ctx, args.next(), "http.get", "url")?;
    let callback = take_callback(args.next());
    match classify(&raw) {
        Err(err) => fail_op(&ctx, core, "http.get", callback, err),
        Ok((resource, url)) => queue_op(
            &ctx,
            core,
            "http.get",
            callback,
            vec![(PermissionKind::Net, resource)],
            move || perform(url, None),
        ),
    }
}

fn post<'js>(
    core: &RealmCore,
    ctx: Ctx<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let mut args = args.into_inner().into_iter();
    let raw = take_string(&ctx, args.next(), "http.post", "url")?;
    let body = take_text(&ctx, args.next(), "http.post", "body")?;
    let callback = take_callback(args.next());
    match classify(&raw) {
        Err(err) => fail_op(&ctx, core, "http.post", callback, err),
        Ok((resource, url)) => queue_op(
            &ctx,
            core,
            "http.post",
            callback,
            vec![(PermissionKind::Net, resource)],
            move || perform(url, Some(body)),
        ),
    }
}

/// Run the request on the worker and shape the response for JavaScript.
fn perform(url: Url, body: Option<String>) -> Result<serde_json::Value, HostError> {
    let client = reqwest::blocking::Client::new();
    let request = match body {
        None => client.get(url.clone()),
        Some(body) => client.post(url.clone()).body(body),
    };
    let response = request
        .send()
        .map_err(|err| classify_transport_error(&url, err))?;

    let status = response.status().as_u16();
    let mut headers = serde_json::Map::new();
    for (name, value) in response.headers() {
        headers.insert(
            name.as_str().to_string(),
            json!(String::from_utf8_lossy(value.as_bytes())),
        );
    }
    let body = response
        .text()
        .map_err(|err| HostError::Protocol(format!("reading response from {url}: {err}")))?;
    Ok(json!({
        "status": status,
        "headers": headers,
        "body": body,
    }))
}

fn classify_transport_error(url: &Url, err: reqwest::Error) -> HostError {
    if err.is_connect() || err.is_timeout() {
        HostError::Io(format!("requesting {url}: {err}"))
    } else {
        HostError::Protocol(format!("requesting {url}: {err}"))
    }
}
