use rquickjs::prelude::Rest;
use rquickjs::{Coerced, Ctx, Function, Object};

pub(crate) fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    console.set(
        "log",
        Function::new(ctx.clone(), |parts: Rest<Coerced<String>>| {
            print_line(false, parts)
        })?
        .with_name("log")?,
    )?;
    console.set(
        "info",
        Function::new(ctx.clone(), |parts: Rest<Coerced<String>>| {
            print_line(false, parts)
        })?
        .with_name("info")?,
    )?;
    console.set(
        "warn",
        Function::new(ctx.clone(), |parts: Rest<Coerced<String>>| {
            print_line(true, parts)
        })?
        .with_name("warn")?,
    )?;
    console.set(
        "error",
        Function::new(ctx.clone(), |parts: Rest<Coerced<String>>| {
            print_line(true, parts)
        })?
        .with_name("error")?,
    )?;
    ctx.globals().set("console", console)
}

fn print_line(to_stderr: bool, parts: Rest<Coerced<String>>) {
    let mut line = parts
        .into_inner()
        .into_iter()
        .map(|mut part| {
            part.0.push(' ');
            part.0
        })
        .collect::<String>();
    line.pop(); // remove the trailing space
    if to_stderr {
        eprintln!("{line}");
    } else {
        println!("{line}");
    }
}
