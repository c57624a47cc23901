use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use hearth::handlers::{AppBody, Environ, StartResponse};
use hearth::{AppRegistry, Config};

#[derive(Parser, Debug)]
#[command(name = "hearth", version, about = "Pre-fork HTTP/1.x application server")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Check a configuration file and exit
    #[arg(short = 't', long = "test", value_name = "FILE")]
    test: Option<PathBuf>,
}

fn hello(_environ: &mut Environ, start: &mut StartResponse) -> anyhow::Result<AppBody> {
    start.call(
        "200 OK",
        vec![("Content-Type".to_string(), "text/plain".to_string())],
        false,
    )?;
    Ok(AppBody::from_static(b"Hello from hearth\n"))
}

fn echo(environ: &mut Environ, start: &mut StartResponse) -> anyhow::Result<AppBody> {
    let mut body = Vec::new();
    environ.input.read_to_end(&mut body)?;
    let content_type = environ
        .get("CONTENT_TYPE")
        .unwrap_or("application/octet-stream")
        .to_string();
    if body.is_empty() {
        writeln!(environ.errors, "echo called without a body")?;
    }
    start.call(
        "200 OK",
        vec![
            ("Content-Type".to_string(), content_type),
            ("Content-Length".to_string(), body.len().to_string()),
        ],
        false,
    )?;
    Ok(AppBody::Chunks(vec![Bytes::from(body)]))
}

fn applications() -> AppRegistry {
    let mut apps = AppRegistry::new();
    apps.register("hello", hello).register("echo", echo);
    apps
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let apps = applications();

    if let Some(path) = &args.test {
        let config = Config::load(Some(path))?;
        config
            .handler
            .build(&apps)
            .context("failed to build handlers")?;
        println!("configuration {} is ok", path.display());
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;
    hearth::logging::init(&config.error_log)?;

    hearth::serve(config, args.config, apps)
}
