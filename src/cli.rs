use std::{io, process, sync::Arc};

use clap::Parser;
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{config::Args, error::Result, service, translator::Translator};

pub fn bootstrap_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();
    if let Err(err) = run(Args::parse()) {
        eprintln!("{} {err}", "error:".red().bold());
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let settings = args.into_settings()?;
    let port = settings.port;
    let translator = Arc::new(Translator::new(settings)?);
    let served = match port {
        Some(port) => service::run_tcp(Arc::clone(&translator), port),
        None => service::run_stdio(&translator),
    };
    info!("shutting down");
    // A failed serve loop still gets a best-effort teardown.
    let closed = translator.close(served.is_err());
    served.and(closed)
}
