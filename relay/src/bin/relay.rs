use std::{
    backtrace::{Backtrace, BacktraceStatus},
    fs,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xchain_relay::{
    cfg::Config,
    contract::KvContract,
    invoke::invoke,
    mediator::HttpMediator,
    relay::Relay,
    state::{Ledger, MemoryBackend, SqliteBackend, StateBackend},
};

/// Run one relay function against the local ledger and write its result to stdout.
#[derive(Parser, Debug)]
struct Args {
    #[clap(long, short)]
    config_file: Vec<PathBuf>,
    #[clap(long, default_value = "false")]
    log_json: bool,
    /// The function to run, for example `InterchainSingleModify`.
    function: String,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(io::stderr);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    // Set a panic hook that records the panic as a `tracing` event at the `ERROR` verbosity level.
    std::panic::set_hook(Box::new(|panic| {
        let message = match panic.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("<unnamed>");

        let backtrace = Backtrace::capture();
        let backtrace =
            (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());

        match (panic.location(), backtrace) {
            (None, None) => {
                tracing::error!(thread_name, message);
            }
            (None, Some(backtrace)) => {
                tracing::error!(thread_name, message, %backtrace);
            }
            (Some(location), None) => {
                tracing::error!(
                    thread_name,
                    message,
                    panic.file = location.file(),
                    panic.line = location.line(),
                    panic.column = location.column(),
                );
            }
            (Some(location), Some(backtrace)) => {
                tracing::error!(
                    thread_name,
                    message,
                    panic.file = location.file(),
                    panic.line = location.line(),
                    panic.column = location.column(),
                    %backtrace,
                );
            }
        }
    }));

    let config = if args.config_file.is_empty() {
        Config::default()
    } else {
        Config::from_files(args.config_file.as_slice())?
    };

    let backend: Arc<dyn StateBackend> = match config.database_path() {
        Some(path) => {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("cannot create data directory {dir:?}"))?;
            }
            info!(?path, "opening ledger");
            Arc::new(SqliteBackend::open(&path)?)
        }
        None => {
            info!("no data_dir configured, state will not be persisted");
            Arc::new(MemoryBackend::new())
        }
    };
    let ledger = Ledger::new(
        backend,
        config.event_channel_capacity,
        config.max_commit_attempts,
    );
    let relay = Relay::new(
        ledger.clone(),
        Arc::new(HttpMediator::new(config.mediator_timeout)),
        Arc::new(KvContract::new(ledger)),
    );
    relay.initialize()?;

    let (has_key, has_address) = relay.configured()?;
    if !has_key {
        if let Some(file) = &config.private_key_file {
            let material = fs::read_to_string(file)
                .with_context(|| format!("cannot read private key file {file:?}"))?;
            relay.set_private_key(material.trim())?;
            info!(?file, "stored signing key from configuration");
        }
    }
    if !has_address {
        if let Some(address) = &config.mediator_address {
            relay.set_mediator_address(address)?;
            info!(%address, "stored mediator address from configuration");
        }
    }

    let response = invoke(&relay, &args.function, &args.args)?;
    io::stdout().write_all(&response)?;
    Ok(())
}
