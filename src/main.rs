use std::env;
use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::Result;
use fsbridge::adapter_from_config;
use fsbridge::cli::{self, USAGE};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|arg| arg == "--help" || arg == "-h") {
        eprintln!("{USAGE}");
        return Ok(ExitCode::from(2));
    }

    let invocation = match cli::parse_args(&args) {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("error: {err}\n\n{USAGE}");
            return Ok(ExitCode::from(2));
        }
    };

    let config = cli::load_config(&invocation.config_path)?;
    let mut adapter = adapter_from_config(&config)?;
    info!(backend = adapter.backend_name(), "running {:?}", invocation.command);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let outcome = cli::run(
        adapter.as_mut(),
        &invocation.command,
        &config.write_options(),
        &mut out,
    );
    out.flush()?;
    adapter.disconnect();
    debug!("disconnected");

    outcome?;
    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}
