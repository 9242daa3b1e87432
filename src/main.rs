//! wasm-bridge CLI entry point.
//!
//! Loads WebAssembly modules into a runtime, attaches the standard host
//! functions, and invokes one export with arguments given as strings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use parking_lot::Mutex;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wasm_bridge_common::{ConfigFile, InvokeEntry, ModuleEntry, RuntimeError};
use wasm_bridge_core::{Environment, Runtime, Value};
use wasm_bridge_host::register_all;

/// Load WebAssembly modules and invoke an exported function.
#[derive(Debug, Parser)]
#[command(name = "wasm-bridge", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Link WASI preview1 and inherit stdio.
    #[arg(long)]
    wasi: bool,

    /// Link the spectest host module.
    #[arg(long)]
    spectest: bool,

    /// Fuel budget for the call.
    #[arg(long)]
    fuel: Option<u64>,

    /// Interrupt the call after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Modules to load, after any listed in the configuration file.
    modules: Vec<PathBuf>,

    /// Function to call, followed by its arguments.
    #[arg(
        long,
        num_args = 1..,
        value_name = "NAME [ARGS]",
        allow_hyphen_values = true
    )]
    invoke: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,wasm_bridge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let environment =
        Environment::new(&config.environment).context("Failed to create environment")?;
    let mut runtime =
        Runtime::new(&environment, &config.runtime).context("Failed to create runtime")?;
    register_all(&mut runtime).context("Failed to attach host functions")?;

    for entry in &config.modules {
        load_module(&mut runtime, entry)?;
    }

    let Some(invoke) = config.invoke else {
        for module in runtime.modules() {
            for export in module.exports() {
                println!("{}.{} {}", module.name(), export.name(), export.signature());
            }
        }
        return Ok(());
    };

    let timeout = cli.timeout_ms.map(Duration::from_millis);
    match invoke_function(runtime, &environment, invoke, timeout).await? {
        Ok(results) => {
            for value in results {
                println!("{value}");
            }
            Ok(())
        }
        Err(RuntimeError::Exited { code }) => {
            info!(code, "Guest exited");
            std::process::exit(code);
        }
        Err(err) => Err(err.into()),
    }
}

/// Merge the configuration file with command-line flags.
fn load_config(cli: &Cli) -> anyhow::Result<ConfigFile> {
    let mut config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConfigFile::default(),
    };

    if cli.wasi {
        config.runtime.enable_wasi = true;
        config.runtime.wasi.inherit_stdio = true;
    }
    if cli.spectest {
        config.runtime.enable_spectest = true;
    }
    if let Some(fuel) = cli.fuel {
        config.environment.consume_fuel = true;
        config.runtime.max_fuel = Some(fuel);
    }
    if cli.timeout_ms.is_some() {
        config.environment.epoch_interruption = true;
        config.runtime.epoch_deadline = Some(1);
    }

    config
        .modules
        .extend(cli.modules.iter().map(|path| ModuleEntry {
            path: path.display().to_string(),
            name: None,
        }));

    if let Some((function, args)) = cli.invoke.split_first() {
        config.invoke = Some(InvokeEntry {
            function: function.clone(),
            args: args.to_vec(),
        });
    }

    if config.runtime.enable_wasi && config.runtime.wasi.args.is_empty() {
        if let Some(first) = config.modules.first() {
            config.runtime.wasi.args = vec![first.path.clone()];
        }
    }

    debug!(?config, "Configuration loaded");
    Ok(config)
}

fn load_module(runtime: &mut Runtime, entry: &ModuleEntry) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(&entry.path).with_context(|| format!("Failed to read {}", entry.path))?;

    let name = entry
        .name
        .clone()
        .unwrap_or_else(|| module_name(Path::new(&entry.path)));
    let module = runtime
        .environment()
        .parse_named_module(&name, &bytes)
        .with_context(|| format!("Failed to parse {}", entry.path))?;

    runtime
        .load_module(module)
        .with_context(|| format!("Failed to load {}", entry.path))?;

    info!(path = %entry.path, name = %name, "Module loaded");
    Ok(())
}

fn module_name(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "main".to_string(), |stem| stem.to_string_lossy().into_owned())
}

/// Run the call on a blocking thread, interrupting it if `timeout` elapses.
async fn invoke_function(
    runtime: Runtime,
    environment: &Environment,
    invoke: InvokeEntry,
    timeout: Option<Duration>,
) -> anyhow::Result<Result<Vec<Value>, RuntimeError>> {
    let shared = Arc::new(Mutex::new(runtime));
    let worker = Arc::clone(&shared);

    let timer = timeout.map(|timeout| {
        let handle = environment.interrupt_handle();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!(timeout_ms = timeout.as_millis(), "Interrupting call");
            handle.interrupt();
        })
    });

    let call = tokio::task::spawn_blocking(move || {
        let mut runtime = worker.lock();
        let function = runtime.find_function(&invoke.function)?;
        let args: Vec<&str> = invoke.args.iter().map(String::as_str).collect();

        info!(function = %invoke.function, signature = %function.signature(), "Invoking");
        function.call_with_args(&mut runtime, &args)
    });

    let outcome = call.await;
    if let Some(timer) = timer {
        timer.abort();
    }

    let runtime = shared.lock();
    debug!(
        guest_logs = runtime.logs().len(),
        remaining_fuel = ?runtime.remaining_fuel(),
        "Call finished"
    );

    match outcome {
        Ok(result) => Ok(result),
        Err(join_error) => bail!("Call thread failed: {join_error}"),
    }
}
