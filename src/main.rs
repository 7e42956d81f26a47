use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use quay::{
    adapters::{
        ApiHandler, ConfigWriter, IngressListener, NginxFrontend, NginxOptions, Passthrough,
        SledRouteStore,
    },
    config::{
        DEFAULT_CONFIG_TOML, ServerConfig, ServerConfigValidator,
        loader::{load_config, load_config_or_default},
    },
    core::ControlPlane,
    ports::Frontend,
    tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "quay.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "quay.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "quay.toml")]
        config: String,
    },
    /// Start the control plane (default)
    Serve {
        /// Configuration file to use; defaults apply when it does not exist
        #[clap(short, long, default_value = "quay.toml")]
        config: String,

        #[clap(flatten)]
        overrides: ServeOverrides,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ServeOverrides {
    /// Listen address, e.g. ':6660' or '127.0.0.1:6660'
    #[clap(long)]
    listen: Option<String>,

    /// Route database directory
    #[clap(long)]
    data: Option<String>,

    /// Passthrough target: a unix socket path or host:port
    #[clap(long)]
    sock: Option<String>,
}

impl ServeOverrides {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(listen) = self.listen {
            config.listen_addr = normalize_listen_addr(&listen);
        }
        if let Some(data) = self.data {
            config.data_path = data;
        }
        if let Some(sock) = self.sock {
            config.passthrough.socket = sock;
        }
    }
}

/// Accept the `:port` shorthand for all interfaces.
fn normalize_listen_addr(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config, overrides }) => serve(&config, overrides).await,
        None => serve(&args.config, ServeOverrides::default()).await,
    }
}

async fn serve(config_path: &str, overrides: ServeOverrides) -> Result<()> {
    let mut config = load_config_or_default(config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    overrides.apply(&mut config);
    ServerConfigValidator::validate(&config).map_err(|e| eyre!("Invalid configuration: {e}"))?;

    tracing_setup::init_tracing_with_config(&config.logging.level, config.logging.json)?;

    tracing::info!(config = %config_path, "Starting quay");

    let data_path = config.data_path.clone();
    let store = tokio::task::spawn_blocking(move || SledRouteStore::open(data_path))
        .await
        .context("Route store open task panicked")?
        .with_context(|| format!("Failed to open route store at {}", config.data_path))?;
    let store = Arc::new(store);

    let (frontend, nginx): (Arc<dyn Frontend>, Option<Arc<NginxFrontend>>) =
        if config.frontend.manage_process {
            let nginx = NginxFrontend::start(NginxOptions {
                command: config.frontend.command.clone(),
                args: config.frontend.args.clone(),
                config_dir: config.frontend.config_dir.clone().into(),
            })
            .context("Failed to start frontend")?;
            let nginx = Arc::new(nginx);
            (nginx.clone() as Arc<dyn Frontend>, Some(nginx))
        } else {
            tracing::info!(
                config_dir = %config.frontend.config_dir,
                "Frontend process unmanaged, maintaining config directory only"
            );
            let writer = ConfigWriter::new(&config.frontend.config_dir);
            (Arc::new(writer) as Arc<dyn Frontend>, None)
        };

    let control = Arc::new(ControlPlane::new(store, frontend));
    let result = run_control_plane(&config, control.clone()).await;

    // Runs on startup failures too, so a managed nginx never outlives quay.
    if let Some(nginx) = nginx {
        match nginx.stop().await {
            Ok(status) => tracing::info!(%status, "Frontend stopped"),
            Err(e) => tracing::warn!(error = %e, "Failed to stop frontend"),
        }
    }
    if let Err(e) = control.close().await {
        tracing::warn!(error = %e, "Failed to close route store");
    }

    match &result {
        Ok(()) => tracing::info!("Graceful shutdown completed"),
        Err(e) => tracing::error!(error = %e, "quay stopped with an error"),
    }
    result
}

/// Reconcile once, then serve the API and the passthrough tunnel until a
/// shutdown signal arrives.
async fn run_control_plane(config: &ServerConfig, control: Arc<ControlPlane>) -> Result<()> {
    let routes = control
        .reconcile()
        .await
        .context("Initial reconcile failed")?;
    tracing::info!(routes, "Initial reconcile complete");

    let passthrough = Passthrough::new(
        config
            .passthrough
            .socket
            .parse()
            .map_err(|e: String| eyre!(e))?,
    );
    let api = Arc::new(ApiHandler::new(control.clone(), &config.api_prefix));
    let listener =
        IngressListener::bind(&config.listen_addr, api, passthrough, config.api_prefix.clone())
            .await?;

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    {
        let shutdown = graceful_shutdown.clone();
        tokio::spawn(async move { shutdown.run_signal_handler().await });
    }
    spawn_reconcile_on_sighup(control);

    listener.run(graceful_shutdown.shutdown_token()).await
}

/// SIGHUP re-reads the store and rewrites the frontend configuration.
#[cfg(unix)]
fn spawn_reconcile_on_sighup(control: Arc<ControlPlane>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to register SIGHUP handler");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("Received SIGHUP, reconciling");
            match control.reconcile().await {
                Ok(routes) => tracing::info!(routes, "Reconcile complete"),
                Err(e) => tracing::error!(error = %e, "Reconcile failed"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reconcile_on_sighup(_control: Arc<ControlPlane>) {}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Route Store: {}", config.data_path);
            println!("   • API Prefix: {}", config.api_prefix);
            println!("   • Passthrough: {}", config.passthrough.socket);
            println!(
                "   • Frontend: {} ({})",
                config.frontend.config_dir,
                if config.frontend.manage_process {
                    config.frontend.command.as_str()
                } else {
                    "unmanaged"
                }
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Verify listen address format (e.g., '0.0.0.0:6660')");
            println!("   • Use a socket path ('/var/run/docker.sock') or host:port for passthrough");
            println!("   • Make sure api_prefix starts and ends with '/'");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, DEFAULT_CONFIG_TOML)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'quay serve --config {config_path}' to start the control plane");
    Ok(())
}
