use clap::Parser;
use lanchat_daemon::{config::Settings, event::ChatEvent, service::ChatDaemon, Result};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "lanchat-daemon")]
#[command(about = "Peer-to-peer LAN chat daemon")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("lanchat_daemon={}", log_level))
        .init();

    info!("Starting lanchat daemon v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load(cli.config.as_deref())?;
    info!("Handle: {}", settings.user.handle);
    info!(
        "Discovery port {}, whois port {}, transfer port {}",
        settings.network.discovery_port,
        settings.network.whois_port,
        settings.network.transfer_port
    );

    let mut daemon = ChatDaemon::new(settings).await?;
    let mut events = daemon
        .take_events()
        .expect("events taken before any other consumer");
    daemon.start();

    // Announce ourselves and ask everyone already present to re-announce.
    daemon.discovery().send_join().await?;
    daemon.discovery().send_who().await?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ChatEvent::PeerJoined(name) => println!("* {} joined", name),
                ChatEvent::PeerLeft(name) => println!("* {} left", name),
                ChatEvent::MessageReceived { sender, text } => {
                    println!("[{}] {}", sender, text)
                }
                ChatEvent::ImageReceived { sender, path } => {
                    println!("[{}] image saved to {}", sender, path.display())
                }
                ChatEvent::TransferFailed { sender, reason } => {
                    println!("[{}] image transfer failed: {}", sender, reason)
                }
            }
        }
    });

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received");

    if let Err(e) = daemon.discovery().send_leave().await {
        error!("Failed to send LEAVE: {}", e);
    }
    daemon.shutdown();
    printer.abort();

    info!("Lanchat daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
