use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tunping::init_logger;
use tunping_cli::{run, Cli, Report};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    let cli = Cli::parse();

    // Ctrl-C stops sampling; whatever was collected is still reported
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping measurement");
            let _ = shutdown_tx.send(());
        }
    });

    #[cfg(feature = "ui")]
    let measurement = {
        use tunping::ui;

        let ui_config = ui::UiConfig::default();
        ui::init_ui(&ui_config);
        if ui_config.show_progress {
            ui::print_banner(VERSION);
            let times = cli.probe_config()?.times;
            let observer = ui::ProgressObserver::new(times);
            let measurement = run(&cli, Some(&observer), Some(shutdown_rx)).await?;
            observer.finish();
            ui::print_summary(&measurement);
            measurement
        } else {
            run(&cli, None, Some(shutdown_rx)).await?
        }
    };

    #[cfg(not(feature = "ui"))]
    let measurement = run(&cli, None, Some(shutdown_rx)).await?;

    info!("tunping {} done", VERSION);
    println!("{}", Report::from(&measurement).render(cli.json)?);
    Ok(())
}
