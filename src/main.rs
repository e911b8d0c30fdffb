mod app;
mod cli;
mod plain;
mod settings;
mod ui;

use anyhow::{Context, Result};
use app::{poll_event, run_speed_test, App, AppAction, TestUpdate};
use beespeed::speedtest::TestPhase;
use beespeed::{discovery, ServerEndpoints, TestConfiguration};
use clap::Parser;
use cli::Cli;
use crossterm::event::Event;
use log::info;
use ratatui::DefaultTerminal;
use settings::Settings;
use std::time::Duration;
use tokio::sync::mpsc;
use ui::draw_ui;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The terminal UI owns the screen, so it only logs when RUST_LOG asks for it.
    let default_level = if cli.plain { "warn" } else { "off" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = cli.config();
    config.validate()?;
    let (server_label, endpoints) = resolve_server(&cli, &config).await?;
    info!(
        "Testing against {} (ping {}, download {}, upload {})",
        server_label,
        endpoints.ping_url(),
        endpoints.download_url(),
        endpoints.upload_url()
    );

    if cli.plain {
        return plain::run(&server_label, endpoints, config).await;
    }

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = run_app(&mut terminal, server_label, endpoints, config).await;

    ratatui::restore();
    result
}

/// Explicit URLs win; otherwise the server is read off the BenchBee home page.
async fn resolve_server(
    cli: &Cli,
    config: &TestConfiguration,
) -> Result<(String, ServerEndpoints)> {
    if let Some(endpoints) = cli.explicit_endpoints()? {
        let label = endpoints
            .ping_url()
            .host_str()
            .unwrap_or("custom server")
            .to_string();
        return Ok((label, endpoints));
    }

    let client = discovery::http_client(config)?;
    let server = discovery::fetch_server_info(&client, &cli.home_url)
        .await
        .with_context(|| format!("could not discover a server from {}", cli.home_url))?;
    Ok((server.server_label(), server.endpoints()?))
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    server_label: String,
    endpoints: ServerEndpoints,
    base_config: TestConfiguration,
) -> Result<()> {
    let mut app = App::new(
        server_label,
        endpoints.isp_label().to_string(),
        Settings::from_config(&base_config),
    );
    let mut test_rx: Option<mpsc::Receiver<TestUpdate>> = None;

    loop {
        terminal.draw(|frame| draw_ui(frame, &app))?;

        if let Some(rx) = test_rx.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(update) => app.apply(update),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        if app.phase != TestPhase::Idle {
                            app.complete_test();
                        }
                        test_rx = None;
                        break;
                    }
                }
            }
        }

        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => {
                        app.reset_for_new_test();
                        app.phase = TestPhase::Ping;

                        let (tx, rx) = mpsc::channel(256);
                        let (cancel_tx, cancel_rx) = mpsc::channel(1);

                        app.set_cancel_tx(cancel_tx);
                        test_rx = Some(rx);

                        let endpoints = endpoints.clone();
                        let config = app.settings.apply(&base_config);
                        tokio::spawn(async move {
                            let _ = run_speed_test(tx, cancel_rx, endpoints, config).await;
                        });
                    }
                    AppAction::CancelTest => {
                        app.cancel_test();
                        test_rx = None;
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
