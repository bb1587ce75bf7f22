use clap::Parser;

use tmuxdeck::app::App;
use tmuxdeck::cli::{Cli, Commands};
use tmuxdeck::{api, config, logging};

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();
    let mut cfg = config::load_config();

    if let Some(Commands::Serve {
        host,
        port,
        pin,
        host_tmux_socket,
        docker_socket,
    }) = cli.command
    {
        if let Some(host) = host {
            cfg.server.host = host;
        }
        if let Some(port) = port {
            cfg.server.port = port;
        }
        if pin.is_some() {
            cfg.server.pin = pin;
        }
        if host_tmux_socket.is_some() {
            cfg.server.host_tmux_socket = host_tmux_socket;
        }
        if docker_socket.is_some() {
            cfg.server.docker_socket = docker_socket;
        }
    }

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let app = App::standalone(cfg);
    let router = api::create_router(app);

    tracing::info!(%addr, "starting tmuxdeck server");
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind server address");
    axum::serve(listener, router).await.expect("server exited unexpectedly");
}
