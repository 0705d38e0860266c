use clap::Parser;

use playground::config::{CliArgs, Config};
use playground::playground::Playground;
use playground::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        playground: playground_config,
    } = cli.to_config().expect("Failed to load configuration");

    let playground = Playground::from_config(&playground_config);
    log::info!(
        "Using toolchain {}, run limit {:?}",
        playground.compiler().toolchain().display(),
        playground.supervisor().deadline()
    );

    let server = build_server(server_config, playground).expect("Failed to build server");
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
