use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::playground::Playground;
use crate::routes::{compile_handler, form_error_handler, json_error_handler};

/// Registers the playground routes and their extractor configuration
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .content_type_required(false)
            .error_handler(json_error_handler),
    )
    .app_data(web::FormConfig::default().error_handler(form_error_handler))
    .service(compile_handler);
}

pub fn build_server(server_config: ServerConfig, playground: Playground) -> std::io::Result<Server> {
    let playground = web::Data::new(playground);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(playground.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(8080),
    ))?
    .run();

    Ok(server)
}
