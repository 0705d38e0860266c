pub mod config;
pub mod playground;
pub mod routes;
pub mod web_server;
