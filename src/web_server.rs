use actix_web::{App, HttpServer, dev::Server, middleware, web};
use parking_lot::Mutex;

use crate::config::ListenerConfig;
use crate::model::ProblemTree;
use crate::routes::{json_error_handler, post_problem_handler};

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_BIND_PORT: u16 = 10043;

/// Companion payloads carry every test inline, so allow large bodies
const PAYLOAD_LIMIT: usize = 64 * 1024 * 1024;

/// Registers the problem listener routes on an app
pub fn configure(tree: web::Data<Mutex<ProblemTree>>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(tree)
            .app_data(
                web::JsonConfig::default()
                    .limit(PAYLOAD_LIMIT)
                    .error_handler(json_error_handler),
            )
            .service(post_problem_handler);
    }
}

pub fn build_server(
    listener: &ListenerConfig,
    tree: web::Data<Mutex<ProblemTree>>,
) -> std::io::Result<Server> {
    let address = listener
        .bind_address
        .clone()
        .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
    let port = listener.bind_port.unwrap_or(DEFAULT_BIND_PORT);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .configure(configure(tree.clone()))
    })
    .workers(1)
    .bind((address.as_str(), port))?
    .run();

    log::info!("Listening for problems on {address}:{port}");
    Ok(server)
}
