use actix_web::body::MessageBody;
use actix_web::dev::{Server, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{App, HttpServer, middleware, web};

use crate::config::ServerConfig;
use crate::routes::{
    health_handler, json_error_handler, ping_handler, run_handler, run_preflight_handler,
};
use crate::runner::Runner;

/// The application with every route and middleware, shared by the server
/// and the tests
pub fn build_app(
    runner: web::Data<Runner>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(runner)
        .app_data(
            // Legacy clients post JSON as text/plain
            web::JsonConfig::default()
                .content_type(|_| true)
                .content_type_required(false)
                .error_handler(json_error_handler),
        )
        .wrap(middleware::Compress::default())
        .wrap(middleware::DefaultHeaders::new().add(("Access-Control-Allow-Origin", "*")))
        .wrap(middleware::Logger::default())
        .service(run_handler)
        .service(run_preflight_handler)
        .service(ping_handler)
        .service(health_handler)
}

pub fn build_server(config: ServerConfig, runner: web::Data<Runner>) -> std::io::Result<Server> {
    let mut server = HttpServer::new(move || build_app(runner.clone()));
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    log::info!(
        "Listening on {}:{}",
        config.bind_address,
        config.bind_port
    );
    let server = server
        .bind((config.bind_address, config.bind_port))?
        .run();

    Ok(server)
}
