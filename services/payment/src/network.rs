use std::io::Error as IoError;
use std::result::Result;

use actix_http::Request;
use actix_service::IntoServiceFactory;
use actix_web::body::MessageBody;
use actix_web::dev::{AppConfig, Response, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::error::Error as WebError;
use actix_web::{web, App, HttpResponse, HttpServer};

use school_common::config::{WebApiListenCfg, WebApiRouteCfg};

use crate::api::web::AppRouteTable;
use crate::AppSharedState;

async fn unknown_route() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({"reason": "route-not-found"}))
}

/// Builds the application for one server worker. Routes are attached under
/// the versioned scope (e.g. `/v0.1.0`) in the order of the config file,
/// a configured handler name missing from the route table is skipped. The
/// second element of the returned tuple is the number of routes attached.
//
// `App` cannot be named as a concrete type outside actix-web, hence the
// `impl ServiceFactory` in the return position
pub fn app_web_service(
    mut route_table: AppRouteTable,
    cfg: &[WebApiRouteCfg],
    shr_state: AppSharedState,
) -> (
    App<
        impl ServiceFactory<
            ServiceRequest,
            Response = ServiceResponse<impl MessageBody>,
            Error = WebError,
            Config = (),
            InitError = (),
        >,
    >,
    usize,
) {
    let mut scope = web::scope(format!("/{}", route_table.version).as_str());
    let mut num_applied = 0usize;
    for item in cfg {
        if let Some(route) = route_table.entries.remove(item.handler.as_str()) {
            scope = scope.route(item.path.as_str(), route);
            num_applied += 1;
        }
    }
    let app = App::new()
        .app_data(web::Data::new(shr_state))
        .service(scope)
        .default_service(web::to(unknown_route));
    (app, num_applied)
}

/// binds the listening socket, worker count comes from the config file
pub fn net_server_listener<F, I, S, B>(
    app_init_cb: F,
    listen: &WebApiListenCfg,
    num_workers: u8,
) -> Result<HttpServer<F, I, S, B>, IoError>
where
    F: Fn() -> I + Clone + Send + 'static,
    I: IntoServiceFactory<S, Request>,
    S: ServiceFactory<Request, Config = AppConfig> + 'static,
    S::Error: Into<WebError>,
    S::InitError: std::fmt::Debug,
    S::Response: Into<Response<B>>,
    B: MessageBody + 'static,
{
    let srv = HttpServer::new(app_init_cb)
        .workers(usize::from(num_workers.max(1)))
        .max_connections(listen.max_connections as usize);
    srv.bind((listen.host.as_str(), listen.port))
}
