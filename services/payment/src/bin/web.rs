use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use actix_web::rt;

use school_common::confidentiality;
use school_common::config::{AppCfgInitArgs, AppConfig};
use school_common::constant::env_vars::EXPECTED_LABELS;
use school_common::logging::{app_log_event, AppLogLevel};

use tuition_payment::api::web::AppRouteTable;
use tuition_payment::network::{app_web_service, net_server_listener};
use tuition_payment::{hard_limit, AppSharedState};

// logging is not ready before the shared state is built, startup errors
// go to standard output
fn bootstrap() -> Result<AppSharedState, String> {
    let env_var_map: HashMap<String, String> = env::vars()
        .filter(|(k, _v)| EXPECTED_LABELS.contains(&k.as_str()))
        .collect();
    let args = AppCfgInitArgs {
        env_var_map,
        limit: hard_limit::cfg_limit(),
    };
    let cfg = AppConfig::new(args).map_err(|e| format!("config, {e}"))?;
    let cfdntl =
        confidentiality::build_context(&cfg).map_err(|e| format!("confidentiality, {e}"))?;
    AppSharedState::new(cfg, cfdntl).map_err(|e| format!("shared-state, {:?}", e))
}

fn serve(shr_state: AppSharedState) -> ExitCode {
    let cfg = shr_state.config();
    let logctx = shr_state.log_context();
    let logctx_p = &logctx;
    let listener = &cfg.api_server.listen;

    // the factory runs once per worker thread, it has to be `Fn` so
    // everything it captures is cloned per call
    let shr_state_cpy = shr_state.clone();
    let app_init = move || {
        let cfg = shr_state_cpy.config();
        let listen = &cfg.api_server.listen;
        let route_table = AppRouteTable::get(listen.api_version.as_str());
        let (app, num_applied) =
            app_web_service(route_table, listen.routes.as_slice(), shr_state_cpy.clone());
        if num_applied != listen.routes.len() {
            let logctx = shr_state_cpy.log_context();
            app_log_event!(
                logctx,
                AppLogLevel::WARNING,
                "routes-applied:{num_applied}, configured:{}",
                listen.routes.len()
            );
        }
        app
    };
    let srv = match net_server_listener(app_init, listener, cfg.api_server.num_workers) {
        Ok(v) => v,
        Err(e) => {
            app_log_event!(logctx_p, AppLogLevel::ERROR, "bind-failure, {:?}", e);
            return ExitCode::FAILURE;
        }
    };
    app_log_event!(
        logctx_p,
        AppLogLevel::INFO,
        "listening, {}:{}, api:{}",
        listener.host,
        listener.port,
        listener.api_version
    );
    let result = rt::System::new().block_on(async move { srv.run().await });
    app_log_event!(logctx_p, AppLogLevel::WARNING, "server-terminated, {:?}", result);
    if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    match bootstrap() {
        Ok(shr_state) => serve(shr_state),
        Err(detail) => {
            println!("tuition-payment failed to start, {detail}");
            ExitCode::FAILURE
        }
    }
}
