use std::io::{Error as IoError, ErrorKind};
use std::result::Result;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::client::conn::http1::{handshake, SendRequest};
use hyper::header::{HeaderValue, ACCEPT, AUTHORIZATION, HOST};
use hyper::{Error as HyperError, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::{native_tls, TlsConnector};

use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use super::{gateway_failure, AppProcessorErrorReason};

// both gateways answer verification reads well below this
const REQUEST_TIMEOUT_SECS: u64 = 20;

#[derive(Debug)]
pub enum GatewayNetError {
    Connect(ErrorKind, String),
    Tls(String),
    Protocol {
        closed: bool,
        incomplete: bool,
        detail: String,
    },
    Timeout(u64),
    BuildRequest(String),
    Decode { status: u16, detail: String },
}

impl From<IoError> for GatewayNetError {
    fn from(value: IoError) -> Self {
        Self::Connect(value.kind(), value.to_string())
    }
}
impl From<HyperError> for GatewayNetError {
    fn from(value: HyperError) -> Self {
        Self::Protocol {
            closed: value.is_closed() || value.is_canceled(),
            incomplete: value.is_incomplete_message() || value.is_body_write_aborted(),
            detail: value.to_string(),
        }
    }
}
impl From<native_tls::Error> for GatewayNetError {
    fn from(value: native_tls::Error) -> Self {
        Self::Tls(value.to_string())
    }
}

/// response of a gateway read, non-success status is not an error at this
/// level since some callers recover from it (e.g. stale session id)
pub(super) enum GatewayReply<D> {
    Found(D),
    Rejected(StatusCode, Vec<u8>),
}

impl<D> GatewayReply<D> {
    pub(super) fn into_found(self) -> Result<D, AppProcessorErrorReason> {
        match self {
            Self::Found(v) => Ok(v),
            Self::Rejected(status, raw) => Err(gateway_failure(status, raw)),
        }
    }
}

/// Where and how to reach one gateway. Verification calls are rare compared
/// to webhook traffic, each call opens its own TLS connection.
pub(super) struct GatewayEndpoint {
    host: String,
    port: u16,
    path_prefix: &'static str,
    bearer: HeaderValue,
    connector: TlsConnector,
}

impl GatewayEndpoint {
    pub(super) fn try_build(
        host: &str,
        port: u16,
        path_prefix: &'static str,
        api_key: &str,
    ) -> Result<Self, GatewayNetError> {
        let bearer = HeaderValue::from_str(format!("Bearer {api_key}").as_str())
            .map_err(|_e| GatewayNetError::BuildRequest("api-key-not-header-safe".to_string()))?;
        let connector = {
            let mut builder = native_tls::TlsConnector::builder();
            builder.min_protocol_version(Some(native_tls::Protocol::Tlsv12));
            TlsConnector::from(builder.build()?)
        };
        Ok(Self {
            host: host.to_string(),
            port,
            path_prefix,
            bearer,
            connector,
        })
    }

    pub(super) async fn connect(
        &self,
        logctx: Arc<AppLogContext>,
    ) -> Result<GatewayConnection<'_>, GatewayNetError> {
        let (host, port) = (self.host.as_str(), self.port);
        let logctx_p = &logctx;
        let tcp = TcpStream::connect((host, port)).await.map_err(|e| {
            app_log_event!(logctx_p, AppLogLevel::ERROR, "tcp-conn, {host}:{port}, {:?}", e);
            GatewayNetError::from(e)
        })?;
        let tls = self.connector.connect(host, tcp).await?;
        let (sender, conn) = handshake::<_, Empty<Bytes>>(TokioIo::new(tls)).await?;
        let logctx_cpy = logctx.clone();
        let label = format!("{host}:{port}");
        let _handle = tokio::spawn(async move {
            if let Err(e) = conn.await {
                let logctx_p = &logctx_cpy;
                app_log_event!(logctx_p, AppLogLevel::WARNING, "conn-closed, {label}, {:?}", e);
            }
        });
        Ok(GatewayConnection {
            endpoint: self,
            sender,
            logctx,
        })
    }
} // end of impl GatewayEndpoint

pub(super) struct GatewayConnection<'a> {
    endpoint: &'a GatewayEndpoint,
    sender: SendRequest<Empty<Bytes>>,
    logctx: Arc<AppLogContext>,
}

impl GatewayConnection<'_> {
    /// `resource` is relative to the API prefix of the gateway and may carry
    /// a query string
    pub(super) async fn get_json<D: DeserializeOwned>(
        &mut self,
        resource: &str,
    ) -> Result<GatewayReply<D>, GatewayNetError> {
        let uri = format!("/{}{resource}", self.endpoint.path_prefix);
        let mut req = Request::builder()
            .method(Method::GET)
            .uri(uri.as_str())
            .body(Empty::<Bytes>::new())
            .map_err(|e| GatewayNetError::BuildRequest(e.to_string()))?;
        {
            let hdrs = req.headers_mut();
            let _ = hdrs.insert(AUTHORIZATION, self.endpoint.bearer.clone());
            let _ = hdrs.insert(ACCEPT, HeaderValue::from_static("application/json"));
            // gateways sit behind CDN which routes by host header
            if let Ok(v) = HeaderValue::from_str(self.endpoint.host.as_str()) {
                let _ = hdrs.insert(HOST, v);
            }
        }
        let limit = Duration::from_secs(REQUEST_TIMEOUT_SECS);
        let (status, raw) = timeout(limit, self.roundtrip(req))
            .await
            .map_err(|_elapsed| GatewayNetError::Timeout(REQUEST_TIMEOUT_SECS))??;

        let logctx_p = &self.logctx;
        if status.is_success() {
            serde_json::from_slice::<D>(raw.as_slice())
                .map(GatewayReply::Found)
                .map_err(|e| GatewayNetError::Decode {
                    status: status.as_u16(),
                    detail: e.to_string(),
                })
        } else {
            let host = self.endpoint.host.as_str();
            if status.is_server_error() {
                app_log_event!(logctx_p, AppLogLevel::WARNING, "host:{host}, uri:{uri}, status:{status}");
            } else {
                app_log_event!(logctx_p, AppLogLevel::INFO, "host:{host}, uri:{uri}, status:{status}");
            }
            Ok(GatewayReply::Rejected(status, raw))
        }
    } // end of fn get_json

    async fn roundtrip(
        &mut self,
        req: Request<Empty<Bytes>>,
    ) -> Result<(StatusCode, Vec<u8>), GatewayNetError> {
        let resp = self.sender.send_request(req).await?;
        let status = resp.status();
        let collected = resp.into_body().collect().await?;
        Ok((status, collected.to_bytes().to_vec()))
    }
} // end of impl GatewayConnection
