use std::convert::Infallible;

use http::{Request, Response};
use http_body_util::BodyExt;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use filament_http::handler::make_handler;
use filament_http::protocol::{ReqBody, ResponseBody};
use filament_http::server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = ServerConfig { host: "127.0.0.1".into(), port: 8080, ..Default::default() };
    let handle = Server::new(config, make_handler(hello_world)).listen().await?;
    info!("listening on {}", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.close().await;
    Ok(())
}

async fn hello_world(
    request: Request<ReqBody>,
) -> Result<Response<ResponseBody>, Box<dyn std::error::Error + Send + Sync>> {
    let path = request.uri().path().to_string();

    let body_bytes = request.into_body().collect().await?.to_bytes();
    info!(path, body_len = body_bytes.len(), "handling request");

    Ok(Response::new(ResponseBody::full("Hello World!\r\n")))
}
