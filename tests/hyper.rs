use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::body::Incoming;
use tokio::io::AsyncReadExt as _;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use uplink::bridge::io::HyperIo;
use uplink::client::Client;
use uplink::transport::hyper::{HyperTransport, HyperTransportConfig};
use uplink::Outcome;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Echoes the request body, and reports what it saw in response headers.
async fn echo(request: http::Request<Incoming>) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let method = request.method().to_string();
    let path = request.uri().to_string();
    let user_agent = request
        .headers()
        .get(http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let tenant = request
        .headers()
        .get("x-tenant")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let body = request
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    let response = http::Response::builder()
        .status(http::StatusCode::ACCEPTED)
        .header("x-method", method)
        .header("x-path", path)
        .header("x-user-agent", user_agent)
        .header("x-tenant", tenant)
        .body(Full::new(body))
        .unwrap();
    Ok(response)
}

async fn serve() -> Result<SocketAddr, BoxError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(HyperIo::new(stream), hyper::service::service_fn(echo))
                    .await;
            });
        }
    });

    Ok(addr)
}

/// Accepts connections and never answers.
async fn black_hole() -> Result<SocketAddr, BoxError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    Ok(addr)
}

/// Reads one connection without answering, reporting when the request
/// arrives and when the client closes the socket.
async fn watcher() -> Result<(SocketAddr, mpsc::UnboundedReceiver<&'static str>), BoxError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 1024];
        let mut received = false;
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => {
                    let _ = tx.send("closed");
                    return;
                }
                Ok(_) if !received => {
                    received = true;
                    let _ = tx.send("received");
                }
                Ok(_) => {}
            }
        }
    });

    Ok((addr, rx))
}

fn client(config: HyperTransportConfig) -> Client<HyperTransport> {
    let _ = tracing_subscriber::fmt::try_init();
    Client::builder()
        .with_hyper(config)
        .with_poll_interval(Duration::from_millis(5))
        .build()
}

#[tokio::test]
async fn post_round_trip() -> Result<(), BoxError> {
    let addr = serve().await?;
    let client = client(HyperTransportConfig::default());

    let request = client
        .create_request()
        .with_method("POST")
        .with_url(format!("http://{addr}/OneCollector/1.0/?qsp=true"))
        .with_header("X-Tenant", "tenant-1")
        .with_body("[{\"name\":\"event\"}]");

    let response = client.send_async(request).await?;
    assert_eq!(response.outcome(), Outcome::Ok);
    assert_eq!(response.status(), 202);
    assert_eq!(response.body().as_ref(), b"[{\"name\":\"event\"}]");

    let headers = response.headers();
    assert_eq!(headers.get("x-method"), Some("POST"));
    assert_eq!(headers.get("x-path"), Some("/OneCollector/1.0/?qsp=true"));
    assert_eq!(headers.get("x-tenant"), Some("tenant-1"));
    assert!(headers
        .get("x-user-agent")
        .is_some_and(|agent| agent.starts_with("uplink/")));
    assert_eq!(client.in_flight(), 0);

    Ok(())
}

#[tokio::test]
async fn request_headers_override_transport_defaults() -> Result<(), BoxError> {
    let addr = serve().await?;
    let client = client(HyperTransportConfig::default());

    let request = client
        .create_request()
        .with_url(format!("http://{addr}/"))
        .with_header("User-Agent", "collector-sdk/2.0");

    let response = client.send_async(request).await?;
    assert_eq!(response.headers().get("x-user-agent"), Some("collector-sdk/2.0"));

    Ok(())
}

#[tokio::test]
async fn refused_connection_is_network_failure() -> Result<(), BoxError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let client = client(HyperTransportConfig::default());
    let request = client.create_request().with_url(format!("http://{addr}/"));

    let response = client.send_async(request).await?;
    assert_eq!(response.outcome(), Outcome::NetworkFailure);
    assert_eq!(response.status(), 0);

    Ok(())
}

#[tokio::test]
async fn slow_server_times_out() -> Result<(), BoxError> {
    let addr = black_hole().await?;

    let mut config = HyperTransportConfig::default();
    config.request_timeout = Some(Duration::from_millis(100));
    let client = client(config);

    let request = client.create_request().with_url(format!("http://{addr}/"));
    let response = client.send_async(request).await?;
    assert_eq!(response.outcome(), Outcome::NetworkFailure);

    Ok(())
}

#[tokio::test]
async fn cancel_in_flight_request() -> Result<(), BoxError> {
    let addr = black_hole().await?;
    let client = client(HyperTransportConfig::default());

    let request = client.create_request().with_url(format!("http://{addr}/"));
    let id = request.id().clone();
    let future = client.send_async(request);

    assert!(client.cancel(&id));
    let response = future.await?;
    assert_eq!(response.outcome(), Outcome::Aborted);
    assert_eq!(client.in_flight(), 0);

    Ok(())
}

#[tokio::test]
async fn setup_failures_are_aborted() -> Result<(), BoxError> {
    let client = client(HyperTransportConfig::default());

    let https = client
        .create_request()
        .with_url("https://collector.test/");
    assert_eq!(client.send_async(https).await?.outcome(), Outcome::Aborted);

    let method = client
        .create_request()
        .with_method("NOT A METHOD")
        .with_url("http://collector.test/");
    assert_eq!(client.send_async(method).await?.outcome(), Outcome::Aborted);

    let header = client
        .create_request()
        .with_url("http://collector.test/")
        .with_header("bad header", "value");
    assert_eq!(client.send_async(header).await?.outcome(), Outcome::Aborted);

    Ok(())
}

#[tokio::test]
async fn cancel_closes_the_connection() -> Result<(), BoxError> {
    let (addr, mut seen) = watcher().await?;
    let client = client(HyperTransportConfig::default());

    let request = client.create_request().with_url(format!("http://{addr}/"));
    let id = request.id().clone();
    let future = client.send_async(request);

    assert_eq!(seen.recv().await, Some("received"));
    assert!(client.cancel(&id));
    assert_eq!(future.await?.outcome(), Outcome::Aborted);

    let closed = tokio::time::timeout(Duration::from_secs(2), seen.recv()).await?;
    assert_eq!(closed, Some("closed"));

    Ok(())
}
