use std::{path::PathBuf, sync::Arc};

use mqtt_broker::config::MqttConfig;
use mqtt_broker::init::MqttEnv;
use mqtt_broker::net;
use mqtt_broker::router::Router;
use mqtt_broker::session::SessionManager;
use mqtt_broker::storage::Storage;
use tokio::{
    io::{split, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

/// Load config and storage, build the TLS context, then accept connections
/// until a shutdown signal, letting in-flight handlers run to completion.
#[tokio::main]
async fn main() {
    let config_path = PathBuf::from("config.toml");
    let config = MqttEnv::new(&config_path).init_env().config();

    let storage = match Storage::open(&config.db_path(), &config.fernet_key_path()) {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            log::error!("failed to initialize storage: {err}");
            panic!("storage initialization failed: {err}");
        }
    };

    let sessions = Arc::new(SessionManager::new());
    let router = Arc::new(Router::new(storage, sessions));

    let addr = config.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("could not bind {addr}: {err}");
            panic!("bind failed: {err}");
        }
    };
    log::info!("mqtt-broker listening on {addr}");

    if config.is_tls_enabled() {
        run_tls(listener, &config, router).await;
    } else {
        run_plaintext(listener, router).await;
    }
}

async fn run_plaintext(listener: TcpListener, router: Arc<Router>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        log::info!("connection from {peer}");
                        let router = router.clone();
                        tokio::spawn(async move { handle_tcp(stream, router).await });
                    }
                    Err(err) => log::warn!("rejected connection: {err}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown signal received, closing listener");
                break;
            }
        }
    }
}

async fn run_tls(listener: TcpListener, config: &MqttConfig, router: Arc<Router>) {
    let acceptor = match net::build_tls_acceptor(
        &config.server_cert(),
        &config.server_key(),
        config.ca_cert().as_deref(),
        config.requires_mutual_tls(),
    ) {
        Ok(acceptor) => acceptor,
        Err(err) => {
            log::error!("failed to build TLS context: {err}");
            panic!("TLS context initialization failed: {err}");
        }
    };

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        log::info!("connection from {peer}");
                        let acceptor = acceptor.clone();
                        let router = router.clone();
                        tokio::spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(tls_stream) => {
                                    let (read_half, write_half) = split(tls_stream);
                                    run_connection(read_half, write_half, router).await;
                                }
                                Err(err) => log::warn!("TLS handshake failed for {peer}: {err}"),
                            }
                        });
                    }
                    Err(err) => log::warn!("rejected connection: {err}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown signal received, closing listener");
                break;
            }
        }
    }
}

async fn handle_tcp(stream: TcpStream, router: Arc<Router>) {
    let (read_half, write_half) = split(stream);
    run_connection(read_half, write_half, router).await;
}

/// Wires one accepted connection: splits it, spawns a writer task draining
/// the outbox channel onto the socket, and hands the reader off to the
/// router's protocol state machine.
async fn run_connection<R, W>(read_half: R, mut write_half: W, router: Arc<Router>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<mqtt_core::Packet>();

    let writer_task = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            if let Err(err) = write_half.write_all(packet.encode().as_bytes()).await {
                log::warn!("write error, closing connection: {err}");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    router.run_connection(BufReader::new(read_half), tx).await;
    writer_task.abort();
}
