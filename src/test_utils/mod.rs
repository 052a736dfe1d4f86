mod logging_env;

mod mock_server;
pub(crate) use mock_server::MockAlpaca;

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A local port that nothing listens on.
pub(crate) async fn unused_port() -> eyre::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

/// A server that accepts connections but never answers, to provoke timeouts.
pub(crate) async fn silent_server() -> eyre::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        let mut connections = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            // Keep the socket open so the client waits for a response.
            connections.push(stream);
        }
    });
    Ok((addr, task))
}
