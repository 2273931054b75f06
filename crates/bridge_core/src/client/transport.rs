//! Transport layer between the client and the remote control interface.

use super::protocol::{ControlRequest, ControlResponse, MAX_FRAME_LEN};
use crate::config::RemoteConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

/// Sends one request frame and returns the matching response frame.
///
/// Implementations must not retry or time out on their own; the client
/// layers both on top.
#[async_trait]
pub trait ControlTransport: Send + Sync + fmt::Debug {
    async fn call(&self, request: &ControlRequest) -> Result<ControlResponse, TransportError>;
}

/// An authenticated connection.
struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Session {
    async fn exchange(&mut self, request: &ControlRequest) -> Result<ControlResponse, TransportError> {
        let line = request.to_line()?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let response = self.read_frame().await?;
        if response.correlation != request.correlation {
            return Err(TransportError::Protocol(format!(
                "response correlation {:?} does not match request {:?}",
                response.correlation, request.correlation
            )));
        }
        Ok(response)
    }

    async fn read_frame(&mut self) -> Result<ControlResponse, TransportError> {
        let mut line = String::new();
        let read = (&mut self.reader)
            .take(MAX_FRAME_LEN as u64 + 1)
            .read_line(&mut line)
            .await?;

        if read == 0 {
            return Err(TransportError::Io("connection closed by remote".to_string()));
        }
        if !line.ends_with('\n') {
            return Err(if line.len() > MAX_FRAME_LEN {
                TransportError::Protocol(format!("response frame exceeds {MAX_FRAME_LEN} bytes"))
            } else {
                TransportError::Io("connection closed mid-frame".to_string())
            });
        }
        Ok(ControlResponse::from_line(&line)?)
    }
}

/// TCP transport with a bounded pool of authenticated sessions.
///
/// At most `pool_size` requests are on the wire at once. A session is put
/// back into the pool only after a clean exchange; any error, or the caller
/// abandoning the call, drops it.
pub struct TcpTransport {
    config: RemoteConfig,
    idle: Mutex<Vec<Session>>,
    permits: Semaphore,
}

impl TcpTransport {
    pub fn new(config: RemoteConfig) -> Self {
        let permits = Semaphore::new(config.pool_size.max(1));
        Self {
            config,
            idle: Mutex::new(Vec::new()),
            permits,
        }
    }

    /// Number of idle sessions currently pooled.
    pub async fn idle_sessions(&self) -> usize {
        self.idle.lock().await.len()
    }

    async fn open_session(&self) -> Result<Session, TransportError> {
        let address = self.config.address.clone();
        let token = self.config.auth_token.clone();

        let connect = async {
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            let (read_half, write_half) = stream.into_split();
            let mut session = Session {
                reader: BufReader::new(read_half),
                writer: write_half,
            };

            if let Some(token) = token {
                let response = session.exchange(&ControlRequest::auth(&token)).await?;
                if !response.ok {
                    return Err(TransportError::Authentication(
                        response
                            .reason
                            .unwrap_or_else(|| "token rejected".to_string()),
                    ));
                }
            }
            Ok::<_, TransportError>(session)
        };

        match tokio::time::timeout(self.config.connect_timeout(), connect).await {
            Ok(Ok(session)) => {
                info!("🔌 Opened control session to {}", address);
                Ok(session)
            }
            Ok(Err(e)) => {
                warn!("❌ Could not open control session to {}: {}", address, e);
                Err(e)
            }
            Err(_) => Err(TransportError::Io(format!(
                "connecting to {} timed out after {}ms",
                address, self.config.connect_timeout_ms
            ))),
        }
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("address", &self.config.address)
            .field("pool_size", &self.config.pool_size)
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

#[async_trait]
impl ControlTransport for TcpTransport {
    async fn call(&self, request: &ControlRequest) -> Result<ControlResponse, TransportError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransportError::Io("session pool closed".to_string()))?;

        let pooled = self.idle.lock().await.pop();
        let mut session = match pooled {
            Some(session) => session,
            None => self.open_session().await?,
        };

        match session.exchange(request).await {
            Ok(response) => {
                self.idle.lock().await.push(session);
                Ok(response)
            }
            Err(e) => {
                debug!("Discarding control session after error: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::protocol::Opcode;
    use serde_json::json;
    use tokio::net::TcpListener;

    fn remote(address: String, token: Option<&str>) -> RemoteConfig {
        RemoteConfig {
            address,
            auth_token: token.map(str::to_string),
            connect_timeout_ms: 1000,
            pool_size: 2,
        }
    }

    fn request(correlation: &str) -> ControlRequest {
        ControlRequest {
            op: Opcode::Kick,
            correlation: correlation.to_string(),
            payload: json!({ "ckey": "someone" }),
        }
    }

    /// Accepts connections and answers every frame with `respond`.
    async fn spawn_server<F>(respond: F) -> String
    where
        F: Fn(ControlRequest) -> Option<ControlResponse> + Send + Sync + Clone + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let respond = respond.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut lines = BufReader::new(read_half).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let request: ControlRequest = serde_json::from_str(&line).unwrap();
                        let Some(response) = respond(request) else { continue };
                        let mut out = serde_json::to_string(&response).unwrap();
                        out.push('\n');
                        if write_half.write_all(out.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        address
    }

    #[tokio::test]
    async fn test_authenticated_exchange_reuses_session() {
        let address = spawn_server(|req: ControlRequest| {
            Some(match req.op {
                Opcode::Auth if req.payload["token"] == "secret" => ControlResponse::success("auth", "welcome"),
                Opcode::Auth => ControlResponse::refused("auth", "bad_token", "nope"),
                _ => ControlResponse::success(req.correlation, "kicked"),
            })
        })
        .await;

        let transport = TcpTransport::new(remote(address, Some("secret")));
        let response = transport.call(&request("one")).await.unwrap();
        assert!(response.ok);
        assert_eq!(response.detail.as_deref(), Some("kicked"));
        assert_eq!(transport.idle_sessions().await, 1);

        transport.call(&request("two")).await.unwrap();
        assert_eq!(transport.idle_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_bad_token_is_an_authentication_error() {
        let address = spawn_server(|req: ControlRequest| {
            Some(match req.op {
                Opcode::Auth => ControlResponse::refused("auth", "bad_token", "token expired"),
                _ => ControlResponse::success(req.correlation, "should not happen"),
            })
        })
        .await;

        let transport = TcpTransport::new(remote(address, Some("stale")));
        let err = transport.call(&request("one")).await.unwrap_err();
        assert_eq!(err, TransportError::Authentication("token expired".into()));
        assert_eq!(transport.idle_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_mismatched_correlation_discards_session() {
        let address = spawn_server(|_req: ControlRequest| Some(ControlResponse::success("someone-else", "ok"))).await;

        let transport = TcpTransport::new(remote(address, None));
        let err = transport.call(&request("mine")).await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
        assert_eq!(transport.idle_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_closed_port_is_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = TcpTransport::new(remote(address, None));
        let err = transport.call(&request("one")).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionRefused(_)), "got {err:?}");
    }
}
