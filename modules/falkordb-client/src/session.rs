use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{FalkorError, Result};
use crate::graph::Graph;
use crate::resp::{RespCodec, RespValue};
use crate::schema::SchemaCache;
use crate::value::Value;

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// One RESP connection. Requests are strictly request/reply.
struct Connection {
    framed: Framed<Box<dyn AsyncStream>, RespCodec>,
    /// Set while a command is written but its reply not yet read. Still set on
    /// entry means a previous caller abandoned the exchange midway.
    in_flight: bool,
}

impl Connection {
    fn new(stream: Box<dyn AsyncStream>, max_frame_size: usize) -> Self {
        Self {
            framed: Framed::new(stream, RespCodec::with_max_frame_size(max_frame_size)),
            in_flight: false,
        }
    }

    async fn open(config: &ConnectionConfig) -> Result<Self> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|e| FalkorError::Connection(format!("failed to connect to {}: {e}", config.address())))?;
        tcp.set_nodelay(true)?;

        let stream: Box<dyn AsyncStream> = if config.tls {
            Box::new(tls_handshake(tcp, &config.host).await?)
        } else {
            Box::new(tcp)
        };

        let mut conn = Self::new(stream, config.max_frame_size);
        if let Some(password) = &config.password {
            conn.authenticate(config.username.as_deref(), password).await?;
        }
        Ok(conn)
    }

    async fn authenticate(&mut self, username: Option<&str>, password: &str) -> Result<()> {
        let command = match username {
            Some(user) => RespValue::command(["AUTH", user, password]),
            None => RespValue::command(["AUTH", password]),
        };
        match self.request(command).await {
            Ok(RespValue::Error(message)) => Err(FalkorError::Connection(format!("authentication failed: {message}"))),
            Ok(_) => Ok(()),
            Err(e) => Err(FalkorError::Connection(format!("authentication failed: {e}"))),
        }
    }

    async fn request(&mut self, command: RespValue) -> Result<RespValue> {
        if self.in_flight {
            return Err(FalkorError::Protocol(
                "connection out of sync: a previous request was abandoned before its reply arrived".to_string(),
            ));
        }
        self.in_flight = true;
        self.framed.send(command).await?;
        let reply = match self.framed.next().await {
            Some(reply) => reply?,
            None => {
                return Err(FalkorError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )))
            }
        };
        self.in_flight = false;
        Ok(reply)
    }
}

async fn tls_handshake(tcp: TcpStream, host: &str) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let native = rustls_native_certs::load_native_certs()
        .map_err(|e| FalkorError::Connection(format!("failed to load system root certificates: {e}")))?;
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native);
    debug!(added, ignored, "Loaded system root certificates");

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| FalkorError::Connection(format!("TLS setup failed: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| FalkorError::Connection(format!("invalid TLS server name {host:?}: {e}")))?;

    TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| FalkorError::Connection(format!("TLS handshake with {host} failed: {e}")))
}

struct SessionInner {
    config: ConnectionConfig,
    conn: Mutex<Option<Connection>>,
    /// Mirrors `conn.is_none()` so status checks never wait behind a request.
    closed: AtomicBool,
    schema: SchemaCache,
}

/// A connection to one FalkorDB server.
///
/// Clones share the connection and the schema cache. Concurrent callers are
/// served one at a time in arrival order.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Connect, negotiate TLS if configured and authenticate.
    pub async fn open(config: ConnectionConfig) -> Result<Self> {
        let conn = tokio::time::timeout(config.connect_timeout, Connection::open(&config))
            .await
            .map_err(|_| {
                FalkorError::Connection(format!(
                    "timed out connecting to {} after {:?}",
                    config.address(),
                    config.connect_timeout
                ))
            })??;

        info!(address = %config.address(), tls = config.tls, "Connected to FalkorDB");

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                conn: Mutex::new(Some(conn)),
                closed: AtomicBool::new(false),
                schema: SchemaCache::new(),
            }),
        })
    }

    /// Shorthand for [`ConnectionConfig::from_url`] followed by [`Session::open`].
    pub async fn connect(url: &str) -> Result<Self> {
        Self::open(ConnectionConfig::from_url(url)?).await
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub(crate) fn schema(&self) -> &SchemaCache {
        &self.inner.schema
    }

    pub fn select_graph(&self, name: impl Into<String>) -> Graph {
        Graph::new(name, self.clone())
    }

    /// Close the connection. Calling it again is a no-op.
    pub async fn close(&self) {
        let mut guard = self.inner.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            self.inner.closed.store(true, Ordering::Release);
            if let Err(e) = conn.framed.close().await {
                debug!(error = %e, "Error while closing connection");
            }
            info!(address = %self.inner.config.address(), "FalkorDB session closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Send one command and wait for its reply.
    ///
    /// RESP error replies are returned as [`RespValue::Error`]; only transport
    /// and framing failures are `Err`, and those close the session.
    pub async fn execute(&self, command: RespValue) -> Result<RespValue> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| FalkorError::State("session is closed".to_string()))?;

        let name = command_name(&command);
        let started = Instant::now();
        let result = conn.request(command).await;

        match &result {
            Ok(_) => debug!(command = %name, elapsed_ms = started.elapsed().as_millis() as u64, "Command completed"),
            Err(e) if e.is_fatal_to_connection() => {
                warn!(command = %name, error = %e, "Closing connection after unrecoverable error");
                *guard = None;
                self.inner.closed.store(true, Ordering::Release);
            }
            Err(_) => {}
        }
        result
    }

    pub async fn ping(&self) -> Result<()> {
        match expect_reply(self.execute(RespValue::command(["PING"])).await?)? {
            RespValue::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(FalkorError::Protocol(format!("unexpected PING reply: {other:?}"))),
        }
    }

    /// Names of all graphs on the server.
    pub async fn list_graphs(&self) -> Result<Vec<String>> {
        let reply = expect_reply(self.execute(RespValue::command(["GRAPH.LIST"])).await?)?;
        text_list(&reply)
    }

    /// `GRAPH.CONFIG GET`; `name` may be `*` for every setting.
    pub async fn config_get(&self, name: &str) -> Result<BTreeMap<String, Value>> {
        let reply = expect_reply(self.execute(RespValue::command(["GRAPH.CONFIG", "GET", name])).await?)?;
        let items = reply
            .as_array()
            .ok_or_else(|| FalkorError::Protocol(format!("unexpected GRAPH.CONFIG reply: {reply:?}")))?;

        // a single setting comes back flat, `*` as a list of pairs
        let pairs: Vec<&RespValue> = match items.first() {
            Some(first) if first.as_array().is_none() => vec![&reply],
            _ => items.iter().collect(),
        };
        pairs.into_iter().map(config_pair).collect()
    }

    pub async fn config_set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = match value.into() {
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s,
            other => {
                return Err(FalkorError::Param {
                    name: name.to_string(),
                    reason: format!("{} is not a valid configuration value", other.kind()),
                })
            }
        };
        expect_reply(
            self.execute(RespValue::command(["GRAPH.CONFIG", "SET", name, value.as_str()]))
                .await?,
        )?;
        Ok(())
    }
}

/// Turn a RESP error reply into a query error.
pub(crate) fn expect_reply(reply: RespValue) -> Result<RespValue> {
    match reply {
        RespValue::Error(message) => Err(FalkorError::Query { message }),
        other => Ok(other),
    }
}

pub(crate) fn text_list(reply: &RespValue) -> Result<Vec<String>> {
    reply
        .as_array()
        .ok_or_else(|| FalkorError::Protocol(format!("expected an array of strings, got {}", reply.kind())))?
        .iter()
        .map(|item| {
            item.as_text()
                .map(str::to_string)
                .ok_or_else(|| FalkorError::Protocol(format!("expected a string, got {}", item.kind())))
        })
        .collect()
}

fn config_pair(pair: &RespValue) -> Result<(String, Value)> {
    match pair.as_array() {
        Some([name, value]) => {
            let name = name
                .as_text()
                .ok_or_else(|| FalkorError::Protocol("configuration name is not a string".to_string()))?;
            let value = match value {
                RespValue::Integer(i) => Value::Int(*i),
                RespValue::Null => Value::Null,
                other => match other.as_text() {
                    Some(text) => Value::String(text.to_string()),
                    None => return Err(FalkorError::Protocol(format!("unexpected value for {name}: {other:?}"))),
                },
            };
            Ok((name.to_string(), value))
        }
        _ => Err(FalkorError::Protocol(format!("malformed configuration entry: {pair:?}"))),
    }
}

fn command_name(command: &RespValue) -> String {
    command
        .as_array()
        .and_then(|args| args.first())
        .and_then(RespValue::as_text)
        .unwrap_or("?")
        .to_string()
}
