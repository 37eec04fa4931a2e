//! One pooled connection: socket setup, the HTTP/1.1 exchange, and the
//! task that carries requests assigned by a host manager.
//!
//! A connection serves at most one request at a time (no multiplexing)
//! and reports back to its manager after every exchange. TLS uses a
//! relaxed trust policy: this engine identifies peers by URL and performs
//! no certificate validation.

use bytes::{Buf, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::net::host::Host;
use crate::net::manager::Event;
use crate::net::request::Request;
use crate::net::response::{body_framing, keep_alive, parse_head, BodyFraming, Response, ResponseHead};
use crate::net::types::{NetConfig, NetError};

/// Upper bound on a response head before it is rejected as malformed.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// How many 1xx interim responses are skipped before giving up.
const MAX_INTERIM_RESPONSES: usize = 8;

/// Object-safe alias over plain and TLS-wrapped sockets.
pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub(crate) type NetStream = Box<dyn AsyncStream>;

/// Open a socket to `host`, negotiating TLS for `https` hosts.
pub(crate) async fn open_stream(host: &Host, config: &NetConfig) -> Result<NetStream, NetError> {
    let authority = host.authority();

    let tcp = timeout(
        config.timeout,
        TcpStream::connect((host.hostname.as_str(), host.port)),
    )
    .await
    .map_err(|_| NetError::Timeout(format!("connect to {authority}")))?
    .map_err(|error| NetError::Connect {
        host: authority.clone(),
        reason: error.to_string(),
    })?;
    let _ = tcp.set_nodelay(true);

    if !host.tls {
        trace!(host = %host, "Plain connection established");
        return Ok(Box::new(tcp));
    }

    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|error| NetError::Tls {
            host: authority.clone(),
            reason: error.to_string(),
        })?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    let stream = timeout(config.timeout, connector.connect(&host.hostname, tcp))
        .await
        .map_err(|_| NetError::Timeout(format!("TLS handshake with {authority}")))?
        .map_err(|error| NetError::Tls {
            host: authority,
            reason: error.to_string(),
        })?;

    trace!(host = %host, "TLS connection established");
    Ok(Box::new(stream))
}

/// Spawn the task driving one established connection.
///
/// The returned capacity-1 sender is how the manager assigns a request;
/// dropping it retires the connection.
pub(crate) fn spawn_connection(
    id: u64,
    stream: NetStream,
    host: Host,
    config: NetConfig,
    events: mpsc::UnboundedSender<Event>,
) -> mpsc::Sender<Request> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(run_connection(id, stream, host, config, rx, events));
    tx
}

async fn run_connection(
    id: u64,
    mut stream: NetStream,
    host: Host,
    config: NetConfig,
    mut assignments: mpsc::Receiver<Request>,
    events: mpsc::UnboundedSender<Event>,
) {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut served = 0u64;

    while let Some(request) = assignments.recv().await {
        let head = build_request_head(&host, &request.path, &config.user_agent, &request.headers);

        match exchange(&mut stream, &mut buffer, head.as_bytes(), &config).await {
            Ok((response, reusable)) => {
                served += 1;
                trace!(
                    conn = id,
                    host = %host,
                    status = response.status,
                    bytes = response.body.len(),
                    reusable,
                    "Exchange complete"
                );
                request.complete(response);
                let _ = events.send(Event::Finished {
                    conn_id: id,
                    reusable,
                });
                if !reusable {
                    return;
                }
            }
            Err(failure) => {
                // A previously used keep-alive connection that dies before
                // any response byte lost the race against the server
                // closing it; the request is still sendable elsewhere.
                let lost_race = served > 0 && failure.before_response && failure.disconnect;
                debug!(
                    conn = id,
                    host = %host,
                    error = %failure.error,
                    lost_race,
                    "Exchange failed"
                );
                if lost_race {
                    let _ = events.send(Event::Closed {
                        conn_id: id,
                        requeue: Some(request),
                    });
                } else {
                    request.fail(failure.error);
                    let _ = events.send(Event::Closed {
                        conn_id: id,
                        requeue: None,
                    });
                }
                return;
            }
        }
    }
}

/// Failure of one request/response exchange, annotated with enough
/// context for the lost-race requeue decision.
struct ExchangeFailure {
    error: NetError,
    /// No byte of the response had arrived yet
    before_response: bool,
    /// The failure was the peer closing the connection
    disconnect: bool,
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::WriteZero
            | ErrorKind::NotConnected
    )
}

fn build_request_head(
    host: &Host,
    path: &str,
    user_agent: &str,
    extra: &[(String, String)],
) -> String {
    use std::fmt::Write;

    let mut head = String::with_capacity(256);
    let _ = write!(head, "GET {path} HTTP/1.1\r\n");
    let _ = write!(head, "Host: {}\r\n", host.authority());
    let _ = write!(head, "User-Agent: {user_agent}\r\n");
    head.push_str("Accept: */*\r\n");
    head.push_str("Connection: keep-alive\r\n");
    for (name, value) in extra {
        let _ = write!(head, "{name}: {value}\r\n");
    }
    head.push_str("\r\n");
    head
}

/// Write one request and read its complete response.
///
/// On success returns the response and whether the connection may carry
/// another request afterwards.
async fn exchange(
    stream: &mut NetStream,
    buffer: &mut BytesMut,
    request_head: &[u8],
    config: &NetConfig,
) -> Result<(Response, bool), ExchangeFailure> {
    match timeout(config.timeout, stream.write_all(request_head)).await {
        Err(_) => {
            return Err(ExchangeFailure {
                error: NetError::Timeout("request write".to_string()),
                before_response: true,
                disconnect: false,
            })
        }
        Ok(Err(error)) => {
            return Err(ExchangeFailure {
                error: NetError::Write(error.to_string()),
                before_response: true,
                disconnect: is_disconnect(error.kind()),
            })
        }
        Ok(Ok(())) => {}
    }

    let mut received_any = !buffer.is_empty();
    let mut interim = 0usize;
    let head = loop {
        let head = read_head(stream, buffer, config, &mut received_any).await?;
        if (100..=199).contains(&head.status) {
            interim += 1;
            if interim > MAX_INTERIM_RESPONSES {
                return Err(mid_response(NetError::Protocol(
                    "too many interim responses".to_string(),
                )));
            }
            continue;
        }
        break head;
    };

    let framing = body_framing(head.status, &head.headers).map_err(mid_response)?;
    let body = read_body(stream, buffer, framing, config).await?;

    let reusable = keep_alive(head.http11, &head.headers) && framing != BodyFraming::UntilClose;
    Ok((
        Response {
            status: head.status,
            headers: head.headers,
            body,
        },
        reusable,
    ))
}

/// Wrap an error that occurred after response bytes had been seen.
fn mid_response(error: NetError) -> ExchangeFailure {
    ExchangeFailure {
        error,
        before_response: false,
        disconnect: false,
    }
}

/// Pull more bytes into the buffer. Returns the number read (0 = EOF).
async fn fill(
    stream: &mut NetStream,
    buffer: &mut BytesMut,
    config: &NetConfig,
    received_any: bool,
) -> Result<usize, ExchangeFailure> {
    match timeout(config.timeout, stream.read_buf(buffer)).await {
        Err(_) => Err(ExchangeFailure {
            error: NetError::Timeout("response read".to_string()),
            before_response: !received_any,
            disconnect: false,
        }),
        Ok(Err(error)) => Err(ExchangeFailure {
            error: NetError::Read(error.to_string()),
            before_response: !received_any,
            disconnect: is_disconnect(error.kind()),
        }),
        Ok(Ok(n)) => Ok(n),
    }
}

async fn read_head(
    stream: &mut NetStream,
    buffer: &mut BytesMut,
    config: &NetConfig,
    received_any: &mut bool,
) -> Result<ResponseHead, ExchangeFailure> {
    loop {
        if let Some(end) = find_head_end(buffer) {
            let head_bytes = buffer.split_to(end + 4);
            *received_any = true;
            return parse_head(&head_bytes[..end]).map_err(mid_response);
        }
        if buffer.len() > MAX_HEAD_BYTES {
            return Err(mid_response(NetError::Protocol(
                "response head too large".to_string(),
            )));
        }

        let n = fill(stream, buffer, config, *received_any).await?;
        if n == 0 {
            return Err(ExchangeFailure {
                error: NetError::Read("connection closed before response head".to_string()),
                before_response: !*received_any,
                disconnect: true,
            });
        }
        *received_any = true;
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn read_body(
    stream: &mut NetStream,
    buffer: &mut BytesMut,
    framing: BodyFraming,
    config: &NetConfig,
) -> Result<bytes::Bytes, ExchangeFailure> {
    match framing {
        BodyFraming::Length(length) => {
            while buffer.len() < length {
                if fill(stream, buffer, config, true).await? == 0 {
                    return Err(mid_response(NetError::Read(
                        "connection closed mid body".to_string(),
                    )));
                }
            }
            Ok(buffer.split_to(length).freeze())
        }

        BodyFraming::Chunked => {
            let mut body = BytesMut::new();
            loop {
                let size_line = read_line(stream, buffer, config).await?;
                let size_field = size_line.split(';').next().unwrap_or("").trim();
                let size = usize::from_str_radix(size_field, 16).map_err(|_| {
                    mid_response(NetError::Protocol(format!(
                        "bad chunk size \"{size_field}\""
                    )))
                })?;

                if size == 0 {
                    // Trailer section runs to an empty line.
                    loop {
                        if read_line(stream, buffer, config).await?.is_empty() {
                            break;
                        }
                    }
                    return Ok(body.freeze());
                }

                while buffer.len() < size + 2 {
                    if fill(stream, buffer, config, true).await? == 0 {
                        return Err(mid_response(NetError::Read(
                            "connection closed mid chunk".to_string(),
                        )));
                    }
                }
                body.extend_from_slice(&buffer.split_to(size));
                let terminator = buffer.split_to(2);
                if &terminator[..] != b"\r\n" {
                    return Err(mid_response(NetError::Protocol(
                        "missing chunk terminator".to_string(),
                    )));
                }
            }
        }

        BodyFraming::UntilClose => {
            loop {
                match fill(stream, buffer, config, true).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    // A reset after some body bytes still ends the body;
                    // close-delimited peers often skip the clean shutdown.
                    Err(failure) if failure.disconnect => break,
                    Err(failure) => return Err(failure),
                }
            }
            let length = buffer.len();
            Ok(buffer.split_to(length).freeze())
        }
    }
}

async fn read_line(
    stream: &mut NetStream,
    buffer: &mut BytesMut,
    config: &NetConfig,
) -> Result<String, ExchangeFailure> {
    loop {
        if let Some(pos) = buffer.windows(2).position(|window| window == b"\r\n") {
            let line = buffer.split_to(pos + 2);
            let line = &line[..pos];
            return std::str::from_utf8(line)
                .map(str::to_string)
                .map_err(|_| mid_response(NetError::Protocol("non-UTF-8 line".to_string())));
        }
        if buffer.len() > MAX_HEAD_BYTES {
            return Err(mid_response(NetError::Protocol("line too long".to_string())));
        }
        if fill(stream, buffer, config, true).await? == 0 {
            return Err(mid_response(NetError::Read(
                "connection closed mid line".to_string(),
            )));
        }
    }
}
