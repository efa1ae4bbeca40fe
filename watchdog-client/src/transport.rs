//! Alert delivery from agent to hub.
//!
//! [`RpcTransport`] is fire-and-forget: one attempt per alert over a single
//! long-lived connection opened at startup. There is no retry, no queue and
//! no reconnect. Once the connection breaks every later send fails fast with
//! [`TransportError::NotConnected`].

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use watchdog_common::rpc::{Envelope, RpcCodecError, ACK, ERR};
use watchdog_common::AlertRecord;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected to hub")]
    NotConnected,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] RpcCodecError),
    #[error("hub rejected alert: {0}")]
    Rejected(String),
    #[error("hub closed the connection")]
    Closed,
    #[error("reply answers {got:?}, expected {expected}")]
    ReplyMismatch {
        expected: String,
        got: Option<String>,
    },
}

/// Delivery guarantee offered by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// One attempt; a failure drops the alert.
    AtMostOnce,
}

#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(&self, alert: &AlertRecord) -> Result<(), TransportError>;

    fn policy(&self) -> DeliveryPolicy;
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct RpcTransport {
    conn: Mutex<Option<Connection>>,
}

impl RpcTransport {
    /// Dial `addr` once. A failed dial is logged and leaves the transport
    /// disconnected; the agent keeps running its checks regardless.
    pub async fn connect(addr: &str) -> Self {
        let conn = match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!("connected to hub at {}", addr);
                let (reader, writer) = stream.into_split();
                Some(Connection {
                    reader: BufReader::new(reader),
                    writer,
                })
            }
            Err(e) => {
                error!("could not connect to hub at {}: {}", addr, e);
                None
            }
        };
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }
}

#[async_trait]
impl AlertTransport for RpcTransport {
    async fn send(&self, alert: &AlertRecord) -> Result<(), TransportError> {
        let request = Envelope::send_alert(alert)?;
        let line = request.to_line()?;

        // Requests on the connection are serialized by this lock.
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(TransportError::NotConnected)?;

        match exchange(conn, &line).await {
            Ok(reply) => {
                let Some(reply) = reply else {
                    *guard = None;
                    return Err(TransportError::Closed);
                };
                let outcome = interpret(&reply, &request.msg_id);
                if matches!(outcome, Err(TransportError::ReplyMismatch { .. })) {
                    // Replies no longer line up with requests.
                    *guard = None;
                }
                outcome
            }
            Err(e) => {
                // Broken for good; later sends fail fast.
                *guard = None;
                Err(e.into())
            }
        }
    }

    fn policy(&self) -> DeliveryPolicy {
        DeliveryPolicy::AtMostOnce
    }
}

async fn exchange(conn: &mut Connection, line: &str) -> std::io::Result<Option<String>> {
    conn.writer.write_all(line.as_bytes()).await?;
    conn.writer.flush().await?;

    let mut reply = String::new();
    if conn.reader.read_line(&mut reply).await? == 0 {
        return Ok(None);
    }
    Ok(Some(reply))
}

/// Map the hub's reply to `request_id` onto a send outcome. An `ACK` must
/// name the request; an `ERR` may leave `reply_to` empty when the hub could
/// not decode the request at all.
fn interpret(reply: &str, request_id: &str) -> Result<(), TransportError> {
    let envelope = Envelope::from_line(reply)?;
    let answers = envelope.reply_to();
    let mismatch = match envelope.msg_type.as_str() {
        ACK => answers != Some(request_id),
        ERR => answers.is_some_and(|id| id != request_id),
        _ => false,
    };
    if mismatch {
        return Err(TransportError::ReplyMismatch {
            expected: request_id.to_string(),
            got: answers.map(str::to_string),
        });
    }

    match envelope.msg_type.as_str() {
        ACK => {
            debug!("hub acknowledged alert");
            Ok(())
        }
        ERR => Err(TransportError::Rejected(
            envelope.error_message().unwrap_or_default(),
        )),
        _ => Err(RpcCodecError::UnexpectedType(envelope.msg_type).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use watchdog_common::{AlertMsg, Origin, Status};

    fn alert() -> AlertRecord {
        AlertRecord {
            id: "1-0".into(),
            from: Origin {
                hostname: "h".into(),
                task_name: "t".into(),
            },
            msg: AlertMsg {
                title: "t".into(),
                short: "s".into(),
                long: "l".into(),
                time: "2026-Oct-19 00:00:00".into(),
            },
            status: Status::Failed,
        }
    }

    /// Fake hub that answers every request line with `reply(request)`.
    async fn fake_hub<F>(reply: F) -> String
    where
        F: Fn(Envelope) -> Option<Envelope> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request = Envelope::from_line(&line).unwrap();
                match reply(request) {
                    Some(response) => writer
                        .write_all(response.to_line().unwrap().as_bytes())
                        .await
                        .unwrap(),
                    None => return,
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn ack_means_delivered() {
        let addr = fake_hub(|req| Some(Envelope::ack(&req.msg_id))).await;
        let transport = RpcTransport::connect(&addr).await;
        assert_eq!(transport.policy(), DeliveryPolicy::AtMostOnce);
        transport.send(&alert()).await.unwrap();
        transport.send(&alert()).await.unwrap();
    }

    #[tokio::test]
    async fn rejection_keeps_the_connection() {
        let addr = fake_hub(|req| {
            Some(Envelope::error(Some(&req.msg_id), "E_BAD_REQUEST", "nope"))
        })
        .await;
        let transport = RpcTransport::connect(&addr).await;

        let err = transport.send(&alert()).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(ref m) if m.contains("nope")));
        assert!(transport.is_connected().await);
    }

    #[tokio::test]
    async fn ack_for_another_request_is_not_delivery() {
        let addr = fake_hub(|_| Some(Envelope::ack("some-other-request"))).await;
        let transport = RpcTransport::connect(&addr).await;

        let err = transport.send(&alert()).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ReplyMismatch { ref got, .. } if got.as_deref() == Some("some-other-request")
        ));
        assert!(!transport.is_connected().await);
        assert!(matches!(
            transport.send(&alert()).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn replies_are_matched_to_the_request() {
        let ack = |id: &str| Envelope::ack(id).to_line().unwrap();
        assert!(interpret(&ack("req-1"), "req-1").is_ok());
        assert!(matches!(
            interpret(&ack("req-0"), "req-1"),
            Err(TransportError::ReplyMismatch { .. })
        ));

        let bare_ack = Envelope {
            payload: serde_json::json!({}),
            ..Envelope::ack("req-1")
        };
        assert!(matches!(
            interpret(&bare_ack.to_line().unwrap(), "req-1"),
            Err(TransportError::ReplyMismatch { got: None, .. })
        ));

        // The hub cannot name a request it failed to decode.
        let undecodable = Envelope::error(None, "E_BAD_REQUEST", "garbled");
        assert!(matches!(
            interpret(&undecodable.to_line().unwrap(), "req-1"),
            Err(TransportError::Rejected(_))
        ));
        let stale = Envelope::error(Some("req-0"), "E_BAD_REQUEST", "late");
        assert!(matches!(
            interpret(&stale.to_line().unwrap(), "req-1"),
            Err(TransportError::ReplyMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn closed_connection_is_not_reopened() {
        // Hub hangs up on the first request without answering.
        let addr = fake_hub(|_| None).await;
        let transport = RpcTransport::connect(&addr).await;

        let first = transport.send(&alert()).await.unwrap_err();
        assert!(matches!(
            first,
            TransportError::Closed | TransportError::Io(_)
        ));
        assert!(!transport.is_connected().await);

        let second = transport.send(&alert()).await.unwrap_err();
        assert!(matches!(second, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn failed_dial_leaves_transport_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = RpcTransport::connect(&addr).await;
        assert!(!transport.is_connected().await);
        assert!(matches!(
            transport.send(&alert()).await,
            Err(TransportError::NotConnected)
        ));
    }
}
