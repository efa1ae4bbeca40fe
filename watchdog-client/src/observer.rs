//! Terminal observer for the hub's push channel.

use std::borrow::Cow;
use std::io::{self, Write};

use chrono::{DateTime, Local};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use watchdog_common::{PushFrame, ShutdownListener};

pub type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ALERT_TAG: &str = "| ALERT |";

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("dial {url}: {source}")]
    Dial {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("push channel error: {0}")]
    Stream(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("console error: {0}")]
    Io(#[from] io::Error),
}

/// How a watch session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    /// Local shutdown; a normal close frame was sent.
    Interrupted,
    /// The hub closed the channel or it ended.
    HubClosed,
}

pub fn push_url(remote: &str, endpoint: &str) -> String {
    if endpoint.starts_with('/') {
        format!("ws://{}{}", remote, endpoint)
    } else {
        format!("ws://{}/{}", remote, endpoint)
    }
}

/// Column titles, aligned with [`console_line`].
pub fn header_row() -> String {
    let separator = " ".repeat(ALERT_TAG.len());
    format!(
        "{} {:<13} {:<13} {:<16} {}",
        separator, "TIME", "ID", "Host", "Message"
    )
}

pub fn console_line(frame: &PushFrame, received: DateTime<Local>) -> String {
    format!(
        "{} {:<13} {:<13} {:<16} {}",
        ALERT_TAG,
        received.format("%H:%M:%S").to_string(),
        frame.id,
        frame.from,
        frame.short
    )
}

/// Prints alerts to a console and logs them with their detail.
pub struct AlertPrinter<W: Write> {
    out: W,
    header_printed: bool,
}

impl<W: Write> AlertPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_printed: false,
        }
    }

    /// Handle one text frame. Malformed frames are logged and skipped.
    pub fn handle_text(&mut self, text: &str) -> io::Result<Option<PushFrame>> {
        match serde_json::from_str::<PushFrame>(text) {
            Ok(frame) => {
                self.print(&frame, Local::now())?;
                Ok(Some(frame))
            }
            Err(e) => {
                warn!("could not decode alert: {}", e);
                Ok(None)
            }
        }
    }

    pub fn print(&mut self, frame: &PushFrame, received: DateTime<Local>) -> io::Result<()> {
        let header = header_row();
        if !self.header_printed {
            writeln!(self.out, "{}", header)?;
            self.header_printed = true;
        }
        let line = console_line(frame, received);
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;

        // The detail goes to the log only, never to the console.
        info!("{}", header);
        info!("{}", line);
        info!("| DETAILED INFO:\n{}", frame.long);
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub async fn dial(url: &str) -> Result<PushStream, ObserverError> {
    let (stream, _) = connect_async(url).await.map_err(|source| ObserverError::Dial {
        url: url.to_string(),
        source,
    })?;
    info!("connected to {}", url);
    Ok(stream)
}

/// Print every pushed alert until shutdown or until the hub goes away.
pub async fn watch<W: Write>(
    mut stream: PushStream,
    printer: &mut AlertPrinter<W>,
    mut shutdown: ShutdownListener,
) -> Result<WatchEnd, ObserverError> {
    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: Cow::Borrowed(""),
                };
                if let Err(e) = stream.close(Some(frame)).await {
                    warn!("could not close connection: {}", e);
                } else {
                    info!("connection closed");
                }
                return Ok(WatchEnd::Interrupted);
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    printer.handle_text(&text)?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("hub closed the push channel");
                    return Ok(WatchEnd::HubClosed);
                }
                Some(Ok(other)) => {
                    debug!("ignoring {:?} frame", other);
                }
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}
