//! Agent transport -> hub -> observers, all in-process on ephemeral ports.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use watchdog_client::{AlertTransport, RpcTransport};
use watchdog_common::{AlertMsg, AlertRecord, Origin, PushFrame, Shutdown, Status};
use watchdogd::{HubOptions, RunningHub};

fn local_options() -> HubOptions {
    HubOptions {
        rpc_addr: "127.0.0.1:0".into(),
        http_addr: "127.0.0.1:0".into(),
        push_timeout: Duration::from_secs(1),
        ..HubOptions::default()
    }
}

fn alert(id: &str) -> AlertRecord {
    AlertRecord {
        id: id.into(),
        from: Origin {
            hostname: "srv01".into(),
            task_name: "disk".into(),
        },
        msg: AlertMsg {
            title: "disk".into(),
            short: "disk on srv01 almost full".into(),
            long: "/dev/sda1 97%\n(disk.clean) exited with 1\nrm: busy\n".into(),
            time: "2026-Oct-19 13:00:10".into(),
        },
        status: Status::NeedsManualIntervention,
    }
}

async fn wait_for_observers(running: &RunningHub, expected: usize) {
    for _ in 0..100 {
        if running.hub.registry().len().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("registry never reached {expected} observers");
}

async fn next_frame<S>(ws: &mut S) -> PushFrame
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn alert_reaches_every_observer() {
    let shutdown = Shutdown::new();
    let running = watchdogd::start(&local_options(), &shutdown).await.unwrap();
    let url = format!("ws://{}/ws/connect", running.push_addr);

    let (mut first, _) = connect_async(&url).await.unwrap();
    let (mut second, _) = connect_async(&url).await.unwrap();
    wait_for_observers(&running, 2).await;

    let transport = RpcTransport::connect(&running.rpc_addr.to_string()).await;
    transport.send(&alert("1760870410000-0")).await.unwrap();

    for ws in [&mut first, &mut second] {
        let frame = next_frame(ws).await;
        assert_eq!(frame.id, "1760870410000-0");
        assert_eq!(frame.from, "srv01");
        assert_eq!(frame.task_name, "disk");
        assert_eq!(frame.status, Status::NeedsManualIntervention);
        assert!(frame.long.contains("(disk.clean) exited with 1"));
    }

    shutdown.trigger();
    assert!(running.stop(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn duplicate_ids_are_pushed_twice() {
    let shutdown = Shutdown::new();
    let running = watchdogd::start(&local_options(), &shutdown).await.unwrap();
    let url = format!("ws://{}/ws/connect", running.push_addr);
    let (mut ws, _) = connect_async(&url).await.unwrap();
    wait_for_observers(&running, 1).await;

    let transport = RpcTransport::connect(&running.rpc_addr.to_string()).await;
    transport.send(&alert("same")).await.unwrap();
    transport.send(&alert("same")).await.unwrap();

    assert_eq!(next_frame(&mut ws).await.id, "same");
    assert_eq!(next_frame(&mut ws).await.id, "same");

    shutdown.trigger();
    running.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn departed_observer_is_dropped_and_others_keep_receiving() {
    let shutdown = Shutdown::new();
    let running = watchdogd::start(&local_options(), &shutdown).await.unwrap();
    let url = format!("ws://{}/ws/connect", running.push_addr);

    let (mut stays, _) = connect_async(&url).await.unwrap();
    let (mut leaves, _) = connect_async(&url).await.unwrap();
    wait_for_observers(&running, 2).await;

    leaves.close(None).await.unwrap();
    drop(leaves);
    wait_for_observers(&running, 1).await;

    let transport = RpcTransport::connect(&running.rpc_addr.to_string()).await;
    transport.send(&alert("after-leave")).await.unwrap();
    assert_eq!(next_frame(&mut stays).await.id, "after-leave");

    shutdown.trigger();
    running.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn health_reports_observer_count() {
    let shutdown = Shutdown::new();
    let running = watchdogd::start(&local_options(), &shutdown).await.unwrap();
    let (_ws, _) = connect_async(format!("ws://{}/ws/connect", running.push_addr))
        .await
        .unwrap();
    wait_for_observers(&running, 1).await;

    let mut stream = TcpStream::connect(running.push_addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: hub\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(r#""observers":1"#), "{response}");

    shutdown.trigger();
    running.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn bind_conflict_is_reported() {
    let shutdown = Shutdown::new();
    let running = watchdogd::start(&local_options(), &shutdown).await.unwrap();

    let clash = HubOptions {
        rpc_addr: running.rpc_addr.to_string(),
        ..local_options()
    };
    let err = watchdogd::start(&clash, &shutdown).await.err().unwrap();
    assert!(format!("{err:#}").contains("alert RPC listener"));

    shutdown.trigger();
    running.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn endpoint_without_leading_slash_is_served() {
    let shutdown = Shutdown::new();
    let options = HubOptions {
        endpoint: "ws/connect".into(),
        ..local_options()
    };
    let running = watchdogd::start(&options, &shutdown).await.unwrap();

    let url = format!("ws://{}/ws/connect", running.push_addr);
    let (mut ws, _) = connect_async(&url).await.unwrap();
    wait_for_observers(&running, 1).await;

    let transport = RpcTransport::connect(&running.rpc_addr.to_string()).await;
    transport.send(&alert("1760870410000-4")).await.unwrap();
    assert_eq!(next_frame(&mut ws).await.id, "1760870410000-4");

    shutdown.trigger();
    running.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn empty_endpoint_is_refused_before_binding() {
    let shutdown = Shutdown::new();
    let options = HubOptions {
        endpoint: "  ".into(),
        ..local_options()
    };
    let err = watchdogd::start(&options, &shutdown).await.err().unwrap();
    assert!(format!("{err:#}").contains("push endpoint must not be empty"));
}
