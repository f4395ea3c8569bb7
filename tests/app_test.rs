mod common;

use common::{DuplexFactory, read_pending};
use fluent_buffered_client::app::forward_lines;
use fluent_buffered_client::protocol::FrameReader;
use fluent_buffered_client::{BufferedClient, BufferedClientOptions, ClientOptions};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_forward_lines_buffers_each_line_as_a_record() {
    let (factory, forwarder) = DuplexFactory::new();
    let client = BufferedClient::new(BufferedClientOptions {
        client: ClientOptions {
            factory,
            ..ClientOptions::default()
        },
        buffer_size: 64 * 1024,
        flush_interval: Duration::from_secs(30),
    });
    client.connect().await.unwrap();
    let mut server = forwarder.accept().await;

    let input: &[u8] = b"plain line\n\n{\"level\":\"warn\",\"code\":7}\n";
    let forwarded = forward_lines(&client, "app.stdin", input, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(forwarded, 2);
    assert!(client.buffered_bytes().await > 0);

    client.shutdown().await.unwrap();

    let received = read_pending(&mut server, Duration::from_millis(100)).await;
    let mut frames = FrameReader::new(received.as_slice());
    let first: Value = frames.next_frame().await.unwrap();
    let second: Value = frames.next_frame().await.unwrap();

    assert_eq!(first[0], "app.stdin");
    assert_eq!(first[2], json!({"message": "plain line"}));
    assert_eq!(second[2], json!({"level": "warn", "code": 7}));
}

#[tokio::test]
async fn test_forward_lines_stops_on_cancel() {
    let (factory, _forwarder) = DuplexFactory::new();
    let client = BufferedClient::new(BufferedClientOptions {
        client: ClientOptions {
            factory,
            ..ClientOptions::default()
        },
        ..BufferedClientOptions::default()
    });
    client.connect().await.unwrap();

    // A reader that never produces a line.
    let (_writer, reader) = tokio::io::duplex(64);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let forwarded = forward_lines(
        &client,
        "app.stdin",
        tokio::io::BufReader::new(reader),
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(forwarded, 0);
}
