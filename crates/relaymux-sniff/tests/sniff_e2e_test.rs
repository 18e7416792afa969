//! End-to-end sniffing scenarios over scripted chunked sources

use bytes::Bytes;
use relaymux_router::{BackendRegistry, BackendTarget};
use relaymux_sniff::{ByteSource, ConnectionContext, SniffError, SniffOutcome, Sniffer};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn chunked(input: &[u8], size: usize) -> VecDeque<Bytes> {
    input.chunks(size).map(Bytes::copy_from_slice).collect()
}

async fn drain<S: ByteSource>(mut source: S) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = source.read_chunk().await.unwrap() {
        out.extend_from_slice(&chunk);
    }
    out
}

fn registry_with(host: &str, tunnel_id: &str) -> Arc<BackendRegistry> {
    let registry = BackendRegistry::new();
    registry
        .register(
            host,
            BackendTarget {
                tunnel_id: tunnel_id.to_string(),
                target_addr: format!("{}:3000", tunnel_id),
                metadata: None,
            },
        )
        .unwrap();
    Arc::new(registry)
}

#[tokio::test]
async fn http_request_is_rewound_exactly_for_any_chunking() {
    let input = b"GET /path HTTP/1.1\r\nHost: a.test:80\r\nAccept: */*\r\n\r\n";

    for size in [1, 2, 3, 7, input.len()] {
        let ctx = ConnectionContext::new();
        let sniffer = Sniffer::new(chunked(input, size), registry_with("a.test", "tunnel-a"));
        let outcome = sniffer
            .sniff(&ctx, &CancellationToken::new())
            .await
            .unwrap();

        let SniffOutcome::Http(replay) = outcome else {
            panic!("expected HTTP outcome for chunk size {}", size);
        };
        assert_eq!(drain(replay).await, input, "chunk size {}", size);
    }
}

#[tokio::test]
async fn control_frame_is_consumed_through_terminator() {
    let input = b"TUNNEL m-42 ping\r\nIgnored: header\r\n\r\nAFTER";

    let ctx = ConnectionContext::new();
    let sniffer = Sniffer::new(chunked(input, 5), Arc::new(BackendRegistry::new()));
    let outcome = sniffer
        .sniff(&ctx, &CancellationToken::new())
        .await
        .unwrap();

    let SniffOutcome::Control(replay) = outcome else {
        panic!("expected control outcome");
    };
    // Cursor sits exactly at the terminator's end
    assert_eq!(drain(replay).await, b"AFTER");

    let dispatch = ctx.get().expect("dispatch result published");
    assert_eq!(dispatch.method, "TUNNEL");
    assert_eq!(dispatch.control_message_id.as_deref(), Some("m-42"));
    assert!(dispatch.is_control_traffic());
}

#[tokio::test]
async fn host_is_normalized_regardless_of_casing() {
    for header in [
        "Host: Example.COM:8080",
        "HOST: example.com:8080",
        "host: EXAMPLE.com",
    ] {
        let input = format!("GET / HTTP/1.1\r\n{}\r\n\r\n", header);

        let ctx = ConnectionContext::new();
        let sniffer = Sniffer::new(
            chunked(input.as_bytes(), 4),
            registry_with("example.com", "tunnel-ex"),
        );
        let outcome = sniffer
            .sniff(&ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, SniffOutcome::Http(_)));
        let dispatch = ctx.get().expect("host should have matched");
        assert_eq!(dispatch.host.as_deref(), Some("example.com"), "{}", header);
    }
}

#[tokio::test]
async fn duplicate_header_aborts_the_connection() {
    let input = b"GET / HTTP/1.1\r\nX-Trace: 1\r\nX-Trace: 2\r\n\r\n";

    let ctx = ConnectionContext::new();
    let sniffer = Sniffer::new(chunked(input, 8), Arc::new(BackendRegistry::new()));
    let result = sniffer.sniff(&ctx, &CancellationToken::new()).await;

    assert!(matches!(result, Err(SniffError::DuplicateHeader(_))));
    assert!(ctx.get().is_none());
}

#[tokio::test]
async fn duplicate_host_header_aborts_the_connection() {
    let input = b"GET / HTTP/1.1\r\nHost: a.test\r\nHost: b.test\r\n\r\n";

    let ctx = ConnectionContext::new();
    let sniffer = Sniffer::new(chunked(input, 8), registry_with("a.test", "tunnel-a"));
    let result = sniffer.sniff(&ctx, &CancellationToken::new()).await;

    assert!(matches!(result, Err(SniffError::DuplicateHeader(_))));
}

#[tokio::test]
async fn close_before_terminator_publishes_nothing() {
    let input = b"GET / HTTP/1.1\r\n";

    let ctx = ConnectionContext::new();
    let sniffer = Sniffer::new(chunked(input, 4), registry_with("a.test", "tunnel-a"));
    let outcome = sniffer
        .sniff(&ctx, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, SniffOutcome::Closed));
    assert!(ctx.get().is_none());
}

#[tokio::test]
async fn matched_http_request_publishes_and_rewinds() {
    let input = b"GET / HTTP/1.1\r\nHost: a.test:80\r\nX: 1\r\n\r\n";

    let ctx = ConnectionContext::new();
    let sniffer = Sniffer::new(chunked(input, 6), registry_with("a.test", "target-a"));
    let outcome = sniffer
        .sniff(&ctx, &CancellationToken::new())
        .await
        .unwrap();

    let SniffOutcome::Http(replay) = outcome else {
        panic!("expected HTTP outcome");
    };
    assert_eq!(drain(replay).await, input);

    let dispatch = ctx.get().expect("dispatch result published");
    assert_eq!(dispatch.method, "GET");
    assert_eq!(dispatch.host.as_deref(), Some("a.test"));
    assert!(dispatch.control_message_id.is_none());
    assert_eq!(
        dispatch.matched_target.as_ref().unwrap().tunnel_id,
        "target-a"
    );
    assert!(dispatch.is_control_traffic());
}

#[tokio::test]
async fn unmatched_http_request_rewinds_without_publishing() {
    let input = b"GET / HTTP/1.1\r\nHost: unknown.test\r\n\r\n";

    let ctx = ConnectionContext::new();
    let sniffer = Sniffer::new(chunked(input, 3), Arc::new(BackendRegistry::new()));
    let outcome = sniffer
        .sniff(&ctx, &CancellationToken::new())
        .await
        .unwrap();

    let SniffOutcome::Http(replay) = outcome else {
        panic!("expected HTTP outcome");
    };
    assert!(ctx.get().is_none());
    assert_eq!(drain(replay).await, input);
}
