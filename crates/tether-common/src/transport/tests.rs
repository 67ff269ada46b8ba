//! Tests for the transport module
//!
//! Covers NUL framing (split reads, oversized frames, truncated streams), the
//! JSON codec, gzip-wrapped streams, and the TCP connector against a loopback
//! listener.

use super::*;
use crate::protocol::{Command, Param, Request, Response, RpcResult, TetherError};
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio_util::codec::{Decoder, Encoder, Framed};

// ============================================================================
// FrameCodec
// ============================================================================

#[test]
fn test_decode_single_frame() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&b"{\"id\":1}\0"[..]);

    let frame = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(&frame[..], b"{\"id\":1}");
    assert!(buf.is_empty());
}

#[test]
fn test_decode_waits_for_delimiter() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&b"{\"id\":"[..]);
    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b"2}\0{\"id\":3}\0");
    let first = codec.decode(&mut buf).unwrap().unwrap();
    let second = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(&first[..], b"{\"id\":2}");
    assert_eq!(&second[..], b"{\"id\":3}");
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn test_decode_skips_empty_frames() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&b"\0\0abc\0"[..]);
    let frame = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(&frame[..], b"abc");
}

#[test]
fn test_decode_rejects_oversized_terminated_frame() {
    let mut codec = FrameCodec::new(4);
    let mut buf = BytesMut::from(&b"abcdef\0"[..]);
    match codec.decode(&mut buf) {
        Err(TetherError::FrameTooLarge { size, max }) => {
            assert_eq!(size, 6);
            assert_eq!(max, 4);
        }
        other => panic!("expected FrameTooLarge, got {:?}", other),
    }
}

#[test]
fn test_decode_rejects_oversized_partial_frame() {
    let mut codec = FrameCodec::new(4);
    let mut buf = BytesMut::from(&b"abcdefgh"[..]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(TetherError::FrameTooLarge { .. })
    ));
}

#[test]
fn test_frame_at_exact_limit_is_accepted() {
    let mut codec = FrameCodec::new(4);
    let mut buf = BytesMut::from(&b"abcd\0"[..]);
    assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"abcd");
}

#[test]
fn test_decode_eof_with_truncated_frame() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&b"{\"id\":"[..]);
    assert!(matches!(
        codec.decode_eof(&mut buf),
        Err(TetherError::InvalidFrame(_))
    ));

    let mut empty = BytesMut::new();
    assert!(codec.decode_eof(&mut empty).unwrap().is_none());

    let mut next = BytesMut::from(&b"ok\0"[..]);
    assert_eq!(&codec.decode(&mut next).unwrap().unwrap()[..], b"ok");
}

#[test]
fn test_decode_after_oversized_error_starts_fresh() {
    let mut codec = FrameCodec::new(4);
    let mut buf = BytesMut::from(&b"abcdefgh"[..]);
    assert!(codec.decode(&mut buf).is_err());

    let mut shorter = BytesMut::from(&b"ab\0"[..]);
    assert_eq!(&codec.decode(&mut shorter).unwrap().unwrap()[..], b"ab");
}

#[test]
fn test_decode_with_replaced_shorter_buffer() {
    let mut codec = FrameCodec::default();
    let mut partial = BytesMut::from(&b"abcdef"[..]);
    assert!(codec.decode(&mut partial).unwrap().is_none());

    let mut other = BytesMut::from(&b"xy\0"[..]);
    assert_eq!(&codec.decode(&mut other).unwrap().unwrap()[..], b"xy");
}

#[test]
fn test_encode_appends_delimiter() {
    let mut codec = FrameCodec::default();
    let mut dst = BytesMut::new();
    codec.encode(Bytes::from_static(b"hello"), &mut dst).unwrap();
    assert_eq!(&dst[..], b"hello\0");
}

#[test]
fn test_encode_rejects_oversized_payload() {
    let mut codec = FrameCodec::new(3);
    let mut dst = BytesMut::new();
    assert!(matches!(
        codec.encode(Bytes::from_static(b"hello"), &mut dst),
        Err(TetherError::FrameTooLarge { size: 5, max: 3 })
    ));
    assert!(dst.is_empty());
}

#[tokio::test]
async fn test_framed_over_duplex() {
    let (client, server) = tokio::io::duplex(1024);
    let mut client = Framed::new(client, FrameCodec::default());
    let mut server = Framed::new(server, FrameCodec::default());

    let request = Request::new(
        11,
        Command::new("demo.Echo", "echo").with_param(Param::new(json!("a\u{0}b"), "string")),
    );
    let payload = JsonCodec::encode_request(&request).unwrap();
    client.send(Bytes::from(payload)).await.unwrap();

    let frame = server.next().await.unwrap().unwrap();
    let decoded = JsonCodec::decode_request(&frame).unwrap();
    assert_eq!(decoded, request);
}

// ============================================================================
// JsonCodec
// ============================================================================

#[test]
fn test_codec_response() {
    let response = Response::new(5, RpcResult::value(json!({"k": "nul\u{0}inside"}), "map"));
    let bytes = JsonCodec::encode_response(&response).unwrap();
    assert!(!bytes.contains(&FRAME_DELIMITER));
    assert_eq!(JsonCodec::decode_response(&bytes).unwrap(), response);
}

#[test]
fn test_codec_rejects_garbage() {
    let err = JsonCodec::decode_response(b"not json").unwrap_err();
    assert!(err.is_connection_error());
}

// ============================================================================
// Stream wrapping
// ============================================================================

#[tokio::test]
async fn test_gzip_frames_over_duplex() {
    let (client, server) = tokio::io::duplex(4096);
    let mut client = Framed::new(wrap_stream(client, true), FrameCodec::default());
    let mut server = Framed::new(wrap_stream(server, true), FrameCodec::default());

    // each frame must be readable before the next one is sent
    for id in 1..=3 {
        let request = Request::new(id, Command::new("demo.Echo", "echo"));
        client
            .send(Bytes::from(JsonCodec::encode_request(&request).unwrap()))
            .await
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), server.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(JsonCodec::decode_request(&frame).unwrap(), request);
    }

    let response = Response::new(3, RpcResult::value(json!("x".repeat(2000)), "string"));
    server
        .send(Bytes::from(JsonCodec::encode_response(&response).unwrap()))
        .await
        .unwrap();
    let frame = client.next().await.unwrap().unwrap();
    assert_eq!(JsonCodec::decode_response(&frame).unwrap(), response);
}

#[tokio::test]
async fn test_gzip_output_is_not_plain_json() {
    let (client, mut raw) = tokio::io::duplex(4096);
    let mut client = Framed::new(wrap_stream(client, true), FrameCodec::default());
    client
        .send(Bytes::from(JsonCodec::encode_request(&Request::heartbeat()).unwrap()))
        .await
        .unwrap();

    let mut buf = vec![0u8; 256];
    let n = tokio::io::AsyncReadExt::read(&mut raw, &mut buf).await.unwrap();
    // gzip magic
    assert_eq!(&buf[..2], &[0x1f, 0x8b]);
    assert!(!buf[..n].windows(4).any(|w| w == b"\"id\""));
}

// ============================================================================
// TcpConnector
// ============================================================================

#[tokio::test]
async fn test_connect_to_listener() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = listener.accept().await;
    });

    let connector = TcpConnector::new(Duration::from_secs(1));
    let stream = connector.connect("127.0.0.1", port).await.unwrap();
    assert!(stream.nodelay().unwrap());
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a port nobody listens on
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let connector = TcpConnector::new(Duration::from_secs(1));
    let err = connector.connect("127.0.0.1", port).await.unwrap_err();
    assert!(err.is_connection_error(), "unexpected error: {:?}", err);
}
