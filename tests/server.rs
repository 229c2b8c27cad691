use instream::server;

use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{self, Duration};

/// Starts a server on a random port and returns its address.
async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move { server::run(listener, std::future::pending::<()>()).await });

    addr
}

/// Reads exactly `expected.len()` bytes and compares them to `expected`.
async fn assert_reply(stream: &mut TcpStream, expected: &[u8]) {
    let mut response = vec![0; expected.len()];
    stream.read_exact(&mut response).await.unwrap();

    assert_eq!(
        String::from_utf8_lossy(&response),
        String::from_utf8_lossy(expected)
    );
}

#[tokio::test]
async fn xadd_xlen_xrange() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$4\r\nuser\r\n$4\r\njuan\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b"$3\r\n1-1\r\n").await;

    stream
        .write_all(b"*2\r\n$4\r\nXLEN\r\n$1\r\ns\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b":1\r\n").await;

    stream
        .write_all(b"*4\r\n$6\r\nXRANGE\r\n$1\r\ns\r\n$1\r\n-\r\n$1\r\n+\r\n")
        .await
        .unwrap();
    assert_reply(
        &mut stream,
        b"*1\r\n*2\r\n$3\r\n1-1\r\n*2\r\n$4\r\nuser\r\n$4\r\njuan\r\n",
    )
    .await;
}

#[tokio::test]
async fn missing_stream_is_empty() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*2\r\n$4\r\nXLEN\r\n$4\r\nnope\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b":0\r\n").await;

    stream
        .write_all(b"*4\r\n$6\r\nXRANGE\r\n$4\r\nnope\r\n$3\r\n0-0\r\n$1\r\n+\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b"*0\r\n").await;

    stream
        .write_all(b"*4\r\n$5\r\nXREAD\r\n$7\r\nSTREAMS\r\n$4\r\nnope\r\n$3\r\n0-0\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b"$-1\r\n").await;
}

#[tokio::test]
async fn errors_keep_the_connection_open() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n0-0\r\n$1\r\na\r\n$1\r\nb\r\n")
        .await
        .unwrap();
    assert_reply(
        &mut stream,
        b"-ERR The ID specified in XADD must be greater than 0-0\r\n",
    )
    .await;

    stream
        .write_all(b"*2\r\n$4\r\nXADD\r\n$1\r\ns\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b"-ERR wrong number of arguments\r\n").await;

    stream
        .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b"-ERR unknown command 'get'\r\n").await;

    stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    assert_reply(&mut stream, b"+PONG\r\n").await;
}

#[tokio::test]
async fn explicit_ids_must_increase() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n5-0\r\n$1\r\na\r\n$1\r\nb\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b"$3\r\n5-0\r\n").await;

    stream
        .write_all(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n4-9\r\n$1\r\na\r\n$1\r\nb\r\n")
        .await
        .unwrap();
    assert_reply(
        &mut stream,
        b"-ERR The ID specified in XADD is equal or smaller than the target stream top item\r\n",
    )
    .await;

    stream
        .write_all(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n5-*\r\n$1\r\na\r\n$1\r\nb\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b"$3\r\n5-1\r\n").await;
}

#[tokio::test]
async fn blocked_xread_wakes_on_append() {
    let addr = start_server().await;

    let mut reader = TcpStream::connect(addr).await.unwrap();
    let mut writer = TcpStream::connect(addr).await.unwrap();

    reader
        .write_all(b"*6\r\n$5\r\nXREAD\r\n$5\r\nBLOCK\r\n$1\r\n0\r\n$7\r\nSTREAMS\r\n$1\r\ns\r\n$3\r\n0-0\r\n")
        .await
        .unwrap();

    // Nothing to read yet, the reader is blocked.
    let mut buf = [0; 1];
    let pending = time::timeout(Duration::from_millis(100), reader.read(&mut buf)).await;
    assert!(pending.is_err());

    writer
        .write_all(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n5-0\r\n$1\r\na\r\n$1\r\nb\r\n")
        .await
        .unwrap();
    assert_reply(&mut writer, b"$3\r\n5-0\r\n").await;

    assert_reply(
        &mut reader,
        b"*1\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n5-0\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n",
    )
    .await;
}

#[tokio::test]
async fn blocked_xread_times_out() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-0\r\n$1\r\na\r\n$1\r\nb\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b"$3\r\n1-0\r\n").await;

    // `$` skips the existing entry, so only the timeout ends the read.
    stream
        .write_all(b"*6\r\n$5\r\nXREAD\r\n$5\r\nBLOCK\r\n$2\r\n50\r\n$7\r\nSTREAMS\r\n$1\r\ns\r\n$1\r\n$\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b"$-1\r\n").await;
}

#[tokio::test]
async fn count_with_trailing_garbage_is_rejected() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*6\r\n$6\r\nXRANGE\r\n$1\r\ns\r\n$1\r\n-\r\n$1\r\n+\r\n$5\r\nCOUNT\r\n$4\r\n3abc\r\n")
        .await
        .unwrap();
    assert_reply(&mut stream, b"-ERR value is not an integer or out of range\r\n").await;
}

#[tokio::test]
async fn oversized_bulk_length_closes_only_that_connection() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*1\r\n$18446744073709551615\r\nab\r\n")
        .await
        .unwrap();

    // The server drops the connection without a reply.
    let mut buf = [0; 16];
    let n = stream.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);

    let mut other = TcpStream::connect(addr).await.unwrap();
    other.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    assert_reply(&mut other, b"+PONG\r\n").await;
}
