use instream::{client, server, Client, EntryId, Fields, IdSpec};

use bytes::Bytes;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move { server::run(listener, std::future::pending::<()>()).await });

    addr
}

async fn connect(addr: SocketAddr) -> Client {
    client::connect(addr).await.unwrap()
}

fn event(n: usize) -> Fields {
    vec![
        ("n".to_string(), Bytes::from(n.to_string())),
        ("kind".to_string(), Bytes::from_static(b"test")),
    ]
}

#[tokio::test]
async fn ping_pong() {
    let addr = start_server().await;
    let mut client = connect(addr).await;

    assert_eq!(client.ping(None).await.unwrap(), "PONG");
    assert_eq!(
        client.ping(Some(Bytes::from_static(b"hello"))).await.unwrap(),
        "hello"
    );
}

#[tokio::test]
async fn appended_ids_strictly_increase() {
    let addr = start_server().await;
    let mut client = connect(addr).await;

    let mut ids = vec![];
    for n in 0..100 {
        ids.push(client.xadd("s", event(n)).await.unwrap());
    }

    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(client.xlen("s").await.unwrap(), 100);

    let entries = client
        .xrange("s", EntryId::MIN, EntryId::MAX, None)
        .await
        .unwrap();
    assert_eq!(entries.len(), 100);

    for (n, (entry, id)) in entries.iter().zip(&ids).enumerate() {
        assert_eq!(entry.id, *id);
        assert_eq!(entry.fields, event(n));
    }
}

#[tokio::test]
async fn read_is_capped_and_exclusive() {
    let addr = start_server().await;
    let mut client = connect(addr).await;

    for n in 0..15 {
        client.xadd("s", event(n)).await.unwrap();
    }

    let entries = client.xread("s", EntryId::MIN, Some(10)).await.unwrap();
    assert_eq!(entries.len(), 10);
    assert!(entries.iter().all(|entry| entry.id > EntryId::MIN));

    let last = entries[9].id;
    let rest = client.xread("s", last, None).await.unwrap();
    assert_eq!(rest.len(), 5);
    assert!(rest.iter().all(|entry| entry.id > last));

    let range = client
        .xrange("s", EntryId::MIN, EntryId::MAX, Some(3))
        .await
        .unwrap();
    assert_eq!(range.len(), 3);
    assert_eq!(range[..], entries[..3]);
}

#[tokio::test]
async fn missing_stream_reads_as_empty() {
    let addr = start_server().await;
    let mut client = connect(addr).await;

    assert_eq!(client.xlen("nope").await.unwrap(), 0);
    assert!(client
        .xread("nope", EntryId::MIN, Some(10))
        .await
        .unwrap()
        .is_empty());
    assert!(client
        .xrange("nope", EntryId::MIN, EntryId::MAX, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn rejected_append_is_an_error() {
    let addr = start_server().await;
    let mut client = connect(addr).await;

    let id = client
        .xadd_with_id("s", IdSpec::Explicit(EntryId::new(10, 0)), event(0))
        .await
        .unwrap();
    assert_eq!(id, EntryId::new(10, 0));

    let err = client
        .xadd_with_id("s", IdSpec::Explicit(EntryId::new(10, 0)), event(1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("equal or smaller"));

    // The connection is still usable.
    assert_eq!(client.xlen("s").await.unwrap(), 1);
}

#[tokio::test]
async fn blocking_read_times_out_empty() {
    let addr = start_server().await;
    let mut client = connect(addr).await;

    let entries = client
        .xread_blocking("s", EntryId::MIN, None, std::time::Duration::from_millis(50))
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn tail_follows_appends() {
    let addr = start_server().await;
    let mut writer = connect(addr).await;

    writer.xadd("s", event(0)).await.unwrap();

    let tail = connect(addr).await.tail("s", EntryId::MIN);
    tokio::pin!(tail);

    let first = tail.next().await.unwrap().unwrap();
    assert_eq!(first.fields, event(0));

    for n in 1..3 {
        writer.xadd("s", event(n)).await.unwrap();
    }

    let second = tail.next().await.unwrap().unwrap();
    let third = tail.next().await.unwrap().unwrap();

    assert_eq!(second.fields, event(1));
    assert_eq!(third.fields, event(2));
    assert!(first.id < second.id && second.id < third.id);
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(client::connect(addr).await.is_err());
}
