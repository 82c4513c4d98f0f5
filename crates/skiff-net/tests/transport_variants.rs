//! The tagged carrier enums drive real sockets and the loopback channel
//! through the shared traits.

use std::sync::mpsc;
use std::time::Duration;

use skiff_net::framing::{read_frame, write_frame};
use skiff_net::message::{decode_packet, encode_packet};
use skiff_net::{
    Compression, ConnectCallbacks, DatagramClient, DatagramTransport, FrameConfig,
    LoopbackChannel, Message, Packet, StreamClient, StreamTransport, TcpClientConfig,
    TcpTransportClient, UdpClientConfig, UdpTransportClient,
};
use tokio::net::{TcpListener, UdpSocket};
use tokio::runtime::Handle;

async fn poll_stream(client: &mut StreamClient) -> Message {
    for _ in 0..2000 {
        if let Some(message) = client.read_message() {
            return message;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("no message within 2s");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_variant_exchanges_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = FrameConfig::default();

    let mut client = StreamClient::Tcp(TcpTransportClient::new(
        Handle::current(),
        TcpClientConfig::default(),
    ));
    let (tx, rx) = mpsc::channel();
    let failed = tx.clone();
    client.connect(
        "127.0.0.1",
        port,
        ConnectCallbacks::new(
            move || tx.send(true).unwrap(),
            move |_| failed.send(false).unwrap(),
        ),
    );

    let (mut server, _) = listener.accept().await.unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());

    let snapshot = vec![42u8; 20_000];
    write_frame(&mut server, &snapshot, Compression::Lz4, &config)
        .await
        .unwrap();
    write_frame(&mut server, b"tail", Compression::None, &config)
        .await
        .unwrap();

    assert_eq!(poll_stream(&mut client).await.data(), snapshot.as_slice());
    assert_eq!(poll_stream(&mut client).await.data(), b"tail");

    client.send(b"input").unwrap();
    let echoed = read_frame(&mut server, &config).await.unwrap();
    assert_eq!(echoed.data(), b"input");

    client.dispose();
    assert!(client.send(b"late").is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn udp_variant_exchanges_packets() {
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut client = DatagramClient::Udp(UdpTransportClient::new(
        Handle::current(),
        UdpClientConfig::default(),
    ));
    client.connect(peer.local_addr().unwrap()).unwrap();

    client.send(&Packet::new(3, b"ping".to_vec()));
    let mut buf = [0u8; 2048];
    let (n, from) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decode_packet(&buf[..n]).unwrap().payload, b"ping");

    let reply = encode_packet(&Packet::new(4, b"pong".to_vec())).unwrap();
    peer.send_to(&reply, from).await.unwrap();

    let mut received = Vec::new();
    for _ in 0..2000 {
        if let Some(batch) = client.read_message() {
            received.extend(batch);
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, 4);
    assert_eq!(received[0].payload, b"pong");

    client.dispose();
    client.dispose();
}

#[test]
fn loopback_variants_behave_like_sockets() {
    let channel = LoopbackChannel::new();
    let mut client_stream = StreamClient::Loopback(channel.client_stream());
    let mut server_stream = StreamClient::Loopback(channel.server_stream());
    let mut client_dgram = DatagramClient::Loopback(channel.client_datagram());
    let mut server_dgram = DatagramClient::Loopback(channel.server_datagram());

    client_stream.connect("localhost", 0, ConnectCallbacks::noop());
    client_dgram.connect("127.0.0.1:0".parse().unwrap()).unwrap();

    client_stream.send(b"hello").unwrap();
    assert_eq!(server_stream.read_message().unwrap().data(), b"hello");
    assert!(server_stream.read_message().is_none());

    server_dgram.send(&Packet::new(8, vec![1, 2, 3]));
    let packets = client_dgram.read_message().unwrap();
    assert_eq!(packets[0].payload, vec![1, 2, 3]);

    channel.clear();
    assert!(channel.is_empty());
}
