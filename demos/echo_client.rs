//! Echo demo: an in-process server and a client sharing pooled channels.
//!
//! Run with `RUST_LOG=muxwire=debug` to see channels being dialed.

use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use muxwire::protocol::{build_frame, FrameBuffer, MessageHeader, MessageType};
use muxwire::{ClientFactory, Endpoint, MsgPackCall};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,muxwire=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = Endpoint::from(listener.local_addr()?);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(echo_connection(stream));
        }
    });

    let factory = ClientFactory::builder()
        .channels_per_endpoint(2)
        .socket_timeout(Duration::from_secs(1))
        .build()?;

    let client = factory.sync_client(endpoint.clone());
    let reply: String = client.call(MsgPackCall::new("echo", "hello")).await?;
    println!("sync reply: {}", reply);

    let callbacks = factory.async_client(endpoint.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let started = Instant::now();
    for i in 0..1000u32 {
        let tx = tx.clone();
        callbacks
            .call(MsgPackCall::<u32, u32>::new("echo", i), move |result| {
                let _ = tx.send(result);
            })
            .await?;
    }
    drop(tx);

    let mut total = 0u64;
    while let Some(result) = rx.recv().await {
        total += u64::from(result?);
    }
    println!(
        "1000 callback calls in {:?} over {} channels, sum {}",
        started.elapsed(),
        factory.pool().current_channel_count(&endpoint),
        total
    );

    factory.close();
    Ok(())
}

async fn echo_connection(stream: TcpStream) {
    let (mut reader, mut writer) = stream.into_split();
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 64 * 1024];

    while let Ok(n) = reader.read(&mut buf).await {
        if n == 0 {
            return;
        }
        let Ok(bodies) = frames.push(&buf[..n]) else {
            return;
        };
        for mut body in bodies {
            let Ok(request) = MessageHeader::decode(&mut body) else {
                return;
            };
            if request.message_type == MessageType::Oneway {
                continue;
            }

            let mut reply = BytesMut::new();
            let header = MessageHeader::new(request.name, MessageType::Reply, request.sequence_id);
            if header.encode_into(&mut reply).is_err() {
                return;
            }
            reply.extend_from_slice(&body);
            let Ok(frame) = build_frame(&reply) else {
                return;
            };
            if writer.write_all(&frame).await.is_err() {
                return;
            }
        }
    }
}
