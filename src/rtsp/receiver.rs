//! RTP datagram receiver
//!
//! One UDP listener per negotiated media. The receive loop uses short read
//! timeouts so it observes the shared stop flag within ~100 ms; each
//! datagram is copied into a fresh buffer and handed to the sink. A
//! datagram larger than the 64 KiB buffer is truncated and still
//! delivered.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::RtspError;

const RECV_BUFFER_SIZE: usize = 65536;
const READ_DEADLINE: Duration = Duration::from_millis(100);

/// Consumer of received RTP datagrams.
pub type PacketSink =
    Box<dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Bind a UDP listener on `port` and run a receive loop until `running`
/// flips to false. Packets are delivered to `sink` in arrival order.
pub async fn spawn_receiver(
    label: &'static str,
    port: u16,
    sink: PacketSink,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, RtspError> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .await
        .map_err(|e| RtspError::Transport(format!("binding {} port {}: {}", label, port, e)))?;

    debug!("{} RTP receiver listening on udp/{}", label, port);

    Ok(tokio::spawn(async move {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut packets = 0u64;

        while running.load(Ordering::Relaxed) {
            match timeout(READ_DEADLINE, socket.recv(&mut buf)).await {
                Err(_) => continue, // deadline, re-check the stop flag
                Ok(Err(e)) => {
                    if running.load(Ordering::Relaxed) {
                        error!("{} RTP receive failed: {}", label, e);
                    }
                    break;
                }
                Ok(Ok(n)) => {
                    packets += 1;
                    if packets == 1 {
                        debug!("{} first RTP packet received ({} bytes)", label, n);
                    }
                    sink(buf[..n].to_vec()).await;
                }
            }
        }

        debug!("{} RTP receiver stopped after {} packets", label, packets);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting_sink() -> (PacketSink, Arc<Mutex<Vec<Vec<u8>>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let store = received.clone();
        let sink: PacketSink = Box::new(move |pkt| {
            let store = store.clone();
            Box::pin(async move {
                store.lock().unwrap().push(pkt);
            })
        });
        (sink, received)
    }

    #[tokio::test]
    async fn delivers_datagrams_in_order() {
        let (sink, received) = collecting_sink();
        let running = Arc::new(AtomicBool::new(true));

        // Bind on an ephemeral port by probing: bind a socket to learn a
        // free port, drop it, then hand the port to the receiver.
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let handle = spawn_receiver("test", port, sink, running.clone())
            .await
            .unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for i in 0u8..3 {
            sender
                .send_to(&[0x80, i], ("127.0.0.1", port))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        running.store(false, Ordering::Relaxed);
        handle.await.unwrap();

        let packets = received.lock().unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0], vec![0x80, 0]);
        assert_eq!(packets[2], vec![0x80, 2]);
    }

    #[tokio::test]
    async fn stop_flag_ends_the_loop() {
        let (sink, _) = collecting_sink();
        let running = Arc::new(AtomicBool::new(true));

        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let handle = spawn_receiver("test", port, sink, running.clone())
            .await
            .unwrap();
        running.store(false, Ordering::Relaxed);

        // The loop must observe the flag within the read deadline
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("receiver did not stop")
            .unwrap();
    }
}
