//! TCP publish/subscribe carrying the mailbox contract across hosts.
//!
//! The publisher binds a listener and hands every accepted connection its own
//! mailbox subscriber plus a dedicated writer thread. A connection that falls
//! behind simply skips to the newest sample on its next write, so conflation
//! happens per subscriber without any socket-level buffering policy.
//!
//! The subscriber side connects with retry (a consumer starting before the
//! producer is the expected ordering, not an error) and pumps decoded frames
//! into a local mailbox for the control loop to drain.

use std::{
    io::BufReader,
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    thread,
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use crate::{
    mailbox::{self, Publisher, Subscriber},
    wire,
};

const RECONNECT_DELAY_MS: u64 = 500;

/// Publishing endpoint bound to a TCP listener.
pub struct NetPublisher<T> {
    publisher: Publisher<T>,
    local_addr: SocketAddr,
}

impl<T: Clone> NetPublisher<T> {
    /// Replace the pending sample for every connected subscriber. Never
    /// blocks on any connection's progress.
    pub fn publish(&self, value: T) {
        self.publisher.publish(value);
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Bind `addr` and start accepting subscriber connections.
///
/// Dropping the returned handle disconnects the per-connection writers once
/// they have delivered the final sample.
pub fn bind<T>(addr: &str) -> std::io::Result<NetPublisher<T>>
where
    T: Serialize + Clone + Send + 'static,
{
    let listener = TcpListener::bind(addr)?;
    let local_addr = listener.local_addr()?;
    let (publisher, accept_template) = mailbox::latest::<T>();

    thread::Builder::new()
        .name("link-accept".into())
        .spawn(move || accept_loop(listener, accept_template))
        .expect("failed to spawn link accept thread");

    info!("telemetry publisher listening on {local_addr}");
    Ok(NetPublisher {
        publisher,
        local_addr,
    })
}

fn accept_loop<T>(listener: TcpListener, template: Subscriber<T>)
where
    T: Serialize + Clone + Send + 'static,
{
    for incoming in listener.incoming() {
        let mut stream = match incoming {
            Ok(stream) => stream,
            Err(err) => {
                warn!("failed to accept subscriber connection: {err}");
                continue;
            }
        };
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".into());
        info!("subscriber connected from {peer}");
        let _ = stream.set_nodelay(true);

        let mut subscriber = template.resubscribe();
        thread::Builder::new()
            .name("link-writer".into())
            .spawn(move || {
                while let Ok(sample) = subscriber.recv() {
                    if let Err(err) = wire::write_frame(&mut stream, &sample) {
                        debug!("subscriber {peer} dropped: {err}");
                        return;
                    }
                }
                debug!("publisher closed, ending writer for {peer}");
            })
            .expect("failed to spawn link writer thread");
    }
}

/// Connect to a remote publisher and return the local subscription.
///
/// Fails fast only when `addr` itself is unusable; an unreachable producer is
/// retried in the background until it comes up.
pub fn connect<T>(addr: &str) -> std::io::Result<Subscriber<T>>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    // Resolve once up front so a typo is fatal at startup instead of being
    // retried forever.
    addr.to_socket_addrs()?;

    let (local_publisher, subscription) = mailbox::latest::<T>();
    let target = addr.to_string();
    thread::Builder::new()
        .name("link-reader".into())
        .spawn(move || reader_loop(target, local_publisher))
        .expect("failed to spawn link reader thread");

    Ok(subscription)
}

fn reader_loop<T>(target: String, local: Publisher<T>)
where
    T: DeserializeOwned + Clone,
{
    let mut announced = false;
    loop {
        match TcpStream::connect(&target) {
            Ok(stream) => {
                info!("connected to telemetry publisher at {target}");
                announced = false;
                let mut reader = BufReader::new(stream);
                loop {
                    match wire::read_frame::<_, T>(&mut reader) {
                        Ok(sample) => local.publish(sample),
                        Err(err) => {
                            warn!("telemetry stream from {target} ended: {err}");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                if !announced {
                    debug!("publisher at {target} not reachable yet: {err}");
                    announced = true;
                }
            }
        }
        thread::sleep(Duration::from_millis(RECONNECT_DELAY_MS));
    }
}
