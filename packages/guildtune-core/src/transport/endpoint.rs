//! [`VoiceTransport`] that maps channel names to configured output endpoints.
//!
//! Each channel is an output URL (`udp://`, `rtp://`, `icecast://`, ...) that
//! the audio process streams into. Connecting means checking that the endpoint
//! is reachable: a TCP connect for TCP-based schemes, address resolution for
//! datagram schemes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::net::{lookup_host, TcpStream};

use super::{TransportError, VoiceConnection, VoiceTransport};

/// Transport over a static channel → endpoint table.
pub struct EndpointTransport {
    endpoints: Arc<HashMap<String, String>>,
}

impl EndpointTransport {
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self {
            endpoints: Arc::new(endpoints),
        }
    }

    /// Known channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.endpoints.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl VoiceTransport for EndpointTransport {
    async fn connect(
        &self,
        channel: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn VoiceConnection>, TransportError> {
        let url = lookup(&self.endpoints, channel)?;
        probe(&url, timeout).await?;

        log::debug!("[Transport] Channel {} reachable at {}", channel, url);
        Ok(Arc::new(EndpointConnection {
            endpoints: Arc::clone(&self.endpoints),
            current: RwLock::new((channel.to_string(), url)),
            connected: AtomicBool::new(true),
            probe_timeout: timeout,
        }))
    }
}

/// Handle for one channel endpoint.
struct EndpointConnection {
    endpoints: Arc<HashMap<String, String>>,
    /// Channel name and its endpoint URL.
    current: RwLock<(String, String)>,
    connected: AtomicBool,
    probe_timeout: Duration,
}

#[async_trait]
impl VoiceConnection for EndpointConnection {
    fn channel(&self) -> String {
        self.current.read().0.clone()
    }

    fn sink_url(&self) -> String {
        self.current.read().1.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn move_to(&self, channel: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let url = lookup(&self.endpoints, channel)?;
        probe(&url, self.probe_timeout).await?;
        *self.current.write() = (channel.to_string(), url);
        Ok(())
    }

    async fn disconnect(&self, _force: bool) -> Result<(), TransportError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            log::debug!("[Transport] Released channel {}", self.channel());
        }
        Ok(())
    }
}

fn lookup(endpoints: &HashMap<String, String>, channel: &str) -> Result<String, TransportError> {
    endpoints
        .get(channel)
        .cloned()
        .ok_or_else(|| TransportError::UnknownChannel(channel.to_string()))
}

/// How reachability of an endpoint is checked.
#[derive(Debug, PartialEq, Eq)]
enum Probe {
    Tcp(String),
    Resolve(String),
    Local,
}

/// Splits an endpoint URL into the probe it needs.
fn probe_for(url: &str) -> Result<Probe, TransportError> {
    let Some((scheme, rest)) = url.split_once("://") else {
        // Plain paths are local files or devices.
        return Ok(Probe::Local);
    };

    let authority = rest.split(['/', '?']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    if host_port.is_empty() {
        return match scheme {
            "file" | "pipe" => Ok(Probe::Local),
            _ => Err(TransportError::Other(format!("endpoint has no host: {}", url))),
        };
    }

    match scheme {
        "udp" | "rtp" | "srt" => Ok(Probe::Resolve(host_port.to_string())),
        "file" | "pipe" => Ok(Probe::Local),
        _ => {
            let addr = if host_port.rsplit_once(':').is_some_and(|(_, port)| {
                !port.is_empty() && port.chars().all(|c| c.is_ascii_digit())
            }) {
                host_port.to_string()
            } else {
                format!("{}:{}", host_port, default_port(scheme))
            };
            Ok(Probe::Tcp(addr))
        }
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "https" => 443,
        "rtmp" => 1935,
        "icecast" => 8000,
        _ => 80,
    }
}

async fn probe(url: &str, timeout: Duration) -> Result<(), TransportError> {
    match probe_for(url)? {
        Probe::Local => Ok(()),
        Probe::Tcp(addr) => match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await
        {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Unreachable(format!("{}: {}", addr, e))),
            Err(_) => Err(TransportError::Unreachable(format!(
                "{}: no answer within {}s",
                addr,
                timeout.as_secs()
            ))),
        },
        Probe::Resolve(addr) => match tokio::time::timeout(timeout, lookup_host(&addr)).await {
            Ok(Ok(mut addrs)) => match addrs.next() {
                Some(_) => Ok(()),
                None => Err(TransportError::Unreachable(format!("{}: no addresses", addr))),
            },
            Ok(Err(e)) => Err(TransportError::Unreachable(format!("{}: {}", addr, e))),
            Err(_) => Err(TransportError::Unreachable(format!(
                "{}: resolution timed out",
                addr
            ))),
        },
    }
}
