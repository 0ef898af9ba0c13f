use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::info;
use net2::UdpBuilder;

use crate::error::{Error, Result};
use crate::shutdown::Shutdown;

const RECV_BUF_SIZE: usize = 65535;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub packets: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

fn bind_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let builder = match addr {
        SocketAddr::V4(_) => UdpBuilder::new_v4()?,
        SocketAddr::V6(_) => UdpBuilder::new_v6()?,
    };
    builder.reuse_address(true)?;
    let socket = builder.bind(addr)?;
    socket.set_read_timeout(Some(POLL_INTERVAL))?;
    Ok(socket)
}

/// Counts datagrams arriving on one UDP socket.
pub struct Sink {
    socket: UdpSocket,
}

impl Sink {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = bind_socket(addr).map_err(|source| Error::SocketBind { addr, source })?;
        Ok(Sink { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives until `shutdown` fires.
    pub fn run(&self, shutdown: &Shutdown) -> io::Result<SinkReport> {
        let addr = self.local_addr()?;
        info!("[UDP-SERVER] Listening on {}", addr);

        let mut buf = vec![0; RECV_BUF_SIZE];
        let mut report = SinkReport::default();
        let start = Instant::now();
        while !shutdown.is_triggered() {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    report.packets += 1;
                    report.bytes += len as u64;
                    if report.packets % PROGRESS_EVERY == 0 {
                        info!(
                            "[UDP-SERVER] {} packets (last from {}) in {:.2}s",
                            report.packets,
                            from,
                            start.elapsed().as_secs_f64()
                        );
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        report.elapsed = start.elapsed();
        info!(
            "[UDP-SERVER] Total {} packets in {:.2}s",
            report.packets,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }
}
