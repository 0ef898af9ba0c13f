use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use net2::UdpBuilder;

use crate::error::{Error, Result};
use crate::schedule::CycleSchedule;
use crate::shutdown::Shutdown;
use crate::trace::MAX_PAYLOAD_BYTES;

const PAYLOAD_FILL: u8 = b'x';

/// What a stopped flow reports back to its slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowReport {
    pub flow_id: usize,
    pub app: String,
    pub source_port: u16,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    pub elapsed: Duration,
}

/// A flow that has an app and a schedule but no socket yet.
#[derive(Debug, Clone)]
pub struct FlowReplayer {
    flow_id: usize,
    app: String,
    schedule: CycleSchedule,
    run_time: Duration,
}

/// A flow holding its bound socket, ready to replay.
#[derive(Debug)]
pub struct BoundFlow {
    flow: FlowReplayer,
    socket: UdpSocket,
    source_port: u16,
}

/// Source endpoint for `flow_id`: one port per flow above `base_port`. A base
/// port of 0 leaves every flow's port to the OS.
pub fn source_addr(ip: IpAddr, base_port: u16, flow_id: usize) -> Result<SocketAddr> {
    if base_port == 0 {
        return Ok(SocketAddr::new(ip, 0));
    }
    let port = (base_port as usize)
        .checked_add(flow_id)
        .filter(|&p| p <= u16::MAX as usize)
        .ok_or_else(|| Error::SocketBind {
            addr: SocketAddr::new(ip, base_port),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("flow {} has no source port above {}", flow_id, base_port),
            ),
        })?;
    Ok(SocketAddr::new(ip, port as u16))
}

fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let builder = match addr {
        SocketAddr::V4(_) => UdpBuilder::new_v4()?,
        SocketAddr::V6(_) => UdpBuilder::new_v6()?,
    };
    builder.bind(addr)
}

impl FlowReplayer {
    pub fn new<S: Into<String>>(
        flow_id: usize,
        app: S,
        schedule: CycleSchedule,
        run_time: Duration,
    ) -> Self {
        FlowReplayer {
            flow_id,
            app: app.into(),
            schedule,
            run_time,
        }
    }

    pub fn flow_id(&self) -> usize {
        self.flow_id
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn schedule(&self) -> &CycleSchedule {
        &self.schedule
    }

    pub fn bind(self, source_ip: IpAddr, base_port: u16) -> Result<BoundFlow> {
        let addr = source_addr(source_ip, base_port, self.flow_id)?;
        let socket = bind_udp(addr).map_err(|source| Error::SocketBind { addr, source })?;
        let source_port = socket.local_addr().map(|a| a.port()).unwrap_or(addr.port());
        Ok(BoundFlow {
            flow: self,
            socket,
            source_port,
        })
    }
}

impl BoundFlow {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Replays the schedule to `dest` until the run time is used up or
    /// `shutdown` fires. The socket is closed when this returns.
    ///
    /// Elapsed time is checked before every sleep and before every send. A
    /// failed send is counted and skipped.
    pub fn run(self, dest: SocketAddr, shutdown: &Shutdown, tag: &str) -> FlowReport {
        let BoundFlow {
            flow,
            socket,
            source_port,
        } = self;
        let payload = vec![PAYLOAD_FILL; MAX_PAYLOAD_BYTES];
        let run_time = flow.run_time;
        let mut report = FlowReport {
            flow_id: flow.flow_id,
            app: flow.app.clone(),
            source_port,
            packets_sent: 0,
            bytes_sent: 0,
            send_errors: 0,
            elapsed: Duration::ZERO,
        };

        let start = Instant::now();
        for step in flow.schedule.cycle() {
            let elapsed = start.elapsed();
            if elapsed >= run_time || shutdown.is_triggered() {
                break;
            }
            if step.delta > 0.0 && !shutdown.sleep(step.delay().min(run_time - elapsed)) {
                break;
            }
            if start.elapsed() >= run_time {
                break;
            }

            let len = step.payload_bytes.min(payload.len());
            match socket.send_to(&payload[..len], dest) {
                Ok(n) => {
                    report.packets_sent += 1;
                    report.bytes_sent += n as u64;
                }
                Err(e) => {
                    report.send_errors += 1;
                    match e.raw_os_error() {
                        Some(libc::ENOBUFS) | Some(libc::EAGAIN) => {
                            debug!("[{} FLOW {}] send dropped: {}", tag, flow.flow_id, e)
                        }
                        _ if report.send_errors == 1 => warn!(
                            "[{} FLOW {}] send to {} failed: {}",
                            tag,
                            flow.flow_id,
                            dest,
                            Error::Send(e)
                        ),
                        _ => debug!("[{} FLOW {}] send failed: {}", tag, flow.flow_id, e),
                    }
                }
            }
        }
        report.elapsed = start.elapsed();
        drop(socket);

        info!(
            "[{} FLOW {}] app={} stopped. Sent {} packets.",
            tag, report.flow_id, report.app, report.packets_sent
        );
        report
    }
}
