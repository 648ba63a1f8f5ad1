//! Stack configuration. The defaults mirror the constants of the classic
//! BSD-derived stacks: 500ms/100ms ticks, 120s MSL, 1s..64s RTO, 12 retries.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::link::MacAddr;

/// Identity of the endpoint and the TAP device it is attached to.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Name of the TAP interface to create or attach to.
    pub interface: String,
    /// Hardware address of the stack (not of the host side of the TAP).
    pub mac: MacAddr,
    /// IPv4 address owned by the stack.
    pub ipv4: Ipv4Addr,
    /// Address assigned to the host side of the TAP interface.
    pub host_addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub mtu: u16,
    pub arp_capacity: usize,
    pub tcp: TcpConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            interface: "tap0".into(),
            mac: MacAddr([0x00, 0x50, 0x56, 0xf1, 0xc4, 0x10]),
            ipv4: Ipv4Addr::new(10, 0, 0, 6),
            host_addr: Ipv4Addr::new(10, 0, 0, 5),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            mtu: 1500,
            arp_capacity: 64,
            tcp: TcpConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Maximum number of table entries, listeners included.
    pub max_connections: usize,
    /// MSS assumed when the peer's SYN carries no MSS option.
    pub default_mss: u16,
    /// MSS advertised on our SYNs.
    pub local_mss: u16,
    /// Receive buffer size, i.e. the largest window we advertise.
    pub recv_buffer: usize,
    /// Bytes the application may queue ahead of the send window.
    pub send_buffer: usize,

    pub fast_tick: Duration,
    pub slow_tick: Duration,

    pub rto_initial: Duration,
    pub rto_min: Duration,
    pub rto_max: Duration,
    pub max_retransmissions: u32,

    pub persist_min: Duration,
    pub persist_max: Duration,

    /// Connection-establishment timeout.
    pub keep_init: Duration,
    /// Idle time before the first keepalive probe.
    pub keep_idle: Duration,
    pub keep_interval: Duration,
    pub keep_count: u32,
    /// Probe idle established connections.
    pub keepalive: bool,

    pub msl: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
            default_mss: 536,
            local_mss: 1460,
            recv_buffer: 29200,
            send_buffer: 64 * 1024,
            fast_tick: Duration::from_millis(100),
            slow_tick: Duration::from_millis(500),
            rto_initial: Duration::from_secs(1),
            rto_min: Duration::from_secs(1),
            rto_max: Duration::from_secs(64),
            max_retransmissions: 12,
            persist_min: Duration::from_secs(5),
            persist_max: Duration::from_secs(64),
            keep_init: Duration::from_secs(75),
            keep_idle: Duration::from_secs(7200),
            keep_interval: Duration::from_secs(75),
            keep_count: 8,
            keepalive: false,
            msl: Duration::from_secs(120),
        }
    }
}

impl TcpConfig {
    pub fn time_wait(&self) -> Duration {
        self.msl * 2
    }
}
