//! TCP-keepalive (TKO) and ICMP-echo offload request builders.
//!
//! These format `wl_tko` and `icmp_echo_req` iovar payloads; the sequencing
//! rules (a TKO configure must happen with the offload disabled, then
//! re-enabled) live in [`crate::Control`].

use crate::events::{EventMsg, Verdict};
use crate::util::{put_le16, put_le32};
use crate::Shared;

pub(crate) const IOVAR_TKO: &str = "tko";
pub(crate) const IOVAR_ICMP_ECHO_REQ: &str = "icmp_echo_req";

// wl_tko sub-commands.
pub(crate) const TKO_SUBCMD_MAX_TCP: u16 = 0;
pub(crate) const TKO_SUBCMD_PARAM: u16 = 1;
pub(crate) const TKO_SUBCMD_ENABLE: u16 = 3;
pub(crate) const TKO_SUBCMD_AUTOENAB: u16 = 5;
pub(crate) const TKO_SUBCMD_FILTER: u16 = 6;

// Sub-command id + payload length prefix.
pub(crate) const TKO_HDR_LEN: usize = 4;

const TKO_AUTO_VER: u16 = 1;

pub const TKO_FILTER_SRC_PORT: u8 = 0x01;
pub const TKO_FILTER_DST_PORT: u8 = 0x02;
pub const TKO_FILTER_SRC_IP: u8 = 0x04;
pub const TKO_FILTER_DST_IP: u8 = 0x08;

/// Keepalive timing. Zero fields fall back to the firmware defaults at
/// build time, so an all-default struct is a valid configuration.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TkoParams {
    pub interval_s: u16,
    pub retry_interval_s: u16,
    pub retry_count: u16,
}

pub(crate) const TKO_DEFAULT_INTERVAL_S: u16 = 20;
pub(crate) const TKO_DEFAULT_RETRY_INTERVAL_S: u16 = 3;
pub(crate) const TKO_DEFAULT_RETRY_COUNT: u16 = 3;

impl Default for TkoParams {
    fn default() -> Self {
        Self {
            interval_s: TKO_DEFAULT_INTERVAL_S,
            retry_interval_s: TKO_DEFAULT_RETRY_INTERVAL_S,
            retry_count: TKO_DEFAULT_RETRY_COUNT,
        }
    }
}

/// Connection selector for the automatic keepalive filter. Only the fields
/// named by the flag byte passed to [`build_tko_filter`] are sent.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TkoFilter {
    pub src_port: u16,
    pub dst_port: u16,
    pub src_ip: [u8; 16],
    pub dst_ip: [u8; 16],
}

fn tko_header(buf: &mut [u8], subcmd: u16, data_len: usize) {
    put_le16(buf, 0, subcmd);
    put_le16(buf, 2, (TKO_HDR_LEN + data_len) as u16);
}

pub(crate) fn build_tko_enable(buf: &mut [u8], enable: bool) -> usize {
    tko_header(buf, TKO_SUBCMD_ENABLE, 1);
    buf[TKO_HDR_LEN] = enable as u8;
    TKO_HDR_LEN + 1
}

pub(crate) fn build_tko_params(buf: &mut [u8], params: &TkoParams) -> usize {
    let interval = if params.interval_s == 0 {
        TKO_DEFAULT_INTERVAL_S
    } else {
        params.interval_s
    };
    let retry_interval = if params.retry_interval_s == 0 {
        TKO_DEFAULT_RETRY_INTERVAL_S
    } else {
        params.retry_interval_s
    };
    let retry_count = if params.retry_count == 0 {
        TKO_DEFAULT_RETRY_COUNT
    } else {
        params.retry_count
    };

    tko_header(buf, TKO_SUBCMD_PARAM, 6);
    put_le16(buf, TKO_HDR_LEN, interval);
    put_le16(buf, TKO_HDR_LEN + 2, retry_interval);
    put_le16(buf, TKO_HDR_LEN + 4, retry_count);
    TKO_HDR_LEN + 6
}

pub(crate) fn build_tko_autoenab(buf: &mut [u8], enable: bool) -> usize {
    // version, length-of-remainder, enable, pad.
    tko_header(buf, TKO_SUBCMD_AUTOENAB, 8);
    put_le16(buf, TKO_HDR_LEN, TKO_AUTO_VER);
    put_le16(buf, TKO_HDR_LEN + 2, 4);
    buf[TKO_HDR_LEN + 4] = enable as u8;
    buf[TKO_HDR_LEN + 5..TKO_HDR_LEN + 8].fill(0);
    TKO_HDR_LEN + 8
}

pub(crate) fn build_tko_filter(buf: &mut [u8], filter: &TkoFilter, flags: u8) -> usize {
    // version, length-of-remainder, sport, dport, src ip, dst ip.
    const DATA_LEN: usize = 40;
    tko_header(buf, TKO_SUBCMD_FILTER, DATA_LEN);
    let d = &mut buf[TKO_HDR_LEN..TKO_HDR_LEN + DATA_LEN];
    d.fill(0);
    put_le16(d, 0, TKO_AUTO_VER);
    put_le16(d, 2, (DATA_LEN - 4) as u16);
    if flags & TKO_FILTER_SRC_PORT != 0 {
        put_le16(d, 4, filter.src_port);
    }
    if flags & TKO_FILTER_DST_PORT != 0 {
        put_le16(d, 6, filter.dst_port);
    }
    if flags & TKO_FILTER_SRC_IP != 0 {
        d[8..24].copy_from_slice(&filter.src_ip);
    }
    if flags & TKO_FILTER_DST_IP != 0 {
        d[24..40].copy_from_slice(&filter.dst_ip);
    }
    TKO_HDR_LEN + DATA_LEN
}

/// Query builder for the firmware's supported connection count.
pub(crate) fn build_tko_max_tcp(buf: &mut [u8]) -> usize {
    tko_header(buf, TKO_SUBCMD_MAX_TCP, 4);
    buf[TKO_HDR_LEN..TKO_HDR_LEN + 4].fill(0);
    TKO_HDR_LEN + 4
}

// ---------------------------------------------------------------------------
// ICMP echo-request offload.

const ICMP_ECHO_REQ_VER: u16 = 1;
const ICMP_ECHO_CMD_HDR_LEN: usize = 6;

pub(crate) const ICMP_ECHO_REQ_ENAB: u8 = 0;
pub(crate) const ICMP_ECHO_REQ_ADD: u8 = 1;
pub(crate) const ICMP_ECHO_REQ_DEL: u8 = 2;
pub(crate) const ICMP_ECHO_REQ_START: u8 = 3;
pub(crate) const ICMP_ECHO_REQ_STOP: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IpVer {
    V4 = 4,
    V6 = 6,
}

/// A peer the firmware answers echo requests for while the host sleeps.
/// IPv4 addresses occupy the first four bytes of `ip`.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IcmpEchoPeer {
    pub ip_ver: IpVer,
    pub ip: [u8; 16],
    pub mac: [u8; 6],
    pub periodicity_s: u32,
    pub duration_s: u32,
}

fn icmp_echo_header(buf: &mut [u8], cmd_type: u8, data_len: usize) {
    put_le16(buf, 0, ICMP_ECHO_REQ_VER);
    put_le16(buf, 2, (ICMP_ECHO_CMD_HDR_LEN + data_len) as u16);
    buf[4] = cmd_type;
    buf[5] = 0;
}

pub(crate) fn build_icmp_echo_enable(buf: &mut [u8], enable: bool) -> usize {
    icmp_echo_header(buf, ICMP_ECHO_REQ_ENAB, 1);
    buf[ICMP_ECHO_CMD_HDR_LEN] = enable as u8;
    ICMP_ECHO_CMD_HDR_LEN + 1
}

pub(crate) fn build_icmp_echo_add(buf: &mut [u8], peer: &IcmpEchoPeer) -> usize {
    // Peer config: version, length, ip ver, address, mac, timing.
    const DATA_LEN: usize = 40;
    icmp_echo_header(buf, ICMP_ECHO_REQ_ADD, DATA_LEN);
    let d = &mut buf[ICMP_ECHO_CMD_HDR_LEN..ICMP_ECHO_CMD_HDR_LEN + DATA_LEN];
    d.fill(0);
    put_le16(d, 0, ICMP_ECHO_REQ_VER);
    put_le16(d, 2, DATA_LEN as u16);
    d[4] = peer.ip_ver as u8;
    d[8..24].copy_from_slice(&peer.ip);
    d[24..30].copy_from_slice(&peer.mac);
    // Trailing u32 pair is 4-aligned within the record.
    put_le32(d, 32, peer.periodicity_s);
    put_le32(d, 36, peer.duration_s);
    ICMP_ECHO_CMD_HDR_LEN + DATA_LEN
}

/// Delete/start/stop all address the peer the same way.
pub(crate) fn build_icmp_echo_peer_op(buf: &mut [u8], cmd_type: u8, ip_ver: IpVer, ip: &[u8; 16]) -> usize {
    const DATA_LEN: usize = 24;
    icmp_echo_header(buf, cmd_type, DATA_LEN);
    let d = &mut buf[ICMP_ECHO_CMD_HDR_LEN..ICMP_ECHO_CMD_HDR_LEN + DATA_LEN];
    d.fill(0);
    put_le16(d, 0, ICMP_ECHO_REQ_VER);
    put_le16(d, 2, DATA_LEN as u16);
    d[4] = ip_ver as u8;
    d[8..24].copy_from_slice(ip);
    ICMP_ECHO_CMD_HDR_LEN + DATA_LEN
}

/// Firmware notification that it answered (or failed to answer) an echo
/// request on the host's behalf.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IcmpEchoNotification {
    pub status: u32,
    pub reason: u32,
    pub peer: [u8; 6],
}

pub(crate) fn on_icmp_echo_event(shared: &Shared, msg: &EventMsg<'_>) -> Verdict {
    let note = IcmpEchoNotification {
        status: msg.status,
        reason: msg.reason,
        peer: msg.addr,
    };
    if shared.icmp_echo.try_send(note).is_err() {
        trace!("icmp echo notification queue full, dropping");
    }
    Verdict::Consumed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_frame_layout() {
        let mut buf = [0u8; 16];
        let n = build_tko_enable(&mut buf, true);
        assert_eq!(&buf[..n], &[3, 0, 5, 0, 1]);
        let n = build_tko_enable(&mut buf, false);
        assert_eq!(&buf[..n], &[3, 0, 5, 0, 0]);
    }

    #[test]
    fn zero_params_take_defaults() {
        let mut buf = [0u8; 16];
        let zeroed = TkoParams {
            interval_s: 0,
            retry_interval_s: 0,
            retry_count: 0,
        };
        let n = build_tko_params(&mut buf, &zeroed);
        assert_eq!(n, 10);
        assert_eq!(&buf[..4], &[1, 0, 10, 0]);
        assert_eq!(&buf[4..6], &TKO_DEFAULT_INTERVAL_S.to_le_bytes());
        assert_eq!(&buf[6..8], &TKO_DEFAULT_RETRY_INTERVAL_S.to_le_bytes());
        assert_eq!(&buf[8..10], &TKO_DEFAULT_RETRY_COUNT.to_le_bytes());
    }

    #[test]
    fn explicit_params_are_kept() {
        let mut buf = [0u8; 16];
        let params = TkoParams {
            interval_s: 60,
            retry_interval_s: 5,
            retry_count: 2,
        };
        build_tko_params(&mut buf, &params);
        assert_eq!(&buf[4..6], &60u16.to_le_bytes());
        assert_eq!(&buf[6..8], &5u16.to_le_bytes());
        assert_eq!(&buf[8..10], &2u16.to_le_bytes());
    }

    #[test]
    fn filter_honors_flag_byte() {
        let mut buf = [0u8; 64];
        let filter = TkoFilter {
            src_port: 1000,
            dst_port: 8883,
            src_ip: [1; 16],
            dst_ip: [2; 16],
        };
        let n = build_tko_filter(&mut buf, &filter, TKO_FILTER_DST_PORT | TKO_FILTER_DST_IP);
        assert_eq!(n, 44);
        assert_eq!(&buf[..2], &TKO_SUBCMD_FILTER.to_le_bytes());
        // Unselected fields stay zero.
        assert_eq!(&buf[8..10], &[0, 0]);
        assert_eq!(&buf[12..28], &[0; 16]);
        assert_eq!(&buf[10..12], &8883u16.to_le_bytes());
        assert_eq!(&buf[28..44], &[2; 16]);
    }

    #[test]
    fn icmp_echo_add_layout() {
        let peer = IcmpEchoPeer {
            ip_ver: IpVer::V4,
            ip: {
                let mut ip = [0u8; 16];
                ip[..4].copy_from_slice(&[192, 168, 1, 7]);
                ip
            },
            mac: [0xAA; 6],
            periodicity_s: 10,
            duration_s: 600,
        };
        let mut buf = [0u8; 64];
        let n = build_icmp_echo_add(&mut buf, &peer);
        assert_eq!(n, 46);
        assert_eq!(buf[4], ICMP_ECHO_REQ_ADD);
        assert_eq!(buf[10], 4); // ip version
        assert_eq!(&buf[14..18], &[192, 168, 1, 7]);
        assert_eq!(&buf[30..36], &[0xAA; 6]);
        assert_eq!(&buf[38..42], &10u32.to_le_bytes());
        assert_eq!(&buf[42..46], &600u32.to_le_bytes());
    }

    #[test]
    fn peer_ops_share_one_layout() {
        let ip = [9u8; 16];
        let mut start = [0u8; 32];
        let mut stop = [0u8; 32];
        let n1 = build_icmp_echo_peer_op(&mut start, ICMP_ECHO_REQ_START, IpVer::V6, &ip);
        let n2 = build_icmp_echo_peer_op(&mut stop, ICMP_ECHO_REQ_STOP, IpVer::V6, &ip);
        assert_eq!(n1, n2);
        assert_eq!(start[4], ICMP_ECHO_REQ_START);
        assert_eq!(stop[4], ICMP_ECHO_REQ_STOP);
        assert_eq!(&start[5..n1], &stop[5..n2]);
    }
}
