//! Escan orchestration and scan-result parsing.
//!
//! A scan registers a transient event subscription, fires the `escan` iovar
//! and then streams partial results out of the event path through a bounded
//! channel. Firmware records that fail validation are dropped silently; the
//! stream ends when the firmware reports the scan complete or aborted.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::{Channel, TrySendError};

use crate::events::{self, EventMsg, Purpose, Verdict};
use crate::join::{
    Security, AES_ENABLED, ENTERPRISE_ENABLED, FBT_ENABLED, TKIP_ENABLED, WPA2_SECURITY,
    WPA2_SHA256_SECURITY, WPA3_SECURITY, WPA_SECURITY,
};
use crate::structs::{chanspec_band, Band, CHANSPEC_BAND_6G, CHANSPEC_BAND_MASK, CHANSPEC_CHAN_MASK};
use crate::util::{get_le16, get_le32, get_u8};
use crate::Shared;

pub(crate) const WL_BSS_INFO_VERSION: u32 = 109;
const WL_BSS_FLAGS_RSSI_ONCHANNEL: u8 = 0x04;
const MAX_RATESET_LEN: usize = 16;

// 802.11 capability bits.
const CAP_ESS: u16 = 0x0001;
const CAP_IBSS: u16 = 0x0002;
const CAP_PRIVACY: u16 = 0x0010;

// Information element ids.
const IE_COUNTRY: u8 = 7;
const IE_HT_CAPABILITIES: u8 = 45;
const IE_RSN: u8 = 48;
const IE_VENDOR: u8 = 221;
const IE_RSNX: u8 = 244;

const RSNX_SAE_H2E: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanType {
    Active = 0,
    Passive = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BssType {
    Independent = 0,
    Infrastructure = 1,
    Any = 2,
}

/// Parameters for [`crate::Control::scan`]. The defaults let firmware pick
/// its own dwell times and probe counts and sweep all channels.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions<'a> {
    pub ssid: Option<&'a [u8]>,
    pub bssid: Option<[u8; 6]>,
    pub scan_type: ScanType,
    pub bss_type: BssType,
    /// Channel numbers to scan; empty means all. Channels above 14 are
    /// taken to be 5 GHz.
    pub channels: &'a [u8],
    pub nprobes: Option<i32>,
    pub active_time_ms: Option<i32>,
    pub passive_time_ms: Option<i32>,
    pub home_time_ms: Option<i32>,
}

impl Default for ScanOptions<'_> {
    fn default() -> Self {
        Self {
            ssid: None,
            bssid: None,
            scan_type: ScanType::Active,
            bss_type: BssType::Any,
            channels: &[],
            nprobes: None,
            active_time_ms: None,
            passive_time_ms: None,
            home_time_ms: None,
        }
    }
}

/// One network found by a scan.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BssEntry {
    pub ssid: [u8; 32],
    pub ssid_len: u8,
    pub bssid: [u8; 6],
    pub rssi_dbm: i16,
    pub channel: u8,
    pub band: Band,
    pub security: Security,
    pub bss_type: BssType,
    pub max_data_rate_kbps: u32,
    /// SAE hash-to-element support advertised in the RSNX element.
    pub h2e_supported: bool,
    pub ccode: [u8; 2],
}

impl BssEntry {
    pub fn ssid(&self) -> &[u8] {
        &self.ssid[..self.ssid_len as usize]
    }
}

const fn empty_entry() -> BssEntry {
    BssEntry {
        ssid: [0; 32],
        ssid_len: 0,
        bssid: [0; 6],
        rssi_dbm: 0,
        channel: 0,
        band: Band::Band2G,
        security: Security::OPEN,
        bss_type: BssType::Any,
        max_data_rate_kbps: 0,
        h2e_supported: false,
        ccode: [0; 2],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanStatus {
    Completed,
    Aborted,
}

pub(crate) enum ScanItem {
    Bss(BssEntry),
    Done(ScanStatus),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running { interested: bool },
}

const SCAN_QUEUE_DEPTH: usize = 4;

pub(crate) struct ScanState {
    phase: BlockingMutex<CriticalSectionRawMutex, RefCell<Phase>>,
    results: Channel<CriticalSectionRawMutex, ScanItem, SCAN_QUEUE_DEPTH>,
}

impl ScanState {
    pub(crate) const fn new() -> Self {
        Self {
            phase: BlockingMutex::new(RefCell::new(Phase::Idle)),
            results: Channel::new(),
        }
    }

    pub(crate) fn start(&self) {
        // Drain anything a previous, abandoned scan left behind.
        while self.results.try_receive().is_ok() {}
        self.phase
            .lock(|p| *p.borrow_mut() = Phase::Running { interested: true });
    }

    pub(crate) fn is_running(&self) -> bool {
        self.phase.lock(|p| matches!(*p.borrow(), Phase::Running { .. }))
    }

    fn is_interested(&self) -> bool {
        self.phase
            .lock(|p| matches!(*p.borrow(), Phase::Running { interested: true }))
    }

    pub(crate) fn lose_interest(&self) {
        self.phase.lock(|p| {
            let mut p = p.borrow_mut();
            if matches!(*p, Phase::Running { .. }) {
                *p = Phase::Running { interested: false };
            }
        });
    }

    /// Transitions to idle exactly once; later terminal events are ignored.
    pub(crate) fn finish(&self) -> bool {
        self.phase.lock(|p| {
            let mut p = p.borrow_mut();
            let was_running = matches!(*p, Phase::Running { .. });
            *p = Phase::Idle;
            was_running
        })
    }

    fn push(&self, item: ScanItem) {
        match item {
            // Over-capacity partial results are dropped; the scan keeps going.
            ScanItem::Bss(_) => {
                if self.results.try_send(item).is_err() {
                    trace!("scan result queue full, dropping entry");
                }
            }
            // The terminal marker must land; make room by discarding the
            // oldest result if necessary.
            ScanItem::Done(_) => {
                let mut item = item;
                loop {
                    match self.results.try_send(item) {
                        Ok(()) => break,
                        Err(TrySendError::Full(it)) => {
                            item = it;
                            let _ = self.results.try_receive();
                        }
                    }
                }
            }
        }
    }
}

/// Stream of scan results. Dropping it early leaves the firmware scan
/// running but stops result recording; the event path still consumes the
/// terminal event and cleans up the subscription.
pub struct Scanner<'a> {
    shared: &'a Shared,
    done: bool,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(shared: &'a Shared) -> Self {
        Self { shared, done: false }
    }

    pub async fn next(&mut self) -> Option<BssEntry> {
        if self.done {
            return None;
        }
        match self.shared.scan.results.receive().await {
            ScanItem::Bss(entry) => Some(entry),
            ScanItem::Done(status) => {
                debug!("scan finished: {:?}", status);
                self.done = true;
                None
            }
        }
    }

    /// Drains the whole scan. With an empty `out` only counts networks;
    /// otherwise fills at most `out.len()` entries and keeps draining to
    /// completion without recording.
    pub async fn collect(mut self, out: &mut [BssEntry]) -> usize {
        let mut n = 0;
        while let Some(entry) = self.next().await {
            if out.is_empty() {
                n += 1;
            } else if n < out.len() {
                out[n] = entry;
                n += 1;
            }
        }
        n
    }
}

impl Drop for Scanner<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.shared.scan.lose_interest();
        }
    }
}

/// Event-path half of a scan: validates partials, feeds the result queue and
/// retires the subscription on the terminal event.
pub(crate) fn on_scan_event(shared: &Shared, msg: &EventMsg<'_>) -> Verdict {
    match msg.status {
        events::ESTATUS_PARTIAL => {
            if !shared.scan.is_running() {
                return Verdict::Consumed;
            }
            if let Some(entry) = parse_escan_partial(msg.payload) {
                if shared.scan.is_interested() {
                    shared.scan.push(ScanItem::Bss(entry));
                }
            } else {
                trace!("dropping malformed scan record");
            }
            Verdict::Consumed
        }
        events::ESTATUS_SUCCESS => finish_scan(shared, msg.ifidx, ScanStatus::Completed),
        events::ESTATUS_NEWSCAN | events::ESTATUS_NEWASSOC | events::ESTATUS_ABORT => {
            finish_scan(shared, msg.ifidx, ScanStatus::Aborted)
        }
        other => {
            warn!("unexpected escan status {}", other);
            Verdict::Consumed
        }
    }
}

fn finish_scan(shared: &Shared, ifidx: u8, status: ScanStatus) -> Verdict {
    if shared.scan.finish() {
        shared.scan.push(ScanItem::Done(status));
        shared
            .registry
            .lock(|r| r.borrow_mut().deregister(ifidx, Purpose::Scan));
    }
    Verdict::Consumed
}

// ---------------------------------------------------------------------------
// Record parsing.

/// Parses the payload of one partial escan event. Returns None for records
/// that fail any validation, which the caller drops without erroring the
/// scan.
pub(crate) fn parse_escan_partial(payload: &[u8]) -> Option<BssEntry> {
    // Escan result header: buflen, version, sync id, bss count.
    let bss_count = get_le16(payload, 10)?;
    if bss_count != 1 {
        return None;
    }
    parse_bss_info(payload.get(12..)?)
}

pub(crate) fn parse_bss_info(bss: &[u8]) -> Option<BssEntry> {
    if get_le32(bss, 0)? != WL_BSS_INFO_VERSION {
        return None;
    }
    let length = get_le32(bss, 4)? as usize;
    if length > bss.len() {
        return None;
    }

    let ssid_len = get_u8(bss, 18)?;
    if ssid_len as usize > 32 {
        return None;
    }

    let ie_offset = get_le16(bss, 116)? as usize;
    let ie_length = get_le32(bss, 120)? as usize;
    if ie_offset < 12 || ie_offset + ie_length > length {
        return None;
    }
    let ies = &bss[ie_offset..ie_offset + ie_length];

    // Results heard while off their home channel carry unusable RSSI.
    let flags = get_u8(bss, 96)?;
    if flags & WL_BSS_FLAGS_RSSI_ONCHANNEL == 0 {
        return None;
    }

    let mut entry = empty_entry();
    entry.ssid_len = ssid_len;
    entry.ssid[..ssid_len as usize].copy_from_slice(bss.get(19..19 + ssid_len as usize)?);
    entry.bssid.copy_from_slice(bss.get(8..14)?);
    entry.rssi_dbm = get_le16(bss, 78)? as i16;

    let capability = get_le16(bss, 16)?;
    entry.bss_type = if capability & CAP_ESS != 0 {
        BssType::Infrastructure
    } else if capability & CAP_IBSS != 0 {
        BssType::Independent
    } else {
        BssType::Any
    };

    // Highest basic rate; HT rates may supersede it below.
    let rate_count = (get_le32(bss, 52)? as usize).min(MAX_RATESET_LEN);
    let mut max_rate = 0u32;
    for i in 0..rate_count {
        let rate = (get_u8(bss, 56 + i)? & 0x7F) as u32 * 500;
        max_rate = max_rate.max(rate);
    }
    entry.max_data_rate_kbps = max_rate;

    let n_cap = get_u8(bss, 81)? != 0;
    if n_cap {
        if let Some(ht) = find_ie(ies, IE_HT_CAPABILITIES) {
            if let Some(rate) = ht_max_rate(bss, ht) {
                entry.max_data_rate_kbps = rate;
            }
        }
    }

    entry.security = parse_security(ies, capability);

    if let Some(country) = find_ie(ies, IE_COUNTRY) {
        if country.len() >= 2 {
            entry.ccode = [country[0], country[1]];
        }
    }
    if let Some(rsnx) = find_ie(ies, IE_RSNX) {
        entry.h2e_supported = rsnx.first().is_some_and(|b| b & RSNX_SAE_H2E != 0);
    }

    let chanspec = get_le16(bss, 72)?;
    entry.band = chanspec_band(chanspec);
    entry.channel = if chanspec & CHANSPEC_BAND_MASK == CHANSPEC_BAND_6G {
        // 6 GHz chanspecs carry the control channel directly.
        (chanspec & CHANSPEC_CHAN_MASK) as u8
    } else if n_cap {
        get_u8(bss, 88)? // ctl_ch
    } else {
        (chanspec & CHANSPEC_CHAN_MASK) as u8
    };

    Some(entry)
}

/// Walks the information elements for the first one with the given id.
fn find_ie(mut ies: &[u8], id: u8) -> Option<&[u8]> {
    while ies.len() >= 2 {
        let (ie_id, len) = (ies[0], ies[1] as usize);
        let body = ies.get(2..2 + len)?;
        if ie_id == id {
            return Some(body);
        }
        ies = &ies[2 + len..];
    }
    None
}

const RSN_SUITE_OUI: [u8; 3] = [0x00, 0x0F, 0xAC];
const WPA_VENDOR_OUI: [u8; 4] = [0x00, 0x50, 0xF2, 0x01];

const CIPHER_TKIP: u8 = 2;
const CIPHER_CCMP: u8 = 4;

const AKM_8021X: u8 = 1;
const AKM_PSK: u8 = 2;
const AKM_FT_8021X: u8 = 3;
const AKM_FT_PSK: u8 = 4;
const AKM_PSK_SHA256: u8 = 6;
const AKM_SAE: u8 = 8;

fn parse_security(ies: &[u8], capability: u16) -> Security {
    if let Some(rsn) = find_ie(ies, IE_RSN) {
        if let Some(sec) = parse_rsn(rsn) {
            return sec;
        }
    }
    if let Some(vendor) = find_ie_vendor_wpa(ies) {
        if let Some(sec) = parse_wpa(vendor) {
            return sec;
        }
    }
    if capability & CAP_PRIVACY != 0 {
        Security::WEP_PSK
    } else {
        Security::OPEN
    }
}

fn find_ie_vendor_wpa(mut ies: &[u8]) -> Option<&[u8]> {
    while ies.len() >= 2 {
        let (ie_id, len) = (ies[0], ies[1] as usize);
        let body = ies.get(2..2 + len)?;
        if ie_id == IE_VENDOR && body.get(..4) == Some(&WPA_VENDOR_OUI) {
            return Some(&body[4..]);
        }
        ies = &ies[2 + len..];
    }
    None
}

fn cipher_bits(suite_type: u8) -> u32 {
    match suite_type {
        CIPHER_TKIP => TKIP_ENABLED,
        CIPHER_CCMP => AES_ENABLED,
        _ => 0,
    }
}

/// RSN element: group cipher, pairwise cipher list, AKM list. Bits are ORed
/// so mixed-mode networks report every mode they offer.
fn parse_rsn(rsn: &[u8]) -> Option<Security> {
    let mut sec = 0u32;
    let mut off = 2; // version

    let group = rsn.get(off..off + 4)?;
    if group[..3] == RSN_SUITE_OUI {
        sec |= cipher_bits(group[3]);
    }
    off += 4;

    let pairwise_count = get_le16(rsn, off)? as usize;
    off += 2;
    for _ in 0..pairwise_count {
        let suite = rsn.get(off..off + 4)?;
        if suite[..3] == RSN_SUITE_OUI {
            sec |= cipher_bits(suite[3]);
        }
        off += 4;
    }

    let akm_count = get_le16(rsn, off)? as usize;
    off += 2;
    for _ in 0..akm_count {
        let suite = rsn.get(off..off + 4)?;
        if suite[..3] == RSN_SUITE_OUI {
            sec |= match suite[3] {
                AKM_PSK => WPA2_SECURITY,
                AKM_PSK_SHA256 => WPA2_SECURITY | WPA2_SHA256_SECURITY,
                AKM_SAE => WPA3_SECURITY,
                AKM_8021X => WPA2_SECURITY | ENTERPRISE_ENABLED,
                AKM_FT_PSK => WPA2_SECURITY | FBT_ENABLED,
                AKM_FT_8021X => WPA2_SECURITY | ENTERPRISE_ENABLED | FBT_ENABLED,
                _ => 0,
            };
        }
        off += 4;
    }

    (sec != 0).then_some(Security(sec))
}

/// WPA vendor element, same shape as RSN after the OUI/type prefix.
fn parse_wpa(wpa: &[u8]) -> Option<Security> {
    let mut sec = WPA_SECURITY;
    let mut off = 2; // version

    let group = wpa.get(off..off + 4)?;
    sec |= cipher_bits(group[3]);
    off += 4;

    let pairwise_count = get_le16(wpa, off)? as usize;
    off += 2;
    for _ in 0..pairwise_count {
        let suite = wpa.get(off..off + 4)?;
        sec |= cipher_bits(suite[3]);
        off += 4;
    }

    Some(Security(sec))
}

// HT capability info bits.
const HT_CAP_40MHZ: u16 = 0x0002;
const HT_CAP_SGI_20: u16 = 0x0020;
const HT_CAP_SGI_40: u16 = 0x0040;

/// Peak HT rate from the highest advertised MCS index. The table encodes
/// rates in 100 kbps units; the encoded value is authoritative, never
/// recomputed.
fn ht_max_rate(bss: &[u8], ht_ie: &[u8]) -> Option<u32> {
    let cap_info = get_le16(ht_ie, 0)?;
    let wide = cap_info & HT_CAP_40MHZ != 0;
    let sgi = if wide {
        cap_info & HT_CAP_SGI_40 != 0
    } else {
        cap_info & HT_CAP_SGI_20 != 0
    };

    let mcs_set = bss.get(100..116)?;
    for mcs in (0..32usize).rev() {
        if mcs_set[mcs / 8] & (1 << (mcs % 8)) != 0 {
            let col = (wide as usize) * 2 + sgi as usize;
            return Some(MCS_RATE_100KBPS[mcs][col] as u32 * 100);
        }
    }
    None
}

/// HT MCS 0-31 peak rates in 100 kbps units.
/// Columns: 20 MHz long GI, 20 MHz short GI, 40 MHz long GI, 40 MHz short GI.
#[rustfmt::skip]
const MCS_RATE_100KBPS: [[u16; 4]; 32] = [
    [  65,   72,  135,  150],
    [ 130,  144,  270,  300],
    [ 195,  217,  405,  450],
    [ 260,  289,  540,  600],
    [ 390,  433,  810,  900],
    [ 520,  578, 1080, 1200],
    [ 585,  650, 1215, 1350],
    [ 650,  722, 1350, 1500],
    [ 130,  144,  270,  300],
    [ 260,  289,  540,  600],
    [ 390,  433,  810,  900],
    [ 520,  578, 1080, 1200],
    [ 780,  867, 1620, 1800],
    [1040, 1156, 2160, 2400],
    [1170, 1300, 2430, 2700],
    [1300, 1444, 2700, 3000],
    [ 195,  217,  405,  450],
    [ 390,  433,  810,  900],
    [ 585,  650, 1215, 1350],
    [ 780,  867, 1620, 1800],
    [1170, 1300, 2430, 2700],
    [1560, 1733, 3240, 3600],
    [1755, 1950, 3645, 4050],
    [1950, 2167, 4050, 4500],
    [ 260,  289,  540,  600],
    [ 520,  578, 1080, 1200],
    [ 780,  867, 1620, 1800],
    [1040, 1156, 2160, 2400],
    [1560, 1733, 3240, 3600],
    [2080, 2311, 4320, 4800],
    [2340, 2600, 4860, 5400],
    [2600, 2889, 5400, 6000],
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, SCAN_EVENTS};
    use embassy_futures::{block_on, join::join};

    const BSS_FIXED_LEN: usize = 128;

    /// Builds a minimal valid v109 bss_info record.
    fn bss_record(ssid: &[u8], ies: &[u8]) -> std::vec::Vec<u8> {
        let mut buf = std::vec![0u8; BSS_FIXED_LEN + ies.len()];
        let total = buf.len() as u32;
        buf[0..4].copy_from_slice(&WL_BSS_INFO_VERSION.to_le_bytes());
        buf[4..8].copy_from_slice(&total.to_le_bytes());
        buf[8..14].copy_from_slice(&[0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        buf[16..18].copy_from_slice(&CAP_ESS.to_le_bytes()); // capability
        buf[18] = ssid.len() as u8;
        buf[19..19 + ssid.len()].copy_from_slice(ssid);
        buf[52..56].copy_from_slice(&2u32.to_le_bytes()); // rate count
        buf[56] = 0x82; // 1 Mbps basic
        buf[57] = 0x6C; // 54 Mbps
        buf[72..74].copy_from_slice(&(0x1000u16 | 6).to_le_bytes()); // 2G ch6
        buf[78..80].copy_from_slice(&(-42i16).to_le_bytes()); // rssi
        buf[96] = WL_BSS_FLAGS_RSSI_ONCHANNEL;
        buf[116..118].copy_from_slice(&(BSS_FIXED_LEN as u16).to_le_bytes());
        buf[120..124].copy_from_slice(&(ies.len() as u32).to_le_bytes());
        buf[BSS_FIXED_LEN..].copy_from_slice(ies);
        buf
    }

    fn escan_partial(bss: &[u8]) -> std::vec::Vec<u8> {
        let mut buf = std::vec![0u8; 12 + bss.len()];
        buf[0..4].copy_from_slice(&((12 + bss.len()) as u32).to_le_bytes());
        buf[10..12].copy_from_slice(&1u16.to_le_bytes()); // bss count
        buf[12..].copy_from_slice(bss);
        buf
    }

    fn rsn_psk_ccmp() -> std::vec::Vec<u8> {
        // version + group + pairwise count/list + akm count/list = 18 bytes.
        let mut ie = std::vec![IE_RSN, 18];
        ie.extend_from_slice(&1u16.to_le_bytes()); // version
        ie.extend_from_slice(&[0x00, 0x0F, 0xAC, CIPHER_CCMP]); // group
        ie.extend_from_slice(&1u16.to_le_bytes());
        ie.extend_from_slice(&[0x00, 0x0F, 0xAC, CIPHER_CCMP]); // pairwise
        ie.extend_from_slice(&1u16.to_le_bytes());
        ie.extend_from_slice(&[0x00, 0x0F, 0xAC, AKM_PSK]); // akm
        ie
    }

    #[test]
    fn parses_wpa2_network() {
        let record = bss_record(b"testnet", &rsn_psk_ccmp());
        let entry = parse_escan_partial(&escan_partial(&record)).unwrap();
        assert_eq!(entry.ssid(), b"testnet");
        assert_eq!(entry.security, Security::WPA2_AES_PSK);
        assert_eq!(entry.channel, 6);
        assert_eq!(entry.band, Band::Band2G);
        assert_eq!(entry.rssi_dbm, -42);
        assert_eq!(entry.bss_type, BssType::Infrastructure);
        assert_eq!(entry.max_data_rate_kbps, 54 * 500 * 2);
    }

    #[test]
    fn version_mismatch_is_dropped() {
        let mut record = bss_record(b"x", &[]);
        record[0] = 108;
        assert!(parse_escan_partial(&escan_partial(&record)).is_none());
    }

    #[test]
    fn oversized_ssid_is_dropped() {
        let mut record = bss_record(b"x", &[]);
        record[18] = 33;
        assert!(parse_escan_partial(&escan_partial(&record)).is_none());
    }

    #[test]
    fn ie_bounds_are_checked() {
        let mut record = bss_record(b"x", &[]);
        record[120..124].copy_from_slice(&1000u32.to_le_bytes());
        assert!(parse_escan_partial(&escan_partial(&record)).is_none());
    }

    #[test]
    fn off_channel_results_are_dropped() {
        let mut record = bss_record(b"x", &[]);
        record[96] = 0;
        assert!(parse_escan_partial(&escan_partial(&record)).is_none());
    }

    #[test]
    fn multi_bss_records_are_dropped() {
        let record = bss_record(b"x", &[]);
        let mut partial = escan_partial(&record);
        partial[10] = 2;
        assert!(parse_escan_partial(&partial).is_none());
    }

    #[test]
    fn privacy_without_rsn_is_wep() {
        let mut record = bss_record(b"old", &[]);
        record[16..18].copy_from_slice(&(CAP_ESS | CAP_PRIVACY).to_le_bytes());
        let entry = parse_bss_info(&record).unwrap();
        assert_eq!(entry.security, Security::WEP_PSK);
    }

    #[test]
    fn sae_with_h2e_flag() {
        let mut ies = std::vec![IE_RSN, 18];
        ies.extend_from_slice(&1u16.to_le_bytes());
        ies.extend_from_slice(&[0x00, 0x0F, 0xAC, CIPHER_CCMP]);
        ies.extend_from_slice(&1u16.to_le_bytes());
        ies.extend_from_slice(&[0x00, 0x0F, 0xAC, CIPHER_CCMP]);
        ies.extend_from_slice(&1u16.to_le_bytes());
        ies.extend_from_slice(&[0x00, 0x0F, 0xAC, AKM_SAE]);
        ies.extend_from_slice(&[IE_RSNX, 1, RSNX_SAE_H2E]);

        let record = bss_record(b"wpa3net", &ies);
        let entry = parse_bss_info(&record).unwrap();
        assert_eq!(entry.security, Security::WPA3_SAE_AES_PSK);
        assert!(entry.h2e_supported);
    }

    #[test]
    fn ht_rate_uses_encoded_table_value() {
        // HT caps: 40 MHz + SGI-40, highest MCS 7.
        let mut ies = std::vec![IE_HT_CAPABILITIES, 26];
        ies.extend_from_slice(&(HT_CAP_40MHZ | HT_CAP_SGI_40).to_le_bytes());
        ies.extend_from_slice(&[0u8; 24]);

        let mut record = bss_record(b"htnet", &ies);
        record[81] = 1; // n_cap
        record[88] = 11; // ctl_ch
        record[100] = 0xFF; // mcs 0..7
        let entry = parse_bss_info(&record).unwrap();
        assert_eq!(entry.max_data_rate_kbps, 1500 * 100);
        assert_eq!(entry.channel, 11);
    }

    #[test]
    fn collect_respects_capacity_and_counts_with_empty_buffer() {
        block_on(async {
            let shared = Shared::new();
            shared.scan.start();

            let producer = async {
                for i in 0..6u8 {
                    let mut entry = empty_entry();
                    entry.channel = i;
                    shared.scan.results.send(ScanItem::Bss(entry)).await;
                }
                shared.scan.results.send(ScanItem::Done(ScanStatus::Completed)).await;
            };
            let consumer = async {
                let mut out = [empty_entry(); 2];
                Scanner::new(&shared).collect(&mut out).await
            };
            let ((), n) = join(producer, consumer).await;
            assert_eq!(n, 2);

            // Count-only mode: empty output buffer, all six still counted.
            shared.scan.start();
            let producer = async {
                for _ in 0..6u8 {
                    shared.scan.results.send(ScanItem::Bss(empty_entry())).await;
                }
                shared.scan.results.send(ScanItem::Done(ScanStatus::Completed)).await;
            };
            let consumer = Scanner::new(&shared).collect(&mut []);
            let ((), n) = join(producer, consumer).await;
            assert_eq!(n, 6);
        });
    }

    #[test]
    fn disinterest_still_processes_terminal_and_deregisters_once() {
        let shared = Shared::new();
        shared
            .registry
            .lock(|r| r.borrow_mut().register(0, Purpose::Scan, SCAN_EVENTS))
            .unwrap();
        shared.scan.start();
        shared.scan.lose_interest();

        let record = bss_record(b"net", &[]);
        let partial = escan_partial(&record);
        let msg = EventMsg {
            event_type: Event::EscanResult as u32,
            status: events::ESTATUS_PARTIAL,
            reason: 0,
            flags: 0,
            ifidx: 0,
            bsscfgidx: 0,
            addr: [0; 6],
            payload: &partial,
        };
        on_scan_event(&shared, &msg);
        // Disinterested: the partial is not recorded.
        assert!(shared.scan.results.try_receive().is_err());

        let done = EventMsg {
            event_type: Event::EscanResult as u32,
            status: events::ESTATUS_SUCCESS,
            reason: 0,
            flags: 0,
            ifidx: 0,
            bsscfgidx: 0,
            addr: [0; 6],
            payload: &[],
        };
        on_scan_event(&shared, &done);
        assert!(!shared.registry.lock(|r| r.borrow().is_registered(0, Purpose::Scan)));
        assert!(matches!(
            shared.scan.results.try_receive(),
            Ok(ScanItem::Done(ScanStatus::Completed))
        ));

        // A duplicate terminal event is ignored.
        on_scan_event(&shared, &done);
        assert!(shared.scan.results.try_receive().is_err());
    }

    #[test]
    fn done_marker_evicts_oldest_result_when_queue_is_full() {
        let state = ScanState::new();
        state.start();
        for i in 0..SCAN_QUEUE_DEPTH as u8 {
            let mut entry = empty_entry();
            entry.channel = i;
            state.push(ScanItem::Bss(entry));
        }
        state.push(ScanItem::Done(ScanStatus::Aborted));

        // The oldest entry (channel 0) made room for the marker.
        let mut channels = std::vec::Vec::new();
        loop {
            match state.results.try_receive() {
                Ok(ScanItem::Bss(entry)) => channels.push(entry.channel),
                Ok(ScanItem::Done(status)) => {
                    assert_eq!(status, ScanStatus::Aborted);
                    break;
                }
                Err(_) => panic!("terminal marker was lost"),
            }
        }
        assert_eq!(channels, [1, 2, 3]);
        assert!(state.results.try_receive().is_err());
    }

    #[test]
    fn terminal_event_deregisters_its_own_interface() {
        let shared = Shared::new();
        shared
            .registry
            .lock(|r| r.borrow_mut().register(1, Purpose::Scan, SCAN_EVENTS))
            .unwrap();
        shared.scan.start();

        let done = EventMsg {
            event_type: Event::EscanResult as u32,
            status: events::ESTATUS_SUCCESS,
            reason: 0,
            flags: 0,
            ifidx: 1,
            bsscfgidx: 1,
            addr: [0; 6],
            payload: &[],
        };
        on_scan_event(&shared, &done);
        assert!(!shared.registry.lock(|r| r.borrow().is_registered(1, Purpose::Scan)));
    }
}
