//! On-the-wire layouts: SDPCM bus framing, CDC control headers, BDC data
//! headers, join/scan request bodies and the asynchronous event frame.
//!
//! Multi-byte fields are little-endian except inside event frames, whose
//! core fields arrive in network byte order.

use crate::events::EventMsg;
use crate::util::{get_be16, get_be32, get_le16, get_u8, put_le16, put_le32};

pub(crate) const SDPCM_HEADER_LEN: usize = 12;
pub(crate) const CDC_HEADER_LEN: usize = 16;
pub(crate) const BDC_HEADER_LEN: usize = 4;

pub(crate) const CHANNEL_CONTROL: u8 = 0;
pub(crate) const CHANNEL_EVENT: u8 = 1;
pub(crate) const CHANNEL_DATA: u8 = 2;

pub(crate) fn write_sdpcm_header(buf: &mut [u8], total_len: u16, seq: u8, channel: u8) {
    put_le16(buf, 0, total_len);
    put_le16(buf, 2, !total_len);
    buf[4] = seq;
    buf[5] = channel;
    buf[6] = 0; // next length
    buf[7] = SDPCM_HEADER_LEN as u8;
    buf[8] = 0; // wireless flow control
    buf[9] = 0; // bus data credit
    buf[10] = 0;
    buf[11] = 0;
}

pub(crate) struct SdpcmView<'a> {
    pub channel: u8,
    pub payload: &'a [u8],
}

pub(crate) fn parse_sdpcm(buf: &[u8]) -> Option<SdpcmView<'_>> {
    let size = get_le16(buf, 0)?;
    let size_com = get_le16(buf, 2)?;
    if size != !size_com || (size as usize) > buf.len() || (size as usize) < SDPCM_HEADER_LEN {
        return None;
    }
    let channel = get_u8(buf, 5)? & 0x0F;
    let hdr_len = get_u8(buf, 7)? as usize;
    if hdr_len < SDPCM_HEADER_LEN || hdr_len > size as usize {
        return None;
    }
    Some(SdpcmView {
        channel,
        payload: &buf[hdr_len..size as usize],
    })
}

// CDC control header flags.
const CDCF_IOC_SET: u32 = 0x02;
const CDCF_IOC_ID_SHIFT: u32 = 16;
const CDCF_IOC_IF_SHIFT: u32 = 12;
const CDCF_IOC_IF_MASK: u32 = 0xF000;

pub(crate) fn write_cdc_header(buf: &mut [u8], cmd: u32, len: u32, set: bool, id: u16, ifidx: u8) {
    let mut flags = (id as u32) << CDCF_IOC_ID_SHIFT;
    flags |= ((ifidx as u32) << CDCF_IOC_IF_SHIFT) & CDCF_IOC_IF_MASK;
    if set {
        flags |= CDCF_IOC_SET;
    }
    put_le32(buf, 0, cmd);
    put_le32(buf, 4, len);
    put_le32(buf, 8, flags);
    put_le32(buf, 12, 0); // status
}

pub(crate) struct CdcView<'a> {
    pub id: u16,
    pub status: i32,
    pub payload: &'a [u8],
}

pub(crate) fn parse_cdc(buf: &[u8]) -> Option<CdcView<'_>> {
    if buf.len() < CDC_HEADER_LEN {
        return None;
    }
    let flags = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let status = i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
    Some(CdcView {
        id: (flags >> CDCF_IOC_ID_SHIFT) as u16,
        status,
        payload: &buf[CDC_HEADER_LEN..],
    })
}

pub(crate) fn write_bdc_header(buf: &mut [u8], priority: u8) {
    buf[0] = 0x20; // bdc protocol version 2
    buf[1] = priority & 0x07;
    buf[2] = 0;
    buf[3] = 0; // data offset in words
}

/// Strips the BDC header, honoring its data-offset field.
pub(crate) fn parse_bdc(buf: &[u8]) -> Option<&[u8]> {
    let offset = get_u8(buf, 3)? as usize;
    buf.get(BDC_HEADER_LEN + offset * 4..)
}

// ---------------------------------------------------------------------------
// Join and scan request bodies.

pub(crate) const SSID_MAX_LEN: usize = 32;
const SSID_WIRE_LEN: usize = 36;

/// wlc ssid: u32 length + fixed 32-byte value.
pub(crate) fn write_ssid(buf: &mut [u8], ssid: &[u8]) {
    put_le32(buf, 0, ssid.len() as u32);
    buf[4..4 + SSID_MAX_LEN].fill(0);
    buf[4..4 + ssid.len()].copy_from_slice(ssid);
}

const ASSOC_PARAMS_FIXED_LEN: usize = 12;

fn write_assoc_params(buf: &mut [u8], bssid: Option<[u8; 6]>, chanspec: Option<u16>) -> usize {
    buf[..6].copy_from_slice(&bssid.unwrap_or([0xFF; 6]));
    put_le16(buf, 6, 0); // bssid count
    match chanspec {
        Some(cs) => {
            put_le32(buf, 8, 1);
            put_le16(buf, 12, cs);
            put_le16(buf, 14, 0); // even length padding
            ASSOC_PARAMS_FIXED_LEN + 4
        }
        None => {
            put_le32(buf, 8, 0);
            ASSOC_PARAMS_FIXED_LEN
        }
    }
}

/// Body for the `join` iovar: ssid + scan behaviour + assoc params. All scan
/// fields are -1 so firmware applies its own defaults.
pub(crate) fn build_ext_join_params(
    buf: &mut [u8],
    ssid: &[u8],
    bssid: Option<[u8; 6]>,
    chanspec: Option<u16>,
) -> usize {
    write_ssid(buf, ssid);
    let mut off = SSID_WIRE_LEN;
    buf[off] = 0xFF; // scan type: default
    buf[off + 1..off + 4].fill(0);
    off += 4;
    for _ in 0..4 {
        // nprobes, active time, passive time, home time
        put_le32(buf, off, -1i32 as u32);
        off += 4;
    }
    off + write_assoc_params(&mut buf[off..], bssid, chanspec)
}

/// Body for the legacy SET_SSID ioctl fallback.
pub(crate) fn build_join_params(
    buf: &mut [u8],
    ssid: &[u8],
    bssid: Option<[u8; 6]>,
    chanspec: Option<u16>,
) -> usize {
    write_ssid(buf, ssid);
    SSID_WIRE_LEN + write_assoc_params(&mut buf[SSID_WIRE_LEN..], bssid, chanspec)
}

pub(crate) const ESCAN_REQ_VERSION: u32 = 1;
pub(crate) const WL_SCAN_ACTION_START: u16 = 1;
pub(crate) const WL_SCAN_ACTION_ABORT: u16 = 3;

pub(crate) struct EscanRequest<'a> {
    pub action: u16,
    pub sync_id: u16,
    pub ssid: Option<&'a [u8]>,
    pub bssid: Option<[u8; 6]>,
    pub bss_type: u8,
    pub scan_type: u8,
    pub nprobes: i32,
    pub active_time: i32,
    pub passive_time: i32,
    pub home_time: i32,
    pub chanspecs: &'a [u16],
}

/// Body for the `escan` iovar: version/action/sync id followed by
/// wl_scan_params with a trailing chanspec list.
pub(crate) fn build_escan_params(buf: &mut [u8], req: &EscanRequest<'_>) -> usize {
    put_le32(buf, 0, ESCAN_REQ_VERSION);
    put_le16(buf, 4, req.action);
    put_le16(buf, 6, req.sync_id);

    let p = 8;
    write_ssid(&mut buf[p..], req.ssid.unwrap_or(&[]));
    buf[p + 36..p + 42].copy_from_slice(&req.bssid.unwrap_or([0xFF; 6]));
    buf[p + 42] = req.bss_type;
    buf[p + 43] = req.scan_type;
    put_le32(buf, p + 44, req.nprobes as u32);
    put_le32(buf, p + 48, req.active_time as u32);
    put_le32(buf, p + 52, req.passive_time as u32);
    put_le32(buf, p + 56, req.home_time as u32);
    put_le32(buf, p + 60, req.chanspecs.len() as u32);
    let mut off = p + 64;
    for cs in req.chanspecs {
        put_le16(buf, off, *cs);
        off += 2;
    }
    // Firmware expects 4-byte alignment of the overall length.
    (off + 3) & !3
}

// ---------------------------------------------------------------------------
// Chanspec encoding. Band in the top bits, 20 MHz bandwidth, channel in the
// low byte.

pub(crate) const CHANSPEC_BAND_MASK: u16 = 0xC000;
pub(crate) const CHANSPEC_BAND_2G: u16 = 0x0000;
pub(crate) const CHANSPEC_BAND_6G: u16 = 0x8000;
pub(crate) const CHANSPEC_BAND_5G: u16 = 0xC000;
pub(crate) const CHANSPEC_BW_20: u16 = 0x1000;
pub(crate) const CHANSPEC_CHAN_MASK: u16 = 0x00FF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Band {
    Band2G,
    Band5G,
    Band6G,
}

pub(crate) fn chanspec_20mhz(channel: u8, band: Band) -> u16 {
    let band_bits = match band {
        Band::Band2G => CHANSPEC_BAND_2G,
        Band::Band5G => CHANSPEC_BAND_5G,
        Band::Band6G => CHANSPEC_BAND_6G,
    };
    band_bits | CHANSPEC_BW_20 | channel as u16
}

pub(crate) fn chanspec_band(chanspec: u16) -> Band {
    match chanspec & CHANSPEC_BAND_MASK {
        CHANSPEC_BAND_5G => Band::Band5G,
        CHANSPEC_BAND_6G => Band::Band6G,
        _ => Band::Band2G,
    }
}

// ---------------------------------------------------------------------------
// Asynchronous event frames: 802.3 header with the Broadcom link-control
// ethertype, a vendor-specific header, then the event message proper.

const ETH_P_LINK_CTL: u16 = 0x886C;
const BRCM_OUI: [u8; 3] = [0x00, 0x10, 0x18];
const BCMILCP_SUBTYPE_VENDOR_LONG: u16 = 32769;
const BCMILCP_BCM_SUBTYPE_EVENT: u16 = 1;

const ETH_HEADER_LEN: usize = 14;
const BCMETH_HEADER_LEN: usize = 10;
const EVENT_MSG_LEN: usize = 48;

/// Validates and decodes one event frame (the payload of an event-channel
/// SDPCM frame, after the BDC header). Returns None for anything that is not
/// a well-formed Broadcom event.
pub(crate) fn parse_event_frame(buf: &[u8]) -> Option<EventMsg<'_>> {
    if get_be16(buf, 12)? != ETH_P_LINK_CTL {
        return None;
    }
    let b = ETH_HEADER_LEN;
    if get_be16(buf, b)? != BCMILCP_SUBTYPE_VENDOR_LONG {
        return None;
    }
    if buf.get(b + 5..b + 8)? != BRCM_OUI {
        return None;
    }
    if get_be16(buf, b + 8)? != BCMILCP_BCM_SUBTYPE_EVENT {
        return None;
    }

    let e = b + BCMETH_HEADER_LEN;
    let event_type = get_be32(buf, e + 4)?;
    let status = get_be32(buf, e + 8)?;
    let reason = get_be32(buf, e + 12)?;
    let datalen = get_be32(buf, e + 20)? as usize;
    let flags = get_be16(buf, e + 2)?;
    let mut addr = [0u8; 6];
    addr.copy_from_slice(buf.get(e + 24..e + 30)?);
    let ifidx = get_u8(buf, e + 46)?;
    let bsscfgidx = get_u8(buf, e + 47)?;

    let data_start = e + EVENT_MSG_LEN;
    let payload = buf.get(data_start..data_start + datalen)?;

    Some(EventMsg {
        event_type,
        status,
        reason,
        flags,
        ifidx,
        bsscfgidx,
        addr,
        payload,
    })
}

#[cfg(test)]
pub(crate) fn build_event_frame(
    buf: &mut [u8],
    event_type: u32,
    status: u32,
    reason: u32,
    flags: u16,
    ifidx: u8,
    bsscfgidx: u8,
    data: &[u8],
) -> usize {
    buf[..12].fill(0);
    buf[12..14].copy_from_slice(&ETH_P_LINK_CTL.to_be_bytes());
    let b = ETH_HEADER_LEN;
    buf[b..b + 2].copy_from_slice(&BCMILCP_SUBTYPE_VENDOR_LONG.to_be_bytes());
    buf[b + 2..b + 4].copy_from_slice(&0u16.to_be_bytes());
    buf[b + 4] = 0;
    buf[b + 5..b + 8].copy_from_slice(&BRCM_OUI);
    buf[b + 8..b + 10].copy_from_slice(&BCMILCP_BCM_SUBTYPE_EVENT.to_be_bytes());

    let e = b + BCMETH_HEADER_LEN;
    buf[e..e + EVENT_MSG_LEN].fill(0);
    buf[e + 2..e + 4].copy_from_slice(&flags.to_be_bytes());
    buf[e + 4..e + 8].copy_from_slice(&event_type.to_be_bytes());
    buf[e + 8..e + 12].copy_from_slice(&status.to_be_bytes());
    buf[e + 12..e + 16].copy_from_slice(&reason.to_be_bytes());
    buf[e + 20..e + 24].copy_from_slice(&(data.len() as u32).to_be_bytes());
    buf[e + 46] = ifidx;
    buf[e + 47] = bsscfgidx;
    let data_start = e + EVENT_MSG_LEN;
    buf[data_start..data_start + data.len()].copy_from_slice(data);
    data_start + data.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdpcm_roundtrip() {
        let mut buf = [0u8; 64];
        write_sdpcm_header(&mut buf, 20, 7, CHANNEL_CONTROL);
        let view = parse_sdpcm(&buf).unwrap();
        assert_eq!(view.channel, CHANNEL_CONTROL);
        assert_eq!(view.payload.len(), 20 - SDPCM_HEADER_LEN);
    }

    #[test]
    fn sdpcm_rejects_bad_checksum() {
        let mut buf = [0u8; 64];
        write_sdpcm_header(&mut buf, 20, 0, CHANNEL_DATA);
        buf[2] ^= 0xFF;
        assert!(parse_sdpcm(&buf).is_none());
    }

    #[test]
    fn cdc_id_roundtrip() {
        let mut buf = [0u8; 32];
        write_cdc_header(&mut buf, 26, 8, true, 0x1234, 2);
        let view = parse_cdc(&buf).unwrap();
        assert_eq!(view.id, 0x1234);
        assert_eq!(view.status, 0);
    }

    #[test]
    fn event_frame_roundtrip() {
        let mut buf = [0u8; 256];
        let len = build_event_frame(&mut buf, 16, 0, 0, 0x01, 0, 1, &[0xAB; 4]);
        let msg = parse_event_frame(&buf[..len]).unwrap();
        assert_eq!(msg.event_type, 16);
        assert_eq!(msg.flags, 0x01);
        assert_eq!(msg.bsscfgidx, 1);
        assert_eq!(msg.payload, &[0xAB; 4]);
    }

    #[test]
    fn event_frame_rejects_wrong_ethertype() {
        let mut buf = [0u8; 256];
        let len = build_event_frame(&mut buf, 16, 0, 0, 0, 0, 0, &[]);
        buf[12] = 0x08;
        buf[13] = 0x00;
        assert!(parse_event_frame(&buf[..len]).is_none());
    }

    #[test]
    fn chanspec_band_roundtrip() {
        for band in [Band::Band2G, Band::Band5G, Band::Band6G] {
            let cs = chanspec_20mhz(6, band);
            assert_eq!(chanspec_band(cs), band);
            assert_eq!(cs & CHANSPEC_CHAN_MASK, 6);
        }
    }
}
