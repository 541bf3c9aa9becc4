//! Join/association state machine.
//!
//! Firmware reports association progress through asynchronous events; the
//! handler below folds them into a per-interface status bitmask. Join
//! completion is decided by an exact-match lookup over that bitmask: only
//! combinations the firmware is known to produce are mapped, anything else
//! is reported as an invalid join status rather than guessed at.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::Duration;

use crate::events::{self, Event, EventMsg, Verdict};
use crate::{Error, Shared, MAX_INTERFACES};

// Security bit composition, used both for join requests and scan results.
pub(crate) const WEP_ENABLED: u32 = 0x0001;
pub(crate) const TKIP_ENABLED: u32 = 0x0002;
pub(crate) const AES_ENABLED: u32 = 0x0004;
pub(crate) const SHARED_ENABLED: u32 = 0x0000_8000;
pub(crate) const WPA_SECURITY: u32 = 0x0020_0000;
pub(crate) const WPA2_SECURITY: u32 = 0x0040_0000;
pub(crate) const WPA2_SHA256_SECURITY: u32 = 0x0080_0000;
pub(crate) const WPA3_SECURITY: u32 = 0x0100_0000;
pub(crate) const ENTERPRISE_ENABLED: u32 = 0x0200_0000;
pub(crate) const FBT_ENABLED: u32 = 0x0400_0000;
pub(crate) const IBSS_ENABLED: u32 = 0x2000_0000;

/// Network security mode as an OR of cipher and key-management bits, so scan
/// results can compose it and joins can decompose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Security(pub u32);

impl Security {
    pub const OPEN: Security = Security(0);
    pub const WEP_PSK: Security = Security(WEP_ENABLED);
    pub const WEP_SHARED: Security = Security(WEP_ENABLED | SHARED_ENABLED);
    pub const WPA_TKIP_PSK: Security = Security(WPA_SECURITY | TKIP_ENABLED);
    pub const WPA_AES_PSK: Security = Security(WPA_SECURITY | AES_ENABLED);
    pub const WPA2_AES_PSK: Security = Security(WPA2_SECURITY | AES_ENABLED);
    pub const WPA2_TKIP_PSK: Security = Security(WPA2_SECURITY | TKIP_ENABLED);
    pub const WPA2_MIXED_PSK: Security = Security(WPA2_SECURITY | AES_ENABLED | TKIP_ENABLED);
    pub const WPA2_AES_PSK_SHA256: Security =
        Security(WPA2_SECURITY | WPA2_SHA256_SECURITY | AES_ENABLED);
    pub const WPA3_SAE_AES_PSK: Security = Security(WPA3_SECURITY | AES_ENABLED);
    pub const WPA3_WPA2_AES_PSK: Security = Security(WPA3_SECURITY | WPA2_SECURITY | AES_ENABLED);
    pub const WPA2_AES_ENT: Security =
        Security(ENTERPRISE_ENABLED | WPA2_SECURITY | AES_ENABLED);

    pub(crate) fn has(&self, bits: u32) -> bool {
        self.0 & bits != 0
    }

    pub fn is_open(&self) -> bool {
        self.0 == 0
    }

    pub(crate) fn uses_sae(&self) -> bool {
        self.has(WPA3_SECURITY) && !self.has(WPA2_SECURITY)
    }

    pub(crate) fn uses_psk(&self) -> bool {
        self.has(WPA_SECURITY | WPA2_SECURITY | WPA3_SECURITY) && !self.has(ENTERPRISE_ENABLED)
    }

    /// Cipher bits for the WSEC ioctl (low byte of the composition).
    pub(crate) fn wsec(&self) -> u32 {
        self.0 & 0xFF
    }

    /// Key-management value for the WPA_AUTH ioctl.
    pub(crate) fn wpa_auth(&self) -> u32 {
        if self.is_open() || self.0 == Self::WEP_PSK.0 || self.0 == Self::WEP_SHARED.0 {
            WPA_AUTH_DISABLED
        } else if self.uses_sae() {
            WPA3_AUTH_SAE_PSK
        } else if self.has(WPA2_SHA256_SECURITY) {
            WPA2_AUTH_PSK_SHA256
        } else if self.has(WPA2_SECURITY) {
            if self.has(ENTERPRISE_ENABLED) {
                WPA2_AUTH_UNSPECIFIED
            } else {
                WPA2_AUTH_PSK
            }
        } else if self.has(WPA_SECURITY) {
            if self.has(ENTERPRISE_ENABLED) {
                WPA_AUTH_UNSPECIFIED
            } else {
                WPA_AUTH_PSK
            }
        } else {
            WPA_AUTH_DISABLED
        }
    }
}

pub(crate) const WPA_AUTH_DISABLED: u32 = 0x0000;
pub(crate) const WPA_AUTH_UNSPECIFIED: u32 = 0x0002;
pub(crate) const WPA_AUTH_PSK: u32 = 0x0004;
pub(crate) const WPA2_AUTH_UNSPECIFIED: u32 = 0x0040;
pub(crate) const WPA2_AUTH_PSK: u32 = 0x0080;
pub(crate) const WPA2_AUTH_PSK_SHA256: u32 = 0x8000;
pub(crate) const WPA3_AUTH_SAE_PSK: u32 = 0x40000;

pub(crate) const WL_AUTH_OPEN_SYSTEM: u32 = 0;
pub(crate) const WL_AUTH_SAE: u32 = 3;

pub(crate) const MFP_NONE: u32 = 0;
pub(crate) const MFP_CAPABLE: u32 = 1;
pub(crate) const MFP_REQUIRED: u32 = 2;

pub(crate) const WSEC_MIN_PSK_LEN: usize = 8;
pub(crate) const WSEC_MAX_PSK_LEN: usize = 64;
pub(crate) const WSEC_MAX_SAE_PASSWORD_LEN: usize = 128;

pub(crate) const JOIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(9000);
pub(crate) const JOIN_POLL_SLICE: Duration = Duration::from_millis(900);
pub(crate) const EAPOL_KEY_PACKET_TIMEOUT_MS: u32 = 2500;

// Join status bits. Bit 0 is reserved.
pub(crate) const JOIN_AUTHENTICATED: u32 = 1 << 1;
pub(crate) const JOIN_LINK_READY: u32 = 1 << 2;
pub(crate) const JOIN_SECURITY_COMPLETE: u32 = 1 << 3;
pub(crate) const JOIN_SSID_SET: u32 = 1 << 4;
pub(crate) const JOIN_NO_NETWORKS: u32 = 1 << 5;
pub(crate) const JOIN_EAPOL_KEY_M1_TIMEOUT: u32 = 1 << 6;
pub(crate) const JOIN_EAPOL_KEY_M3_TIMEOUT: u32 = 1 << 7;
pub(crate) const JOIN_EAPOL_KEY_G1_TIMEOUT: u32 = 1 << 8;
pub(crate) const JOIN_EAPOL_KEY_FAILURE: u32 = 1 << 9;

pub(crate) const JOIN_SECURITY_FLAGS_MASK: u32 = JOIN_SECURITY_COMPLETE
    | JOIN_EAPOL_KEY_M1_TIMEOUT
    | JOIN_EAPOL_KEY_M3_TIMEOUT
    | JOIN_EAPOL_KEY_G1_TIMEOUT
    | JOIN_EAPOL_KEY_FAILURE;

// Supplicant states and reasons reported through the PSK_SUP event.
pub(crate) const WLC_SUP_KEYXCHANGE_WAIT_M1: u32 = 4;
pub(crate) const WLC_SUP_KEYED: u32 = 6;
pub(crate) const WLC_SUP_KEYXCHANGE_WAIT_M3: u32 = 8;
pub(crate) const WLC_SUP_KEYXCHANGE_WAIT_G1: u32 = 9;
pub(crate) const WLC_E_SUP_WPA_PSK_TMO: u32 = 15;

// Named bitmask combinations for the lookup table below.
const S_AUTH_LINK: u32 = JOIN_AUTHENTICATED | JOIN_LINK_READY;
const S_AUTH_LINK_SSID: u32 = S_AUTH_LINK | JOIN_SSID_SET;
const S_M1: u32 = S_AUTH_LINK | JOIN_EAPOL_KEY_M1_TIMEOUT;
const S_M3: u32 = S_AUTH_LINK | JOIN_EAPOL_KEY_M3_TIMEOUT;
const S_M3_SSID: u32 = S_AUTH_LINK_SSID | JOIN_EAPOL_KEY_M3_TIMEOUT;
const S_G1: u32 = S_AUTH_LINK | JOIN_EAPOL_KEY_G1_TIMEOUT;
const S_G1_SSID: u32 = S_AUTH_LINK_SSID | JOIN_EAPOL_KEY_G1_TIMEOUT;
const S_FAIL: u32 = S_AUTH_LINK | JOIN_EAPOL_KEY_FAILURE;
const S_FAIL_SSID: u32 = S_AUTH_LINK_SSID | JOIN_EAPOL_KEY_FAILURE;
const S_DONE: u32 = S_AUTH_LINK_SSID | JOIN_SECURITY_COMPLETE;
const S_IN_PROGRESS: u32 = S_AUTH_LINK | JOIN_SECURITY_COMPLETE;

/// Maps a join status bitmask to the outcome of the attempt.
///
/// This is deliberately an exact-match table over the combinations the
/// firmware is known to produce. An unlisted combination means the handler
/// and the firmware disagree about the association state, which is reported
/// as [`Error::InvalidJoinStatus`] instead of being coerced into the nearest
/// plausible outcome.
pub(crate) fn check_join_status(bits: u32) -> Result<(), Error> {
    match bits {
        S_DONE => Ok(()),
        JOIN_NO_NETWORKS => Err(Error::NetworkNotFound),
        S_M1 => Err(Error::EapolM1Timeout),
        S_M3 | S_M3_SSID => Err(Error::EapolM3Timeout),
        S_G1 | S_G1_SSID => Err(Error::EapolG1Timeout),
        S_FAIL | S_FAIL_SSID => Err(Error::EapolFailure),
        0 | JOIN_SECURITY_COMPLETE => Err(Error::NotAuthenticated),
        S_IN_PROGRESS => Err(Error::JoinInProgress),
        S_AUTH_LINK | S_AUTH_LINK_SSID => Err(Error::NotKeyed),
        _ => Err(Error::InvalidJoinStatus),
    }
}

/// Rejects credential/security combinations before any command reaches the
/// firmware.
pub(crate) fn validate_credentials(security: Security, key: &[u8]) -> Result<(), Error> {
    if security.has(FBT_ENABLED) || security.has(IBSS_ENABLED) {
        return Err(Error::UnknownSecurityType);
    }
    if security.has(WEP_ENABLED) {
        return Err(Error::WepNotAllowed);
    }
    if security.uses_sae() {
        if key.is_empty() || key.len() > WSEC_MAX_SAE_PASSWORD_LEN {
            return Err(Error::InvalidKey);
        }
    } else if security.uses_psk() && !(WSEC_MIN_PSK_LEN..=WSEC_MAX_PSK_LEN).contains(&key.len()) {
        return Err(Error::InvalidKey);
    }
    Ok(())
}

/// Shared join state: per-interface status bits, the single completion
/// signal, and the attempt lock that serializes joins.
pub(crate) struct JoinState {
    /// Held for the whole duration of one join attempt.
    pub(crate) attempt: Mutex<CriticalSectionRawMutex, ()>,
    status: BlockingMutex<CriticalSectionRawMutex, RefCell<[u32; MAX_INTERFACES]>>,
    signal: Signal<CriticalSectionRawMutex, ()>,
    armed: BlockingMutex<CriticalSectionRawMutex, RefCell<bool>>,
}

impl JoinState {
    pub(crate) const fn new() -> Self {
        Self {
            attempt: Mutex::new(()),
            status: BlockingMutex::new(RefCell::new([0; MAX_INTERFACES])),
            signal: Signal::new(),
            armed: BlockingMutex::new(RefCell::new(false)),
        }
    }

    pub(crate) fn status(&self, bsscfgidx: u8) -> u32 {
        self.status
            .lock(|s| s.borrow().get(bsscfgidx as usize).copied().unwrap_or(0))
    }

    pub(crate) fn clear_status(&self, bsscfgidx: u8) {
        self.set_status(bsscfgidx, 0);
    }

    fn set_status(&self, bsscfgidx: u8, bits: u32) {
        self.status.lock(|s| {
            if let Some(slot) = s.borrow_mut().get_mut(bsscfgidx as usize) {
                *slot = bits;
            }
        });
    }

    pub(crate) fn or_status(&self, bsscfgidx: u8, bits: u32) {
        self.set_status(bsscfgidx, self.status(bsscfgidx) | bits);
    }

    fn and_status(&self, bsscfgidx: u8, mask: u32) {
        self.set_status(bsscfgidx, self.status(bsscfgidx) & mask);
    }

    /// Installs the completion signal for a new attempt. Caller must hold
    /// the attempt lock.
    pub(crate) fn arm(&self) {
        self.armed.lock(|a| {
            self.signal.reset();
            *a.borrow_mut() = true;
        });
    }

    /// Removes the completion signal. A completion racing with teardown
    /// either lands before this (and is consumed by the final wait) or sees
    /// the armed flag cleared and is dropped.
    pub(crate) fn disarm(&self) {
        self.armed.lock(|a| *a.borrow_mut() = false);
    }

    fn complete(&self) {
        self.armed.lock(|a| {
            if *a.borrow() {
                self.signal.signal(());
            }
        });
    }

    pub(crate) async fn wait(&self) {
        self.signal.wait().await
    }

    #[cfg(test)]
    fn signaled(&self) -> bool {
        self.signal.signaled()
    }
}

/// Folds one firmware event into the join status bits. Returns `Consumed`
/// when the event completed (successfully or not) the current attempt.
pub(crate) fn on_join_event(join: &JoinState, msg: &EventMsg<'_>) -> Verdict {
    let idx = msg.bsscfgidx;
    let mut completed = false;

    match Event::from_code(msg.event_type) {
        Some(Event::PskSup) => {
            // Ignore supplicant chatter until the link is up.
            if join.status(idx) & JOIN_LINK_READY != 0 {
                match (msg.status, msg.reason) {
                    (WLC_SUP_KEYED, _) => {
                        // Successful key exchange supersedes any earlier
                        // handshake-stage flags.
                        join.and_status(idx, !JOIN_SECURITY_FLAGS_MASK);
                        join.or_status(idx, JOIN_SECURITY_COMPLETE);
                    }
                    (WLC_SUP_KEYXCHANGE_WAIT_M1, WLC_E_SUP_WPA_PSK_TMO) => {
                        join.or_status(idx, JOIN_EAPOL_KEY_M1_TIMEOUT);
                        completed = true;
                    }
                    (WLC_SUP_KEYXCHANGE_WAIT_M3, WLC_E_SUP_WPA_PSK_TMO) => {
                        join.or_status(idx, JOIN_EAPOL_KEY_M3_TIMEOUT);
                        completed = true;
                    }
                    (WLC_SUP_KEYXCHANGE_WAIT_G1, WLC_E_SUP_WPA_PSK_TMO) => {
                        join.or_status(idx, JOIN_EAPOL_KEY_G1_TIMEOUT);
                        completed = true;
                    }
                    _ => {
                        join.or_status(idx, JOIN_EAPOL_KEY_FAILURE);
                        completed = true;
                    }
                }
            }
        }
        Some(Event::SetSsid) => match msg.status {
            events::ESTATUS_SUCCESS => join.or_status(idx, JOIN_SSID_SET),
            events::ESTATUS_NO_NETWORKS => join.or_status(idx, JOIN_NO_NETWORKS),
            _ => completed = true,
        },
        Some(Event::Link) => {
            if msg.flags & events::EVENT_FLAG_LINK != 0 {
                join.or_status(idx, JOIN_LINK_READY);
            } else {
                join.and_status(idx, !JOIN_LINK_READY);
            }
        }
        Some(Event::Deauth) | Some(Event::DeauthInd) | Some(Event::DisassocInd) => {
            join.and_status(idx, !(JOIN_AUTHENTICATED | JOIN_LINK_READY));
        }
        Some(Event::Auth) => match msg.status {
            events::ESTATUS_SUCCESS => join.or_status(idx, JOIN_AUTHENTICATED),
            // Unsolicited auth events occur during roaming, not ours to act on.
            events::ESTATUS_UNSOLICITED => {}
            _ => completed = true,
        },
        Some(Event::CsaCompleteInd) => {
            debug!("csa complete, reason {}", msg.reason);
        }
        _ => {}
    }

    // Readiness doubles as a completion trigger: with some firmware the
    // final event of a handshake can arrive before the one that logically
    // completes it.
    let ready = check_join_status(join.status(idx)).is_ok();
    if ready && !completed {
        debug!("join ready without explicit completion event");
    }

    if ready || completed {
        join.complete();
        Verdict::Consumed
    } else {
        Verdict::StillInterested
    }
}

// ---------------------------------------------------------------------------
// External (host-driven) SAE authentication handoff.

/// What the firmware wants from the host supplicant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExtAuthKind {
    /// Start an authentication exchange with the peer.
    Request,
    /// An authentication frame arrived for the host to process.
    FrameRx,
}

/// Firmware handoff event for host-driven SAE. Only delivered while a
/// subscription installed by [`crate::Control::external_auth_request`] is
/// active; the firmware-supplicant join path never produces these.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExtAuthNotification {
    pub kind: ExtAuthKind,
    pub status: u32,
    pub peer: [u8; 6],
}

pub(crate) fn on_ext_auth_event(shared: &Shared, msg: &EventMsg<'_>) -> Verdict {
    let kind = match Event::from_code(msg.event_type) {
        Some(Event::ExtAuthReq) => ExtAuthKind::Request,
        Some(Event::ExtAuthFrameRx) => ExtAuthKind::FrameRx,
        _ => return Verdict::Consumed,
    };
    let note = ExtAuthNotification {
        kind,
        status: msg.status,
        peer: msg.addr,
    };
    if shared.ext_auth.try_send(note).is_err() {
        trace!("ext auth notification queue full, dropping");
    }
    Verdict::Consumed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(event_type: u32, status: u32, reason: u32, flags: u16) -> EventMsg<'static> {
        EventMsg {
            event_type,
            status,
            reason,
            flags,
            ifidx: 0,
            bsscfgidx: 0,
            addr: [0; 6],
            payload: &[],
        }
    }

    #[test]
    fn status_table_is_total_and_exact() {
        let tabulated: &[(u32, Result<(), Error>)] = &[
            (S_DONE, Ok(())),
            (JOIN_NO_NETWORKS, Err(Error::NetworkNotFound)),
            (S_M1, Err(Error::EapolM1Timeout)),
            (S_M3, Err(Error::EapolM3Timeout)),
            (S_M3_SSID, Err(Error::EapolM3Timeout)),
            (S_G1, Err(Error::EapolG1Timeout)),
            (S_G1_SSID, Err(Error::EapolG1Timeout)),
            (S_FAIL, Err(Error::EapolFailure)),
            (S_FAIL_SSID, Err(Error::EapolFailure)),
            (0, Err(Error::NotAuthenticated)),
            (JOIN_SECURITY_COMPLETE, Err(Error::NotAuthenticated)),
            (S_IN_PROGRESS, Err(Error::JoinInProgress)),
            (S_AUTH_LINK, Err(Error::NotKeyed)),
            (S_AUTH_LINK_SSID, Err(Error::NotKeyed)),
        ];

        // Every combination of the ten status bits maps somewhere; anything
        // not in the table is invalid, never coerced.
        for bits in 0u32..(1 << 10) {
            let expected = tabulated
                .iter()
                .find(|(b, _)| *b == bits)
                .map(|(_, r)| *r)
                .unwrap_or(Err(Error::InvalidJoinStatus));
            assert_eq!(check_join_status(bits), expected, "bits {bits:#06x}");
        }
    }

    #[test]
    fn m3_timeout_sequence_produces_exact_bitmask() {
        let join = JoinState::new();
        join.arm();

        assert_eq!(
            on_join_event(&join, &msg(3, events::ESTATUS_SUCCESS, 0, 0)),
            Verdict::StillInterested
        );
        assert_eq!(
            on_join_event(&join, &msg(16, 0, 0, events::EVENT_FLAG_LINK)),
            Verdict::StillInterested
        );
        assert_eq!(
            on_join_event(&join, &msg(0, events::ESTATUS_SUCCESS, 0, 0)),
            Verdict::StillInterested
        );
        assert_eq!(
            on_join_event(
                &join,
                &msg(46, WLC_SUP_KEYXCHANGE_WAIT_M3, WLC_E_SUP_WPA_PSK_TMO, 0)
            ),
            Verdict::Consumed
        );

        assert_eq!(join.status(0), S_M3_SSID);
        assert_eq!(check_join_status(join.status(0)), Err(Error::EapolM3Timeout));
        assert!(join.signaled());
    }

    #[test]
    fn open_join_completes_on_readiness_alone() {
        let join = JoinState::new();
        join.arm();
        // Open security: security-complete is pre-set before any event.
        join.or_status(0, JOIN_SECURITY_COMPLETE);

        on_join_event(&join, &msg(3, events::ESTATUS_SUCCESS, 0, 0));
        on_join_event(&join, &msg(16, 0, 0, events::EVENT_FLAG_LINK));
        let verdict = on_join_event(&join, &msg(0, events::ESTATUS_SUCCESS, 0, 0));

        assert_eq!(verdict, Verdict::Consumed);
        assert_eq!(check_join_status(join.status(0)), Ok(()));
        assert!(join.signaled());
    }

    #[test]
    fn supplicant_events_ignored_before_link_ready() {
        let join = JoinState::new();
        on_join_event(
            &join,
            &msg(46, WLC_SUP_KEYXCHANGE_WAIT_M1, WLC_E_SUP_WPA_PSK_TMO, 0),
        );
        assert_eq!(join.status(0), 0);
    }

    #[test]
    fn keyed_supersedes_handshake_stage_flags() {
        let join = JoinState::new();
        join.or_status(0, S_AUTH_LINK | JOIN_EAPOL_KEY_M1_TIMEOUT);
        on_join_event(&join, &msg(46, WLC_SUP_KEYED, 0, 0));
        assert_eq!(join.status(0), S_AUTH_LINK | JOIN_SECURITY_COMPLETE);
    }

    #[test]
    fn deauth_clears_only_auth_and_link() {
        let join = JoinState::new();
        join.or_status(0, S_DONE);
        on_join_event(&join, &msg(6, 0, 0, 0));
        assert_eq!(join.status(0), JOIN_SSID_SET | JOIN_SECURITY_COMPLETE);
    }

    #[test]
    fn completion_without_armed_signal_is_dropped() {
        let join = JoinState::new();
        join.arm();
        join.disarm();
        join.or_status(0, S_AUTH_LINK | JOIN_SSID_SET | JOIN_SECURITY_COMPLETE);
        on_join_event(&join, &msg(16, 0, 0, events::EVENT_FLAG_LINK));
        assert!(!join.signaled());
    }

    #[test]
    fn short_psk_is_rejected() {
        assert_eq!(
            validate_credentials(Security::WPA2_AES_PSK, b"pass"),
            Err(Error::InvalidKey)
        );
        assert_eq!(
            validate_credentials(Security::WPA2_AES_PSK, &[b'x'; 65]),
            Err(Error::InvalidKey)
        );
        assert!(validate_credentials(Security::WPA2_AES_PSK, b"password").is_ok());
    }

    #[test]
    fn wep_and_fbt_are_rejected() {
        assert_eq!(
            validate_credentials(Security::WEP_PSK, b"password"),
            Err(Error::WepNotAllowed)
        );
        assert_eq!(
            validate_credentials(Security(FBT_ENABLED | AES_ENABLED), b"password"),
            Err(Error::UnknownSecurityType)
        );
    }

    #[test]
    fn ibss_is_rejected() {
        // Ad-hoc modes are not supported, open IBSS included.
        assert_eq!(
            validate_credentials(Security(IBSS_ENABLED), &[]),
            Err(Error::UnknownSecurityType)
        );
        assert_eq!(
            validate_credentials(Security(IBSS_ENABLED | AES_ENABLED), b"password"),
            Err(Error::UnknownSecurityType)
        );
    }

    #[test]
    fn sae_password_length_limits() {
        assert!(validate_credentials(Security::WPA3_SAE_AES_PSK, b"p").is_ok());
        assert_eq!(
            validate_credentials(Security::WPA3_SAE_AES_PSK, &[b'x'; 129]),
            Err(Error::InvalidKey)
        );
    }

    #[test]
    fn wpa_auth_values() {
        assert_eq!(Security::OPEN.wpa_auth(), WPA_AUTH_DISABLED);
        assert_eq!(Security::WPA2_AES_PSK.wpa_auth(), WPA2_AUTH_PSK);
        assert_eq!(Security::WPA3_SAE_AES_PSK.wpa_auth(), WPA3_AUTH_SAE_PSK);
        assert_eq!(Security::WPA3_WPA2_AES_PSK.wpa_auth(), WPA2_AUTH_PSK);
        assert_eq!(Security::WPA2_AES_ENT.wpa_auth(), WPA2_AUTH_UNSPECIFIED);
        assert_eq!(Security::WPA_TKIP_PSK.wpa_auth(), WPA_AUTH_PSK);
        assert_eq!(
            Security::WPA2_AES_PSK_SHA256.wpa_auth(),
            WPA2_AUTH_PSK_SHA256
        );
    }
}
