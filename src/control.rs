//! Driver handle for everything that is not data-path traffic: joining and
//! leaving networks, scanning, and the TCP keepalive / ICMP echo offloads.

use embassy_net_driver_channel as ch;
use embassy_net_driver_channel::driver::LinkState;
use embassy_time::{with_timeout, Instant};

use crate::events::{Purpose, AUTH_EVENTS, ICMP_ECHO_EVENTS, JOIN_EVENTS, SCAN_EVENTS};
use crate::ioctl::{
    IoctlKind, WLAN_E_UNSUPPORTED, WLC_DISASSOC, WLC_DOWN, WLC_GET_VAR, WLC_SET_AUTH,
    WLC_SET_INFRA, WLC_SET_SSID, WLC_SET_WPA_AUTH, WLC_SET_WSEC, WLC_SET_WSEC_PMK, WLC_UP,
};
use crate::join::{
    check_join_status, validate_credentials, ExtAuthNotification, Security,
    EAPOL_KEY_PACKET_TIMEOUT_MS,
    JOIN_ATTEMPT_TIMEOUT, JOIN_POLL_SLICE, JOIN_SECURITY_COMPLETE, MFP_CAPABLE, MFP_NONE,
    MFP_REQUIRED, WL_AUTH_OPEN_SYSTEM, WL_AUTH_SAE, WPA2_SECURITY, WPA3_SECURITY,
    WSEC_MAX_PSK_LEN, WSEC_MAX_SAE_PASSWORD_LEN,
};
use crate::offload::{
    build_icmp_echo_add, build_icmp_echo_enable, build_icmp_echo_peer_op, build_tko_autoenab,
    build_tko_enable, build_tko_filter, build_tko_max_tcp, build_tko_params, IcmpEchoNotification,
    IcmpEchoPeer, IpVer, TkoFilter, TkoParams, ICMP_ECHO_REQ_DEL, ICMP_ECHO_REQ_START,
    ICMP_ECHO_REQ_STOP, IOVAR_ICMP_ECHO_REQ, IOVAR_TKO, TKO_HDR_LEN,
};
use crate::scan::{BssEntry, BssType, ScanOptions, ScanType, Scanner};
use crate::structs::{
    build_escan_params, build_ext_join_params, build_join_params, chanspec_20mhz, write_ssid,
    Band, EscanRequest, SSID_MAX_LEN, WL_SCAN_ACTION_ABORT, WL_SCAN_ACTION_START,
};
use crate::util::put_le16;
use crate::{Error, Role, Shared, WlanState};

/// wsec_pmk flag marking the key material as a passphrase rather than a
/// precomputed PMK.
const WSEC_PASSPHRASE: u16 = 1;

const MAX_SCAN_CHANNELS: usize = 32;
const ESCAN_PARAMS_FIXED_LEN: usize = 72;

pub struct Control<'a> {
    shared: &'a Shared,
    state_ch: ch::StateRunner<'a>,
    ifidx: u8,
    bsscfgidx: u8,
    scan_sync_id: u16,
}

impl<'a> Control<'a> {
    pub(crate) fn new(shared: &'a Shared, state_ch: ch::StateRunner<'a>) -> Self {
        Self {
            shared,
            state_ch,
            ifidx: 0,
            bsscfgidx: 0,
            scan_sync_id: 0,
        }
    }

    /// Associates with a network, waiting up to nine seconds for the link
    /// and (where applicable) the key handshake to complete.
    pub async fn join(&mut self, ssid: &[u8], security: Security, key: &[u8]) -> Result<(), Error> {
        self.join_inner(ssid, security, key, None, None).await
    }

    /// Like [`join`](Self::join) but pinned to one AP and channel, skipping
    /// the firmware's own scan.
    pub async fn join_specific(
        &mut self,
        ssid: &[u8],
        security: Security,
        key: &[u8],
        bssid: [u8; 6],
        channel: u8,
        band: Band,
    ) -> Result<(), Error> {
        if bssid == [0; 6] || bssid == [0xFF; 6] {
            return Err(Error::InvalidArgument);
        }
        self.join_inner(ssid, security, key, Some(bssid), Some(chanspec_20mhz(channel, band)))
            .await
    }

    async fn join_inner(
        &mut self,
        ssid: &[u8],
        security: Security,
        key: &[u8],
        bssid: Option<[u8; 6]>,
        chanspec: Option<u16>,
    ) -> Result<(), Error> {
        if ssid.is_empty() || ssid.len() > SSID_MAX_LEN {
            return Err(Error::InvalidSsidLen);
        }
        validate_credentials(security, key)?;

        let Ok(_attempt) = self.shared.join.attempt.try_lock() else {
            return Err(Error::JoinInProgress);
        };
        // The chip must not doze off between the staging iovars and the
        // handshake events.
        let _wake = self.shared.wake_lock();

        self.shared
            .roles
            .lock(|r| r.borrow_mut()[self.ifidx as usize] = Role::Sta);

        match self.join_attempt(ssid, security, key, bssid, chanspec).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Leave the chip clean for the next attempt.
                if let Err(e2) = self.teardown().await {
                    warn!("teardown after failed join: {:?}", e2);
                }
                Err(e)
            }
        }
    }

    async fn join_attempt(
        &mut self,
        ssid: &[u8],
        security: Security,
        key: &[u8],
        bssid: Option<[u8; 6]>,
        chanspec: Option<u16>,
    ) -> Result<(), Error> {
        let ioctl = &self.shared.ioctl;
        let idx = self.bsscfgidx;
        self.shared.join.clear_status(idx);

        // Older firmware rejects the mfp iovar outright.
        let mfp_supported = ioctl.get_var_u32(self.ifidx, "mfp").await.is_ok();

        ioctl.set_ioctl_u32(WLC_SET_WSEC, self.ifidx, security.wsec()).await?;
        ioctl.set_var_u32(self.ifidx, "roam_off", 0).await?;

        let sup = if security.is_open() { 0 } else { 1 };
        ioctl.set_bsscfg_var_u32(self.ifidx, "sup_wpa", idx as u32, sup).await?;
        if !security.is_open() {
            ioctl
                .set_bsscfg_var_u32(self.ifidx, "sup_wpa2_eapver", idx as u32, -1i32 as u32)
                .await?;
            ioctl
                .set_bsscfg_var_u32(self.ifidx, "sup_wpa_tmo", idx as u32, EAPOL_KEY_PACKET_TIMEOUT_MS)
                .await?;
        }

        if security.uses_sae() {
            let mut body = [0u8; 2 + WSEC_MAX_SAE_PASSWORD_LEN];
            put_le16(&mut body, 0, key.len() as u16);
            body[2..2 + key.len()].copy_from_slice(key);
            ioctl.set_var(self.ifidx, "sae_password", &body).await?;
        } else if security.uses_psk() {
            let mut pmk = [0u8; 4 + WSEC_MAX_PSK_LEN];
            put_le16(&mut pmk, 0, key.len() as u16);
            put_le16(&mut pmk, 2, WSEC_PASSPHRASE);
            pmk[4..4 + key.len()].copy_from_slice(key);
            ioctl.set_ioctl(WLC_SET_WSEC_PMK, self.ifidx, &pmk).await?;
        }

        ioctl.set_ioctl_u32(WLC_SET_INFRA, self.ifidx, 1).await?;
        let auth = if security.uses_sae() { WL_AUTH_SAE } else { WL_AUTH_OPEN_SYSTEM };
        ioctl.set_ioctl_u32(WLC_SET_AUTH, self.ifidx, auth).await?;

        if mfp_supported {
            let mfp = if security.uses_sae() {
                MFP_REQUIRED
            } else if security.has(WPA2_SECURITY | WPA3_SECURITY) {
                MFP_CAPABLE
            } else {
                MFP_NONE
            };
            ioctl.set_var_u32(self.ifidx, "mfp", mfp).await?;
        }
        ioctl.set_ioctl_u32(WLC_SET_WPA_AUTH, self.ifidx, security.wpa_auth()).await?;

        if security.is_open() {
            // No handshake to wait for.
            self.shared.join.or_status(idx, JOIN_SECURITY_COMPLETE);
        }

        self.shared
            .registry
            .lock(|r| r.borrow_mut().register(self.ifidx, Purpose::Join, JOIN_EVENTS))?;

        self.shared.join.arm();
        let result = self.issue_join_and_wait(ssid, bssid, chanspec).await;
        self.shared.join.disarm();
        result
    }

    async fn issue_join_and_wait(
        &mut self,
        ssid: &[u8],
        bssid: Option<[u8; 6]>,
        chanspec: Option<u16>,
    ) -> Result<(), Error> {
        let ioctl = &self.shared.ioctl;
        let mut buf = [0u8; 128];
        if bssid.is_some() || chanspec.is_some() {
            let n = build_ext_join_params(&mut buf, ssid, bssid, chanspec);
            match ioctl.set_var(self.ifidx, "join", &buf[..n]).await {
                Ok(()) => {}
                Err(Error::Ioctl(WLAN_E_UNSUPPORTED)) => {
                    debug!("join iovar unsupported, using legacy set_ssid");
                    let n = build_join_params(&mut buf, ssid, bssid, chanspec);
                    ioctl.set_ioctl(WLC_SET_SSID, self.ifidx, &buf[..n]).await?;
                }
                Err(e) => return Err(e),
            }
        } else {
            write_ssid(&mut buf, ssid);
            ioctl.set_ioctl(WLC_SET_SSID, self.ifidx, &buf[..36]).await?;
        }

        let idx = self.bsscfgidx;
        let deadline = Instant::now() + JOIN_ATTEMPT_TIMEOUT;
        loop {
            let signaled = with_timeout(JOIN_POLL_SLICE, self.shared.join.wait())
                .await
                .is_ok();
            let check = check_join_status(self.shared.join.status(idx));
            if check.is_ok() {
                self.state_ch.set_link_state(LinkState::Up);
                info!("join complete");
                return Ok(());
            }
            // A signal with an incomplete status is a definitive failure
            // reported by the event handler.
            if signaled || Instant::now() >= deadline {
                return check;
            }
        }
    }

    /// Disassociates and resets all join state.
    pub async fn leave(&mut self) -> Result<(), Error> {
        self.teardown().await?;
        info!("left network");
        Ok(())
    }

    async fn teardown(&mut self) -> Result<(), Error> {
        self.shared
            .registry
            .lock(|r| r.borrow_mut().deregister(self.ifidx, Purpose::Join));
        self.state_ch.set_link_state(LinkState::Down);
        self.shared.join.clear_status(self.bsscfgidx);
        self.shared
            .roles
            .lock(|r| r.borrow_mut()[self.ifidx as usize] = Role::Invalid);
        self.shared.ioctl.set_ioctl(WLC_DISASSOC, self.ifidx, &[]).await
    }

    /// Brings the WLAN core up. A no-op when it is already up.
    pub async fn set_up(&mut self) -> Result<(), Error> {
        if self.shared.wlan_state() == WlanState::Up {
            return Ok(());
        }
        self.shared.ioctl.set_ioctl(WLC_UP, self.ifidx, &[]).await?;
        self.shared.set_wlan_state(WlanState::Up);
        Ok(())
    }

    /// Takes the WLAN core down. Fails with [`Error::InterfaceNotUp`] when
    /// it is not up.
    pub async fn set_down(&mut self) -> Result<(), Error> {
        if self.shared.wlan_state() != WlanState::Up {
            return Err(Error::InterfaceNotUp);
        }
        self.shared.ioctl.set_ioctl(WLC_DOWN, self.ifidx, &[]).await?;
        self.shared.set_wlan_state(WlanState::Down);
        Ok(())
    }

    /// Whether the interface is associated, authenticated and keyed.
    pub fn is_ready_to_transceive(&self) -> Result<(), Error> {
        let role = self.shared.roles.lock(|r| r.borrow()[self.ifidx as usize]);
        if role != Role::Sta {
            return Err(Error::NotAuthenticated);
        }
        check_join_status(self.shared.join.status(self.bsscfgidx))
    }

    /// Kicks off a scan and returns a handle streaming the results. Dropping
    /// the handle early lets the scan run out in the background.
    pub async fn scan(&mut self, options: ScanOptions<'_>) -> Result<Scanner<'a>, Error> {
        if self.shared.scan.is_running() {
            return Err(Error::ScanInProgress);
        }

        let mut chanspecs = heapless::Vec::<u16, MAX_SCAN_CHANNELS>::new();
        for &channel in options.channels {
            let band = if channel <= 14 { Band::Band2G } else { Band::Band5G };
            chanspecs
                .push(chanspec_20mhz(channel, band))
                .map_err(|_| Error::InvalidArgument)?;
        }

        self.shared
            .registry
            .lock(|r| r.borrow_mut().register(self.ifidx, Purpose::Scan, SCAN_EVENTS))?;
        self.shared.scan.start();
        self.scan_sync_id = self.scan_sync_id.wrapping_add(1);

        let req = EscanRequest {
            action: WL_SCAN_ACTION_START,
            sync_id: self.scan_sync_id,
            ssid: options.ssid,
            bssid: options.bssid,
            bss_type: options.bss_type as u8,
            scan_type: options.scan_type as u8,
            nprobes: options.nprobes.unwrap_or(-1),
            active_time: options.active_time_ms.unwrap_or(-1),
            passive_time: options.passive_time_ms.unwrap_or(-1),
            home_time: options.home_time_ms.unwrap_or(-1),
            chanspecs: &chanspecs,
        };
        let mut buf = [0u8; ESCAN_PARAMS_FIXED_LEN + 2 * MAX_SCAN_CHANNELS];
        let n = build_escan_params(&mut buf, &req);
        if let Err(e) = self.shared.ioctl.set_var(self.ifidx, "escan", &buf[..n]).await {
            self.shared.scan.finish();
            self.shared
                .registry
                .lock(|r| r.borrow_mut().deregister(self.ifidx, Purpose::Scan));
            return Err(e);
        }
        Ok(Scanner::new(self.shared))
    }

    /// Scans and fills `entries` with what fits. With an empty slice this
    /// just counts the networks found.
    pub async fn scan_collect(
        &mut self,
        options: ScanOptions<'_>,
        entries: &mut [BssEntry],
    ) -> Result<usize, Error> {
        let scanner = self.scan(options).await?;
        Ok(scanner.collect(entries).await)
    }

    /// Asks the firmware to abort an in-flight scan. The abort surfaces as
    /// the scan's terminal event, so the result stream still terminates.
    pub async fn stop_scan(&mut self) -> Result<(), Error> {
        if !self.shared.scan.is_running() {
            return Ok(());
        }
        let req = EscanRequest {
            action: WL_SCAN_ACTION_ABORT,
            sync_id: self.scan_sync_id,
            ssid: None,
            bssid: None,
            bss_type: BssType::Any as u8,
            scan_type: ScanType::Active as u8,
            nprobes: -1,
            active_time: -1,
            passive_time: -1,
            home_time: -1,
            chanspecs: &[],
        };
        let mut buf = [0u8; ESCAN_PARAMS_FIXED_LEN];
        let n = build_escan_params(&mut buf, &req);
        self.shared.ioctl.set_var(self.ifidx, "escan", &buf[..n]).await
    }

    /// Installs a keepalive filter and turns the TCP keepalive offload on.
    /// The offload is disabled while the filter changes so the firmware
    /// never runs with a half-written configuration.
    pub async fn configure_tko_filter(&mut self, filter: &TkoFilter, flags: u8) -> Result<(), Error> {
        let mut buf = [0u8; 64];
        let n = build_tko_enable(&mut buf, false);
        self.tko_set(&buf[..n]).await?;
        let n = build_tko_autoenab(&mut buf, true);
        self.tko_set(&buf[..n]).await?;
        let n = build_tko_filter(&mut buf, filter, flags);
        self.tko_set(&buf[..n]).await?;
        let n = build_tko_enable(&mut buf, true);
        self.tko_set(&buf[..n]).await
    }

    /// Turns the TCP keepalive offload on or off without touching filters.
    pub async fn configure_tko_offload(&mut self, enable: bool) -> Result<(), Error> {
        let mut buf = [0u8; 16];
        let n = build_tko_autoenab(&mut buf, enable);
        self.tko_set(&buf[..n]).await?;
        let n = build_tko_enable(&mut buf, enable);
        self.tko_set(&buf[..n]).await
    }

    /// Keepalive interval and retry behaviour. Zero fields fall back to the
    /// firmware defaults.
    pub async fn set_tko_params(&mut self, params: &TkoParams) -> Result<(), Error> {
        let mut buf = [0u8; 16];
        let n = build_tko_params(&mut buf, params);
        self.tko_set(&buf[..n]).await
    }

    /// How many TCP connections the firmware can keep alive at once.
    pub async fn tko_max_connections(&mut self) -> Result<u8, Error> {
        let mut query = [0u8; 8];
        let n = build_tko_max_tcp(&mut query);
        let mut resp = [0u8; 8];
        self.shared
            .ioctl
            .transact(
                IoctlKind::Get,
                WLC_GET_VAR,
                self.ifidx,
                &[IOVAR_TKO.as_bytes(), &[0], &query[..n]],
                &mut resp,
            )
            .await?;
        // The response echoes the subcommand header extended with the count.
        Ok(resp[TKO_HDR_LEN])
    }

    async fn tko_set(&mut self, data: &[u8]) -> Result<(), Error> {
        self.shared.ioctl.set_var(self.ifidx, IOVAR_TKO, data).await
    }

    /// Turns the ICMP echo offload on or off. While enabled, firmware
    /// notifications are delivered through [`next_icmp_echo_event`](Self::next_icmp_echo_event).
    pub async fn icmp_echo_enable(&mut self, enable: bool) -> Result<(), Error> {
        if enable {
            self.shared.registry.lock(|r| {
                r.borrow_mut()
                    .register(self.ifidx, Purpose::IcmpEcho, ICMP_ECHO_EVENTS)
            })?;
        }
        let mut buf = [0u8; 8];
        let n = build_icmp_echo_enable(&mut buf, enable);
        let result = self
            .shared
            .ioctl
            .set_var(self.ifidx, IOVAR_ICMP_ECHO_REQ, &buf[..n])
            .await;
        if !enable || result.is_err() {
            self.shared
                .registry
                .lock(|r| r.borrow_mut().deregister(self.ifidx, Purpose::IcmpEcho));
        }
        result
    }

    pub async fn icmp_echo_add_peer(&mut self, peer: &IcmpEchoPeer) -> Result<(), Error> {
        let mut buf = [0u8; 48];
        let n = build_icmp_echo_add(&mut buf, peer);
        self.shared
            .ioctl
            .set_var(self.ifidx, IOVAR_ICMP_ECHO_REQ, &buf[..n])
            .await
    }

    pub async fn icmp_echo_remove_peer(&mut self, ip_ver: IpVer, ip: &[u8; 16]) -> Result<(), Error> {
        self.icmp_echo_peer_op(ICMP_ECHO_REQ_DEL, ip_ver, ip).await
    }

    pub async fn icmp_echo_start(&mut self, ip_ver: IpVer, ip: &[u8; 16]) -> Result<(), Error> {
        self.icmp_echo_peer_op(ICMP_ECHO_REQ_START, ip_ver, ip).await
    }

    pub async fn icmp_echo_stop(&mut self, ip_ver: IpVer, ip: &[u8; 16]) -> Result<(), Error> {
        self.icmp_echo_peer_op(ICMP_ECHO_REQ_STOP, ip_ver, ip).await
    }

    async fn icmp_echo_peer_op(&mut self, cmd_type: u8, ip_ver: IpVer, ip: &[u8; 16]) -> Result<(), Error> {
        let mut buf = [0u8; 32];
        let n = build_icmp_echo_peer_op(&mut buf, cmd_type, ip_ver, ip);
        self.shared
            .ioctl
            .set_var(self.ifidx, IOVAR_ICMP_ECHO_REQ, &buf[..n])
            .await
    }

    /// Waits for the next ICMP echo offload notification from the firmware.
    pub async fn next_icmp_echo_event(&mut self) -> IcmpEchoNotification {
        self.shared.icmp_echo.receive().await
    }

    /// Subscribes to firmware authentication handoff events, for a host
    /// supplicant driving SAE itself instead of the in-firmware one used by
    /// [`join`](Self::join). Replaces any earlier subscription.
    pub fn external_auth_request(&mut self) -> Result<(), Error> {
        self.shared
            .registry
            .lock(|r| r.borrow_mut().register(self.ifidx, Purpose::Auth, AUTH_EVENTS))
    }

    pub fn stop_external_auth_request(&mut self) {
        self.shared
            .registry
            .lock(|r| r.borrow_mut().deregister(self.ifidx, Purpose::Auth));
    }

    /// Waits for the next authentication handoff from the firmware.
    pub async fn next_ext_auth_event(&mut self) -> ExtAuthNotification {
        self.shared.ext_auth.receive().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioctl::{IOCTL_BUF_SIZE, WLC_SET_VAR};
    use crate::offload::{TKO_FILTER_DST_IP, TKO_FILTER_DST_PORT, TKO_SUBCMD_AUTOENAB, TKO_SUBCMD_ENABLE, TKO_SUBCMD_FILTER};
    use crate::MTU;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use std::vec::Vec;

    fn make_state() -> ch::State<MTU, 4, 4> {
        ch::State::new()
    }

    fn make_control<'a>(shared: &'a Shared, state: &'a mut ch::State<MTU, 4, 4>) -> Control<'a> {
        let (runner, _device) = ch::new(state, ch::driver::HardwareAddress::Ethernet([0; 6]));
        let (state_ch, _rx, _tx) = runner.split();
        Control::new(shared, state_ch)
    }

    /// Services `n` control transactions, recording the command and request
    /// bytes, and answering each with an empty success.
    async fn serve(shared: &Shared, n: usize, log: &mut Vec<(u32, Vec<u8>)>) {
        for _ in 0..n {
            let pending = shared.ioctl.wait_pending().await;
            let mut buf = [0u8; IOCTL_BUF_SIZE];
            let len = shared.ioctl.fill_request(&mut buf);
            log.push((pending.cmd, buf[..len].to_vec()));
            shared.ioctl.complete(Ok(0), &[]);
        }
    }

    #[test]
    fn tko_filter_configuration_order() {
        let shared = Shared::new();
        let mut state = make_state();
        let mut control = make_control(&shared, &mut state);

        let filter = TkoFilter {
            dst_port: 4433,
            dst_ip: [10; 16],
            ..Default::default()
        };
        let mut log = Vec::new();
        let (result, ()) = block_on(join(
            control.configure_tko_filter(&filter, TKO_FILTER_DST_PORT | TKO_FILTER_DST_IP),
            serve(&shared, 4, &mut log),
        ));
        result.unwrap();

        assert_eq!(log.len(), 4);
        for (cmd, bytes) in &log {
            assert_eq!(*cmd, WLC_SET_VAR);
            assert_eq!(&bytes[..4], b"tko\0");
        }
        let subcmd = |i: usize| u16::from_le_bytes([log[i].1[4], log[i].1[5]]);
        assert_eq!(subcmd(0), TKO_SUBCMD_ENABLE);
        assert_eq!(log[0].1[8], 0, "offload must be disabled first");
        assert_eq!(subcmd(1), TKO_SUBCMD_AUTOENAB);
        assert_eq!(subcmd(2), TKO_SUBCMD_FILTER);
        assert_eq!(subcmd(3), TKO_SUBCMD_ENABLE);
        assert_eq!(log[3].1[8], 1);
    }

    #[test]
    fn scan_rejects_overlapping_scan() {
        let shared = Shared::new();
        let mut state = make_state();
        let mut control = make_control(&shared, &mut state);

        shared.scan.start();
        let result = block_on(control.scan(ScanOptions::default()));
        assert!(matches!(result, Err(Error::ScanInProgress)));
    }

    #[test]
    fn failed_scan_start_rolls_back_state_and_subscription() {
        let shared = Shared::new();
        let mut state = make_state();
        let mut control = make_control(&shared, &mut state);

        let reject = async {
            shared.ioctl.wait_pending().await;
            let mut buf = [0u8; IOCTL_BUF_SIZE];
            shared.ioctl.fill_request(&mut buf);
            shared.ioctl.complete(Err(Error::Ioctl(-1)), &[]);
        };
        let (result, ()) = block_on(join(control.scan(ScanOptions::default()), reject));
        assert!(result.is_err());

        assert!(!shared.scan.is_running());
        assert!(!shared.registry.lock(|r| r.borrow().is_registered(0, Purpose::Scan)));
    }

    #[test]
    fn join_validates_before_touching_the_bus() {
        let shared = Shared::new();
        let mut state = make_state();
        let mut control = make_control(&shared, &mut state);

        // No servicer is running, so completing at all proves nothing was
        // staged for the bus.
        let result = block_on(control.join(b"net", Security::WPA2_AES_PSK, b"short"));
        assert!(matches!(result, Err(Error::InvalidKey)));

        let long_ssid = [b'a'; 33];
        let result = block_on(control.join(&long_ssid, Security::OPEN, &[]));
        assert!(matches!(result, Err(Error::InvalidSsidLen)));
    }

    #[test]
    fn external_auth_subscription_lifecycle() {
        let shared = Shared::new();
        let mut state = make_state();
        let mut control = make_control(&shared, &mut state);

        control.external_auth_request().unwrap();
        // Re-requesting replaces the subscription instead of leaking a slot.
        control.external_auth_request().unwrap();
        assert!(shared.registry.lock(|r| r.borrow().is_registered(0, Purpose::Auth)));

        control.stop_external_auth_request();
        assert!(!shared.registry.lock(|r| r.borrow().is_registered(0, Purpose::Auth)));
    }

    #[test]
    fn wlan_up_down_tracks_state() {
        let shared = Shared::new();
        let mut state = make_state();
        let mut control = make_control(&shared, &mut state);

        // Down before up: rejected without a bus transaction.
        let result = block_on(control.set_down());
        assert!(matches!(result, Err(Error::InterfaceNotUp)));

        let mut log = Vec::new();
        let (result, ()) = block_on(join(
            async {
                control.set_up().await?;
                control.set_up().await?; // second call is a no-op
                control.set_down().await
            },
            serve(&shared, 2, &mut log),
        ));
        result.unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log[0].0, WLC_UP);
        assert_eq!(log[1].0, WLC_DOWN);
    }

    #[test]
    fn concurrent_join_is_refused() {
        let shared = Shared::new();
        let mut state = make_state();
        let mut control = make_control(&shared, &mut state);

        let _attempt = shared.join.attempt.try_lock().ok().unwrap();
        let result = block_on(control.join(b"net", Security::OPEN, &[]));
        assert!(matches!(result, Err(Error::JoinInProgress)));
    }
}
