//! Bus-owning driver loop: services control transactions from [`crate::Control`],
//! reads firmware frames, dispatches events to their subscribers and moves
//! network data in and out of the driver channel.

use embassy_futures::select::{select3, Either3};
use embassy_net_driver_channel as ch;
use embassy_net_driver_channel::driver::LinkState;
use embassy_time::{with_timeout, Duration};

use crate::bus::{Bus, Function};
use crate::chip::{
    self, Power, PollBudget, BUS_UP_ATTEMPTS, HT_AVAIL_WAIT, SBSDIO_ALP_AVAIL, SBSDIO_ALP_AVAIL_REQ,
    SDIO_CHIP_CLOCK_CSR, SOCSRAM_CORE_BASE, WLAN_ARM_CORE_BASE, WRAPPER_REGISTER_OFFSET,
};
use crate::events::{Event, EventMsg, Purpose, Verdict};
use crate::ioctl::{
    IoctlKind, PendingIoctl, IOCTL_BUF_SIZE, WLC_GET_VAR, WLC_SET_GMODE, WLC_SET_PM, WLC_SET_VAR,
    WLC_UP,
};
use crate::join::{self, JOIN_LINK_READY};
use crate::scan::on_scan_event;
use crate::structs::{
    parse_bdc, parse_cdc, parse_event_frame, parse_sdpcm, write_bdc_header, write_cdc_header,
    write_sdpcm_header, BDC_HEADER_LEN, CDC_HEADER_LEN, CHANNEL_CONTROL, CHANNEL_DATA,
    CHANNEL_EVENT, SDPCM_HEADER_LEN,
};
use crate::util::{slice8, slice8_mut};
use crate::{offload, Error, Shared, WlanState, MTU};

const FRAME_WORDS: usize = 512;

/// Firmware response deadline for one control transaction.
const IOCTL_TIMEOUT: Duration = Duration::from_millis(5000);

const EVENT_MASK_LEN: usize = 32;

const DEFAULT_COUNTRY: &[u8; 2] = b"XX";

const GMODE_AUTO: u32 = 1;
const PM2_POWERSAVE_MODE: u32 = 2;

/// Must be polled (via [`Runner::run`]) for the driver to make progress.
pub struct Runner<'a, B: Bus> {
    shared: &'a Shared,
    bus: B,
    power: Power,
    state_ch: ch::StateRunner<'a>,
    rx: ch::RxRunner<'a, MTU>,
    tx: ch::TxRunner<'a, MTU>,
    frame: [u32; FRAME_WORDS],
    sdpcm_seq: u8,
    ioctl_id: u16,
}

impl<'a, B: Bus> Runner<'a, B> {
    pub(crate) fn new(ch_runner: ch::Runner<'a, MTU>, shared: &'a Shared, bus: B) -> Self {
        let (state_ch, rx, tx) = ch_runner.split();
        Self {
            shared,
            bus,
            power: Power::new(),
            state_ch,
            rx,
            tx,
            frame: [0; FRAME_WORDS],
            sdpcm_seq: 0,
            ioctl_id: 0,
        }
    }

    /// Brings the chip up: backplane clock, core reset, save-restore, then
    /// the firmware-level configuration (event mask, country, radio up).
    pub async fn init(&mut self) -> Result<(), Error> {
        // ALP clock is enough for backplane register work.
        self.bus
            .write8(Function::Backplane, SDIO_CHIP_CLOCK_CSR, SBSDIO_ALP_AVAIL_REQ)
            .await?;
        let mut budget = PollBudget::new(BUS_UP_ATTEMPTS, HT_AVAIL_WAIT);
        loop {
            if !budget.attempt().await {
                error!("ALP clock never became available");
                return Err(Error::BusUpTimeout);
            }
            let csr = self.bus.read8(Function::Backplane, SDIO_CHIP_CLOCK_CSR).await?;
            if csr & SBSDIO_ALP_AVAIL != 0 {
                break;
            }
        }
        self.bus.write8(Function::Backplane, SDIO_CHIP_CLOCK_CSR, 0).await?;

        let wlan = WLAN_ARM_CORE_BASE + WRAPPER_REGISTER_OFFSET;
        let socsram = SOCSRAM_CORE_BASE + WRAPPER_REGISTER_OFFSET;
        chip::disable_core(&mut self.bus, wlan, true).await?;
        chip::reset_core(&mut self.bus, socsram, 0, 0).await?;
        chip::reset_core(&mut self.bus, wlan, 0, 0).await?;
        chip::core_is_up(&mut self.bus, wlan).await?;
        info!("wlan core is up");
        self.shared.set_wlan_state(WlanState::Down);

        self.power.ensure_bus_up(&mut self.bus).await?;
        if self.power.enable_save_restore(&mut self.bus).await? {
            // Save-restore setup leaves the chip asleep; wake it back up for
            // the configuration that follows.
            self.power.ensure_bus_up(&mut self.bus).await?;
        }

        let mut mac = [0u8; 6];
        self.get_iovar("cur_etheraddr", &mut mac).await?;
        info!("firmware MAC {:?}", mac);
        self.state_ch
            .set_hardware_address(ch::driver::HardwareAddress::Ethernet(mac));

        self.set_iovar("event_msgs", &event_mask()).await?;
        self.set_country(DEFAULT_COUNTRY).await?;

        self.ioctl(IoctlKind::Set, WLC_UP, 0, &mut [], 0).await?;
        self.shared.set_wlan_state(WlanState::Up);
        self.ioctl_set_u32(WLC_SET_GMODE, 0, GMODE_AUTO).await?;
        self.ioctl_set_u32(WLC_SET_PM, 0, PM2_POWERSAVE_MODE).await?;

        self.power
            .allow_bus_sleep(&mut self.bus, self.shared.keep_awake())
            .await?;
        Ok(())
    }

    pub async fn run(&mut self) -> ! {
        loop {
            match select3(
                self.bus.wait_for_event(),
                self.shared.ioctl.wait_pending(),
                self.tx.tx_buf(),
            )
            .await
            {
                Either3::First(()) => {
                    if let Err(e) = self.service_rx().await {
                        warn!("rx servicing failed: {:?}", e);
                    }
                }
                Either3::Second(pending) => self.service_ioctl(pending).await,
                Either3::Third(packet) => {
                    let total = SDPCM_HEADER_LEN + BDC_HEADER_LEN + packet.len();
                    let seq = self.sdpcm_seq.wrapping_add(1);
                    self.sdpcm_seq = seq;
                    let f = slice8_mut(&mut self.frame);
                    write_sdpcm_header(f, total as u16, seq, CHANNEL_DATA);
                    write_bdc_header(&mut f[SDPCM_HEADER_LEN..], 0);
                    f[SDPCM_HEADER_LEN + BDC_HEADER_LEN..total].copy_from_slice(packet);
                    self.tx.tx_done();

                    if let Err(e) = self.send_frame(total).await {
                        warn!("tx failed: {:?}", e);
                    }
                }
            }
        }
    }

    async fn send_frame(&mut self, total: usize) -> Result<(), Error> {
        self.power.ensure_bus_up(&mut self.bus).await?;
        self.bus.write_frame(&self.frame[..(total + 3) / 4]).await?;
        self.power
            .allow_bus_sleep(&mut self.bus, self.shared.keep_awake())
            .await
    }

    /// Drains all frames the firmware has ready.
    async fn service_rx(&mut self) -> Result<(), Error> {
        self.power.ensure_bus_up(&mut self.bus).await?;
        loop {
            let n = self.bus.read_frame(&mut self.frame).await?;
            if n == 0 {
                break;
            }
            let data = &slice8(&self.frame)[..n];
            match parse_sdpcm(data) {
                Some(view) if view.channel == CHANNEL_CONTROL => {
                    warn!("unsolicited control frame");
                }
                Some(view) => {
                    process_frame(self.shared, &self.state_ch, &mut self.rx, view.channel, view.payload)
                }
                None => warn!("dropping malformed bus frame ({} bytes)", n),
            }
        }
        self.power
            .allow_bus_sleep(&mut self.bus, self.shared.keep_awake())
            .await
    }

    async fn service_ioctl(&mut self, pending: PendingIoctl) {
        let mut buf = [0u8; IOCTL_BUF_SIZE];
        self.shared.ioctl.fill_request(&mut buf);
        match self.ioctl(pending.kind, pending.cmd, pending.ifidx, &mut buf, pending.len).await {
            Ok(n) => self.shared.ioctl.complete(Ok(n), &buf[..n]),
            Err(e) => self.shared.ioctl.complete(Err(e), &[]),
        }
    }

    /// One complete control transaction against the bus. `buf[..len]` holds
    /// the request; the response is written back into `buf`.
    async fn ioctl(
        &mut self,
        kind: IoctlKind,
        cmd: u32,
        ifidx: u8,
        buf: &mut [u8],
        len: usize,
    ) -> Result<usize, Error> {
        self.power.ensure_bus_up(&mut self.bus).await?;
        let result = self.ioctl_inner(kind, cmd, ifidx, buf, len).await;
        self.power
            .allow_bus_sleep(&mut self.bus, self.shared.keep_awake())
            .await?;
        result
    }

    async fn ioctl_inner(
        &mut self,
        kind: IoctlKind,
        cmd: u32,
        ifidx: u8,
        buf: &mut [u8],
        len: usize,
    ) -> Result<usize, Error> {
        let total = SDPCM_HEADER_LEN + CDC_HEADER_LEN + len;
        if total > FRAME_WORDS * 4 {
            return Err(Error::BufferTooShort);
        }

        let id = self.ioctl_id.wrapping_add(1);
        self.ioctl_id = id;
        let seq = self.sdpcm_seq.wrapping_add(1);
        self.sdpcm_seq = seq;

        let f = slice8_mut(&mut self.frame);
        write_sdpcm_header(f, total as u16, seq, CHANNEL_CONTROL);
        write_cdc_header(
            &mut f[SDPCM_HEADER_LEN..],
            cmd,
            len as u32,
            kind == IoctlKind::Set,
            id,
            ifidx,
        );
        f[SDPCM_HEADER_LEN + CDC_HEADER_LEN..total].copy_from_slice(&buf[..len]);
        self.bus.write_frame(&self.frame[..(total + 3) / 4]).await?;

        let response = async {
            loop {
                self.bus.wait_for_event().await;
                loop {
                    let n = self.bus.read_frame(&mut self.frame).await?;
                    if n == 0 {
                        break;
                    }
                    let data = &slice8(&self.frame)[..n];
                    let Some(view) = parse_sdpcm(data) else {
                        warn!("dropping malformed bus frame ({} bytes)", n);
                        continue;
                    };
                    if view.channel != CHANNEL_CONTROL {
                        process_frame(
                            self.shared,
                            &self.state_ch,
                            &mut self.rx,
                            view.channel,
                            view.payload,
                        );
                        continue;
                    }
                    let Some(cdc) = parse_cdc(view.payload) else {
                        warn!("malformed cdc response");
                        continue;
                    };
                    if cdc.id != id {
                        warn!("stale ioctl response id {} (expected {})", cdc.id, id);
                        continue;
                    }
                    if cdc.status != 0 {
                        return Err(Error::Ioctl(cdc.status));
                    }
                    let m = cdc.payload.len().min(buf.len());
                    buf[..m].copy_from_slice(&cdc.payload[..m]);
                    return Ok(m);
                }
            }
        };

        match with_timeout(IOCTL_TIMEOUT, response).await {
            Ok(result) => result,
            Err(_) => {
                error!("ioctl {} timed out", cmd);
                Err(Error::IoctlTimeout)
            }
        }
    }

    // Init-time helpers; once `run` is live, Control goes through the
    // rendezvous in `ioctl::IoctlState` instead.

    async fn ioctl_set_u32(&mut self, cmd: u32, ifidx: u8, val: u32) -> Result<(), Error> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&val.to_le_bytes());
        self.ioctl(IoctlKind::Set, cmd, ifidx, &mut buf, 4).await?;
        Ok(())
    }

    async fn set_iovar(&mut self, name: &str, data: &[u8]) -> Result<(), Error> {
        let mut buf = [0u8; IOCTL_BUF_SIZE];
        let len = name.len() + 1 + data.len();
        buf[..name.len()].copy_from_slice(name.as_bytes());
        buf[name.len() + 1..len].copy_from_slice(data);
        self.ioctl(IoctlKind::Set, WLC_SET_VAR, 0, &mut buf, len).await?;
        Ok(())
    }

    async fn get_iovar(&mut self, name: &str, resp: &mut [u8]) -> Result<usize, Error> {
        let mut buf = [0u8; IOCTL_BUF_SIZE];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        let len = (name.len() + 1).max(resp.len());
        let n = self.ioctl(IoctlKind::Get, WLC_GET_VAR, 0, &mut buf, len).await?;
        let n = n.min(resp.len());
        resp[..n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    /// Country info: abbreviation, revision (-1 lets firmware pick), ccode.
    async fn set_country(&mut self, code: &[u8; 2]) -> Result<(), Error> {
        let mut country = [0u8; 12];
        country[..2].copy_from_slice(code);
        country[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        country[8..10].copy_from_slice(code);
        self.set_iovar("country", &country).await
    }
}

fn process_frame(
    shared: &Shared,
    state_ch: &ch::StateRunner<'_>,
    rx: &mut ch::RxRunner<'_, MTU>,
    channel: u8,
    payload: &[u8],
) {
    match channel {
        CHANNEL_EVENT => {
            let Some(frame) = parse_bdc(payload) else {
                warn!("event frame with bad bdc header");
                return;
            };
            match parse_event_frame(frame) {
                Some(msg) => dispatch_event(shared, state_ch, &msg),
                None => trace!("dropping non-event frame on event channel"),
            }
        }
        CHANNEL_DATA => {
            let Some(packet) = parse_bdc(payload) else {
                warn!("data frame with bad bdc header");
                return;
            };
            if packet.len() > MTU {
                warn!("dropping oversized rx packet ({} bytes)", packet.len());
                return;
            }
            match rx.try_rx_buf() {
                Some(buf) => {
                    buf[..packet.len()].copy_from_slice(packet);
                    rx.rx_done(packet.len());
                }
                None => trace!("rx ring full, dropping packet"),
            }
        }
        other => warn!("frame on unknown sdpcm channel {}", other),
    }
}

/// Routes one firmware event through the subscription registry. A `Consumed`
/// verdict stops further delivery for this event.
fn dispatch_event(shared: &Shared, state_ch: &ch::StateRunner<'_>, msg: &EventMsg<'_>) {
    let Some(event) = Event::from_code(msg.event_type) else {
        trace!("event code {} not of interest", msg.event_type);
        return;
    };

    let purposes = shared
        .registry
        .lock(|r| r.borrow().subscribers(msg.ifidx, event));
    if purposes.is_empty() {
        trace!("no subscriber for event {:?}", event);
        return;
    }

    for purpose in purposes {
        let verdict = match purpose {
            Purpose::Join => join::on_join_event(&shared.join, msg),
            Purpose::Scan => on_scan_event(shared, msg),
            Purpose::Auth => join::on_ext_auth_event(shared, msg),
            Purpose::IcmpEcho => offload::on_icmp_echo_event(shared, msg),
        };
        if matches!(verdict, Verdict::Consumed) {
            break;
        }
    }

    // A lost link takes effect immediately, not on the next join call.
    if matches!(
        event,
        Event::Link | Event::Deauth | Event::DeauthInd | Event::Disassoc | Event::DisassocInd
    ) && shared.join.status(msg.bsscfgidx) & JOIN_LINK_READY == 0
    {
        state_ch.set_link_state(LinkState::Down);
    }
}

/// Bitmap for the `event_msgs` iovar covering exactly the events this driver
/// dispatches.
fn event_mask() -> [u8; EVENT_MASK_LEN] {
    let mut mask = [0u8; EVENT_MASK_LEN];
    let lists = [
        crate::events::JOIN_EVENTS,
        crate::events::SCAN_EVENTS,
        crate::events::AUTH_EVENTS,
        crate::events::ICMP_ECHO_EVENTS,
    ];
    for event in lists.into_iter().flatten() {
        let code = *event as u32 as usize;
        mask[code / 8] |= 1 << (code % 8);
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AUTH_EVENTS, EVENT_FLAG_LINK, JOIN_EVENTS};
    use crate::structs::build_event_frame;

    fn dispatch(shared: &Shared, event: Event, flags: u16) {
        let mut state = ch::State::<MTU, 4, 4>::new();
        let (runner, _device) = ch::new(&mut state, ch::driver::HardwareAddress::Ethernet([0; 6]));
        let state_ch = runner.state_runner();

        let mut buf = [0u8; 128];
        let n = build_event_frame(&mut buf, event as u32, 0, 0, flags, 0, 0, &[]);
        let msg = parse_event_frame(&buf[..n]).unwrap();
        dispatch_event(shared, &state_ch, &msg);
    }

    #[test]
    fn dispatch_updates_join_state_through_registry() {
        let shared = Shared::new();
        shared
            .registry
            .lock(|r| r.borrow_mut().register(0, Purpose::Join, JOIN_EVENTS))
            .unwrap();

        dispatch(&shared, Event::Link, EVENT_FLAG_LINK);
        assert_ne!(shared.join.status(0) & JOIN_LINK_READY, 0);
    }

    #[test]
    fn external_auth_events_reach_the_notification_queue() {
        let shared = Shared::new();
        shared
            .registry
            .lock(|r| r.borrow_mut().register(0, Purpose::Auth, AUTH_EVENTS))
            .unwrap();

        dispatch(&shared, Event::ExtAuthReq, 0);
        let note = shared.ext_auth.try_receive().unwrap();
        assert_eq!(note.kind, join::ExtAuthKind::Request);
    }

    #[test]
    fn consumed_verdict_stops_delivery() {
        let shared = Shared::new();
        // Registered first, so the auth subscriber sees the event before the
        // join machine and swallows it.
        shared
            .registry
            .lock(|r| r.borrow_mut().register(0, Purpose::Auth, &[Event::Link]))
            .unwrap();
        shared
            .registry
            .lock(|r| r.borrow_mut().register(0, Purpose::Join, &[Event::Link]))
            .unwrap();

        dispatch(&shared, Event::Link, EVENT_FLAG_LINK);
        assert_eq!(shared.join.status(0), 0);
    }

    #[test]
    fn event_mask_covers_dispatch_tables() {
        let mask = event_mask();
        for event in [Event::SetSsid, Event::Link, Event::PskSup, Event::EscanResult, Event::IcmpEchoReq] {
            let code = event as u32 as usize;
            assert_ne!(mask[code / 8] & (1 << (code % 8)), 0, "missing {:?}", event);
        }
        // Codes we never dispatch stay masked off.
        assert_eq!(mask[199 / 8] & (1 << (199 % 8)), 0);
    }
}
