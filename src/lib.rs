//! Embedded-friendly host driver for fullmac Wi-Fi chips speaking the
//! SDPCM/CDC control protocol over gSPI.
//!
//! The driver is split the usual way: [`new`] hands back an
//! [`embassy_net_driver_channel`] device for the network stack, a
//! [`Control`] handle for joining, scanning and offload configuration, and a
//! [`Runner`] that owns the bus and must be polled forever.

#![cfg_attr(not(test), no_std)]
#![deny(unused_must_use)]
#![allow(async_fn_in_trait)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

mod bus;
mod chip;
mod control;
mod events;
mod ioctl;
mod join;
mod offload;
mod runner;
mod scan;
mod structs;
mod util;

use core::cell::RefCell;

use embassy_net_driver_channel as ch;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;

pub use bus::{Bus, BusError, Function};
pub use control::Control;
pub use events::Event;
pub use join::{ExtAuthKind, ExtAuthNotification, Security};
pub use offload::{
    IcmpEchoNotification, IcmpEchoPeer, IpVer, TkoFilter, TkoParams, TKO_FILTER_DST_IP,
    TKO_FILTER_DST_PORT, TKO_FILTER_SRC_IP, TKO_FILTER_SRC_PORT,
};
pub use runner::Runner;
pub use scan::{BssEntry, BssType, ScanOptions, ScanStatus, ScanType, Scanner};
pub use structs::Band;

use events::Registry;
use ioctl::IoctlState;
use join::JoinState;
use scan::ScanState;

pub const MTU: usize = 1514;

pub(crate) const MAX_INTERFACES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Transport failure on the underlying bus.
    Bus(BusError),
    /// The chip never acknowledged a clock or wakeup request.
    BusUpTimeout,
    CoreClockNotEnabled,
    CoreInReset,
    /// No free slot in the event subscription table.
    EventTableFull,
    BufferTooShort,
    InvalidArgument,
    InvalidSsidLen,
    InvalidKey,
    WepNotAllowed,
    UnknownSecurityType,
    NetworkNotFound,
    NotAuthenticated,
    NotKeyed,
    EapolM1Timeout,
    EapolM3Timeout,
    EapolG1Timeout,
    EapolFailure,
    InvalidJoinStatus,
    JoinInProgress,
    ScanInProgress,
    /// The operation needs the WLAN interface brought up first.
    InterfaceNotUp,
    /// The firmware never answered a control transaction.
    IoctlTimeout,
    /// Non-zero firmware status for a control transaction.
    Ioctl(i32),
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Error::Bus(e)
    }
}

/// Interface role as configured in firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Role {
    Invalid,
    Sta,
}

/// WLAN core state, as last commanded over the control path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum WlanState {
    Off,
    Down,
    Up,
}

/// State shared between [`Control`], [`Runner`] and the event handlers.
pub(crate) struct Shared {
    pub(crate) ioctl: IoctlState,
    pub(crate) registry: BlockingMutex<CriticalSectionRawMutex, RefCell<Registry>>,
    pub(crate) join: JoinState,
    pub(crate) scan: ScanState,
    pub(crate) icmp_echo: Channel<CriticalSectionRawMutex, IcmpEchoNotification, 2>,
    pub(crate) ext_auth: Channel<CriticalSectionRawMutex, ExtAuthNotification, 2>,
    keep_awake: BlockingMutex<CriticalSectionRawMutex, RefCell<u32>>,
    pub(crate) roles: BlockingMutex<CriticalSectionRawMutex, RefCell<[Role; MAX_INTERFACES]>>,
    wlan: BlockingMutex<CriticalSectionRawMutex, RefCell<WlanState>>,
}

impl Shared {
    pub(crate) const fn new() -> Self {
        Self {
            ioctl: IoctlState::new(),
            registry: BlockingMutex::new(RefCell::new(Registry::new())),
            join: JoinState::new(),
            scan: ScanState::new(),
            icmp_echo: Channel::new(),
            ext_auth: Channel::new(),
            keep_awake: BlockingMutex::new(RefCell::new(0)),
            roles: BlockingMutex::new(RefCell::new([Role::Invalid; MAX_INTERFACES])),
            wlan: BlockingMutex::new(RefCell::new(WlanState::Off)),
        }
    }

    pub(crate) fn wlan_state(&self) -> WlanState {
        self.wlan.lock(|c| *c.borrow())
    }

    pub(crate) fn set_wlan_state(&self, state: WlanState) {
        self.wlan.lock(|c| *c.borrow_mut() = state);
    }

    /// Holds the chip awake for the guard's lifetime. Nests.
    pub(crate) fn wake_lock(&self) -> WakeLock<'_> {
        self.keep_awake.lock(|c| *c.borrow_mut() += 1);
        WakeLock { shared: self }
    }

    /// Whether any wake lock is outstanding. The runner checks this before
    /// letting the bus doze between transactions.
    pub(crate) fn keep_awake(&self) -> bool {
        self.keep_awake.lock(|c| *c.borrow() > 0)
    }
}

pub(crate) struct WakeLock<'a> {
    shared: &'a Shared,
}

impl Drop for WakeLock<'_> {
    fn drop(&mut self) {
        self.shared.keep_awake.lock(|c| {
            let mut c = c.borrow_mut();
            *c = c.saturating_sub(1);
        });
    }
}

pub struct State {
    shared: Shared,
    ch: ch::State<MTU, 4, 4>,
}

impl State {
    pub fn new() -> Self {
        Self {
            shared: Shared::new(),
            ch: ch::State::new(),
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

pub type NetDriver<'a> = ch::Device<'a, MTU>;

/// Splits `state` into the three driver halves. The hardware address starts
/// out zeroed and is replaced with the firmware's MAC during
/// [`Runner::init`].
pub fn new<'a, B: Bus>(state: &'a mut State, bus: B) -> (NetDriver<'a>, Control<'a>, Runner<'a, B>) {
    let (ch_runner, device) = ch::new(&mut state.ch, ch::driver::HardwareAddress::Ethernet([0; 6]));
    let state_ch = ch_runner.state_runner();

    let runner = Runner::new(ch_runner, &state.shared, bus);
    let control = Control::new(&state.shared, state_ch);
    (device, control, runner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_locks_nest_and_release() {
        let shared = Shared::new();
        assert!(!shared.keep_awake());

        let a = shared.wake_lock();
        let b = shared.wake_lock();
        assert!(shared.keep_awake());

        drop(a);
        assert!(shared.keep_awake(), "still held by the second lock");
        drop(b);
        assert!(!shared.keep_awake());
    }

    #[test]
    fn wake_lock_releases_on_early_exit() {
        let shared = Shared::new();

        fn fallible(shared: &Shared) -> Result<(), Error> {
            let _wake = shared.wake_lock();
            Err(Error::BusUpTimeout)
        }

        let _ = fallible(&shared);
        assert!(!shared.keep_awake());
    }
}
