//! Chip power management: backplane clock requests, the KSO (keep-SDIO-on)
//! handshake, save-restore mode and AI core reset sequencing.

use embassy_time::{Duration, Timer};

use crate::bus::{Bus, Function};
use crate::Error;

// Function 1 SDIO core registers.
pub(crate) const SDIO_BACKPLANE_ADDRESS_LOW: u32 = 0x1000A;
pub(crate) const SDIO_BACKPLANE_ADDRESS_MID: u32 = 0x1000B;
pub(crate) const SDIO_BACKPLANE_ADDRESS_HIGH: u32 = 0x1000C;
pub(crate) const SDIO_CHIP_CLOCK_CSR: u32 = 0x1000E;
pub(crate) const SDIO_PULL_UP: u32 = 0x1000F;
pub(crate) const SDIO_WAKEUP_CTRL: u32 = 0x1001E;
pub(crate) const SDIO_SLEEP_CSR: u32 = 0x1001F;

// Chip clock CSR bits.
pub(crate) const SBSDIO_FORCE_HT: u8 = 0x02;
pub(crate) const SBSDIO_ALP_AVAIL_REQ: u8 = 0x08;
pub(crate) const SBSDIO_HT_AVAIL_REQ: u8 = 0x10;
pub(crate) const SBSDIO_ALP_AVAIL: u8 = 0x40;
pub(crate) const SBSDIO_HT_AVAIL: u8 = 0x80;

// Sleep CSR bits.
const SBSDIO_SLPCSR_KEEP_WL_KSO: u8 = 0x01;
const SBSDIO_SLPCSR_WL_DEVON: u8 = 0x02;

// Wakeup control bits.
const SBSDIO_WCTRL_WL_WAKE_TILL_HT_AVAIL: u8 = 0x02;

// Function 0 card capability register.
const SDIO_CCCR_BRCM_CARDCAP: u32 = 0xF0;
const SDIO_CCCR_BRCM_CARDCAP_CMD_NODEC: u8 = 0x08;

// Backplane window addressing.
const SBSDIO_SB_OFT_ADDR_MASK: u32 = 0x07FFF;
const SBSDIO_SB_ACCESS_2_4B_FLAG: u32 = 0x08000;

// AI (axi interconnect) wrapper registers, relative to a core's wrapper base.
const AI_IOCTRL_OFFSET: u32 = 0x408;
const AI_RESETCTRL_OFFSET: u32 = 0x800;
const AI_RESETSTATUS_OFFSET: u32 = 0x804;

pub(crate) const SICF_CLOCK_EN: u32 = 0x0001;
pub(crate) const SICF_FGC: u32 = 0x0002;
pub(crate) const SICF_CPUHALT: u32 = 0x0020;
const AIRC_RESET: u32 = 0x01;

pub(crate) const WLAN_ARM_CORE_BASE: u32 = 0x1800_3000;
pub(crate) const SOCSRAM_CORE_BASE: u32 = 0x1800_4000;
pub(crate) const WRAPPER_REGISTER_OFFSET: u32 = 0x10_0000;

// PMU retention control, used to probe firmware save-restore support.
const PMU_RETENTION_CTL: u32 = 0x1800_0670;
const PMU_RCTL_MACPHY_DISABLE: u32 = 1 << 26;
const PMU_RCTL_LOGIC_DISABLE: u32 = 1 << 27;

pub(crate) const BUS_UP_ATTEMPTS: u32 = 1000;
pub(crate) const HT_AVAIL_WAIT: Duration = Duration::from_millis(1);
pub(crate) const MAX_KSO_ATTEMPTS: u32 = 64;
pub(crate) const KSO_WAIT: Duration = Duration::from_millis(1);

const BACKPLANE_IDLE_ATTEMPTS: u32 = 30;
const BACKPLANE_IDLE_WAIT: Duration = Duration::from_micros(10);

/// Bounded retry budget: a fixed number of attempts separated by a fixed
/// delay. Shared by the clock-request, KSO and core-reset poll loops.
pub(crate) struct PollBudget {
    left: u32,
    period: Duration,
    started: bool,
}

impl PollBudget {
    pub(crate) fn new(attempts: u32, period: Duration) -> Self {
        Self {
            left: attempts,
            period,
            started: false,
        }
    }

    /// Grants the next attempt, sleeping for the period between attempts.
    /// Returns false once the budget is exhausted.
    pub(crate) async fn attempt(&mut self) -> bool {
        if self.left == 0 {
            return false;
        }
        if self.started {
            Timer::after(self.period).await;
        } else {
            self.started = true;
        }
        self.left -= 1;
        true
    }

    /// Burns one attempt and sleeps for the period. Returns false once the
    /// budget is exhausted.
    pub(crate) async fn retry(&mut self) -> bool {
        if self.left == 0 {
            return false;
        }
        self.left -= 1;
        Timer::after(self.period).await;
        true
    }
}

/// Sets the function-1 backplane window to the 32 KiB region containing `addr`.
async fn set_backplane_window<B: Bus>(bus: &mut B, addr: u32) -> Result<(), Error> {
    let base = addr & !SBSDIO_SB_OFT_ADDR_MASK;
    bus.write8(Function::Backplane, SDIO_BACKPLANE_ADDRESS_LOW, (base >> 8) as u8)
        .await?;
    bus.write8(Function::Backplane, SDIO_BACKPLANE_ADDRESS_MID, (base >> 16) as u8)
        .await?;
    bus.write8(Function::Backplane, SDIO_BACKPLANE_ADDRESS_HIGH, (base >> 24) as u8)
        .await?;
    Ok(())
}

pub(crate) async fn bp_read32<B: Bus>(bus: &mut B, addr: u32) -> Result<u32, Error> {
    set_backplane_window(bus, addr).await?;
    let val = bus
        .read32(
            Function::Backplane,
            (addr & SBSDIO_SB_OFT_ADDR_MASK) | SBSDIO_SB_ACCESS_2_4B_FLAG,
        )
        .await?;
    Ok(val)
}

pub(crate) async fn bp_write32<B: Bus>(bus: &mut B, addr: u32, val: u32) -> Result<(), Error> {
    set_backplane_window(bus, addr).await?;
    bus.write32(
        Function::Backplane,
        (addr & SBSDIO_SB_OFT_ADDR_MASK) | SBSDIO_SB_ACCESS_2_4B_FLAG,
        val,
    )
    .await?;
    Ok(())
}

/// Tracks whether the chip-side backplane is clocked and which wake
/// mechanism applies. All bus transactions must be bracketed by
/// [`Power::ensure_bus_up`] / [`Power::allow_bus_sleep`].
pub(crate) struct Power {
    bus_is_up: bool,
    save_restore: bool,
}

impl Power {
    pub(crate) fn new() -> Self {
        Self {
            bus_is_up: false,
            save_restore: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_save_restore() -> Self {
        Self {
            bus_is_up: false,
            save_restore: true,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_up(&self) -> bool {
        self.bus_is_up
    }

    /// Wakes the chip-side bus if it is asleep. Without save-restore this
    /// requests the HT clock and polls for it; with save-restore it runs the
    /// KSO handshake.
    pub(crate) async fn ensure_bus_up<B: Bus>(&mut self, bus: &mut B) -> Result<(), Error> {
        if self.bus_is_up {
            return Ok(());
        }

        if self.save_restore {
            self.kso_enable(bus, true).await?;
            self.bus_is_up = true;
            return Ok(());
        }

        bus.write8(Function::Backplane, SDIO_CHIP_CLOCK_CSR, SBSDIO_HT_AVAIL_REQ)
            .await?;
        let mut budget = PollBudget::new(BUS_UP_ATTEMPTS, HT_AVAIL_WAIT);
        loop {
            if !budget.attempt().await {
                error!("HT clock never became available");
                return Err(Error::BusUpTimeout);
            }
            let csr = bus.read8(Function::Backplane, SDIO_CHIP_CLOCK_CSR).await?;
            if csr & SBSDIO_HT_AVAIL != 0 {
                self.bus_is_up = true;
                return Ok(());
            }
        }
    }

    /// Releases the wake request. No-op while `keep_awake` holds the chip up
    /// or when the bus is already asleep. Sleep entry is fire-and-forget:
    /// there is no poll on the way down.
    pub(crate) async fn allow_bus_sleep<B: Bus>(
        &mut self,
        bus: &mut B,
        keep_awake: bool,
    ) -> Result<(), Error> {
        if keep_awake || !self.bus_is_up {
            return Ok(());
        }
        self.bus_is_up = false;

        if self.save_restore {
            self.kso_enable(bus, false).await
        } else {
            bus.write8(Function::Backplane, SDIO_CHIP_CLOCK_CSR, 0).await?;
            Ok(())
        }
    }

    /// KSO handshake. The first write may be lost while the device is in low
    /// power, so its result is ignored; the enable path then rewrites and
    /// polls until the device confirms both KSO and device-on.
    async fn kso_enable<B: Bus>(&mut self, bus: &mut B, enable: bool) -> Result<(), Error> {
        let wr_val = if enable { SBSDIO_SLPCSR_KEEP_WL_KSO } else { 0 };

        let _ = bus.write8(Function::Backplane, SDIO_SLEEP_CSR, wr_val).await;
        if !enable {
            return Ok(());
        }

        let bmask = SBSDIO_SLPCSR_KEEP_WL_KSO | SBSDIO_SLPCSR_WL_DEVON;
        bus.write8(Function::Backplane, SDIO_SLEEP_CSR, wr_val).await?;

        let mut budget = PollBudget::new(MAX_KSO_ATTEMPTS, KSO_WAIT);
        let mut rd = 0;
        loop {
            if !budget.attempt().await {
                error!("KSO enable timed out, last sleep csr {:02x}", rd);
                return Err(Error::BusUpTimeout);
            }
            rd = bus.read8(Function::Backplane, SDIO_SLEEP_CSR).await?;
            if rd & bmask == bmask && rd != 0xFF {
                return Ok(());
            }
            bus.write8(Function::Backplane, SDIO_SLEEP_CSR, wr_val).await?;
        }
    }

    /// Switches the chip into save-restore power save when the firmware
    /// supports it. Returns whether save-restore was enabled. The chip is
    /// deliberately left asleep; the next bus access wakes it through KSO.
    pub(crate) async fn enable_save_restore<B: Bus>(&mut self, bus: &mut B) -> Result<bool, Error> {
        if !is_fw_sr_capable(bus).await? {
            info!("firmware is not save-restore capable");
            return Ok(false);
        }

        let wctrl = bus.read8(Function::Backplane, SDIO_WAKEUP_CTRL).await?;
        bus.write8(
            Function::Backplane,
            SDIO_WAKEUP_CTRL,
            wctrl | SBSDIO_WCTRL_WL_WAKE_TILL_HT_AVAIL,
        )
        .await?;

        bus.write8(Function::Bus, SDIO_CCCR_BRCM_CARDCAP, SDIO_CCCR_BRCM_CARDCAP_CMD_NODEC)
            .await?;
        bus.write8(Function::Backplane, SDIO_CHIP_CLOCK_CSR, SBSDIO_FORCE_HT)
            .await?;

        let slpcsr = bus.read8(Function::Backplane, SDIO_SLEEP_CSR).await?;
        if slpcsr & SBSDIO_SLPCSR_KEEP_WL_KSO == 0 {
            bus.write8(Function::Backplane, SDIO_SLEEP_CSR, slpcsr | SBSDIO_SLPCSR_KEEP_WL_KSO)
                .await?;
        }

        self.allow_bus_sleep(bus, false).await?;
        bus.write8(Function::Backplane, SDIO_PULL_UP, 0x0F).await?;
        self.save_restore = true;
        info!("save-restore enabled");
        Ok(true)
    }
}

async fn is_fw_sr_capable<B: Bus>(bus: &mut B) -> Result<bool, Error> {
    let retention = bp_read32(bus, PMU_RETENTION_CTL).await?;
    Ok(retention & (PMU_RCTL_MACPHY_DISABLE | PMU_RCTL_LOGIC_DISABLE) == 0)
}

/// Waits for the wrapper to report no backplane transaction in flight.
/// Exhausting the budget is not an error, the caller proceeds regardless.
async fn wait_backplane_idle<B: Bus>(bus: &mut B, wrapper: u32) -> Result<(), Error> {
    let mut budget = PollBudget::new(BACKPLANE_IDLE_ATTEMPTS, BACKPLANE_IDLE_WAIT);
    while bp_read32(bus, wrapper + AI_RESETSTATUS_OFFSET).await? != 0 {
        if !budget.retry().await {
            warn!("backplane still busy after reset-status wait");
            break;
        }
    }
    Ok(())
}

/// Resets a backplane core: reset asserted, clocks forced on with gating
/// disabled, reset released, then normal clocking restored.
pub(crate) async fn reset_core<B: Bus>(
    bus: &mut B,
    wrapper: u32,
    bits: u32,
    resetbits: u32,
) -> Result<(), Error> {
    wait_backplane_idle(bus, wrapper).await?;
    bp_write32(bus, wrapper + AI_RESETCTRL_OFFSET, AIRC_RESET).await?;
    Timer::after_millis(10).await;
    wait_backplane_idle(bus, wrapper).await?;

    bp_write32(
        bus,
        wrapper + AI_IOCTRL_OFFSET,
        bits | resetbits | SICF_FGC | SICF_CLOCK_EN,
    )
    .await?;
    bp_read32(bus, wrapper + AI_IOCTRL_OFFSET).await?;
    wait_backplane_idle(bus, wrapper).await?;

    let mut attempts = 10;
    while bp_read32(bus, wrapper + AI_RESETCTRL_OFFSET).await? != 0 && attempts > 0 {
        wait_backplane_idle(bus, wrapper).await?;
        bp_write32(bus, wrapper + AI_RESETCTRL_OFFSET, 0).await?;
        wait_backplane_idle(bus, wrapper).await?;
        attempts -= 1;
    }

    bp_write32(bus, wrapper + AI_IOCTRL_OFFSET, bits | SICF_CLOCK_EN).await?;
    bp_read32(bus, wrapper + AI_IOCTRL_OFFSET).await?;
    Timer::after_millis(1).await;
    Ok(())
}

pub(crate) async fn disable_core<B: Bus>(bus: &mut B, wrapper: u32, cpu_halt: bool) -> Result<(), Error> {
    let resetctrl = bp_read32(bus, wrapper + AI_RESETCTRL_OFFSET).await?;
    if resetctrl & AIRC_RESET != 0 {
        return Ok(());
    }

    bp_write32(
        bus,
        wrapper + AI_IOCTRL_OFFSET,
        if cpu_halt { SICF_CPUHALT } else { 0 },
    )
    .await?;
    bp_read32(bus, wrapper + AI_IOCTRL_OFFSET).await?;
    Timer::after_millis(1).await;

    bp_write32(bus, wrapper + AI_RESETCTRL_OFFSET, AIRC_RESET).await?;
    Timer::after_millis(1).await;
    Ok(())
}

pub(crate) async fn core_is_up<B: Bus>(bus: &mut B, wrapper: u32) -> Result<(), Error> {
    let ioctrl = bp_read32(bus, wrapper + AI_IOCTRL_OFFSET).await?;
    if ioctrl & (SICF_FGC | SICF_CLOCK_EN) != SICF_CLOCK_EN {
        return Err(Error::CoreClockNotEnabled);
    }
    if bp_read32(bus, wrapper + AI_RESETCTRL_OFFSET).await? & AIRC_RESET != 0 {
        return Err(Error::CoreInReset);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusError;
    use embassy_futures::block_on;

    /// Bus whose sleep/clock registers never report ready. Counts accesses.
    struct NeverReadyBus {
        reads: u32,
        writes: u32,
    }

    impl NeverReadyBus {
        fn new() -> Self {
            Self { reads: 0, writes: 0 }
        }
    }

    impl Bus for NeverReadyBus {
        async fn read8(&mut self, _func: Function, _addr: u32) -> Result<u8, BusError> {
            self.reads += 1;
            Ok(0)
        }
        async fn write8(&mut self, _func: Function, _addr: u32, _val: u8) -> Result<(), BusError> {
            self.writes += 1;
            Ok(())
        }
        async fn read32(&mut self, _func: Function, _addr: u32) -> Result<u32, BusError> {
            Ok(0)
        }
        async fn write32(&mut self, _func: Function, _addr: u32, _val: u32) -> Result<(), BusError> {
            Ok(())
        }
        async fn read_frame(&mut self, _buf: &mut [u32]) -> Result<usize, BusError> {
            Ok(0)
        }
        async fn write_frame(&mut self, _buf: &[u32]) -> Result<(), BusError> {
            Ok(())
        }
        async fn wait_for_event(&mut self) {}
    }

    #[test]
    fn kso_enable_exhausts_exact_attempt_budget() {
        block_on(async {
            let mut bus = NeverReadyBus::new();
            let mut power = Power::with_save_restore();
            let res = power.ensure_bus_up(&mut bus).await;
            assert_eq!(res, Err(Error::BusUpTimeout));
            // One read per attempt, and the bus stays marked down.
            assert_eq!(bus.reads, MAX_KSO_ATTEMPTS);
            assert!(!power.is_up());
        });
    }

    #[test]
    fn clock_request_exhausts_exact_attempt_budget() {
        block_on(async {
            let mut bus = NeverReadyBus::new();
            let mut power = Power::new();
            let res = power.ensure_bus_up(&mut bus).await;
            assert_eq!(res, Err(Error::BusUpTimeout));
            assert_eq!(bus.reads, BUS_UP_ATTEMPTS);
            assert!(!power.is_up());
        });
    }

    #[test]
    fn kso_disable_is_fire_and_forget() {
        block_on(async {
            let mut bus = NeverReadyBus::new();
            let mut power = Power::with_save_restore();
            power.bus_is_up = true;
            power.allow_bus_sleep(&mut bus, false).await.unwrap();
            assert!(!power.is_up());
            // Single sleep-csr write, no read-back poll.
            assert_eq!(bus.writes, 1);
            assert_eq!(bus.reads, 0);
        });
    }

    #[test]
    fn keep_awake_inhibits_sleep() {
        block_on(async {
            let mut bus = NeverReadyBus::new();
            let mut power = Power::with_save_restore();
            power.bus_is_up = true;
            power.allow_bus_sleep(&mut bus, true).await.unwrap();
            assert!(power.is_up());
            assert_eq!(bus.writes, 0);
        });
    }

    #[test]
    fn ensure_bus_up_is_idempotent_when_up() {
        block_on(async {
            let mut bus = NeverReadyBus::new();
            let mut power = Power::new();
            power.bus_is_up = true;
            power.ensure_bus_up(&mut bus).await.unwrap();
            assert_eq!(bus.reads, 0);
            assert_eq!(bus.writes, 0);
        });
    }
}
