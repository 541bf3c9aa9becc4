//! IOCTL/IOVAR rendezvous between `Control` and the `Runner`.
//!
//! Callers stage a request in the shared exchange buffer and wait; the
//! runner owns the bus, frames the request as an SDPCM/CDC control packet,
//! and posts the response back. One control transaction is in flight at a
//! time.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;

use crate::Error;

pub(crate) const IOCTL_BUF_SIZE: usize = 512;

// WLC ioctl command numbers.
pub(crate) const WLC_UP: u32 = 2;
pub(crate) const WLC_DOWN: u32 = 3;
pub(crate) const WLC_SET_INFRA: u32 = 20;
pub(crate) const WLC_SET_AUTH: u32 = 22;
pub(crate) const WLC_SET_SSID: u32 = 26;
pub(crate) const WLC_DISASSOC: u32 = 52;
pub(crate) const WLC_SET_PM: u32 = 86;
pub(crate) const WLC_SET_GMODE: u32 = 110;
pub(crate) const WLC_SET_WSEC: u32 = 134;
pub(crate) const WLC_SET_WPA_AUTH: u32 = 165;
pub(crate) const WLC_GET_VAR: u32 = 262;
pub(crate) const WLC_SET_VAR: u32 = 263;
pub(crate) const WLC_SET_WSEC_PMK: u32 = 268;

// Firmware status for an ioctl it does not implement; join falls back on it.
pub(crate) const WLAN_E_UNSUPPORTED: i32 = -23;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IoctlKind {
    Get,
    Set,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingIoctl {
    pub kind: IoctlKind,
    pub cmd: u32,
    pub ifidx: u8,
    pub len: usize,
}

struct Exchange {
    buf: [u8; IOCTL_BUF_SIZE],
    pending: Option<PendingIoctl>,
}

pub(crate) struct IoctlState {
    /// Serializes callers: one control transaction in flight.
    lock: Mutex<CriticalSectionRawMutex, ()>,
    xchg: BlockingMutex<CriticalSectionRawMutex, RefCell<Exchange>>,
    wake: Signal<CriticalSectionRawMutex, ()>,
    done: Signal<CriticalSectionRawMutex, Result<usize, Error>>,
}

impl IoctlState {
    pub(crate) const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            xchg: BlockingMutex::new(RefCell::new(Exchange {
                buf: [0; IOCTL_BUF_SIZE],
                pending: None,
            })),
            wake: Signal::new(),
            done: Signal::new(),
        }
    }

    /// Runs one control transaction. The request is the concatenation of
    /// `parts`; the response (if any) lands in `resp`.
    pub(crate) async fn transact(
        &self,
        kind: IoctlKind,
        cmd: u32,
        ifidx: u8,
        parts: &[&[u8]],
        resp: &mut [u8],
    ) -> Result<usize, Error> {
        let _guard = self.lock.lock().await;

        let req_len: usize = parts.iter().map(|p| p.len()).sum();
        let len = req_len.max(resp.len());
        if len > IOCTL_BUF_SIZE {
            return Err(Error::BufferTooShort);
        }

        self.done.reset();
        self.xchg.lock(|x| {
            let mut x = x.borrow_mut();
            let mut off = 0;
            for part in parts {
                x.buf[off..off + part.len()].copy_from_slice(part);
                off += part.len();
            }
            x.buf[off..len].fill(0);
            x.pending = Some(PendingIoctl { kind, cmd, ifidx, len });
        });
        self.wake.signal(());

        let n = self.done.wait().await?;
        let n = n.min(resp.len());
        self.xchg.lock(|x| resp[..n].copy_from_slice(&x.borrow().buf[..n]));
        Ok(n)
    }

    pub(crate) async fn set_ioctl_u32(&self, cmd: u32, ifidx: u8, val: u32) -> Result<(), Error> {
        self.transact(IoctlKind::Set, cmd, ifidx, &[&val.to_le_bytes()], &mut [])
            .await?;
        Ok(())
    }

    pub(crate) async fn set_ioctl(&self, cmd: u32, ifidx: u8, data: &[u8]) -> Result<(), Error> {
        self.transact(IoctlKind::Set, cmd, ifidx, &[data], &mut []).await?;
        Ok(())
    }

    pub(crate) async fn set_var(&self, ifidx: u8, name: &str, data: &[u8]) -> Result<(), Error> {
        self.transact(
            IoctlKind::Set,
            WLC_SET_VAR,
            ifidx,
            &[name.as_bytes(), &[0], data],
            &mut [],
        )
        .await?;
        Ok(())
    }

    pub(crate) async fn set_var_u32(&self, ifidx: u8, name: &str, val: u32) -> Result<(), Error> {
        self.set_var(ifidx, name, &val.to_le_bytes()).await
    }

    pub(crate) async fn get_var(&self, ifidx: u8, name: &str, resp: &mut [u8]) -> Result<usize, Error> {
        self.transact(
            IoctlKind::Get,
            WLC_GET_VAR,
            ifidx,
            &[name.as_bytes(), &[0]],
            resp,
        )
        .await
    }

    pub(crate) async fn get_var_u32(&self, ifidx: u8, name: &str) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        let n = self.get_var(ifidx, name, &mut buf).await?;
        if n < 4 {
            return Err(Error::BufferTooShort);
        }
        Ok(u32::from_le_bytes(buf))
    }

    /// Per-bss-config iovar: `bsscfg:<name>` with the config index prefixed
    /// to the value.
    pub(crate) async fn set_bsscfg_var_u32(
        &self,
        ifidx: u8,
        name: &str,
        bsscfgidx: u32,
        val: u32,
    ) -> Result<(), Error> {
        self.transact(
            IoctlKind::Set,
            WLC_SET_VAR,
            ifidx,
            &[
                b"bsscfg:",
                name.as_bytes(),
                &[0],
                &bsscfgidx.to_le_bytes(),
                &val.to_le_bytes(),
            ],
            &mut [],
        )
        .await?;
        Ok(())
    }

    // Runner side.

    pub(crate) async fn wait_pending(&self) -> PendingIoctl {
        loop {
            self.wake.wait().await;
            if let Some(p) = self.xchg.lock(|x| x.borrow().pending) {
                return p;
            }
        }
    }

    /// Copies the staged request into `out`. Returns the request length.
    pub(crate) fn fill_request(&self, out: &mut [u8]) -> usize {
        self.xchg.lock(|x| {
            let x = x.borrow();
            let len = x.pending.map(|p| p.len).unwrap_or(0);
            out[..len].copy_from_slice(&x.buf[..len]);
            len
        })
    }

    /// Posts the response payload and wakes the caller.
    pub(crate) fn complete(&self, result: Result<usize, Error>, resp: &[u8]) {
        self.xchg.lock(|x| {
            let mut x = x.borrow_mut();
            let n = resp.len().min(IOCTL_BUF_SIZE);
            x.buf[..n].copy_from_slice(&resp[..n]);
            x.pending = None;
        });
        self.done.signal(result);
    }
}
