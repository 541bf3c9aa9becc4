//! Asynchronous firmware event dispatch.
//!
//! Event frames arrive on the bus event channel and are routed through a
//! fixed per-interface subscription table. Each subscription ties a set of
//! event types to a purpose (join, scan, external auth, ICMP echo offload);
//! re-registering a purpose replaces its previous subscription so a stale
//! handler can never linger.

use heapless::Vec;

use crate::{Error, MAX_INTERFACES};

/// Firmware event type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Event {
    SetSsid = 0,
    Join = 1,
    Auth = 3,
    AuthInd = 4,
    Deauth = 5,
    DeauthInd = 6,
    Assoc = 7,
    AssocInd = 8,
    Reassoc = 9,
    ReassocInd = 10,
    Disassoc = 11,
    DisassocInd = 12,
    Link = 16,
    PskSup = 46,
    EscanResult = 69,
    CsaCompleteInd = 80,
    ExtAuthReq = 187,
    ExtAuthFrameRx = 188,
    IcmpEchoReq = 200,
}

impl Event {
    pub(crate) fn from_code(code: u32) -> Option<Event> {
        Some(match code {
            0 => Event::SetSsid,
            1 => Event::Join,
            3 => Event::Auth,
            4 => Event::AuthInd,
            5 => Event::Deauth,
            6 => Event::DeauthInd,
            7 => Event::Assoc,
            8 => Event::AssocInd,
            9 => Event::Reassoc,
            10 => Event::ReassocInd,
            11 => Event::Disassoc,
            12 => Event::DisassocInd,
            16 => Event::Link,
            46 => Event::PskSup,
            69 => Event::EscanResult,
            80 => Event::CsaCompleteInd,
            187 => Event::ExtAuthReq,
            188 => Event::ExtAuthFrameRx,
            200 => Event::IcmpEchoReq,
            _ => return None,
        })
    }
}

// Event status codes.
pub(crate) const ESTATUS_SUCCESS: u32 = 0;
pub(crate) const ESTATUS_NO_NETWORKS: u32 = 3;
pub(crate) const ESTATUS_ABORT: u32 = 4;
pub(crate) const ESTATUS_UNSOLICITED: u32 = 6;
pub(crate) const ESTATUS_PARTIAL: u32 = 8;
pub(crate) const ESTATUS_NEWSCAN: u32 = 9;
pub(crate) const ESTATUS_NEWASSOC: u32 = 10;

// Link event flag.
pub(crate) const EVENT_FLAG_LINK: u16 = 0x01;

/// A decoded firmware event, borrowed from the receive buffer.
#[derive(Debug)]
pub(crate) struct EventMsg<'a> {
    pub event_type: u32,
    pub status: u32,
    pub reason: u32,
    pub flags: u16,
    pub ifidx: u8,
    pub bsscfgidx: u8,
    pub addr: [u8; 6],
    pub payload: &'a [u8],
}

/// Who a subscription delivers to. One live subscription per purpose per
/// interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Purpose {
    Join,
    Scan,
    Auth,
    IcmpEcho,
}

/// What a handler tells the dispatcher after seeing an event. `Consumed`
/// stops slot iteration for this event; `StillInterested` lets later
/// subscribers see it too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Verdict {
    Consumed,
    StillInterested,
}

pub(crate) const MAX_EVENT_SUBSCRIPTIONS: usize = 5;
const MAX_EVENTS_PER_SUBSCRIPTION: usize = 8;

#[derive(Debug, Clone)]
struct Subscription {
    purpose: Purpose,
    events: Vec<Event, MAX_EVENTS_PER_SUBSCRIPTION>,
}

/// Fixed-slot subscription table, one row per interface.
pub(crate) struct Registry {
    slots: [[Option<Subscription>; MAX_EVENT_SUBSCRIPTIONS]; MAX_INTERFACES],
}

impl Registry {
    pub(crate) const fn new() -> Self {
        const NONE: Option<Subscription> = None;
        const ROW: [Option<Subscription>; MAX_EVENT_SUBSCRIPTIONS] = [NONE; MAX_EVENT_SUBSCRIPTIONS];
        Self {
            slots: [ROW; MAX_INTERFACES],
        }
    }

    /// Subscribes `purpose` on `ifidx` to `events`. An existing subscription
    /// for the same purpose is replaced in place.
    pub(crate) fn register(&mut self, ifidx: u8, purpose: Purpose, events: &[Event]) -> Result<(), Error> {
        let row = self.slots.get_mut(ifidx as usize).ok_or(Error::InvalidArgument)?;

        let mut list = Vec::new();
        for ev in events {
            list.push(*ev).map_err(|_| Error::BufferTooShort)?;
        }

        // Stale same-purpose entry goes first.
        let slot = match row.iter_mut().find(|s| matches!(s, Some(sub) if sub.purpose == purpose)) {
            Some(slot) => slot,
            None => row
                .iter_mut()
                .find(|s| s.is_none())
                .ok_or(Error::EventTableFull)?,
        };
        *slot = Some(Subscription { purpose, events: list });
        Ok(())
    }

    /// Drops the subscription for `purpose`, if any. Returns whether one
    /// existed.
    pub(crate) fn deregister(&mut self, ifidx: u8, purpose: Purpose) -> bool {
        let Some(row) = self.slots.get_mut(ifidx as usize) else {
            return false;
        };
        for slot in row.iter_mut() {
            if matches!(slot, Some(sub) if sub.purpose == purpose) {
                *slot = None;
                return true;
            }
        }
        false
    }

    #[cfg(test)]
    pub(crate) fn is_registered(&self, ifidx: u8, purpose: Purpose) -> bool {
        self.slots
            .get(ifidx as usize)
            .map(|row| row.iter().flatten().any(|sub| sub.purpose == purpose))
            .unwrap_or(false)
    }

    /// Purposes subscribed to `event` on `ifidx`, in slot order.
    pub(crate) fn subscribers(&self, ifidx: u8, event: Event) -> Vec<Purpose, MAX_EVENT_SUBSCRIPTIONS> {
        let mut out = Vec::new();
        if let Some(row) = self.slots.get(ifidx as usize) {
            for sub in row.iter().flatten() {
                if sub.events.contains(&event) {
                    // Capacity bounds the number of subscriptions, push
                    // cannot fail.
                    let _ = out.push(sub.purpose);
                }
            }
        }
        out
    }
}

pub(crate) const JOIN_EVENTS: &[Event] = &[
    Event::SetSsid,
    Event::Auth,
    Event::Deauth,
    Event::DeauthInd,
    Event::DisassocInd,
    Event::Link,
    Event::PskSup,
    Event::CsaCompleteInd,
];

pub(crate) const SCAN_EVENTS: &[Event] = &[Event::EscanResult];

pub(crate) const AUTH_EVENTS: &[Event] = &[Event::ExtAuthReq, Event::ExtAuthFrameRx];

pub(crate) const ICMP_ECHO_EVENTS: &[Event] = &[Event::IcmpEchoReq];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reregistration_replaces_in_place() {
        let mut reg = Registry::new();
        reg.register(0, Purpose::Join, JOIN_EVENTS).unwrap();
        reg.register(0, Purpose::Join, JOIN_EVENTS).unwrap();
        reg.register(0, Purpose::Join, &[Event::Link]).unwrap();

        // Exactly one slot in use: four more registrations still fit.
        for _ in 0..MAX_EVENT_SUBSCRIPTIONS - 1 {
            reg.register(0, Purpose::Scan, SCAN_EVENTS).unwrap();
        }
        assert!(reg.is_registered(0, Purpose::Join));
        assert_eq!(reg.subscribers(0, Event::Link).as_slice(), &[Purpose::Join]);
        // The replaced subscription no longer matches its old events.
        assert!(reg.subscribers(0, Event::PskSup).is_empty());
    }

    #[test]
    fn table_full_is_reported() {
        let mut reg = Registry::new();
        // Fill every slot with some other purpose.
        for slot in reg.slots[0].iter_mut() {
            *slot = Some(Subscription {
                purpose: Purpose::Scan,
                events: Vec::new(),
            });
        }
        assert_eq!(
            reg.register(0, Purpose::Join, JOIN_EVENTS),
            Err(Error::EventTableFull)
        );
    }

    #[test]
    fn deregister_clears_slot() {
        let mut reg = Registry::new();
        reg.register(1, Purpose::Scan, SCAN_EVENTS).unwrap();
        assert!(reg.deregister(1, Purpose::Scan));
        assert!(!reg.deregister(1, Purpose::Scan));
        assert!(reg.subscribers(1, Event::EscanResult).is_empty());
    }

    #[test]
    fn dispatch_is_per_interface() {
        let mut reg = Registry::new();
        reg.register(0, Purpose::Join, JOIN_EVENTS).unwrap();
        assert!(reg.subscribers(1, Event::Link).is_empty());
        assert_eq!(reg.subscribers(0, Event::Link).as_slice(), &[Purpose::Join]);
    }
}
