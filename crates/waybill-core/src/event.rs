//! Cargo events with pre-allocated ring buffers.
//!
//! [`CargoNetwork`](crate::network::CargoNetwork) emits an event whenever
//! cargo is produced, moved, delivered or destroyed. Events are buffered per
//! kind and handed to passive listeners in batch by [`EventBus::deliver`].
//!
//! # Suppression
//!
//! Event kinds can be suppressed via [`EventBus::suppress`], which prevents
//! any allocation or recording for that kind.

use crate::fixed::{Money, Ticks};
use crate::id::*;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Why cargo was destroyed without delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The routing oracle reported the destination unreachable.
    Unreachable,
    /// Station rating decay truncated the waiting cargo.
    Truncated,
    /// The ledger's owner was removed from the network.
    OwnerRemoved,
}

/// A cargo event. All events carry the tick at which they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CargoProduced {
        station: StationId,
        cargo: CargoTypeId,
        count: u32,
        tick: Ticks,
    },
    CargoLoaded {
        vehicle: VehicleId,
        station: StationId,
        cargo: CargoTypeId,
        count: u32,
        tick: Ticks,
    },
    CargoDelivered {
        vehicle: VehicleId,
        station: StationId,
        cargo: CargoTypeId,
        count: u32,
        tick: Ticks,
    },
    CargoTransferred {
        vehicle: VehicleId,
        station: StationId,
        cargo: CargoTypeId,
        count: u32,
        feeder_share: Money,
        tick: Ticks,
    },
    /// `station` is where the cargo was when it was destroyed, or where the
    /// vehicle carrying it was being served.
    CargoDropped {
        station: Option<StationId>,
        cargo: CargoTypeId,
        count: u32,
        reason: DropReason,
        tick: Ticks,
    },
    /// A load or unload stopped early because the cargo arena was full.
    TransferAborted {
        vehicle: VehicleId,
        station: StationId,
        cargo: CargoTypeId,
        tick: Ticks,
    },
    /// One day passed for all vehicle cargo.
    CargoAged { vehicles: u32, tick: Ticks },
}

/// Event variant without its payload. Keys suppression and buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CargoProduced,
    CargoLoaded,
    CargoDelivered,
    CargoTransferred,
    CargoDropped,
    TransferAborted,
    CargoAged,
}

const EVENT_KIND_COUNT: usize = 7;

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::CargoProduced { .. } => EventKind::CargoProduced,
            Event::CargoLoaded { .. } => EventKind::CargoLoaded,
            Event::CargoDelivered { .. } => EventKind::CargoDelivered,
            Event::CargoTransferred { .. } => EventKind::CargoTransferred,
            Event::CargoDropped { .. } => EventKind::CargoDropped,
            Event::TransferAborted { .. } => EventKind::TransferAborted,
            Event::CargoAged { .. } => EventKind::CargoAged,
        }
    }

    pub fn tick(&self) -> Ticks {
        match *self {
            Event::CargoProduced { tick, .. }
            | Event::CargoLoaded { tick, .. }
            | Event::CargoDelivered { tick, .. }
            | Event::CargoTransferred { tick, .. }
            | Event::CargoDropped { tick, .. }
            | Event::TransferAborted { tick, .. }
            | Event::CargoAged { tick, .. } => tick,
        }
    }
}

impl EventKind {
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// EventBuffer
// ---------------------------------------------------------------------------

/// Bounded event history of one kind. Overwrites the oldest entry once full.
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<Option<Event>>,
    /// Next slot to write.
    head: usize,
    len: usize,
    /// Every push, overwritten ones included.
    total_written: u64,
}

impl EventBuffer {
    /// Holds at least one event.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_written: 0,
        }
    }

    pub fn push(&mut self, event: Event) {
        self.events[self.head] = Some(event);
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        self.total_written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Events overwritten before they could be delivered.
    pub fn dropped_count(&self) -> u64 {
        self.total_written.saturating_sub(self.capacity() as u64)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        // Once full, `head` is the oldest slot. Unused slots are `None`.
        let start = if self.len < self.capacity() { 0 } else { self.head };
        let (newer, older) = self.events.split_at(start);
        older.iter().chain(newer).filter_map(Option::as_ref)
    }

    pub fn clear(&mut self) {
        for slot in &mut self.events {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Receives events read-only.
pub type PassiveListener = Box<dyn FnMut(&Event)>;

/// Optional predicate that filters events for a listener.
pub type EventFilter = Box<dyn Fn(&Event) -> bool>;

/// Priority level for listeners. Lower priorities run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListenerPriority {
    Pre = 0,
    Normal = 1,
    Post = 2,
}

struct ListenerEntry {
    listener: PassiveListener,
    priority: ListenerPriority,
    filter: Option<EventFilter>,
    insertion_order: u64,
}

impl std::fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("priority", &self.priority)
            .field("filtered", &self.filter.is_some())
            .field("insertion_order", &self.insertion_order)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// One ring buffer per event kind, listener lists, and suppression flags.
pub struct EventBus {
    /// Allocated on first emit.
    buffers: [Option<EventBuffer>; EVENT_KIND_COUNT],
    suppressed: [bool; EVENT_KIND_COUNT],
    listeners: [Vec<ListenerEntry>; EVENT_KIND_COUNT],
    default_capacity: usize,
    next_insertion_order: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("buffers", &self.buffers)
            .field("suppressed", &self.suppressed)
            .field("default_capacity", &self.default_capacity)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a bus whose per-kind buffers hold `default_capacity` events.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            buffers: Default::default(),
            suppressed: [false; EVENT_KIND_COUNT],
            listeners: std::array::from_fn(|_| Vec::new()),
            default_capacity,
            next_insertion_order: 0,
        }
    }

    /// Suppressed events are never allocated or buffered.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
        self.buffers[kind.index()] = None;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Store an event in its kind's ring buffer. No-op if suppressed.
    pub fn emit(&mut self, event: Event) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        let capacity = self.default_capacity;
        self.buffers[idx]
            .get_or_insert_with(|| EventBuffer::new(capacity))
            .push(event);
    }

    /// Register a listener with Normal priority and no filter.
    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.on_passive_filtered(kind, ListenerPriority::Normal, None, listener);
    }

    pub fn on_passive_filtered(
        &mut self,
        kind: EventKind,
        priority: ListenerPriority,
        filter: Option<EventFilter>,
        listener: PassiveListener,
    ) {
        let order = self.next_insertion_order;
        self.next_insertion_order += 1;
        let list = &mut self.listeners[kind.index()];
        list.push(ListenerEntry {
            listener,
            priority,
            filter,
            insertion_order: order,
        });
        list.sort_by_key(|entry| (entry.priority, entry.insertion_order));
    }

    /// Hand every buffered event to its listeners, then clear the buffers.
    ///
    /// Kinds are delivered in declaration order. Within a kind, listeners run
    /// by `(priority, registration order)` and each sees events oldest first.
    pub fn deliver(&mut self) {
        for idx in 0..EVENT_KIND_COUNT {
            let Some(buffer) = self.buffers[idx].as_mut() else {
                continue;
            };
            if buffer.is_empty() {
                continue;
            }
            let events: Vec<Event> = buffer.iter().cloned().collect();
            buffer.clear();

            for entry in &mut self.listeners[idx] {
                for event in &events {
                    if let Some(filter) = &entry.filter
                        && !filter(event)
                    {
                        continue;
                    }
                    (entry.listener)(event);
                }
            }
        }
    }

    pub fn buffer(&self, kind: EventKind) -> Option<&EventBuffer> {
        self.buffers[kind.index()].as_ref()
    }

    pub fn buffered_count(&self, kind: EventKind) -> usize {
        self.buffer(kind).map_or(0, EventBuffer::len)
    }

    /// Total events ever emitted for a kind, including overwritten ones.
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.buffer(kind).map_or(0, EventBuffer::total_written)
    }

    /// Clear all buffers. Listeners and suppression stay.
    pub fn clear_all(&mut self) {
        for buffer in self.buffers.iter_mut().flatten() {
            buffer.clear();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn produced(count: u32, tick: Ticks) -> Event {
        Event::CargoProduced {
            station: StationId(1),
            cargo: CargoTypeId(0),
            count,
            tick,
        }
    }

    fn dropped(count: u32) -> Event {
        Event::CargoDropped {
            station: None,
            cargo: CargoTypeId(0),
            count,
            reason: DropReason::Unreachable,
            tick: 0,
        }
    }

    #[test]
    fn ring_buffer_overwrites_oldest() {
        let mut buffer = EventBuffer::new(2);
        for tick in 0..3 {
            buffer.push(produced(1, tick));
        }
        let ticks: Vec<Ticks> = buffer.iter().map(Event::tick).collect();
        assert_eq!(ticks, vec![1, 2]);
        assert_eq!(buffer.total_written(), 3);
        assert_eq!(buffer.dropped_count(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let buffer = EventBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
    }

    #[test]
    fn suppressed_kinds_are_not_buffered() {
        let mut bus = EventBus::new(8);
        bus.suppress(EventKind::CargoProduced);
        bus.emit(produced(5, 0));
        bus.emit(dropped(2));
        assert!(bus.is_suppressed(EventKind::CargoProduced));
        assert_eq!(bus.buffered_count(EventKind::CargoProduced), 0);
        assert_eq!(bus.buffered_count(EventKind::CargoDropped), 1);
        assert!(bus.buffer(EventKind::CargoProduced).is_none());
    }

    #[test]
    fn deliver_runs_listeners_in_priority_order() {
        let mut bus = EventBus::new(8);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        bus.on_passive_filtered(
            EventKind::CargoProduced,
            ListenerPriority::Post,
            None,
            Box::new(move |_| l.borrow_mut().push("post")),
        );
        let l = log.clone();
        bus.on_passive(EventKind::CargoProduced, Box::new(move |_| l.borrow_mut().push("normal")));
        let l = log.clone();
        bus.on_passive_filtered(
            EventKind::CargoProduced,
            ListenerPriority::Pre,
            None,
            Box::new(move |_| l.borrow_mut().push("pre")),
        );

        bus.emit(produced(1, 0));
        bus.deliver();
        assert_eq!(*log.borrow(), vec!["pre", "normal", "post"]);
        assert_eq!(bus.buffered_count(EventKind::CargoProduced), 0);
        assert_eq!(bus.total_emitted(EventKind::CargoProduced), 1);
    }

    #[test]
    fn filter_skips_non_matching_events() {
        let mut bus = EventBus::new(8);
        let seen = Rc::new(RefCell::new(0u32));
        let s = seen.clone();
        bus.on_passive_filtered(
            EventKind::CargoDropped,
            ListenerPriority::Normal,
            Some(Box::new(|e| matches!(e, Event::CargoDropped { count, .. } if *count > 10))),
            Box::new(move |e| {
                if let Event::CargoDropped { count, .. } = e {
                    *s.borrow_mut() += count;
                }
            }),
        );
        bus.emit(dropped(5));
        bus.emit(dropped(20));
        bus.deliver();
        assert_eq!(*seen.borrow(), 20);
    }

    #[test]
    fn clear_all_keeps_listeners() {
        let mut bus = EventBus::new(8);
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        bus.on_passive(EventKind::CargoProduced, Box::new(move |_| *h.borrow_mut() += 1));
        bus.emit(produced(1, 0));
        bus.clear_all();
        bus.deliver();
        assert_eq!(*hits.borrow(), 0);

        bus.emit(produced(1, 1));
        bus.deliver();
        assert_eq!(*hits.borrow(), 1);
    }
}
