//! Colony events: movement lifecycle, hive topology, gates and board grants.
//!
//! Events are buffered per kind while the engine settles markets and moves
//! goods. [`Engine::step`](crate::engine::Engine::step) hands the batch to
//! passive listeners at the end of each step. A kind can be switched off with
//! [`EventBus::suppress`]; nothing is recorded for it afterwards.

use std::collections::VecDeque;

use crate::fixed::Ticks;
use crate::hex::{Axial, Border, Site};
use crate::id::*;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Something that happened in the colony, stamped with its tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // -- Movements --
    MovementCreated {
        movement: MovementId,
        good: GoodType,
        provider: Axial,
        demander: Axial,
        tick: Ticks,
    },
    MovementHopped {
        movement: MovementId,
        /// Storage site now holding the unit.
        holder: Site,
        tick: Ticks,
    },
    MovementArrived {
        movement: MovementId,
        good: GoodType,
        demander: Axial,
        tick: Ticks,
    },
    MovementCancelled {
        movement: MovementId,
        good: GoodType,
        /// Where the in-flight unit was dropped as a loose good, if it had
        /// left its provider.
        dropped_at: Option<Site>,
        tick: Ticks,
    },
    CycleResolved {
        movements: Vec<MovementId>,
        tick: Ticks,
    },

    // -- Hives --
    HiveCreated {
        hive: HiveId,
        tick: Ticks,
    },
    HivesMerged {
        survivor: HiveId,
        absorbed: HiveId,
        tick: Ticks,
    },
    HiveSplit {
        parent: HiveId,
        children: Vec<HiveId>,
        tick: Ticks,
    },
    GateOpened {
        border: Border,
        tick: Ticks,
    },
    GateClosed {
        border: Border,
        tick: Ticks,
    },

    // -- Board --
    AgentQueued {
        agent: AgentId,
        tile: Axial,
        tick: Ticks,
    },
    AgentGranted {
        agent: AgentId,
        tile: Axial,
        tick: Ticks,
    },
    AgentsReleased {
        agents: Vec<AgentId>,
        tick: Ticks,
    },
}

/// Event kinds, one per [`Event`] variant. Suppression and listeners are
/// keyed by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MovementCreated,
    MovementHopped,
    MovementArrived,
    MovementCancelled,
    CycleResolved,
    HiveCreated,
    HivesMerged,
    HiveSplit,
    GateOpened,
    GateClosed,
    AgentQueued,
    AgentGranted,
    AgentsReleased,
}

const KIND_COUNT: usize = EventKind::AgentsReleased as usize + 1;

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::MovementCreated { .. } => EventKind::MovementCreated,
            Event::MovementHopped { .. } => EventKind::MovementHopped,
            Event::MovementArrived { .. } => EventKind::MovementArrived,
            Event::MovementCancelled { .. } => EventKind::MovementCancelled,
            Event::CycleResolved { .. } => EventKind::CycleResolved,
            Event::HiveCreated { .. } => EventKind::HiveCreated,
            Event::HivesMerged { .. } => EventKind::HivesMerged,
            Event::HiveSplit { .. } => EventKind::HiveSplit,
            Event::GateOpened { .. } => EventKind::GateOpened,
            Event::GateClosed { .. } => EventKind::GateClosed,
            Event::AgentQueued { .. } => EventKind::AgentQueued,
            Event::AgentGranted { .. } => EventKind::AgentGranted,
            Event::AgentsReleased { .. } => EventKind::AgentsReleased,
        }
    }

    /// The tick the event was emitted at.
    pub fn tick(&self) -> Ticks {
        match self {
            Event::MovementCreated { tick, .. }
            | Event::MovementHopped { tick, .. }
            | Event::MovementArrived { tick, .. }
            | Event::MovementCancelled { tick, .. }
            | Event::CycleResolved { tick, .. }
            | Event::HiveCreated { tick, .. }
            | Event::HivesMerged { tick, .. }
            | Event::HiveSplit { tick, .. }
            | Event::GateOpened { tick, .. }
            | Event::GateClosed { tick, .. }
            | Event::AgentQueued { tick, .. }
            | Event::AgentGranted { tick, .. }
            | Event::AgentsReleased { tick, .. } => *tick,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBuffer
// ---------------------------------------------------------------------------

/// Bounded queue of events of one kind. Pushing into a full buffer evicts
/// the oldest event.
#[derive(Debug)]
pub struct EventBuffer {
    queue: VecDeque<Event>,
    capacity: usize,
    pushed: u64,
    evicted: u64,
}

impl EventBuffer {
    /// `capacity` is at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            pushed: 0,
            evicted: 0,
        }
    }

    pub fn push(&mut self, event: Event) {
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
            self.evicted += 1;
        }
        self.queue.push_back(event);
        self.pushed += 1;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Events pushed since creation, evicted ones included.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.queue.iter()
    }

    fn take(&mut self) -> Vec<Event> {
        self.queue.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Observes delivered events. Listeners cannot reach the engine.
pub type PassiveListener = Box<dyn FnMut(&Event)>;

/// Predicate a listener can attach to skip events.
pub type EventFilter = Box<dyn Fn(&Event) -> bool>;

struct Subscriber {
    listener: PassiveListener,
    filter: Option<EventFilter>,
}

impl Subscriber {
    fn notify(&mut self, event: &Event) {
        if self.filter.as_ref().is_none_or(|accept| accept(event)) {
            (self.listener)(event);
        }
    }
}

/// Buffer, subscribers and suppression flag of one event kind.
#[derive(Default)]
struct Channel {
    buffer: Option<EventBuffer>,
    subscribers: Vec<Subscriber>,
    suppressed: bool,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("buffered", &self.buffer.as_ref().map_or(0, EventBuffer::len))
            .field("subscribers", &self.subscribers.len())
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// One channel per [`EventKind`]. Buffers are created lazily on the first
/// emit of their kind.
#[derive(Debug)]
pub struct EventBus {
    channels: [Channel; KIND_COUNT],
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Default::default(),
            capacity,
        }
    }

    fn channel(&self, kind: EventKind) -> &Channel {
        &self.channels[kind as usize]
    }

    fn channel_mut(&mut self, kind: EventKind) -> &mut Channel {
        &mut self.channels[kind as usize]
    }

    /// Stop recording `kind`. Its buffer is dropped.
    pub fn suppress(&mut self, kind: EventKind) {
        let channel = self.channel_mut(kind);
        channel.suppressed = true;
        channel.buffer = None;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.channel(kind).suppressed
    }

    pub fn emit(&mut self, event: Event) {
        let capacity = self.capacity;
        let channel = self.channel_mut(event.kind());
        if channel.suppressed {
            return;
        }
        channel
            .buffer
            .get_or_insert_with(|| EventBuffer::new(capacity))
            .push(event);
    }

    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.on_passive_filtered(kind, None, listener);
    }

    /// Subscribers of a kind run in registration order.
    pub fn on_passive_filtered(
        &mut self,
        kind: EventKind,
        filter: Option<EventFilter>,
        listener: PassiveListener,
    ) {
        self.channel_mut(kind)
            .subscribers
            .push(Subscriber { listener, filter });
    }

    /// Hand every buffered event to the subscribers of its kind and empty
    /// the buffers. Kinds are visited in declaration order.
    pub fn deliver(&mut self) {
        for channel in &mut self.channels {
            let Some(buffer) = channel.buffer.as_mut() else {
                continue;
            };
            let events = buffer.take();
            for subscriber in &mut channel.subscribers {
                for event in &events {
                    subscriber.notify(event);
                }
            }
        }
    }

    pub fn buffer(&self, kind: EventKind) -> Option<&EventBuffer> {
        self.channel(kind).buffer.as_ref()
    }

    pub fn buffered_count(&self, kind: EventKind) -> usize {
        self.buffer(kind).map_or(0, EventBuffer::len)
    }

    /// Events of `kind` recorded so far, delivered and evicted ones included.
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.buffer(kind).map_or(0, EventBuffer::pushed)
    }

    /// Empty all buffers without delivering.
    pub fn clear_all(&mut self) {
        for channel in &mut self.channels {
            if let Some(buffer) = channel.buffer.as_mut() {
                buffer.clear();
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
