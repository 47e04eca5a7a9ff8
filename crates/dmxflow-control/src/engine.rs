//! Receiver runtime
//!
//! [`ReceiverEngine`] owns every universe's state, the fixture patch and the
//! outgoing message channel. Listeners hand it decoded frames; it tracks
//! senders, merges, diffs against the patch and publishes [`HubMessage`]s.
//!
//! Each universe sits behind its own lock, so traffic on one universe never
//! waits on another. Lock order is always universe slot first, then the patch
//! registry.
//!
//! Fixtures patched at runtime into a universe nobody listens to get a new
//! sACN socket and widen the Art-Net filters.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use dmxflow_core::{
    DecodedFrame, DistributionHub, DmxFrame, EvictionTimer, HeartbeatStatus, HubMessage,
    MergeEngine, PatchEntry, PatchRegistry, Protocol, SourceId, SourceTracker, Universe,
    UniverseState, DEFAULT_SOURCE_TIMEOUT,
};

use crate::error::{ControlError, DecodeError, Result};
use crate::listener::{ListenerConfig, UniverseFilter, UniverseListener};

/// Runtime settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Silence after which a sender is dropped
    pub source_timeout: Duration,
    pub merge: MergeEngine,
    /// Period of heartbeat messages
    pub heartbeat_interval: Duration,
    /// Messages buffered per subscriber before it starts lagging
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            merge: MergeEngine::default(),
            heartbeat_interval: Duration::from_millis(1000),
            channel_capacity: 1024,
        }
    }
}

/// Packet counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Frames handed to the merge pipeline
    pub packets_accepted: u64,
    /// Datagrams that failed to decode
    pub packets_dropped: u64,
    /// Accepted frames whose sequence number ran backwards
    pub out_of_order: u64,
    /// Valid frames for universes nobody listens to
    pub foreign_universe: u64,
}

/// A sender as reported by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub protocol: Protocol,
    pub source_name: Option<String>,
    pub priority: u8,
    /// Sender marks its data as preview only
    pub preview: bool,
}

/// A universe as reported by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniverseSummary {
    pub universe: Universe,
    pub sources: Vec<SourceSummary>,
    /// Milliseconds since the last packet, if any arrived
    pub last_packet_ms: Option<u64>,
}

/// Universes one protocol's listeners accept
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerCoverage {
    pub protocol: Protocol,
    pub universes: Vec<Universe>,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    out_of_order: AtomicU64,
    foreign: AtomicU64,
}

/// What the running listeners cover
#[derive(Debug, Default)]
struct Coverage {
    /// First sACN listener started; new universes copy its settings
    sacn_template: Option<ListenerConfig>,
    sacn_universes: BTreeSet<Universe>,
    sacn_accepts_all: bool,
    artnet: Vec<UniverseFilter>,
}

#[derive(Debug)]
struct UniverseSlot {
    state: UniverseState,
    hub: DistributionHub,
}

struct Inner {
    config: EngineConfig,
    tracker: SourceTracker,
    patch: RwLock<PatchRegistry>,
    universes: RwLock<HashMap<Universe, Arc<Mutex<UniverseSlot>>>>,
    messages: broadcast::Sender<HubMessage>,
    counters: Counters,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    coverage: Mutex<Coverage>,
}

/// Handle to the receive pipeline. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct ReceiverEngine {
    inner: Arc<Inner>,
}

impl ReceiverEngine {
    /// Create an engine with an initial patch. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(config: EngineConfig, patch: PatchRegistry) -> Self {
        let (messages, _) = broadcast::channel(config.channel_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tracker: SourceTracker::new(config.source_timeout),
                config,
                patch: RwLock::new(patch),
                universes: RwLock::new(HashMap::new()),
                messages,
                counters: Counters::default(),
                shutdown,
                tasks: Mutex::new(Vec::new()),
                coverage: Mutex::new(Coverage::default()),
            }),
        }
    }

    /// Runtime settings
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Receive every message published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<HubMessage> {
        self.inner.messages.subscribe()
    }

    /// Run one decoded frame through tracking, merging and distribution.
    ///
    /// Must be called from within a tokio runtime; it schedules the sender's
    /// eviction timer.
    pub fn handle_frame(&self, frame: DecodedFrame) {
        let now = clock_now();
        let universe = frame.universe;
        let source_id = frame.source_id;

        let slot = self.slot(universe);
        let mut slot = slot.lock();

        let admission = self.inner.tracker.admit(&mut slot.state, frame, now);
        self.inner.counters.accepted.fetch_add(1, Ordering::Relaxed);
        if admission.out_of_order {
            self.inner.counters.out_of_order.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(generation) = admission.generation {
            self.arm_eviction(&mut slot.state, source_id, generation, now);
        }
        if let Some(event) = admission.event {
            self.publish(HubMessage::Sender { event });
        }

        self.recompute_and_publish(&mut slot);
    }

    /// Count a datagram that could not be decoded
    pub fn record_decode_error(&self, err: &DecodeError) {
        self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Dropped packet: {}", err);
    }

    /// Count a frame for a universe the listener does not serve
    pub fn record_foreign_universe(&self, universe: Universe) {
        self.inner.counters.foreign.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Ignored frame for universe {}", universe);
    }

    /// Patch a fixture and publish its current slice.
    ///
    /// If listeners are running and none of them covers the fixture's
    /// universe, one is started; the patch is rolled back if that fails.
    pub fn add_fixture(&self, entry: PatchEntry) -> Result<()> {
        let universe = entry.universe;
        let fixture_id = entry.fixture_id.clone();
        self.inner.patch.write().add_entry(entry)?;

        if let Err(err) = self.cover_universe(universe) {
            self.inner.patch.write().remove_entry(&fixture_id);
            return Err(err);
        }

        let slot = self.slot(universe);
        let mut slot = slot.lock();
        self.publish_changes(&mut slot);
        Ok(())
    }

    /// Unpatch a fixture
    pub fn remove_fixture(&self, fixture_id: &str) -> Option<PatchEntry> {
        let removed = self.inner.patch.write().remove_entry(fixture_id)?;
        if let Some(slot) = self.existing_slot(removed.universe) {
            slot.lock().hub.forget(fixture_id);
        }
        Some(removed)
    }

    /// Every patched fixture, grouped by universe
    pub fn patch_entries(&self) -> Vec<PatchEntry> {
        let registry = self.inner.patch.read();
        registry
            .universes()
            .into_iter()
            .flat_map(|universe| registry.entries_for_universe(universe))
            .collect()
    }

    /// Universes the running listeners accept, per protocol.
    ///
    /// A protocol whose listener accepts everything is omitted.
    pub fn listening_universes(&self) -> Vec<ListenerCoverage> {
        let coverage = self.inner.coverage.lock();
        let mut listening = Vec::new();
        if coverage.sacn_template.is_some() && !coverage.sacn_accepts_all {
            listening.push(ListenerCoverage {
                protocol: Protocol::Sacn,
                universes: coverage.sacn_universes.iter().copied().collect(),
            });
        }
        let artnet: BTreeSet<Universe> = coverage
            .artnet
            .iter()
            .flat_map(|filter| filter.universes())
            .collect();
        if !artnet.is_empty() {
            listening.push(ListenerCoverage {
                protocol: Protocol::ArtNet,
                universes: artnet.into_iter().collect(),
            });
        }
        listening
    }

    /// Current merged frame of a universe that has seen traffic
    pub fn reference_frame(&self, universe: Universe) -> Option<DmxFrame> {
        self.existing_slot(universe)
            .map(|slot| *slot.lock().state.reference_frame())
    }

    /// Snapshot of every known universe and its active senders
    pub fn universe_summaries(&self) -> Vec<UniverseSummary> {
        let now = clock_now();
        let mut summaries: Vec<UniverseSummary> = self
            .slots()
            .into_iter()
            .map(|slot| {
                let slot = slot.lock();
                UniverseSummary {
                    universe: slot.state.universe(),
                    sources: slot
                        .state
                        .sources()
                        .values()
                        .map(|record| SourceSummary {
                            source_id: record.source_id.to_string(),
                            protocol: record.protocol,
                            source_name: record.source_name.clone(),
                            priority: record.priority,
                            preview: record.preview,
                        })
                        .collect(),
                    last_packet_ms: slot
                        .state
                        .last_packet()
                        .map(|at| now.saturating_duration_since(at).as_millis() as u64),
                }
            })
            .collect();
        summaries.sort_by_key(|s| s.universe);
        summaries
    }

    /// Packet counters so far
    pub fn stats(&self) -> EngineStats {
        let c = &self.inner.counters;
        EngineStats {
            packets_accepted: c.accepted.load(Ordering::Relaxed),
            packets_dropped: c.dropped.load(Ordering::Relaxed),
            out_of_order: c.out_of_order.load(Ordering::Relaxed),
            foreign_universe: c.foreign.load(Ordering::Relaxed),
        }
    }

    /// Whether any universe heard a packet within the sender timeout
    pub fn heartbeat_status(&self) -> HeartbeatStatus {
        let last_packets: Vec<Option<Instant>> = self
            .slots()
            .iter()
            .map(|slot| slot.lock().state.last_packet())
            .collect();
        DistributionHub::heartbeat(last_packets, clock_now(), self.inner.tracker.timeout())
    }

    /// Bind and spawn the given listeners, then start the heartbeat.
    ///
    /// A listener that fails to bind is reported once and skipped; the
    /// returned errors are the ones that failed.
    pub fn start(&self, listeners: Vec<ListenerConfig>) -> Vec<ControlError> {
        let mut failures = Vec::new();
        for config in listeners {
            match UniverseListener::bind(config) {
                Ok(listener) => self.spawn_listener(listener),
                Err(err) => {
                    tracing::error!("{}", err);
                    failures.push(err);
                }
            }
        }
        self.spawn_heartbeat();
        failures
    }

    /// Run an already bound listener until shutdown
    pub fn spawn_listener(&self, listener: UniverseListener) {
        {
            let mut coverage = self.inner.coverage.lock();
            let config = listener.config();
            match config.protocol {
                Protocol::Sacn => {
                    if coverage.sacn_template.is_none() {
                        // Later sockets share the port this one actually got
                        let mut template = config.clone();
                        if let Ok(addr) = listener.local_addr() {
                            template.port = addr.port();
                        }
                        coverage.sacn_template = Some(template);
                    }
                    coverage.sacn_accepts_all |= config.universes.is_empty();
                    coverage.sacn_universes.extend(config.universes.iter().copied());
                }
                Protocol::ArtNet => coverage.artnet.push(listener.filter()),
            }
        }

        let shutdown = self.inner.shutdown.subscribe();
        let engine = self.clone();
        let task = tokio::spawn(listener.run(engine, shutdown));
        self.inner.tasks.lock().push(task);
    }

    /// Publish the heartbeat status periodically until shutdown
    pub fn spawn_heartbeat(&self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let engine = self.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.inner.config.heartbeat_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let heartbeat = engine.heartbeat_status();
                        engine.publish(HubMessage::Heartbeat { heartbeat });
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Heartbeat stopped");
        });
        self.inner.tasks.lock().push(task);
    }

    /// Stop listeners and the heartbeat, then cancel every pending eviction.
    ///
    /// Sender state and reference frames are kept.
    pub async fn stop(&self) {
        self.inner.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            // Aborted tasks report cancellation; nothing to surface
            let _ = task.await;
        }

        let cancelled: usize = self
            .slots()
            .iter()
            .map(|slot| slot.lock().state.cancel_timers())
            .sum();
        tracing::info!("Receiver stopped, {} eviction timers cancelled", cancelled);
    }

    /// Make the running listeners accept `universe`
    fn cover_universe(&self, universe: Universe) -> Result<()> {
        if *self.inner.shutdown.borrow() {
            return Ok(());
        }

        let mut coverage = self.inner.coverage.lock();
        for filter in &coverage.artnet {
            if filter.insert(universe) {
                tracing::info!("Art-Net listener now accepts universe {}", universe);
            }
        }

        let template = match &coverage.sacn_template {
            Some(template)
                if !coverage.sacn_accepts_all && !coverage.sacn_universes.contains(&universe) =>
            {
                template.clone()
            }
            _ => return Ok(()),
        };
        let listener = UniverseListener::bind(ListenerConfig {
            universes: vec![universe],
            ..template
        })?;
        coverage.sacn_universes.insert(universe);
        drop(coverage);

        self.spawn_listener(listener);
        Ok(())
    }

    fn arm_eviction(
        &self,
        state: &mut UniverseState,
        source_id: SourceId,
        generation: u64,
        now: Instant,
    ) {
        let universe = state.universe();
        let deadline = tokio::time::Instant::from_std(now) + self.inner.tracker.timeout();
        let engine: Weak<Inner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = engine.upgrade() {
                ReceiverEngine { inner }.expire(universe, source_id, generation);
            }
        });

        // Replacing the previous timer cancels it
        state.arm_timer(&source_id, EvictionTimer::new(generation, task.abort_handle()));
    }

    fn expire(&self, universe: Universe, source_id: SourceId, generation: u64) {
        let Some(slot) = self.existing_slot(universe) else {
            panic!(
                "eviction timer fired for universe {} which has no state",
                universe
            );
        };
        let mut slot = slot.lock();

        let Some(event) = self
            .inner
            .tracker
            .expire(&mut slot.state, &source_id, generation)
        else {
            return;
        };
        self.publish(HubMessage::Sender { event });
        self.recompute_and_publish(&mut slot);
    }

    fn recompute_and_publish(&self, slot: &mut UniverseSlot) {
        if self.inner.config.merge.recompute(&mut slot.state) {
            self.publish_changes(slot);
        }
    }

    fn publish_changes(&self, slot: &mut UniverseSlot) {
        let universe = slot.state.universe();
        let changes = {
            let registry = self.inner.patch.read();
            slot.hub
                .on_frame_changed(universe, slot.state.reference_frame(), &registry)
        };
        if !changes.is_empty() {
            tracing::trace!(
                "Universe {}: {} fixtures changed",
                universe,
                changes.fixtures.len()
            );
            self.publish(HubMessage::Update(changes));
        }
    }

    fn publish(&self, message: HubMessage) {
        // No subscribers is not an error
        let _ = self.inner.messages.send(message);
    }

    fn slot(&self, universe: Universe) -> Arc<Mutex<UniverseSlot>> {
        if let Some(slot) = self.existing_slot(universe) {
            return slot;
        }
        self.inner
            .universes
            .write()
            .entry(universe)
            .or_insert_with(|| {
                tracing::debug!("Tracking universe {}", universe);
                Arc::new(Mutex::new(UniverseSlot {
                    state: UniverseState::new(universe),
                    hub: DistributionHub::new(),
                }))
            })
            .clone()
    }

    fn existing_slot(&self, universe: Universe) -> Option<Arc<Mutex<UniverseSlot>>> {
        self.inner.universes.read().get(&universe).cloned()
    }

    fn slots(&self) -> Vec<Arc<Mutex<UniverseSlot>>> {
        self.inner.universes.read().values().cloned().collect()
    }
}

/// Runtime clock; follows tokio's paused clock in tests
fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}
