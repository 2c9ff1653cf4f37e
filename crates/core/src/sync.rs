//! Registry of oracle instances and their poll loops.
//!
//! Every active instance owns one tokio task that polls its account on a
//! fixed interval. Polls of one instance never overlap; instances never wait
//! on each other. Start and stop of an id are serialized through a per-id
//! gate so concurrent callers cannot create a second loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use oracle_sync_types::{
    HealthSummary, InstanceSpec, OracleInstance, PriceFeed, PriceUpdate, SyncEvent, SyncState,
    SyncStatus,
};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::decoder::{decoder_for, AccountDecoder};
use crate::error::{OracleError, Result};
use crate::feeds::{is_stale, PriceFeedService};

/// Consecutive failures tolerated before an instance moves to `Error`.
pub const ERROR_THRESHOLD: u32 = 5;

struct Registered {
    instance: OracleInstance,
    decoder: Arc<dyn AccountDecoder>,
}

/// Control side of a running loop. `generation` tells a loop whether it is
/// still the one its id is bound to.
struct LoopHandle {
    generation: u64,
    stop: watch::Sender<bool>,
}

struct Inner {
    feeds: Arc<PriceFeedService>,
    stale_threshold_ms: i64,
    events: broadcast::Sender<SyncEvent>,
    instances: DashMap<String, Registered>,
    states: DashMap<String, SyncState>,
    loops: DashMap<String, LoopHandle>,
    gates: DashMap<String, Arc<Mutex<()>>>,
    generation: AtomicU64,
}

/// Cheaply cloneable handle to the sync registry.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<Inner>,
}

impl SyncService {
    pub fn new(feeds: Arc<PriceFeedService>, config: &SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                feeds,
                stale_threshold_ms: config.stale_threshold_ms,
                events,
                instances: DashMap::new(),
                states: DashMap::new(),
                loops: DashMap::new(),
                gates: DashMap::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Register a feed. Registering the same (program, network, account)
    /// again returns the existing instance untouched.
    pub fn register_instance(&self, spec: InstanceSpec) -> Result<OracleInstance> {
        if spec.poll_interval_ms == 0 {
            return Err(OracleError::Config(format!(
                "poll interval of {} {} must be positive",
                spec.protocol, spec.symbol
            )));
        }

        let now = Utc::now();
        let instance = OracleInstance::from_spec(spec, now);
        match self.inner.instances.entry(instance.id.clone()) {
            Entry::Occupied(existing) => {
                debug!("Instance {} already registered", instance.id);
                return Ok(existing.get().instance.clone());
            }
            Entry::Vacant(slot) => {
                self.inner
                    .states
                    .insert(instance.id.clone(), SyncState::new(now));
                slot.insert(Registered {
                    instance: instance.clone(),
                    decoder: decoder_for(instance.protocol),
                });
            }
        }

        info!(
            "Registered {} {} feed {} on {} ({})",
            instance.symbol,
            instance.protocol,
            instance.account_address,
            instance.network,
            instance.id
        );
        self.inner.emit(SyncEvent::InstanceRegistered(instance.clone()));
        Ok(instance)
    }

    /// Stop and forget an instance.
    pub async fn unregister_instance(&self, id: &str) -> Result<OracleInstance> {
        let gate = self.gate(id)?;
        let _guard = gate.lock().await;

        self.inner.stop_locked(id);
        let (_, registered) = self
            .inner
            .instances
            .remove(id)
            .ok_or_else(|| OracleError::UnknownInstance(id.to_string()))?;
        // the gate stays so a start waiting on it still excludes a later
        // registration of the same id
        self.inner.states.remove(id);

        info!("Unregistered instance {}", id);
        self.inner
            .emit(SyncEvent::InstanceUnregistered(registered.instance.clone()));
        Ok(registered.instance)
    }

    /// Start polling `id`. Starting an active instance is a no-op; starting
    /// one in `Error` resets its error count.
    ///
    /// The first poll runs before this returns, so the state reflects a
    /// fresh read without waiting a full interval.
    pub async fn start_sync(&self, id: &str) -> Result<()> {
        let gate = self.gate(id)?;
        let _guard = gate.lock().await;

        // the instance may have been unregistered while we waited
        let (instance, decoder) = match self.inner.instances.get(id) {
            Some(registered) => (registered.instance.clone(), registered.decoder.clone()),
            None => return Err(OracleError::UnknownInstance(id.to_string())),
        };
        if !instance.enabled {
            return Err(OracleError::Config(format!("instance {id} is disabled")));
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (stop, stop_rx) = watch::channel(false);
        match self.inner.loops.entry(id.to_string()) {
            Entry::Occupied(_) => {
                debug!("Instance {} is already syncing", id);
                return Ok(());
            }
            Entry::Vacant(slot) => {
                slot.insert(LoopHandle { generation, stop });
            }
        }

        let now = Utc::now();
        if let Some(mut state) = self.inner.states.get_mut(id) {
            state.status = SyncStatus::Active;
            state.error_count = 0;
            state.last_error = None;
            state.updated_at = now;
        }

        info!(
            "Starting sync of {} {} every {}ms",
            instance.symbol, instance.protocol, instance.poll_interval_ms
        );
        self.inner.emit(SyncEvent::SyncStarted {
            instance_id: id.to_string(),
        });

        let first = self.inner.poll(&instance, decoder.as_ref()).await;
        if !self.inner.record_poll(&instance, generation, first) {
            return Ok(());
        }

        tokio::spawn(run_loop(
            self.inner.clone(),
            instance,
            decoder,
            generation,
            stop_rx,
        ));
        Ok(())
    }

    /// Stop polling `id`. A poll already in flight is not aborted.
    pub async fn stop_sync(&self, id: &str) -> Result<()> {
        let gate = self.gate(id)?;
        let _guard = gate.lock().await;
        self.inner.stop_locked(id);
        Ok(())
    }

    /// Start every enabled instance; returns how many are now syncing.
    pub async fn start_all(&self) -> usize {
        let mut started = 0;
        for instance in self.instances() {
            if !instance.enabled {
                continue;
            }
            match self.start_sync(&instance.id).await {
                Ok(()) => started += 1,
                Err(e) => warn!("Failed to start {} {}: {}", instance.symbol, instance.protocol, e),
            }
        }
        started
    }

    /// Stop every running loop.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.inner.loops.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.stop_sync(&id).await {
                debug!("Stop of {} skipped: {}", id, e);
            }
        }
    }

    pub fn get_health(&self) -> HealthSummary {
        let mut health = HealthSummary::default();
        for state in self.inner.states.iter() {
            health.total += 1;
            match state.status {
                SyncStatus::Active => health.active += 1,
                SyncStatus::Stopped => health.stopped += 1,
                SyncStatus::Error => health.error += 1,
            }
        }
        health
    }

    /// Registered instances ordered by symbol then program.
    pub fn instances(&self) -> Vec<OracleInstance> {
        let mut instances: Vec<OracleInstance> = self
            .inner
            .instances
            .iter()
            .map(|r| r.instance.clone())
            .collect();
        instances.sort_by(|a, b| {
            (a.symbol.as_str(), a.protocol.as_str(), &a.id)
                .cmp(&(b.symbol.as_str(), b.protocol.as_str(), &b.id))
        });
        instances
    }

    pub fn instance(&self, id: &str) -> Option<OracleInstance> {
        self.inner.instances.get(id).map(|r| r.instance.clone())
    }

    pub fn state(&self, id: &str) -> Option<SyncState> {
        self.inner.states.get(id).map(|s| s.clone())
    }

    pub fn has_instance(&self, id: &str) -> bool {
        self.inner.instances.contains_key(id)
    }

    fn gate(&self, id: &str) -> Result<Arc<Mutex<()>>> {
        if !self.inner.instances.contains_key(id) {
            return Err(OracleError::UnknownInstance(id.to_string()));
        }
        Ok(self.inner.gates.entry(id.to_string()).or_default().value().clone())
    }
}

impl Inner {
    fn emit(&self, event: SyncEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Caller holds the id's gate.
    fn stop_locked(&self, id: &str) {
        let handle = self.loops.remove(id).map(|(_, handle)| handle);

        if let Some(mut state) = self.states.get_mut(id) {
            if state.status != SyncStatus::Error {
                state.status = SyncStatus::Stopped;
            }
            state.updated_at = Utc::now();
        }

        if let Some(handle) = handle {
            let _ = handle.stop.send(true);
            info!("Stopped sync of instance {}", id);
            self.emit(SyncEvent::SyncStopped {
                instance_id: id.to_string(),
            });
        }
    }

    async fn poll(
        &self,
        instance: &OracleInstance,
        decoder: &dyn AccountDecoder,
    ) -> Result<PriceFeed> {
        self.feeds
            .fetch_feed(
                instance.network,
                &instance.account_address,
                &instance.symbol,
                decoder,
            )
            .await
    }

    fn is_current(&self, id: &str, generation: u64) -> bool {
        self.loops
            .get(id)
            .is_some_and(|handle| handle.generation == generation)
    }

    /// Apply one poll result. Returns whether the loop should keep running.
    ///
    /// A poll that finishes after its loop was stopped is still recorded if
    /// the instance exists, but only the live loop changes the status.
    fn record_poll(
        &self,
        instance: &OracleInstance,
        generation: u64,
        result: Result<PriceFeed>,
    ) -> bool {
        let id = &instance.id;
        // lock order: states, then loops
        let Some(mut state) = self.states.get_mut(id) else {
            return false;
        };
        let current = self.is_current(id, generation);

        let now = Utc::now();
        state.updated_at = now;
        match result {
            Ok(feed) => {
                state.error_count = 0;
                state.last_error = None;
                state.last_sync_at = Some(now);
                state.last_processed_slot = Some(feed.slot);
                drop(state);

                let stale = is_stale(now.timestamp_millis(), &feed, self.stale_threshold_ms);
                if stale {
                    warn!(
                        "{} {} price is stale (published at {}ms)",
                        feed.symbol, feed.source, feed.timestamp_ms
                    );
                }
                debug!(
                    "{} {} = {} +/- {} at slot {}",
                    feed.symbol, feed.source, feed.price, feed.confidence, feed.slot
                );
                self.emit(SyncEvent::PriceUpdate(PriceUpdate {
                    feed,
                    is_stale: stale,
                    instance_id: Some(id.clone()),
                }));
                current
            }
            Err(e) => {
                state.error_count += 1;
                state.last_error = Some(e.to_string());
                if !current || state.error_count <= ERROR_THRESHOLD {
                    warn!(
                        "Poll of {} {} failed ({}/{}): {}",
                        instance.symbol, instance.protocol, state.error_count, ERROR_THRESHOLD, e
                    );
                    return current;
                }

                state.status = SyncStatus::Error;
                self.loops
                    .remove_if(id, |_, handle| handle.generation == generation);
                error!(
                    "Sync of {} {} stopped after {} consecutive failures: {}",
                    instance.symbol, instance.protocol, state.error_count, e
                );
                self.emit(SyncEvent::SyncError {
                    instance_id: id.clone(),
                    error: e.to_string(),
                });
                false
            }
        }
    }
}

async fn run_loop(
    inner: Arc<Inner>,
    instance: OracleInstance,
    decoder: Arc<dyn AccountDecoder>,
    generation: u64,
    mut stop: watch::Receiver<bool>,
) {
    // start_sync already ran the first poll
    let period = Duration::from_millis(instance.poll_interval_ms);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        let result = inner.poll(&instance, decoder.as_ref()).await;
        if !inner.record_poll(&instance, generation, result) {
            break;
        }
    }
    debug!("Poll loop of {} exited", instance.id);
}
