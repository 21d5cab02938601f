//! The canonical dashboard state and the operations that keep it current.
//!
//! All merges go through a single `watch::Sender`, one `send_modify` per
//! merge, so subscribers only ever observe whole merges. Network calls are
//! awaited outside the merge; a pull and a push landing at the same time
//! resolve as last writer wins.
//!
//! Instance counters are never taken from the center. Whatever the source,
//! queue and task counters are kept verbatim while instance counters are
//! recomputed from the instance list held at that moment.

use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskdeck_client::{
    CenterApi, ChannelEvent, ChannelState, ClientConfig, ClientError, Connector, HttpClient,
    PushChannel, PushConfig, PushHandle,
};
use taskdeck_core::{
    count_instances, count_tasks, CenterConfig, ConfigPatch, Instance, InstanceId, InstanceUpdate,
    NewInstance, PushMessage, StatsSnapshot, Task, TaskBreakdown,
};

use crate::error::{Slice, SyncError};

/// Snapshot of everything the dashboard shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardState {
    pub stats: StatsSnapshot,
    pub instances: Vec<Instance>,
    pub queued_tasks: Vec<Task>,
    pub running_tasks: Vec<Task>,
    pub config: CenterConfig,
    /// Whether the push channel is currently delivering data.
    pub live: bool,
}

/// Outcome of [`StateStore::init`].
#[derive(Debug, Default)]
pub struct InitReport {
    /// Pulls that failed. The push channel is opened regardless.
    pub failures: Vec<SyncError>,
}

impl InitReport {
    /// Whether every initial pull succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Running push channel plus the task applying its events.
struct ChannelTasks {
    handle: PushHandle,
    pump: JoinHandle<()>,
}

/// Local mirror of the task center.
pub struct StateStore<A: CenterApi> {
    api: A,
    push: PushConfig,
    state: watch::Sender<DashboardState>,
    channel: Mutex<Option<ChannelTasks>>,
}

impl StateStore<HttpClient> {
    /// Build a store talking HTTP to the center described by `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Arc<Self>, ClientError> {
        let api = HttpClient::new(config)?;
        let push = PushConfig {
            url: config.push_url()?,
            reconnect_delay: config.reconnect_delay,
            connect_timeout: config.request_timeout,
        };
        Ok(Self::new(api, push))
    }
}

impl<A: CenterApi> StateStore<A> {
    /// Create a store with empty state. Nothing is fetched until
    /// [`init`](Self::init) or one of the pulls is called.
    pub fn new(api: A, push: PushConfig) -> Arc<Self> {
        let (state, _) = watch::channel(DashboardState::default());
        Arc::new(Self {
            api,
            push,
            state,
            channel: Mutex::new(None),
        })
    }

    /// The API the store pulls from.
    pub fn api(&self) -> &A {
        &self.api
    }

    // Lifecycle

    /// Seed all slices, then open the push channel.
    ///
    /// The three pulls run concurrently. Pull failures are collected in the
    /// report rather than aborting: the push channel will fill the gaps.
    /// Calling `init` again replaces the running channel.
    pub async fn init<C: Connector>(self: &Arc<Self>, connector: C) -> InitReport {
        let (stats, instances, config) =
            tokio::join!(self.pull_stats(), self.pull_instances(), self.pull_config());

        let failures: Vec<SyncError> = [stats, instances, config]
            .into_iter()
            .filter_map(Result::err)
            .collect();

        let mut channel = self.channel.lock().await;
        if let Some(previous) = channel.take() {
            previous.stop().await;
        }

        let (handle, events) = PushChannel::connect(self.push.clone(), connector);
        let pump = tokio::spawn(pump_events(Arc::downgrade(self), events));
        *channel = Some(ChannelTasks { handle, pump });

        info!(
            url = %self.push.url,
            failed_pulls = failures.len(),
            "State store initialized"
        );

        InitReport { failures }
    }

    /// Close the push channel and clear the live flag.
    pub async fn teardown(&self) {
        if let Some(channel) = self.channel.lock().await.take() {
            channel.stop().await;
        }
        self.set_live(false);
        info!("State store torn down");
    }

    // Pulls

    /// Replace queue and task counters with the center's figures.
    pub async fn pull_stats(&self) -> Result<(), SyncError> {
        let stats = self
            .api
            .get_stats()
            .await
            .map_err(|e| pull_failed(Slice::Stats, e))?;

        self.state.send_modify(|state| {
            state.stats.queue = stats.queue;
            state.stats.tasks = stats.tasks;
            state.stats.instances = count_instances(&state.instances);
        });
        debug!(
            pending = stats.queue.pending,
            running = stats.queue.running,
            "Pulled stats"
        );
        Ok(())
    }

    /// Replace the instance list and recompute the instance counters.
    pub async fn pull_instances(&self) -> Result<(), SyncError> {
        self.fetch_instances()
            .await
            .map_err(|e| pull_failed(Slice::Instances, e))
    }

    /// Replace the config.
    pub async fn pull_config(&self) -> Result<(), SyncError> {
        let config = self
            .api
            .get_config()
            .await
            .map_err(|e| pull_failed(Slice::Config, e))?;

        self.state.send_modify(|state| state.config = config);
        debug!("Pulled config");
        Ok(())
    }

    async fn fetch_instances(&self) -> Result<(), ClientError> {
        let instances = self.api.list_instances().await?;
        let count = instances.len();

        self.state.send_modify(|state| {
            state.stats.instances = count_instances(&instances);
            state.instances = instances;
        });
        debug!(count = count, "Pulled instances");
        Ok(())
    }

    // Push

    /// Merge a push message. Any message marks the store live; only stats
    /// messages change data.
    pub fn apply_push(&self, message: PushMessage) {
        self.state.send_modify(|state| {
            if let PushMessage::Stats(push) = message {
                state.stats.queue = push.queue;
                state.stats.tasks = push.tasks;
                state.stats.instances = count_instances(&push.instances);
                state.instances = push.instances;
                state.queued_tasks = push.queued_tasks;
                state.running_tasks = push.running_tasks;
            }
            state.live = true;
        });
    }

    /// Apply one event from the push channel.
    pub fn apply_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(message) => self.apply_push(message),
            ChannelEvent::Error(e) => {
                debug!(error = %e, "Push channel error, marking not live");
                self.set_live(false);
            }
            ChannelEvent::StateChanged(ChannelState::Closed(cause)) => {
                debug!(cause = ?cause, "Push channel closed, marking not live");
                self.set_live(false);
            }
            ChannelEvent::StateChanged(state) => {
                debug!(state = ?state, "Push channel state changed");
            }
            ChannelEvent::DecodeFailed(reason) => {
                debug!(reason = %reason, "Ignoring undecodable push frame");
            }
        }
    }

    fn set_live(&self, live: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.live != live;
            state.live = live;
            changed
        });
    }

    // Mutations

    /// Register an instance, then resync the instance list.
    pub async fn add_instance(&self, instance: &NewInstance) -> Result<(), SyncError> {
        instance.validate()?;
        let created = self
            .api
            .add_instance(instance)
            .await
            .map_err(|e| mutation_failed("add instance", e))?;

        info!(instance_id = %created.id, name = %created.name, "Instance added");
        self.resync_instances("add instance").await
    }

    /// Change an instance's registration, then resync the instance list.
    pub async fn update_instance(
        &self,
        instance_id: &InstanceId,
        update: &InstanceUpdate,
    ) -> Result<(), SyncError> {
        update.validate()?;
        self.api
            .update_instance(instance_id, update)
            .await
            .map_err(|e| mutation_failed("update instance", e))?;

        info!(instance_id = %instance_id, "Instance updated");
        self.resync_instances("update instance").await
    }

    /// Remove an instance, then resync the instance list.
    ///
    /// The center refuses to remove an instance that is running a task; the
    /// refusal comes back as a `Mutation` error carrying the center's reason.
    pub async fn remove_instance(&self, instance_id: &InstanceId) -> Result<(), SyncError> {
        self.api
            .remove_instance(instance_id)
            .await
            .map_err(|e| mutation_failed("remove instance", e))?;

        info!(instance_id = %instance_id, "Instance removed");
        self.resync_instances("remove instance").await
    }

    /// Enable or disable an instance, then resync the instance list.
    pub async fn toggle_instance(
        &self,
        instance_id: &InstanceId,
        enable: bool,
    ) -> Result<(), SyncError> {
        let action = if enable {
            "enable instance"
        } else {
            "disable instance"
        };

        let result = if enable {
            self.api.enable_instance(instance_id).await
        } else {
            self.api.disable_instance(instance_id).await
        };
        result.map_err(|e| mutation_failed(action, e))?;

        info!(instance_id = %instance_id, enabled = enable, "Instance toggled");
        self.resync_instances(action).await
    }

    /// Submit a config change and adopt the config the center returns.
    pub async fn update_config(&self, patch: &ConfigPatch) -> Result<(), SyncError> {
        patch.validate()?;
        let config = self
            .api
            .update_config(patch)
            .await
            .map_err(|e| mutation_failed("update config", e))?;

        self.state.send_modify(|state| state.config = config);
        info!("Config updated");
        Ok(())
    }

    async fn resync_instances(&self, action: &'static str) -> Result<(), SyncError> {
        self.fetch_instances().await.map_err(|source| {
            warn!(action = action, error = %source, "Resync after mutation failed");
            SyncError::Resync { action, source }
        })
    }

    // Views

    /// Copy of the current state.
    pub fn snapshot(&self) -> DashboardState {
        self.state.borrow().clone()
    }

    /// Receiver notified after every change.
    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.state.subscribe()
    }

    pub fn total_pending(&self) -> u64 {
        self.state.borrow().stats.queue.pending
    }

    pub fn total_running(&self) -> u64 {
        self.state.borrow().stats.queue.running
    }

    pub fn total_completed(&self) -> u64 {
        self.state.borrow().stats.tasks.completed
    }

    pub fn total_failed(&self) -> u64 {
        self.state.borrow().stats.tasks.failed
    }

    pub fn is_live(&self) -> bool {
        self.state.borrow().live
    }

    /// Status breakdown over the queued and running task lists.
    pub fn task_breakdown(&self) -> TaskBreakdown {
        let state = self.state.borrow();
        count_tasks(state.queued_tasks.iter().chain(state.running_tasks.iter()))
    }
}

impl ChannelTasks {
    async fn stop(self) {
        self.handle.shutdown().await;
        // The pump ends once the channel task drops its sender.
        let _ = self.pump.await;
    }
}

/// Apply channel events in delivery order.
///
/// Holds only a weak reference so a dropped store also stops its channel.
async fn pump_events<A: CenterApi>(
    store: Weak<StateStore<A>>,
    mut events: mpsc::Receiver<ChannelEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(store) = store.upgrade() else {
            break;
        };
        store.apply_channel_event(event);
    }
    debug!("Push pump stopped");
}

fn pull_failed(slice: Slice, source: ClientError) -> SyncError {
    warn!(slice = %slice, error = %source, "Pull failed, keeping previous state");
    SyncError::Pull { slice, source }
}

fn mutation_failed(action: &'static str, source: ClientError) -> SyncError {
    warn!(action = action, error = %source, "Mutation failed");
    SyncError::Mutation { action, source }
}
