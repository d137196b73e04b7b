// ── Streaming supervisor ──
//
// Owns the set of running stream tasks, one per event at most. Event
// configuration changes go through `update_event`, which restarts a task
// when its streaming-relevant fields changed and starts one when an
// eligible event has none. Tasks remove their own map and status entries
// when they end, whatever the reason.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use oolive_api::{Connector, WsConnector};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::task::{StreamTask, Termination};
use crate::config::StreamingConfig;
use crate::error::{StoreError, StreamError};
use crate::event::{EventId, EventStore, EventStreamConfig, JsonResultList, ResultListEncoder, ResultsSource};
use crate::status::{Status, StatusRegistry};

/// Everything a stream task talks to besides its own configuration.
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub results: Arc<dyn ResultsSource>,
    pub encoder: Arc<dyn ResultListEncoder>,
    pub status: Arc<StatusRegistry>,
}

impl Collaborators {
    /// WebSocket transport and plain JSON result lists.
    pub fn new(results: Arc<dyn ResultsSource>, status: Arc<StatusRegistry>) -> Self {
        Self {
            connector: Arc::new(WsConnector),
            results,
            encoder: Arc::new(JsonResultList),
            status,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn ResultListEncoder>) -> Self {
        self.encoder = encoder;
        self
    }
}

struct RunningStream {
    config: EventStreamConfig,
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervises one stream task per streamed event.
///
/// Cheaply cloneable. Must be used from within a Tokio runtime.
#[derive(Clone)]
pub struct StreamingSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    config: StreamingConfig,
    collaborators: Collaborators,
    tasks: DashMap<EventId, RunningStream>,
    /// Serializes configuration changes.
    updates: Mutex<()>,
    next_generation: AtomicU64,
    cancel: CancellationToken,
}

impl StreamingSupervisor {
    /// Supervisor with no running tasks.
    pub fn new(config: StreamingConfig, collaborators: Collaborators) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                collaborators,
                tasks: DashMap::new(),
                updates: Mutex::new(()),
                next_generation: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Load all events and start a task for every eligible one.
    pub fn start(
        config: StreamingConfig,
        collaborators: Collaborators,
        store: &dyn EventStore,
    ) -> Result<Self, StoreError> {
        let supervisor = Self::new(config, collaborators);
        let events = store.get_events()?;
        info!(events = events.len(), "starting streaming supervisor");
        for event in events.into_iter().filter(EventStreamConfig::streams) {
            supervisor.spawn(event);
        }
        Ok(supervisor)
    }

    /// Apply a (possibly) changed event configuration.
    ///
    /// A running task is cancelled and awaited if `address`, `key` or
    /// `enabled` differ from the configuration it was started with. A task
    /// is then started if the event is eligible and none is running.
    /// Calling this twice with the same configuration is a no-op.
    pub async fn update_event(&self, event: EventStreamConfig) {
        let _guard = self.inner.updates.lock().await;

        let changed = self
            .inner
            .tasks
            .get(&event.id)
            .is_some_and(|running| running.config != event);
        if changed {
            info!(event_id = event.id, "streaming configuration changed, stopping task");
            self.stop(event.id).await;
        }

        if event.streams() && !self.inner.tasks.contains_key(&event.id) {
            self.spawn(event);
        }
    }

    /// Stop streaming an event (e.g. it was deleted).
    pub async fn remove_event(&self, event_id: EventId) {
        let _guard = self.inner.updates.lock().await;
        self.stop(event_id).await;
    }

    /// Stop every task and wait for all of them to finish.
    pub async fn shutdown(&self) {
        let _guard = self.inner.updates.lock().await;
        self.inner.cancel.cancel();
        for event_id in self.running_events() {
            self.stop(event_id).await;
        }
        debug!("streaming supervisor stopped");
    }

    /// Ids of events with a running task, ascending.
    pub fn running_events(&self) -> Vec<EventId> {
        let mut ids: Vec<EventId> = self.inner.tasks.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_streaming(&self, event_id: EventId) -> bool {
        self.inner.tasks.contains_key(&event_id)
    }

    pub fn status(&self, event_id: EventId) -> Option<Status> {
        self.inner.collaborators.status.get(event_id)
    }

    pub fn status_registry(&self) -> &Arc<StatusRegistry> {
        &self.inner.collaborators.status
    }

    async fn stop(&self, event_id: EventId) {
        let Some((_, running)) = self.inner.tasks.remove(&event_id) else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            if e.is_panic() {
                error!(event_id, "streaming task panicked");
            }
            // A panicked or aborted task never ran its cleanup.
            self.inner.collaborators.status.delete(event_id).await;
        }
    }

    fn spawn(&self, event: EventStreamConfig) {
        if self.inner.cancel.is_cancelled() {
            warn!(event_id = event.id, "supervisor shut down, not starting task");
            return;
        }
        let event_id = event.id;

        // The vacant entry stays locked until the handle is stored, so a task
        // that ends immediately cannot miss its own entry.
        let Entry::Vacant(slot) = self.inner.tasks.entry(event_id) else {
            return;
        };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.cancel.child_token();
        let c = &self.inner.collaborators;
        let task = StreamTask::new(
            &event,
            &self.inner.config,
            Arc::clone(&c.connector),
            Arc::clone(&c.results),
            Arc::clone(&c.encoder),
            Arc::clone(&c.status),
        );

        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let termination = task.run(token).await;
            inner.finish(event_id, generation, termination).await;
        });

        debug!(event_id, generation, "streaming task spawned");
        slot.insert(RunningStream {
            config: event,
            generation,
            cancel,
            handle,
        });
    }
}

impl SupervisorInner {
    async fn finish(&self, event_id: EventId, generation: u64, termination: Termination) {
        match termination {
            Termination::Cancelled => info!(event_id, "streaming task cancelled"),
            Termination::Stopped(StreamError::EventNotFound { .. }) => {
                warn!(event_id, "event not found, streaming stopped");
            }
            Termination::Stopped(e) => error!(event_id, error = %e, "streaming task failed"),
        }
        self.tasks
            .remove_if(&event_id, |_, running| running.generation == generation);
        self.collaborators.status.delete(event_id).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use super::*;
    use crate::testing::{
        FakeConnector, RecordingObserver, ScriptedResults, reply_result, snapshot, wait_until,
    };
    use pretty_assertions::assert_eq;

    const LIMIT: Duration = Duration::from_secs(600);

    fn event(id: EventId) -> EventStreamConfig {
        EventStreamConfig {
            id,
            address: "live.example.org".into(),
            key: "secret".into(),
            enabled: true,
        }
    }

    struct Store(Vec<EventStreamConfig>);

    impl EventStore for Store {
        fn get_events(&self) -> Result<Vec<EventStreamConfig>, StoreError> {
            Ok(self.0.clone())
        }
    }

    fn supervisor(connector: Arc<FakeConnector>) -> StreamingSupervisor {
        let collaborators = Collaborators::new(
            ScriptedResults::always(snapshot(&["H21"])),
            Arc::new(StatusRegistry::new()),
        )
        .with_connector(connector);
        StreamingSupervisor::new(StreamingConfig::default(), collaborators)
    }

    #[tokio::test(start_paused = true)]
    async fn start_only_streams_eligible_events() {
        let connector = FakeConnector::new(reply_result("ok"));
        let collaborators = Collaborators::new(
            ScriptedResults::always(snapshot(&["H21"])),
            Arc::new(StatusRegistry::new()),
        )
        .with_connector(connector);
        let store = Store(vec![
            event(1),
            EventStreamConfig { enabled: false, ..event(2) },
            EventStreamConfig { key: String::new(), ..event(3) },
            event(4),
        ]);

        let sup =
            StreamingSupervisor::start(StreamingConfig::default(), collaborators, &store).unwrap();
        assert_eq!(sup.running_events(), vec![1, 4]);

        wait_until(LIMIT, || sup.status(1) == Some(Status::Ok)).await;
        sup.shutdown().await;
        assert!(sup.running_events().is_empty());
        assert!(sup.status_registry().snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn identical_update_is_a_no_op() {
        let connector = FakeConnector::new(reply_result("ok"));
        let sup = supervisor(connector.clone());

        sup.update_event(event(5)).await;
        wait_until(LIMIT, || sup.status(5) == Some(Status::Ok)).await;

        sup.update_event(event(5)).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.connections(), 1);
        assert_eq!(sup.status(5), Some(Status::Ok));
        assert_eq!(sup.running_events(), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_stops_and_cleans_up() {
        let observer = Arc::new(RecordingObserver::default());
        let connector = FakeConnector::new(reply_result("ok"));
        let collaborators = Collaborators::new(
            ScriptedResults::always(snapshot(&["H21"])),
            Arc::new(StatusRegistry::with_observer(observer.clone())),
        )
        .with_connector(connector.clone());
        let sup = StreamingSupervisor::new(StreamingConfig::default(), collaborators);

        sup.update_event(event(7)).await;
        wait_until(LIMIT, || sup.status(7) == Some(Status::Ok)).await;

        sup.update_event(EventStreamConfig { enabled: false, ..event(7) }).await;
        assert!(!sup.is_streaming(7));
        assert_eq!(sup.status(7), None);
        // ServerNotReachable, Ok, then the removal.
        assert_eq!(observer.calls(), vec![7, 7, 7]);

        sup.update_event(event(7)).await;
        assert!(sup.is_streaming(7));
        wait_until(LIMIT, || sup.status(7) == Some(Status::Ok)).await;
        assert_eq!(connector.connections(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn address_change_restarts_task() {
        let connector = FakeConnector::new(reply_result("ok"));
        let sup = supervisor(connector.clone());

        sup.update_event(event(8)).await;
        wait_until(LIMIT, || sup.status(8) == Some(Status::Ok)).await;

        sup.update_event(EventStreamConfig {
            address: "other.example.org".into(),
            ..event(8)
        })
        .await;
        assert!(sup.is_streaming(8));
        wait_until(LIMIT, || connector.connections() == 2).await;
        wait_until(LIMIT, || sup.status(8) == Some(Status::Ok)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn task_removes_itself_when_event_not_found() {
        let connector = FakeConnector::new(reply_result("eventNotFound"));
        let sup = supervisor(connector.clone());

        sup.update_event(event(9)).await;
        wait_until(LIMIT, || sup.status(9) == Some(Status::EventNotFound)).await;
        wait_until(LIMIT, || !sup.is_streaming(9)).await;
        assert_eq!(sup.status(9), None);

        // The same configuration starts a fresh task afterwards.
        sup.update_event(event(9)).await;
        assert!(sup.is_streaming(9));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_event_stops_task() {
        let sup = supervisor(FakeConnector::new(reply_result("ok")));
        sup.update_event(event(3)).await;
        sup.update_event(event(4)).await;
        assert_eq!(sup.running_events(), vec![3, 4]);

        sup.remove_event(3).await;
        assert_eq!(sup.running_events(), vec![4]);
        assert_eq!(sup.status(3), None);
    }

    /// Sends only the class names.
    struct ClassNames;

    impl ResultListEncoder for ClassNames {
        fn encode(&self, snapshot: &crate::event::ResultSnapshot) -> Result<Vec<u8>, StreamError> {
            let names: Vec<_> = snapshot.classes.iter().map(|c| c.name.as_str()).collect();
            serde_json::to_vec(&serde_json::json!({ "classes": names }))
                .map_err(|e| StreamError::Encode(e.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn custom_encoder_shapes_the_payload() {
        let connector = FakeConnector::new(reply_result("ok"));
        let collaborators = Collaborators::new(
            ScriptedResults::always(snapshot(&["H21", "D21"])),
            Arc::new(StatusRegistry::new()),
        )
        .with_connector(connector.clone())
        .with_encoder(Arc::new(ClassNames));
        let sup = StreamingSupervisor::new(StreamingConfig::default(), collaborators);

        sup.update_event(event(6)).await;
        wait_until(LIMIT, || sup.status(6) == Some(Status::Ok)).await;

        assert_eq!(connector.sent(), vec![serde_json::json!({ "classes": ["H21", "D21"] })]);
        sup.shutdown().await;
    }
}
