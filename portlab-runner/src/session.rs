//! Per-connection compute orchestrator.
//!
//! A `Session` owns one connection's allocators, caches, and in-flight
//! computes. Client messages go in through [`Session::handle`]; every
//! outgoing event is pushed onto the unbounded channel returned by
//! [`Session::new`], which the transport drains.
//!
//! Each compute runs on the blocking pool and reports phases back over a
//! channel. Events for one allocator are delivered in phase order with the
//! result last; there is no ordering across allocators. Once a compute is
//! cancelled (explicitly, by `close`, or by dropping the session) nothing
//! more is emitted for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use portlab_core::allocator::{
    Allocator, AllocatorConfig, AllocatorKind, CancelToken, Phase, PhaseEvent, ProgressSink,
};
use portlab_core::data::{PriceService, PriceSource};
use portlab_core::domain::{AllocatorId, ComputeWindow};
use portlab_core::error::ComputeError;
use portlab_core::fingerprint;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::compute::{run_compute, ComputeResult};
use crate::protocol::{ClientMessage, ComputeMessage, ErrorEvent, ProgressEvent, ServerEvent};
use crate::state::ConnectionState;
use crate::store::{AllocatorStore, StoreError};

/// Default wall-clock bound on a single compute.
pub const DEFAULT_COMPUTE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct SessionOptions {
    /// Scope for store reads and writes.
    pub user_id: String,
    pub compute_timeout: Duration,
    pub store: Option<Arc<dyn AllocatorStore>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            user_id: "local".into(),
            compute_timeout: DEFAULT_COMPUTE_TIMEOUT,
            store: None,
        }
    }
}

pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    user_id: String,
    state: Mutex<ConnectionState>,
    prices: Arc<PriceService>,
    events: UnboundedSender<ServerEvent>,
    tasks: Mutex<JoinSet<()>>,
    store: Option<Arc<dyn AllocatorStore>>,
    timeout: Duration,
    closed: AtomicBool,
}

/// Everything a spawned compute needs, captured at request time.
struct ComputeJob {
    allocator: Allocator,
    window: ComputeWindow,
    include_dividends: bool,
    result_key: String,
    generation: u64,
    cancel: CancelToken,
    current: usize,
    total: usize,
}

/// Forwards allocator phases from the blocking pool to the session task.
struct ChannelProgress(UnboundedSender<PhaseEvent>);

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: PhaseEvent) {
        // receiver gone means the compute was abandoned
        let _ = self.0.send(event);
    }
}

impl Session {
    /// Fresh session over the shared price source.
    pub fn new(
        source: Arc<PriceSource>,
        options: SessionOptions,
    ) -> (Self, UnboundedReceiver<ServerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = SessionInner {
            user_id: options.user_id,
            state: Mutex::new(ConnectionState::new()),
            prices: Arc::new(PriceService::new(source)),
            events,
            tasks: Mutex::new(JoinSet::new()),
            store: options.store,
            timeout: options.compute_timeout,
            closed: AtomicBool::new(false),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Session preloaded with the user's stored allocators.
    ///
    /// Without a configured store this is the same as [`Session::new`].
    pub fn restore(
        source: Arc<PriceSource>,
        options: SessionOptions,
    ) -> Result<(Self, UnboundedReceiver<ServerEvent>), StoreError> {
        let (session, rx) = Self::new(source, options);
        if let Some(store) = &session.inner.store {
            let allocators = store.list(&session.inner.user_id)?;
            let mut state = session.inner.lock_state();
            for allocator in allocators {
                state.put_allocator(allocator);
            }
            info!(
                user_id = %session.inner.user_id,
                allocators = state.allocators().len(),
                "restored allocators"
            );
        }
        Ok((session, rx))
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Price service (and its caches) owned by this connection.
    pub fn prices(&self) -> &PriceService {
        &self.inner.prices
    }

    /// Dispatch one client message. Must be called within a Tokio runtime.
    pub fn handle(&self, message: ClientMessage) {
        if self.inner.closed.load(Ordering::SeqCst) {
            debug!("ignoring message on closed session");
            return;
        }
        match message {
            ClientMessage::CreateAllocator {
                allocator_type,
                config,
            } => self.create_allocator(allocator_type, config),
            ClientMessage::UpdateAllocator {
                id,
                allocator_type,
                config,
                enabled,
            } => self.update_allocator(id, allocator_type, config, enabled),
            ClientMessage::DeleteAllocator { id } => self.delete_allocator(id),
            ClientMessage::ListAllocators => {
                let allocators = self.inner.lock_state().allocators();
                self.inner.emit(ServerEvent::AllocatorsList { allocators });
            }
            ClientMessage::Compute(message) => {
                let id = message.request.allocator_id.clone();
                if let Err(e) = self.start_compute(message) {
                    warn!(allocator_id = %id, code = e.code(), "compute rejected: {e}");
                    self.inner
                        .emit(ServerEvent::Error(ErrorEvent::from_compute(&e, Some(id))));
                }
            }
            ClientMessage::Cancel { allocator_id } => self.cancel(allocator_id.as_ref()),
        }
    }

    /// Parse one JSON message and dispatch it; malformed input is answered
    /// with a validation error event.
    pub fn handle_json(&self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(message),
            Err(e) => {
                let err = ComputeError::Validation(format!("malformed message: {e}"));
                self.inner.emit_compute_error(&err, None);
            }
        }
    }

    /// Release pending computes without emitting anything for them.
    pub fn cancel(&self, allocator_id: Option<&AllocatorId>) {
        let mut state = self.inner.lock_state();
        match allocator_id {
            Some(id) => {
                if state.cancel(id) {
                    info!(allocator_id = %id, "compute cancelled");
                }
            }
            None => {
                let released = state.cancel_all();
                if released > 0 {
                    info!(released, "all computes cancelled");
                }
            }
        }
    }

    /// Connection teardown: cancel everything and wait for the tasks to stop.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let released = self.inner.lock_state().cancel_all();
        let mut tasks = std::mem::take(&mut *self.inner.lock_tasks());
        tasks.shutdown().await;
        info!(user_id = %self.inner.user_id, released, "session closed");
    }

    /// Number of allocators with a compute in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_state().pending_count()
    }

    /// Spawned compute tasks that have not finished yet.
    pub fn live_tasks(&self) -> usize {
        let mut tasks = self.inner.lock_tasks();
        reap(&mut tasks);
        tasks.len()
    }

    // ── Allocator management ─────────────────────────────────────────

    fn create_allocator(&self, kind: AllocatorKind, config: Value) {
        let config = match AllocatorConfig::from_json(kind, config) {
            Ok(config) => config,
            Err(e) => return self.inner.emit_compute_error(&e, None),
        };
        let allocator = Allocator::new(AllocatorId::from(Uuid::new_v4().to_string()), config);
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.create(&self.inner.user_id, &allocator) {
                return self.inner.emit_store_error(&e, Some(allocator.id));
            }
        }
        info!(
            allocator_id = %allocator.id,
            kind = allocator.kind().as_str(),
            name = allocator.name(),
            "allocator created"
        );
        self.inner.lock_state().put_allocator(allocator.clone());
        self.inner.emit(ServerEvent::AllocatorCreated(allocator));
    }

    fn update_allocator(
        &self,
        id: AllocatorId,
        kind: Option<AllocatorKind>,
        config: Value,
        enabled: Option<bool>,
    ) {
        let Some(current) = self.inner.lock_state().allocator(&id).cloned() else {
            let e = ComputeError::Validation(format!("unknown allocator {id}"));
            return self.inner.emit_compute_error(&e, Some(id));
        };
        let config = match AllocatorConfig::from_json(kind.unwrap_or(current.kind()), config) {
            Ok(config) => config,
            Err(e) => return self.inner.emit_compute_error(&e, Some(id)),
        };
        let allocator = Allocator {
            id,
            config,
            enabled: enabled.unwrap_or(current.enabled),
        };
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.update(&self.inner.user_id, &allocator) {
                return self.inner.emit_store_error(&e, Some(allocator.id));
            }
        }
        let invalidated = {
            let mut state = self.inner.lock_state();
            state.put_allocator(allocator.clone());
            state.invalidate(&allocator.id)
        };
        info!(allocator_id = %allocator.id, invalidated, "allocator updated");
        self.inner.emit(ServerEvent::AllocatorUpdated(allocator));
    }

    fn delete_allocator(&self, id: AllocatorId) {
        if self.inner.lock_state().allocator(&id).is_none() {
            let e = ComputeError::Validation(format!("unknown allocator {id}"));
            return self.inner.emit_compute_error(&e, Some(id));
        }
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.delete(&self.inner.user_id, &id) {
                return self.inner.emit_store_error(&e, Some(id));
            }
        }
        {
            let mut state = self.inner.lock_state();
            state.cancel(&id);
            state.invalidate(&id);
            state.remove_allocator(&id);
        }
        info!(allocator_id = %id, "allocator deleted");
        self.inner.emit(ServerEvent::AllocatorDeleted { id });
    }

    // ── Compute ──────────────────────────────────────────────────────

    /// Validate synchronously, answer from the result cache, or spawn.
    fn start_compute(&self, message: ComputeMessage) -> Result<(), ComputeError> {
        let ComputeMessage {
            request,
            current_allocator,
            total_allocators,
        } = message;
        let window = request.window()?;
        let id = request.allocator_id;

        let mut state = self.inner.lock_state();
        let allocator = state
            .allocator(&id)
            .cloned()
            .ok_or_else(|| ComputeError::Validation(format!("unknown allocator {id}")))?;
        if !allocator.enabled {
            return Err(ComputeError::Validation(format!(
                "allocator '{}' is disabled",
                allocator.name()
            )));
        }
        if state.is_pending(&id) {
            return Err(ComputeError::Validation(format!(
                "a computation is already pending for allocator {id}"
            )));
        }

        let result_key =
            fingerprint::result_key(&allocator.config, &window, request.include_dividends);
        if let Some(hit) = state.cached_result(&result_key) {
            drop(state);
            debug!(allocator_id = %id, "result cache hit");
            self.inner.emit(ServerEvent::Progress(progress_event(
                &allocator,
                PhaseEvent::phase(Phase::Cached),
                current_allocator,
                total_allocators,
            )));
            self.inner.emit(ServerEvent::Result(ComputeResult::clone(&hit)));
            return Ok(());
        }

        let (generation, cancel) = state.begin(&id)?;
        drop(state);

        let job = ComputeJob {
            allocator,
            window,
            include_dividends: request.include_dividends,
            result_key,
            generation,
            cancel,
            current: current_allocator,
            total: total_allocators,
        };
        let abort = {
            let mut tasks = self.inner.lock_tasks();
            reap(&mut tasks);
            tasks.spawn(run_job(self.inner.clone(), job))
        };
        self.inner.lock_state().attach(&id, generation, abort);
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.lock_state().cancel_all();
        self.inner.lock_tasks().abort_all();
    }
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ServerEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        // receiver gone means the transport is shutting down
        let _ = self.events.send(event);
    }

    /// Emit `event` unless `cancel` has fired.
    ///
    /// Cancellation happens under the state lock, so checking under the same
    /// lock leaves no window for a stray event after a cancel.
    fn emit_live(&self, cancel: &CancelToken, event: ServerEvent) {
        let _state = self.lock_state();
        if !cancel.is_cancelled() {
            self.emit(event);
        }
    }

    /// Release the marker and deliver the outcome under one state lock, so
    /// a cancel either removes the marker first or arrives after delivery.
    fn settle(&self, job: &ComputeJob, outcome: Result<ComputeResult, ComputeError>) {
        let id = &job.allocator.id;
        let mut state = self.lock_state();
        if !state.finish(id, job.generation) {
            debug!(allocator_id = %id, "discarding outcome of released compute");
            return;
        }
        match outcome {
            Ok(result) => {
                let result = Arc::new(result);
                state.store_result(job.result_key.clone(), result.clone());
                self.emit(ServerEvent::Result(ComputeResult::clone(&result)));
            }
            Err(ComputeError::Cancelled) => {
                debug!(allocator_id = %id, "compute stopped after cancellation");
            }
            Err(e) => {
                warn!(allocator_id = %id, code = e.code(), "compute failed: {e}");
                self.emit_compute_error(&e, Some(id.clone()));
            }
        }
    }

    fn emit_compute_error(&self, err: &ComputeError, allocator_id: Option<AllocatorId>) {
        if let ComputeError::Internal(detail) = err {
            error!(allocator_id = ?allocator_id, detail = %detail, "internal error");
        }
        self.emit(ServerEvent::Error(ErrorEvent::from_compute(err, allocator_id)));
    }

    fn emit_store_error(&self, err: &StoreError, allocator_id: Option<AllocatorId>) {
        warn!(allocator_id = ?allocator_id, code = err.code(), "store error: {err}");
        self.emit(ServerEvent::Error(ErrorEvent::from_store(err, allocator_id)));
    }
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        if let Err(e) = joined {
            if e.is_panic() {
                error!("compute task panicked: {e}");
            }
        }
    }
}

fn progress_event(
    allocator: &Allocator,
    event: PhaseEvent,
    current: usize,
    total: usize,
) -> ProgressEvent {
    ProgressEvent {
        allocator_id: allocator.id.clone(),
        allocator_name: allocator.name().to_string(),
        phase: event.phase,
        current,
        total,
        segment: event.segment,
        total_segments: event.total_segments,
    }
}

/// Drive one compute to completion, timeout, or cancellation.
async fn run_job(inner: Arc<SessionInner>, job: ComputeJob) {
    let (tx, mut phases) = mpsc::unbounded_channel();
    let mut work = {
        let prices = inner.prices.clone();
        let allocator = job.allocator.clone();
        let cancel = job.cancel.clone();
        let window = job.window;
        let include_dividends = job.include_dividends;
        tokio::task::spawn_blocking(move || {
            let sink = ChannelProgress(tx);
            run_compute(&allocator, &window, include_dividends, &prices, &sink, &cancel)
        })
    };
    let deadline = tokio::time::sleep(inner.timeout);
    tokio::pin!(deadline);

    let forward = |event: PhaseEvent| {
        inner.emit_live(
            &job.cancel,
            ServerEvent::Progress(progress_event(&job.allocator, event, job.current, job.total)),
        );
    };

    let outcome = loop {
        tokio::select! {
            biased;
            Some(event) = phases.recv() => forward(event),
            joined = &mut work => {
                break joined.unwrap_or_else(|e| {
                    Err(ComputeError::Internal(format!("compute task failed: {e}")))
                });
            }
            _ = &mut deadline => {
                job.cancel.cancel();
                break Err(ComputeError::Timeout {
                    secs: inner.timeout.as_secs_f64().ceil() as u64,
                });
            }
        }
    };
    if outcome.is_ok() {
        while let Ok(event) = phases.try_recv() {
            forward(event);
        }
    }

    inner.settle(&job, outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use portlab_core::allocator::NoProgress;
    use portlab_core::data::SyntheticProvider;
    use serde_json::json;

    fn session() -> (Session, UnboundedReceiver<ServerEvent>) {
        let source = PriceSource::new(Arc::new(SyntheticProvider::new(42)), 2, 5).unwrap();
        Session::new(Arc::new(source), SessionOptions::default())
    }

    fn created(rx: &mut UnboundedReceiver<ServerEvent>) -> Allocator {
        match rx.try_recv().unwrap() {
            ServerEvent::AllocatorCreated(a) => a,
            other => panic!("expected allocator_created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_update_delete_list() {
        let (session, mut rx) = session();
        session.handle(ClientMessage::CreateAllocator {
            allocator_type: AllocatorKind::Manual,
            config: json!({"name": "m", "allocations": {"spy": 0.6, "agg": 0.4}}),
        });
        let a = created(&mut rx);
        assert!(Uuid::parse_str(a.id.as_str()).is_ok());

        session.handle(ClientMessage::UpdateAllocator {
            id: a.id.clone(),
            allocator_type: None,
            config: json!({"name": "renamed", "allocations": {"SPY": 1.0}}),
            enabled: Some(false),
        });
        match rx.try_recv().unwrap() {
            ServerEvent::AllocatorUpdated(u) => {
                assert_eq!(u.name(), "renamed");
                assert!(!u.enabled);
            }
            other => panic!("expected allocator_updated, got {other:?}"),
        }

        session.handle(ClientMessage::ListAllocators);
        match rx.try_recv().unwrap() {
            ServerEvent::AllocatorsList { allocators } => assert_eq!(allocators.len(), 1),
            other => panic!("expected allocators_list, got {other:?}"),
        }

        session.handle(ClientMessage::DeleteAllocator { id: a.id.clone() });
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::AllocatorDeleted { id: a.id.clone() }
        );

        session.handle(ClientMessage::DeleteAllocator { id: a.id.clone() });
        match rx.try_recv().unwrap() {
            ServerEvent::Error(e) => {
                assert_eq!(e.code, "VALIDATION_ERROR");
                assert_eq!(e.allocator_id, Some(a.id));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_without_an_allocator() {
        let (session, mut rx) = session();
        session.handle(ClientMessage::CreateAllocator {
            allocator_type: AllocatorKind::MinVolatility,
            config: json!({"name": "v", "instruments": []}),
        });
        match rx.try_recv().unwrap() {
            ServerEvent::Error(e) => {
                assert_eq!(e.code, "VALIDATION_ERROR");
                assert!(e.allocator_id.is_none());
            }
            other => panic!("expected error, got {other:?}"),
        }
        session.handle(ClientMessage::ListAllocators);
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::AllocatorsList { allocators: vec![] }
        );
    }

    #[tokio::test]
    async fn malformed_json_is_answered_with_a_validation_error() {
        let (session, mut rx) = session();
        session.handle_json(r#"{"type": "launch_rockets"}"#);
        match rx.try_recv().unwrap() {
            ServerEvent::Error(e) => {
                assert_eq!(e.code, "VALIDATION_ERROR");
                assert!(e.allocator_id.is_none());
            }
            other => panic!("expected error, got {other:?}"),
        }

        session.handle_json(r#"{"type": "list_allocators"}"#);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::AllocatorsList { .. }
        ));
    }

    #[tokio::test]
    async fn cancel_before_settling_drops_the_result() {
        let (session, mut rx) = session();
        session.handle(ClientMessage::CreateAllocator {
            allocator_type: AllocatorKind::Manual,
            config: json!({"name": "m", "allocations": {"SPY": 1.0}}),
        });
        let a = created(&mut rx);
        let d = |y, m, day| chrono::NaiveDate::from_ymd_opt(y, m, day).unwrap();
        let window = ComputeWindow::new(d(2018, 1, 2), d(2019, 1, 2), d(2020, 1, 2)).unwrap();
        let result = run_compute(
            &a,
            &window,
            false,
            &session.inner.prices,
            &NoProgress,
            &CancelToken::new(),
        )
        .unwrap();
        let job = |generation, cancel| ComputeJob {
            allocator: a.clone(),
            window,
            include_dividends: false,
            result_key: "key".into(),
            generation,
            cancel,
            current: 1,
            total: 1,
        };

        let (generation, cancel) = session.inner.lock_state().begin(&a.id).unwrap();
        session.cancel(Some(&a.id));
        session.inner.settle(&job(generation, cancel), Ok(result.clone()));
        assert!(rx.try_recv().is_err());
        assert!(session.inner.lock_state().cached_result("key").is_none());

        let (generation, cancel) = session.inner.lock_state().begin(&a.id).unwrap();
        session.inner.settle(&job(generation, cancel), Ok(result));
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Result(_)));
        assert!(session.inner.lock_state().cached_result("key").is_some());
        assert_eq!(session.pending_count(), 0);

        // settled computes have no marker left to cancel
        session.cancel(Some(&a.id));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_session_ignores_messages() {
        let (session, mut rx) = session();
        session.close().await;
        session.handle(ClientMessage::ListAllocators);
        assert!(rx.try_recv().is_err());
        assert_eq!(session.live_tasks(), 0);
    }
}
