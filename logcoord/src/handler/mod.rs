use std::{
    fmt::{Debug, Formatter},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
};

use parking_lot::Mutex as SpinMutex;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use utils::{config::LogHandlerConfig, interval::TimeGate};

use logcoord_external_api::{
    apply::{ApplyService, ApplyStatus},
    election::ElectionAdapter,
    engine::{LogEngine, LogEntryStream, RebuildCb},
    error::HandlerError,
    location::LeaderLocator,
    replay::ReplayService,
    rpc::LogRpcProxy,
    AccessMode, BaseInfo, LearnerList, LogStreamId, Lsn, Member, MemberList, ProposalId, Role,
};

use crate::qsync::QuiescentState;

/// The hot append path
mod append;
/// The reconfiguration dispatcher
mod config_change;
/// The sync monitor
mod sync_monitor;

/// Handler tests
#[cfg(test)]
mod tests;

/// Lifecycle of one handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// `init` has not completed yet
    Uninit,
    /// Fully operational
    Running,
    /// `stop` was called; no new append is admitted
    Stopping,
    /// `destroy` completed; every collaborator reference is gone
    Destroyed,
}

impl Lifecycle {
    /// Encode for atomic storage
    const fn as_u8(self) -> u8 {
        match self {
            Self::Uninit => 0,
            Self::Running => 1,
            Self::Stopping => 2,
            Self::Destroyed => 3,
        }
    }

    /// Decode from atomic storage
    fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::Uninit,
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Destroyed,
            _ => unreachable!("invalid lifecycle encoding {val}"),
        }
    }
}

/// Locally cached `(role, proposal_id)` pair shadowing the engine's view.
///
/// Written only by `switch_role` under the state write lock; read lock-free
/// everywhere else. A cached `Leader` can be stale after a step-down the
/// notifier has not delivered yet, which is why appends run with
/// `need_check_proposal_id` and `get_role` re-verifies against the engine.
#[derive(Debug)]
struct RoleCache {
    /// Whether the cached role is `Leader`
    is_leader: AtomicBool,
    /// The cached proposal id
    proposal_id: AtomicU64,
}

impl RoleCache {
    /// A fresh cache: follower with the zero proposal id
    fn new() -> Self {
        Self {
            is_leader: AtomicBool::new(false),
            proposal_id: AtomicU64::new(0),
        }
    }

    /// Replace the cached pair
    fn store(&self, role: Role, proposal_id: ProposalId) {
        self.is_leader
            .store(matches!(role, Role::Leader), Ordering::Relaxed);
        self.proposal_id.store(proposal_id, Ordering::Relaxed);
    }

    /// The cached role
    fn role(&self) -> Role {
        if self.is_leader.load(Ordering::Relaxed) {
            Role::Leader
        } else {
            Role::Follower
        }
    }

    /// The cached proposal id
    fn proposal_id(&self) -> ProposalId {
        self.proposal_id.load(Ordering::Relaxed)
    }
}

/// Everything protected by the state lock
struct HandlerState<E> {
    /// The stream this handler coordinates
    id: LogStreamId,
    /// Address of this replica
    self_addr: String,
    /// Handle of the replicated log engine; taken out on stop/destroy
    engine: Option<Arc<E>>,
    /// Completion pipeline of this stream; reverted on destroy
    apply_status: Option<Arc<dyn ApplyStatus>>,
    /// Owner of the apply status
    apply_service: Option<Arc<dyn ApplyService>>,
    /// Replay pipeline of this stream
    replay_service: Option<Arc<dyn ReplayService>>,
    /// Leader location cache, used by the sync monitor
    locator: Option<Arc<dyn LeaderLocator>>,
    /// RPC proxy, used by the sync monitor
    rpc: Option<Arc<dyn LogRpcProxy>>,
}

impl<E> HandlerState<E> {
    /// The empty state of an uninitialized handler
    fn empty() -> Self {
        Self {
            id: 0,
            self_addr: String::new(),
            engine: None,
            apply_status: None,
            apply_service: None,
            replay_service: None,
            locator: None,
            rpc: None,
        }
    }

    /// The engine handle, or `NotInit` once it was taken out
    fn engine(&self) -> Result<&Arc<E>, HandlerError> {
        self.engine.as_ref().ok_or(HandlerError::NotInit)
    }

    /// The apply status, or `NotInit` once it was revoked
    fn apply_status(&self) -> Result<&Arc<dyn ApplyStatus>, HandlerError> {
        self.apply_status.as_ref().ok_or(HandlerError::NotInit)
    }

    /// The apply service, or `NotInit` once it was dropped
    fn apply_service(&self) -> Result<&Arc<dyn ApplyService>, HandlerError> {
        self.apply_service.as_ref().ok_or(HandlerError::NotInit)
    }

    /// The replay service, or `NotInit` once it was dropped
    fn replay_service(&self) -> Result<&Arc<dyn ReplayService>, HandlerError> {
        self.replay_service.as_ref().ok_or(HandlerError::NotInit)
    }

    /// The leader locator, or `NotInit` once it was dropped
    fn locator(&self) -> Result<&Arc<dyn LeaderLocator>, HandlerError> {
        self.locator.as_ref().ok_or(HandlerError::NotInit)
    }

    /// The RPC proxy, or `NotInit` once it was dropped
    fn rpc(&self) -> Result<&Arc<dyn LogRpcProxy>, HandlerError> {
        self.rpc.as_ref().ok_or(HandlerError::NotInit)
    }
}

/// Collaborators of the reconfiguration dispatcher, interlocked with
/// destroy through the deps lock.
///
/// The dispatcher holds the deps lock across a whole command cycle and
/// never touches the state lock meanwhile; destroy write-locks the state
/// first and only then empties the deps slot, so an in-flight cycle always
/// finishes against live references.
struct ConfigDeps<E> {
    /// The stream being coordinated
    id: LogStreamId,
    /// Address of this replica
    self_addr: String,
    /// Engine handle for leader-local command execution
    engine: Arc<E>,
    /// Leader location cache
    locator: Arc<dyn LeaderLocator>,
    /// Election blacklist adapter
    election: Arc<dyn ElectionAdapter>,
    /// RPC proxy towards the leader
    rpc: Arc<dyn LogRpcProxy>,
}

/// Mutable state of the sync monitor
struct SyncState {
    /// Outcome of the last completed leader poll
    cached_is_log_sync: bool,
    /// Paces the synchronous leader polls
    poll_gate: TimeGate,
    /// Paces non-blocking leader location renewals
    renew_gate: TimeGate,
}

impl SyncState {
    /// Fresh state: not in sync, both gates open
    fn new() -> Self {
        Self {
            cached_is_log_sync: false,
            poll_gate: TimeGate::new(),
            renew_gate: TimeGate::new(),
        }
    }
}

/// Replication coordinator of one log stream.
///
/// The handler owns the engine handle exclusively and shares the apply
/// status with the apply service. All operations are leader-aware: appends
/// are admitted only while the cached role is `Leader`, reconfigurations
/// are routed to wherever the leader currently is.
pub struct LogHandler<E> {
    /// Timing configuration
    config: LogHandlerConfig,
    /// Lifecycle, written only under the state write lock
    lifecycle: AtomicU8,
    /// Stream id mirror for logging and metrics off the lock
    stream_id: AtomicU64,
    /// The role/term cache
    role_cache: RoleCache,
    /// State lock; appends share it for read, lifecycle writers take it
    /// exclusively
    state: RwLock<HandlerState<E>>,
    /// Deps lock; `None` once destroy ran
    deps: Mutex<Option<ConfigDeps<E>>>,
    /// Sync monitor cache; never held across an await
    sync_state: SpinMutex<SyncState>,
    /// Paces repeated append failure warnings
    append_warn_gate: SpinMutex<TimeGate>,
    /// Paces the replay-disabled fallback notice of the frontier query
    frontier_log_gate: SpinMutex<TimeGate>,
    /// Barrier draining in-flight appends before teardown
    append_barrier: QuiescentState,
}

impl<E> Debug for LogHandler<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandler")
            .field("stream_id", &self.stream_id.load(Ordering::Relaxed))
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

impl<E> LogHandler<E> {
    /// Create an uninitialized handler
    #[inline]
    #[must_use]
    pub fn new(config: LogHandlerConfig) -> Self {
        Self {
            config,
            lifecycle: AtomicU8::new(Lifecycle::Uninit.as_u8()),
            stream_id: AtomicU64::new(0),
            role_cache: RoleCache::new(),
            state: RwLock::new(HandlerState::empty()),
            deps: Mutex::new(None),
            sync_state: SpinMutex::new(SyncState::new()),
            append_warn_gate: SpinMutex::new(TimeGate::new()),
            frontier_log_gate: SpinMutex::new(TimeGate::new()),
            append_barrier: QuiescentState::new(),
        }
    }

    /// Current lifecycle
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::SeqCst))
    }

    /// Move to `lifecycle`; callers hold the state write lock
    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lifecycle.store(lifecycle.as_u8(), Ordering::SeqCst);
    }

    /// `Ok` while the handler is running
    fn check_running(&self) -> Result<(), HandlerError> {
        match self.lifecycle() {
            Lifecycle::Running => Ok(()),
            Lifecycle::Stopping => Err(HandlerError::NotRunning),
            Lifecycle::Uninit | Lifecycle::Destroyed => Err(HandlerError::NotInit),
        }
    }

    /// `Ok` while the handler is initialized, stopped or not
    fn check_inited(&self) -> Result<(), HandlerError> {
        match self.lifecycle() {
            Lifecycle::Running | Lifecycle::Stopping => Ok(()),
            Lifecycle::Uninit | Lifecycle::Destroyed => Err(HandlerError::NotInit),
        }
    }
}

impl<E: LogEngine> LogHandler<E> {
    /// Wire the handler to its collaborators and start running.
    ///
    /// The handler borrows the stream's apply status from the apply service
    /// and keeps it until `destroy` reverts it.
    #[inline]
    #[allow(clippy::too_many_arguments)] // the handler fans out to this many collaborators
    pub async fn init(
        &self,
        id: LogStreamId,
        self_addr: String,
        engine: Arc<E>,
        apply_service: Arc<dyn ApplyService>,
        replay_service: Arc<dyn ReplayService>,
        locator: Arc<dyn LeaderLocator>,
        election: Arc<dyn ElectionAdapter>,
        rpc: Arc<dyn LogRpcProxy>,
    ) -> Result<(), HandlerError> {
        let mut state = self.state.write().await;
        if !matches!(self.lifecycle(), Lifecycle::Uninit) {
            return Err(HandlerError::StateMismatch(
                "handler is already initialized".to_owned(),
            ));
        }
        if self_addr.is_empty() {
            warn!("invalid arguments for log handler init, id: {id}, empty self address");
            return Err(HandlerError::InvalidArgument(
                "self address is empty".to_owned(),
            ));
        }
        let apply_status = apply_service.get_apply_status(id).map_err(|e| {
            warn!("get apply status failed, id: {id}, error: {e}");
            e
        })?;

        state.id = id;
        state.self_addr = self_addr;
        state.engine = Some(Arc::clone(&engine));
        state.apply_status = Some(apply_status);
        state.apply_service = Some(apply_service);
        state.replay_service = Some(replay_service);
        state.locator = Some(Arc::clone(&locator));
        state.rpc = Some(Arc::clone(&rpc));
        *self.deps.lock().await = Some(ConfigDeps {
            id,
            self_addr: state.self_addr.clone(),
            engine,
            locator,
            election,
            rpc,
        });
        self.stream_id.store(id, Ordering::Relaxed);
        self.role_cache.store(Role::Follower, 0);
        self.set_lifecycle(Lifecycle::Running);
        info!("log handler init success, id: {id}");
        Ok(())
    }

    /// Whether the handler is running with all collaborators in place
    #[inline]
    pub async fn is_valid(&self) -> bool {
        let state = self.state.read().await;
        matches!(self.lifecycle(), Lifecycle::Running)
            && !state.self_addr.is_empty()
            && state.engine.is_some()
            && state.apply_status.is_some()
            && state.apply_service.is_some()
            && state.replay_service.is_some()
            && state.locator.is_some()
            && state.rpc.is_some()
    }

    /// Refuse new appends and close the engine handle; the apply queue
    /// keeps draining
    #[inline]
    pub async fn stop(&self) -> Result<(), HandlerError> {
        let mut state = self.state.write().await;
        if self.check_inited().is_err() {
            return Ok(());
        }
        self.set_lifecycle(Lifecycle::Stopping);
        if let Some(apply_status) = state.apply_status.as_ref() {
            // must run outside the apply status's internal lock; calling it
            // from under that lock deadlocks against the apply service
            apply_status.unregister_file_size_cb();
            if let Err(e) = apply_status.stop().await {
                info!("apply status stop failed, id: {}, error: {e}", state.id);
            }
        }
        if let Some(engine) = state.engine.take() {
            engine.close().await;
        }
        info!("stop log handler finish, id: {}", state.id);
        Ok(())
    }

    /// Whether teardown may proceed.
    ///
    /// Returns `RetryLater` while previously enqueued callbacks are still
    /// pending; callers poll until the apply pipeline reports quiescence.
    #[inline]
    pub async fn safe_to_destroy(&self) -> Result<(), HandlerError> {
        let state = self.state.write().await;
        match self.lifecycle() {
            Lifecycle::Uninit | Lifecycle::Destroyed => return Ok(()),
            Lifecycle::Running => {
                return Err(HandlerError::StateMismatch(
                    "handler has not been stopped".to_owned(),
                ))
            }
            Lifecycle::Stopping => {}
        }
        if state.engine.is_some() {
            return Err(HandlerError::StateMismatch(
                "engine handle is still open".to_owned(),
            ));
        }
        let (is_done, end_lsn) = state
            .apply_status()?
            .is_apply_done()
            .await
            .map_err(|e| {
                error!("check apply done failed, id: {}, error: {e}", state.id);
                e
            })?;
        if !is_done {
            info!(
                "apply not done yet, id: {}, end_lsn: {end_lsn:?}",
                state.id
            );
            return Err(HandlerError::RetryLater);
        }
        info!("apply done, id: {}, end_lsn: {end_lsn:?}", state.id);
        Ok(())
    }

    /// Tear the handler down, reverting the apply status and dropping every
    /// collaborator reference.
    #[inline]
    pub async fn destroy(&self) {
        let mut state = self.state.write().await;
        if matches!(self.lifecycle(), Lifecycle::Uninit | Lifecycle::Destroyed) {
            return;
        }
        self.set_lifecycle(Lifecycle::Destroyed);
        // no appender may still hold the apply status when it is reverted
        self.append_barrier.wait_quiescent().await;
        *self.deps.lock().await = None;
        if let (Some(apply_service), Some(apply_status)) =
            (state.apply_service.take(), state.apply_status.take())
        {
            apply_service.revert_apply_status(apply_status);
        }
        state.replay_service = None;
        state.locator = None;
        state.rpc = None;
        if let Some(engine) = state.engine.take() {
            engine.close().await;
        }
        info!("destroy log handler finish, id: {}", state.id);
        state.id = 0;
        state.self_addr.clear();
    }

    /// Wait until no append holds the enqueue critical section
    #[inline]
    pub async fn wait_append_sync(&self) {
        self.append_barrier.wait_quiescent().await;
    }

    /// Install the `(role, proposal_id)` the election conferred.
    ///
    /// Called by the external role-switch notifier only; this is the sole
    /// writer of the role cache.
    #[inline]
    pub async fn switch_role(&self, role: Role, proposal_id: ProposalId) {
        let _guard = self.state.write().await;
        self.role_cache.store(role, proposal_id);
    }

    /// The role this handler may advertise.
    ///
    /// A cached `Leader` is trusted only when the engine still reports the
    /// same proposal id; on disagreement the report is downgraded to
    /// `Follower` so stale leadership never leaks to callers.
    #[inline]
    pub async fn get_role(&self) -> Result<(Role, ProposalId), HandlerError> {
        let state = self.state.read().await;
        self.check_running()?;
        let saved_proposal_id = self.role_cache.proposal_id();
        if matches!(self.role_cache.role(), Role::Follower) {
            return Ok((Role::Follower, saved_proposal_id));
        }
        let (engine_role, engine_proposal_id, _is_pending) =
            state.engine()?.get_role().await.map_err(|e| {
                warn!("engine get_role failed, id: {}, error: {e}", state.id);
                e
            })?;
        if engine_proposal_id != saved_proposal_id {
            // the engine stepped down and the notifier has not caught up
            Ok((Role::Follower, saved_proposal_id))
        } else {
            Ok((engine_role, saved_proposal_id))
        }
    }

    /// Current access mode of the stream
    #[inline]
    pub async fn get_access_mode(&self) -> Result<(u64, AccessMode), HandlerError> {
        let state = self.state.read().await;
        self.check_running()?;
        state.engine()?.get_access_mode().await.map_err(|e| {
            warn!("engine get_access_mode failed, id: {}, error: {e}", state.id);
            e
        })
    }

    /// Change the access mode of the stream.
    ///
    /// The role is deliberately not checked: switching from `RawWrite` back
    /// to `Append` happens while this handler is still a follower. The
    /// cached proposal id is enough for the engine to fence stale requests.
    #[inline]
    pub async fn change_access_mode(
        &self,
        mode_version: u64,
        access_mode: AccessMode,
        ref_ts_ns: i64,
    ) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        self.check_running()?;
        let proposal_id = self.role_cache.proposal_id();
        state
            .engine()?
            .change_access_mode(proposal_id, mode_version, access_mode, ref_ts_ns)
            .await
            .map_err(|e| {
                warn!(
                    "engine change_access_mode failed, id: {}, proposal_id: {proposal_id}, \
                     mode_version: {mode_version}, access_mode: {access_mode:?}, error: {e}",
                    state.id
                );
                e
            })?;
        info!(
            "change_access_mode success, id: {}, proposal_id: {proposal_id}, \
             mode_version: {mode_version}, access_mode: {access_mode:?}",
            state.id
        );
        Ok(())
    }

    /// Iterate committed entries starting at `lsn`
    #[inline]
    pub async fn seek_by_lsn(&self, lsn: Lsn) -> Result<LogEntryStream, HandlerError> {
        let state = self.state.read().await;
        state.engine()?.seek_by_lsn(lsn).await
    }

    /// Iterate committed entries starting at `ts_ns`
    #[inline]
    pub async fn seek_by_ts(&self, ts_ns: i64) -> Result<LogEntryStream, HandlerError> {
        let state = self.state.read().await;
        state.engine()?.seek_by_ts(ts_ns).await
    }

    /// Install the initial Paxos membership of a freshly created stream
    #[inline]
    pub async fn set_initial_member_list(
        &self,
        member_list: MemberList,
        arb_member: Option<Member>,
    ) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        state
            .engine()?
            .set_initial_member_list(member_list, arb_member)
            .await
    }

    /// Raise or lower this replica's election priority
    #[inline]
    pub async fn set_election_priority(&self, priority: u64) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        state.engine()?.set_election_priority(priority).await
    }

    /// Restore the default election priority
    #[inline]
    pub async fn reset_election_priority(&self) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        state.engine()?.reset_election_priority().await
    }

    /// Smallest LSN whose entry's timestamp is not below `ts_ns`
    #[inline]
    pub async fn locate_by_ts_coarsely(&self, ts_ns: i64) -> Result<Lsn, HandlerError> {
        let state = self.state.read().await;
        state.engine()?.locate_by_ts_coarsely(ts_ns).await
    }

    /// Timestamp of the block containing `lsn`
    #[inline]
    pub async fn locate_by_lsn_coarsely(&self, lsn: Lsn) -> Result<i64, HandlerError> {
        let state = self.state.read().await;
        state.engine()?.locate_by_lsn_coarsely(lsn).await
    }

    /// Advance the truncation floor to `lsn`
    #[inline]
    pub async fn advance_base_lsn(&self, lsn: Lsn) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        state.engine()?.advance_base_lsn(lsn).await
    }

    /// LSN right after the last committed entry
    #[inline]
    pub async fn get_end_lsn(&self) -> Result<Lsn, HandlerError> {
        let state = self.state.read().await;
        state.engine()?.get_end_lsn().await
    }

    /// LSN right after the last written entry
    #[inline]
    pub async fn get_max_lsn(&self) -> Result<Lsn, HandlerError> {
        let state = self.state.read().await;
        state.engine()?.get_max_lsn().await
    }

    /// Timestamp of the last written entry
    #[inline]
    pub async fn get_max_ts_ns(&self) -> Result<i64, HandlerError> {
        let state = self.state.read().await;
        state.engine()?.get_max_ts_ns().await
    }

    /// Timestamp of the last committed entry
    #[inline]
    pub async fn get_end_ts_ns(&self) -> Result<i64, HandlerError> {
        let state = self.state.read().await;
        state.engine()?.get_end_ts_ns().await
    }

    /// Current Paxos membership with its quorum size
    #[inline]
    pub async fn get_paxos_member_list(&self) -> Result<MemberList, HandlerError> {
        let state = self.state.read().await;
        state.engine()?.get_paxos_member_list().await
    }

    /// All learners registered on the stream
    #[inline]
    pub async fn get_global_learner_list(&self) -> Result<LearnerList, HandlerError> {
        let state = self.state.read().await;
        state.engine()?.get_global_learner_list().await
    }

    /// Resume pulling log from the leader
    #[inline]
    pub async fn enable_sync(&self) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        state.engine()?.enable_sync().await
    }

    /// Stop pulling log from the leader
    #[inline]
    pub async fn disable_sync(&self) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        state.engine()?.disable_sync().await
    }

    /// Whether log pulling is currently enabled
    #[inline]
    pub async fn is_sync_enabled(&self) -> bool {
        let state = self.state.read().await;
        match state.engine() {
            Ok(engine) => engine.is_sync_enabled().await,
            Err(_) => false,
        }
    }

    /// Reset the log to restart from `base_info`.
    ///
    /// Replay must be disabled first: resetting the log under an active
    /// replay pipeline would feed it entries from before the new baseline.
    #[inline]
    pub async fn advance_base_info(
        &self,
        base_info: BaseInfo,
        is_rebuild: bool,
    ) -> Result<(), HandlerError> {
        let state = self.state.write().await;
        self.check_running()?;
        let id = state.id;
        let is_replay_enabled = state.replay_service()?.is_enabled(id).await.map_err(|e| {
            warn!("check replay status failed, id: {id}, error: {e}");
            e
        })?;
        if is_replay_enabled {
            warn!("replay is not disabled, id: {id}");
            return Err(HandlerError::Unexpected(
                "replay is not disabled".to_owned(),
            ));
        }
        state
            .engine()?
            .advance_base_info(base_info, is_rebuild)
            .await
            .map_err(|e| {
                warn!("advance_base_info failed, id: {id}, base_info: {base_info:?}, error: {e}");
                e
            })?;
        info!("advance_base_info success, id: {id}, base_info: {base_info:?}, is_rebuild: {is_rebuild}");
        Ok(())
    }

    /// Base info for restarting from `base_lsn`.
    ///
    /// The given LSN is the baseline of the stream's data and may already
    /// sit below the engine's own floor; it is aligned down to its block so
    /// the generated base info covers every byte the baseline needs.
    #[inline]
    pub async fn get_base_info(&self, base_lsn: Lsn) -> Result<BaseInfo, HandlerError> {
        let state = self.state.read().await;
        self.check_running()?;
        let new_base_lsn = base_lsn.block_floor();
        let base_info = state
            .engine()?
            .get_base_info(new_base_lsn)
            .await
            .map_err(|e| {
                warn!(
                    "get_base_info failed, id: {}, base_lsn: {base_lsn}, \
                     new_base_lsn: {new_base_lsn}, error: {e}",
                    state.id
                );
                e
            })?;
        info!(
            "get_base_info success, id: {}, base_lsn: {base_lsn}, new_base_lsn: {new_base_lsn}",
            state.id
        );
        Ok(base_info)
    }

    /// Record the region this replica is deployed in
    #[inline]
    pub async fn set_region(&self, region: String) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        self.check_running()?;
        state.engine()?.set_region(region).await
    }

    /// Let this replica vote in elections again
    #[inline]
    pub async fn enable_vote(&self) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        self.check_running()?;
        state.engine()?.enable_vote().await
    }

    /// Bar this replica from voting in elections
    #[inline]
    pub async fn disable_vote(&self) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        self.check_running()?;
        state.engine()?.disable_vote().await
    }

    /// Register the rebuild notification callback
    #[inline]
    pub async fn register_rebuild_cb(&self, cb: Arc<dyn RebuildCb>) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        self.check_running()?;
        state.engine()?.register_rebuild_cb(cb).await
    }

    /// Drop the rebuild notification callback
    #[inline]
    pub async fn unregister_rebuild_cb(&self) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        self.check_running()?;
        state.engine()?.unregister_rebuild_cb().await
    }

    /// Start replaying this stream from `start_lsn` / `start_ts_ns`
    #[inline]
    pub async fn enable_replay(
        &self,
        start_lsn: Lsn,
        start_ts_ns: i64,
    ) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        self.check_inited()?;
        let id = state.id;
        if start_ts_ns < 0 {
            warn!("invalid argument, id: {id}, start_lsn: {start_lsn}, start_ts_ns: {start_ts_ns}");
            return Err(HandlerError::InvalidArgument(
                "replay start timestamp is negative".to_owned(),
            ));
        }
        state
            .replay_service()?
            .enable(id, start_lsn, start_ts_ns)
            .await
            .map_err(|e| {
                warn!("failed to enable replay, id: {id}, start_lsn: {start_lsn}, error: {e}");
                e
            })?;
        info!("enable replay success, id: {id}, start_lsn: {start_lsn}, start_ts_ns: {start_ts_ns}");
        Ok(())
    }

    /// Stop replaying this stream
    #[inline]
    pub async fn disable_replay(&self) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        self.check_inited()?;
        let id = state.id;
        state.replay_service()?.disable(id).await.map_err(|e| {
            warn!("failed to disable replay, id: {id}, error: {e}");
            e
        })?;
        info!("disable replay success, id: {id}");
        Ok(())
    }

    /// Whether replay of this stream is currently enabled
    #[inline]
    pub async fn is_replay_enabled(&self) -> bool {
        let state = self.state.read().await;
        if self.check_inited().is_err() {
            return false;
        }
        let Ok(replay_service) = state.replay_service() else {
            return false;
        };
        match replay_service.is_enabled(state.id).await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("check replay enabled failed, id: {}, error: {e}", state.id);
                false
            }
        }
    }

    /// Park replay log submission of this stream
    #[inline]
    pub async fn pend_submit_replay_log(&self) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        self.check_inited()?;
        let id = state.id;
        state
            .replay_service()?
            .set_submit_log_pending(id)
            .await
            .map_err(|e| {
                warn!("failed to pend replay log submission, id: {id}, error: {e}");
                e
            })?;
        info!("pend replay log submission success, id: {id}");
        Ok(())
    }

    /// Resume replay log submission of this stream
    #[inline]
    pub async fn restore_submit_replay_log(&self) -> Result<(), HandlerError> {
        let state = self.state.read().await;
        self.check_inited()?;
        let id = state.id;
        state
            .replay_service()?
            .erase_submit_log_pending(id)
            .await
            .map_err(|e| {
                warn!("failed to restore replay log submission, id: {id}, error: {e}");
                e
            })?;
        info!("restore replay log submission success, id: {id}");
        Ok(())
    }

    /// Highest timestamp below which every entry of the stream is decided,
    /// from both the replay and the apply frontier.
    ///
    /// While replay is not enabled (a healthy leader), only the apply
    /// frontier bounds the result.
    #[inline]
    pub async fn get_max_decided_log_ts_ns(&self) -> Result<i64, HandlerError> {
        let state = self.state.read().await;
        match self.lifecycle() {
            Lifecycle::Uninit | Lifecycle::Destroyed => return Err(HandlerError::NotInit),
            Lifecycle::Stopping => {
                return Err(HandlerError::StateMismatch(
                    "handler is stopped".to_owned(),
                ))
            }
            Lifecycle::Running => {}
        }
        let id = state.id;
        let min_unapplied_ts_ns = state
            .apply_service()?
            .get_min_unapplied_ts_ns(id)
            .await
            .map_err(|e| {
                warn!("failed to get min unapplied ts, id: {id}, error: {e}");
                e
            })?;
        match state.replay_service()?.get_min_unreplayed_ts_ns(id).await {
            Ok(min_unreplayed_ts_ns) => Ok(min_unreplayed_ts_ns
                .saturating_sub(1)
                .max(min_unapplied_ts_ns.saturating_sub(1))
                .max(0)),
            Err(HandlerError::StateMismatch(_)) => {
                if self
                    .frontier_log_gate
                    .lock()
                    .try_pass(self.config.warn_log_interval)
                {
                    info!("replay not enabled, deciding from the apply frontier only, id: {id}");
                }
                Ok(min_unapplied_ts_ns.saturating_sub(1).max(0))
            }
            Err(e) => {
                warn!("failed to get min unreplayed ts, id: {id}, error: {e}");
                Err(e)
            }
        }
    }

    /// Whether `addr` is a member of the stream, answered by the leader
    /// only.
    ///
    /// The role is read again after the member list; a change of either
    /// role or proposal id in between invalidates the answer.
    #[inline]
    pub async fn is_valid_member(&self, addr: &str) -> Result<bool, HandlerError> {
        let state = self.state.read().await;
        self.check_running()?;
        if addr.is_empty() {
            error!("invalid arguments, id: {}, empty member address", state.id);
            return Err(HandlerError::InvalidArgument(
                "member address is empty".to_owned(),
            ));
        }
        let engine = state.engine()?;
        let (role, proposal_id, _is_pending) = engine.get_role().await?;
        if !matches!(role, Role::Leader) {
            return Err(HandlerError::NotMaster);
        }
        let member_list = engine.get_paxos_member_list().await?;
        let (new_role, new_proposal_id, _is_pending) = engine.get_role().await?;
        if role == new_role && proposal_id == new_proposal_id {
            Ok(member_list.contains(addr))
        } else {
            info!(
                "role changed during is_valid_member, id: {}, proposal_id: {proposal_id}, \
                 new_proposal_id: {new_proposal_id}",
                state.id
            );
            Err(HandlerError::NotMaster)
        }
    }
}
