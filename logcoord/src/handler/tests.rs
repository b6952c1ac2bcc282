#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::integer_arithmetic)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use bytes::Bytes;
use tracing_test::traced_test;
use utils::config::{LogHandlerConfig, LogHandlerConfigBuilder};

use logcoord_external_api::{
    append_cb::AppendCb,
    apply::{ApplyStatus, MockApplyService, MockApplyStatus},
    election::MockElectionAdapter,
    engine::MockLogEngine,
    error::HandlerError,
    location::MockLeaderLocator,
    replay::MockReplayService,
    rpc::{ConfigChangeCmdResp, GetStatResp, MockLogRpcProxy},
    BaseInfo, Lsn, Member, MemberList, Role, LOG_BLOCK_SIZE,
};

use super::LogHandler;

/// Stream id used throughout the tests
const STREAM_ID: u64 = 1;
/// Address of the replica under test
const SELF_ADDR: &str = "127.0.0.1:5001";
/// Address of a peer replica
const PEER_ADDR: &str = "127.0.0.2:5001";

/// Callback recording everything the handler stamps on it
#[derive(Debug, Default)]
struct TestCb {
    /// Stamped append start timestamp
    start_ts: AtomicI64,
    /// Stamped append finish timestamp
    finish_ts: AtomicI64,
    /// Assigned LSN
    lsn: StdMutex<Option<Lsn>>,
    /// Assigned commit timestamp
    commit_ts: AtomicI64,
    /// Whether `on_committed` fired
    committed: AtomicBool,
}

impl AppendCb for TestCb {
    fn set_append_start_ts(&self, ts_ns: i64) {
        self.start_ts.store(ts_ns, Ordering::SeqCst);
    }

    fn set_append_finish_ts(&self, ts_ns: i64) {
        self.finish_ts.store(ts_ns, Ordering::SeqCst);
    }

    fn set_lsn(&self, lsn: Lsn) {
        *self.lsn.lock().unwrap() = Some(lsn);
    }

    fn set_commit_ts(&self, ts_ns: i64) {
        self.commit_ts.store(ts_ns, Ordering::SeqCst);
    }

    fn on_committed(&self) {
        self.committed.store(true, Ordering::SeqCst);
    }
}

/// An apply status whose `push_append_cb` records the pushed callbacks
fn recording_apply_status() -> (MockApplyStatus, Arc<StdMutex<Vec<Arc<dyn AppendCb>>>>) {
    let pushed: Arc<StdMutex<Vec<Arc<dyn AppendCb>>>> = Arc::new(StdMutex::new(Vec::new()));
    let pushed_c = Arc::clone(&pushed);
    let mut apply_status = MockApplyStatus::new();
    apply_status.expect_push_append_cb().returning(move |cb| {
        pushed_c.lock().unwrap().push(cb);
        Ok(())
    });
    (apply_status, pushed)
}

/// Wire the given collaborator mocks into a running handler
#[allow(clippy::too_many_arguments)] // one argument per collaborator seam
async fn start_handler(
    config: LogHandlerConfig,
    engine: MockLogEngine,
    mut apply_service: MockApplyService,
    apply_status: MockApplyStatus,
    replay_service: MockReplayService,
    locator: MockLeaderLocator,
    election: MockElectionAdapter,
    rpc: MockLogRpcProxy,
) -> LogHandler<MockLogEngine> {
    let status: Arc<dyn ApplyStatus> = Arc::new(apply_status);
    let status_c = Arc::clone(&status);
    apply_service
        .expect_get_apply_status()
        .returning(move |_| Ok(Arc::clone(&status_c)));
    let handler = LogHandler::new(config);
    handler
        .init(
            STREAM_ID,
            SELF_ADDR.to_owned(),
            Arc::new(engine),
            Arc::new(apply_service),
            Arc::new(replay_service),
            Arc::new(locator),
            Arc::new(election),
            Arc::new(rpc),
        )
        .await
        .unwrap();
    handler
}

/// A handler whose collaborators expect no calls at all
async fn start_idle_handler(engine: MockLogEngine) -> LogHandler<MockLogEngine> {
    start_handler(
        LogHandlerConfig::default(),
        engine,
        MockApplyService::new(),
        MockApplyStatus::new(),
        MockReplayService::new(),
        MockLeaderLocator::new(),
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await
}

// Append path

#[traced_test]
#[tokio::test]
async fn test_append_on_leader_success() {
    let mut engine = MockLogEngine::new();
    engine
        .expect_append()
        .withf(|opts, buf, ref_ts| {
            opts.proposal_id == 7
                && opts.need_check_proposal_id
                && buf.as_ref() == b"x"
                && *ref_ts == 0
        })
        .times(1)
        .returning(|_, _, _| Ok((Lsn::new(64), 123_456)));
    let (apply_status, pushed) = recording_apply_status();

    let handler = start_handler(
        LogHandlerConfig::default(),
        engine,
        MockApplyService::new(),
        apply_status,
        MockReplayService::new(),
        MockLeaderLocator::new(),
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await;
    handler.switch_role(Role::Leader, 7).await;

    let cb = Arc::new(TestCb::default());
    let (lsn, ts_ns) = handler
        .append(Bytes::from_static(b"x"), 0, false, Arc::clone(&cb) as Arc<dyn AppendCb>)
        .await
        .unwrap();

    assert_eq!(lsn, Lsn::new(64));
    assert_eq!(ts_ns, 123_456);
    assert_eq!(pushed.lock().unwrap().len(), 1);
    assert_eq!(*cb.lsn.lock().unwrap(), Some(Lsn::new(64)));
    assert_eq!(cb.commit_ts.load(Ordering::SeqCst), 123_456);
    assert!(cb.start_ts.load(Ordering::SeqCst) > 0);
    assert!(cb.finish_ts.load(Ordering::SeqCst) >= cb.start_ts.load(Ordering::SeqCst));
    assert!(!cb.committed.load(Ordering::SeqCst));
}

#[traced_test]
#[tokio::test]
async fn test_append_rejected_on_follower() {
    let handler = start_idle_handler(MockLogEngine::new()).await;
    handler.switch_role(Role::Follower, 7).await;

    let cb = Arc::new(TestCb::default());
    let err = handler
        .append(Bytes::from_static(b"x"), 0, false, Arc::clone(&cb) as Arc<dyn AppendCb>)
        .await
        .unwrap_err();

    assert_eq!(err, HandlerError::NotMaster);
    assert_eq!(*cb.lsn.lock().unwrap(), None);
    assert!(!cb.committed.load(Ordering::SeqCst));
}

#[traced_test]
#[tokio::test]
async fn test_append_not_retried_after_step_down() {
    // cache still says leader, the engine already moved to proposal 8 and
    // rejects the stale proposal id outright
    let mut engine = MockLogEngine::new();
    engine
        .expect_append()
        .times(1)
        .returning(|_, _, _| Err(HandlerError::NotMaster));
    let handler = start_idle_handler(engine).await;
    handler.switch_role(Role::Leader, 7).await;

    let cb = Arc::new(TestCb::default());
    let err = handler
        .append(Bytes::from_static(b"x"), 0, false, Arc::clone(&cb) as Arc<dyn AppendCb>)
        .await
        .unwrap_err();
    assert_eq!(err, HandlerError::NotMaster);
}

#[traced_test]
#[tokio::test]
async fn test_nonblocking_append_returns_first_outcome() {
    let mut engine = MockLogEngine::new();
    engine
        .expect_append()
        .times(1)
        .returning(|_, _, _| Err(HandlerError::RetryLater));
    let handler = start_idle_handler(engine).await;
    handler.switch_role(Role::Leader, 7).await;

    let cb = Arc::new(TestCb::default());
    let err = handler
        .append(Bytes::from_static(b"x"), 0, true, Arc::clone(&cb) as Arc<dyn AppendCb>)
        .await
        .unwrap_err();
    assert_eq!(err, HandlerError::RetryLater);
}

#[traced_test]
#[tokio::test]
async fn test_blocking_append_retries_backpressure() {
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_c = Arc::clone(&attempts);
    let mut engine = MockLogEngine::new();
    engine.expect_append().returning(move |_, _, _| {
        if attempts_c.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(HandlerError::RetryLater)
        } else {
            Ok((Lsn::new(128), 7_777))
        }
    });
    let (apply_status, pushed) = recording_apply_status();

    let handler = start_handler(
        LogHandlerConfig::default(),
        engine,
        MockApplyService::new(),
        apply_status,
        MockReplayService::new(),
        MockLeaderLocator::new(),
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await;
    handler.switch_role(Role::Leader, 7).await;

    let cb = Arc::new(TestCb::default());
    let (lsn, _ts_ns) = handler
        .append(Bytes::from_static(b"y"), 0, false, Arc::clone(&cb) as Arc<dyn AppendCb>)
        .await
        .unwrap();

    assert_eq!(lsn, Lsn::new(128));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(pushed.lock().unwrap().len(), 1);
}

// Role cache

#[traced_test]
#[tokio::test]
async fn test_get_role_follower_fast_path() {
    // no engine expectation: the follower answer must not consult it
    let handler = start_idle_handler(MockLogEngine::new()).await;
    handler.switch_role(Role::Follower, 5).await;

    let (role, proposal_id) = handler.get_role().await.unwrap();
    assert_eq!(role, Role::Follower);
    assert_eq!(proposal_id, 5);
}

#[traced_test]
#[tokio::test]
async fn test_get_role_confirms_leader_with_engine() {
    let mut engine = MockLogEngine::new();
    engine
        .expect_get_role()
        .returning(|| Ok((Role::Leader, 7, false)));
    let handler = start_idle_handler(engine).await;
    handler.switch_role(Role::Leader, 7).await;

    let (role, proposal_id) = handler.get_role().await.unwrap();
    assert_eq!(role, Role::Leader);
    assert_eq!(proposal_id, 7);
}

#[traced_test]
#[tokio::test]
async fn test_get_role_downgrades_stale_leader() {
    let mut engine = MockLogEngine::new();
    engine
        .expect_get_role()
        .returning(|| Ok((Role::Leader, 8, false)));
    let handler = start_idle_handler(engine).await;
    handler.switch_role(Role::Leader, 7).await;

    let (role, proposal_id) = handler.get_role().await.unwrap();
    assert_eq!(role, Role::Follower);
    assert_eq!(proposal_id, 7);
}

// Lifecycle

#[traced_test]
#[tokio::test]
async fn test_append_fails_after_stop() {
    let mut engine = MockLogEngine::new();
    engine.expect_close().times(1).returning(|| ());
    let mut apply_status = MockApplyStatus::new();
    apply_status
        .expect_unregister_file_size_cb()
        .times(1)
        .returning(|| ());
    apply_status.expect_stop().times(1).returning(|| Ok(()));

    let handler = start_handler(
        LogHandlerConfig::default(),
        engine,
        MockApplyService::new(),
        apply_status,
        MockReplayService::new(),
        MockLeaderLocator::new(),
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await;
    handler.switch_role(Role::Leader, 7).await;
    handler.stop().await.unwrap();

    let cb = Arc::new(TestCb::default());
    let err = handler
        .append(Bytes::from_static(b"x"), 0, false, Arc::clone(&cb) as Arc<dyn AppendCb>)
        .await
        .unwrap_err();
    assert_eq!(err, HandlerError::NotRunning);
}

#[traced_test]
#[tokio::test]
async fn test_safe_to_destroy_waits_for_apply_drain() {
    let mut engine = MockLogEngine::new();
    // closed once by stop, never touched again by destroy
    engine.expect_close().times(1).returning(|| ());
    let mut apply_status = MockApplyStatus::new();
    apply_status
        .expect_unregister_file_size_cb()
        .returning(|| ());
    apply_status.expect_stop().returning(|| Ok(()));
    let drain_polls = Arc::new(AtomicU32::new(0));
    let drain_polls_c = Arc::clone(&drain_polls);
    apply_status.expect_is_apply_done().returning(move || {
        if drain_polls_c.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok((false, Some(Lsn::new(64))))
        } else {
            Ok((true, Some(Lsn::new(64))))
        }
    });
    let mut apply_service = MockApplyService::new();
    apply_service
        .expect_revert_apply_status()
        .times(1)
        .returning(|_| ());

    let handler = start_handler(
        LogHandlerConfig::default(),
        engine,
        apply_service,
        apply_status,
        MockReplayService::new(),
        MockLeaderLocator::new(),
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await;

    handler.stop().await.unwrap();
    assert_eq!(
        handler.safe_to_destroy().await.unwrap_err(),
        HandlerError::RetryLater
    );
    handler.safe_to_destroy().await.unwrap();
    handler.destroy().await;

    assert!(!handler.is_valid().await);
    let cb = Arc::new(TestCb::default());
    let err = handler
        .append(Bytes::from_static(b"x"), 0, false, Arc::clone(&cb) as Arc<dyn AppendCb>)
        .await
        .unwrap_err();
    assert_eq!(err, HandlerError::NotInit);
}

#[traced_test]
#[tokio::test]
async fn test_safe_to_destroy_rejected_while_running() {
    let handler = start_idle_handler(MockLogEngine::new()).await;
    assert!(matches!(
        handler.safe_to_destroy().await.unwrap_err(),
        HandlerError::StateMismatch(_)
    ));
}

#[traced_test]
#[tokio::test]
async fn test_init_twice_rejected() {
    let handler = start_idle_handler(MockLogEngine::new()).await;
    let err = handler
        .init(
            STREAM_ID,
            SELF_ADDR.to_owned(),
            Arc::new(MockLogEngine::new()),
            Arc::new(MockApplyService::new()),
            Arc::new(MockReplayService::new()),
            Arc::new(MockLeaderLocator::new()),
            Arc::new(MockElectionAdapter::new()),
            Arc::new(MockLogRpcProxy::new()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HandlerError::StateMismatch(_)));
}

#[traced_test]
#[tokio::test]
async fn test_wait_append_sync_returns_when_idle() {
    let handler = start_idle_handler(MockLogEngine::new()).await;
    handler.wait_append_sync().await;
}

// Reconfiguration

/// A config with fast dispatcher pacing for tests
fn fast_config() -> LogHandlerConfig {
    LogHandlerConfigBuilder::default()
        .config_change_retry_interval(Duration::from_millis(1))
        .build()
        .unwrap()
}

#[traced_test]
#[tokio::test]
async fn test_add_member_executes_locally_on_leader() {
    let mut engine = MockLogEngine::new();
    engine
        .expect_add_member()
        .withf(|member, new_replica_num, _timeout| {
            member.address() == PEER_ADDR && *new_replica_num == 3
        })
        .times(1)
        .returning(|_, _, _| Ok(()));
    let mut locator = MockLeaderLocator::new();
    locator
        .expect_get_leader()
        .returning(|_| Ok(SELF_ADDR.to_owned()));
    let mut election = MockElectionAdapter::new();
    election
        .expect_remove_from_blacklist()
        .withf(|id, server| *id == STREAM_ID && server == PEER_ADDR)
        .times(1)
        .returning(|_, _| Ok(()));

    let handler = start_handler(
        fast_config(),
        engine,
        MockApplyService::new(),
        MockApplyStatus::new(),
        MockReplayService::new(),
        locator,
        election,
        MockLogRpcProxy::new(),
    )
    .await;

    handler
        .add_member(Member::new(PEER_ADDR), 3, Duration::from_secs(1))
        .await
        .unwrap();
}

#[traced_test]
#[tokio::test]
async fn test_remove_member_forwarded_to_remote_leader() {
    let mut locator = MockLeaderLocator::new();
    locator
        .expect_get_leader()
        .returning(|_| Ok(PEER_ADDR.to_owned()));
    let mut rpc = MockLogRpcProxy::new();
    rpc.expect_send_config_change_cmd()
        .withf(|target, req, _conn, _process| {
            target == PEER_ADDR
                && req.removed_member.as_ref().map(Member::address) == Some("127.0.0.3:5001")
        })
        .times(1)
        .returning(|_, _, _, _| Ok(ConfigChangeCmdResp::new(Ok(()))));

    let handler = start_handler(
        fast_config(),
        MockLogEngine::new(),
        MockApplyService::new(),
        MockApplyStatus::new(),
        MockReplayService::new(),
        locator,
        MockElectionAdapter::new(),
        rpc,
    )
    .await;

    handler
        .remove_member(Member::new("127.0.0.3:5001"), 2, Duration::from_secs(1))
        .await
        .unwrap();
}

#[traced_test]
#[tokio::test]
async fn test_remove_current_leader_forces_leadership_move() {
    let leader_moved = Arc::new(AtomicBool::new(false));

    let moved_c = Arc::clone(&leader_moved);
    let mut locator = MockLeaderLocator::new();
    locator.expect_get_leader().returning(move |_| {
        if moved_c.load(Ordering::SeqCst) {
            Ok("127.0.0.3:5001".to_owned())
        } else {
            Ok(PEER_ADDR.to_owned())
        }
    });
    locator.expect_nonblock_renew_leader().returning(|_| ());

    let moved_c = Arc::clone(&leader_moved);
    let mut election = MockElectionAdapter::new();
    election
        .expect_add_to_blacklist()
        .withf(|id, server| *id == STREAM_ID && server == PEER_ADDR)
        .times(1)
        .returning(move |_, _| {
            moved_c.store(true, Ordering::SeqCst);
            Ok(())
        });

    let mut rpc = MockLogRpcProxy::new();
    rpc.expect_send_config_change_cmd()
        .returning(|target, _, _, _| {
            if target == PEER_ADDR {
                // the old leader refuses to remove itself
                Ok(ConfigChangeCmdResp::new(Err(
                    HandlerError::RemovingLeaderDenied,
                )))
            } else {
                Ok(ConfigChangeCmdResp::new(Ok(())))
            }
        });

    let handler = start_handler(
        fast_config(),
        MockLogEngine::new(),
        MockApplyService::new(),
        MockApplyStatus::new(),
        MockReplayService::new(),
        locator,
        election,
        rpc,
    )
    .await;

    handler
        .remove_member(Member::new(PEER_ADDR), 2, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(leader_moved.load(Ordering::SeqCst));
}

#[traced_test]
#[tokio::test]
async fn test_config_change_times_out() {
    let mut locator = MockLeaderLocator::new();
    locator
        .expect_get_leader()
        .returning(|_| Err(HandlerError::Connect("locator down".to_owned())));
    locator.expect_nonblock_renew_leader().returning(|_| ());

    let handler = start_handler(
        fast_config(),
        MockLogEngine::new(),
        MockApplyService::new(),
        MockApplyStatus::new(),
        MockReplayService::new(),
        locator,
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await;

    let err = handler
        .add_learner(Member::new(PEER_ADDR), Duration::from_millis(30))
        .await
        .unwrap_err();
    assert_eq!(err, HandlerError::Timeout);
}

#[traced_test]
#[tokio::test]
async fn test_config_change_rejects_invalid_arguments() {
    let handler = start_idle_handler(MockLogEngine::new()).await;

    // replica number out of range
    let err = handler
        .add_member(Member::new(PEER_ADDR), 9, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, HandlerError::InvalidArgument(_)));

    // growing the quorum through change_replica_num is not allowed
    let member_list = MemberList::new(vec![Member::new(SELF_ADDR), Member::new(PEER_ADDR)], 3);
    let err = handler
        .change_replica_num(member_list, 3, 5, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, HandlerError::InvalidArgument(_)));
}

#[traced_test]
#[tokio::test]
async fn test_upgrade_learner_engine_direct() {
    let mut engine = MockLogEngine::new();
    engine
        .expect_upgrade_learner_to_acceptor()
        .times(1)
        .returning(|_, _| Ok(()));

    let handler = start_idle_handler(engine).await;
    let learner_list = MemberList::new(vec![Member::new(PEER_ADDR)], 3);
    handler
        .upgrade_learner_to_acceptor(learner_list, Duration::from_secs(1))
        .await
        .unwrap();
}

// Sync monitor

#[traced_test]
#[tokio::test]
async fn test_leader_is_always_in_sync() {
    let mut engine = MockLogEngine::new();
    engine.expect_get_end_lsn().returning(|| Ok(Lsn::new(100)));
    engine.expect_get_last_rebuild_lsn().returning(|| Ok(None));
    engine
        .expect_get_role()
        .returning(|| Ok((Role::Leader, 7, false)));

    let handler = start_idle_handler(engine).await;
    let (is_log_sync, is_need_rebuild) = handler.is_in_sync().await.unwrap();
    assert!(is_log_sync);
    assert!(!is_need_rebuild);
}

#[traced_test]
#[tokio::test]
async fn test_lagging_follower_reported_out_of_sync() {
    let mut engine = MockLogEngine::new();
    engine.expect_get_end_lsn().returning(|| Ok(Lsn::new(100)));
    engine.expect_get_last_rebuild_lsn().returning(|| Ok(None));
    engine
        .expect_get_role()
        .returning(|| Ok((Role::Follower, 7, false)));
    engine.expect_get_max_ts_ns().returning(|| Ok(1_000));
    let mut locator = MockLeaderLocator::new();
    locator
        .expect_get_leader()
        .returning(|_| Ok(PEER_ADDR.to_owned()));
    let mut rpc = MockLogRpcProxy::new();
    // one poll serves both calls: the second answer must come from cache
    rpc.expect_get_stat().times(1).returning(|_, _, _| {
        Ok(GetStatResp {
            max_ts_ns: 10_000_000_000,
        })
    });

    let handler = start_handler(
        LogHandlerConfig::default(),
        engine,
        MockApplyService::new(),
        MockApplyStatus::new(),
        MockReplayService::new(),
        locator,
        MockElectionAdapter::new(),
        rpc,
    )
    .await;

    let (is_log_sync, _) = handler.is_in_sync().await.unwrap();
    assert!(!is_log_sync);
    let (is_log_sync, _) = handler.is_in_sync().await.unwrap();
    assert!(!is_log_sync);
}

#[traced_test]
#[tokio::test]
async fn test_caught_up_follower_reported_in_sync() {
    let mut engine = MockLogEngine::new();
    engine.expect_get_end_lsn().returning(|| Ok(Lsn::new(100)));
    engine.expect_get_last_rebuild_lsn().returning(|| Ok(None));
    engine
        .expect_get_role()
        .returning(|| Ok((Role::Follower, 7, false)));
    engine.expect_get_max_ts_ns().returning(|| Ok(1_000));
    let mut locator = MockLeaderLocator::new();
    locator
        .expect_get_leader()
        .returning(|_| Ok(PEER_ADDR.to_owned()));
    let mut rpc = MockLogRpcProxy::new();
    rpc.expect_get_stat()
        .returning(|_, _, _| Ok(GetStatResp { max_ts_ns: 2_000 }));

    let handler = start_handler(
        LogHandlerConfig::default(),
        engine,
        MockApplyService::new(),
        MockApplyStatus::new(),
        MockReplayService::new(),
        locator,
        MockElectionAdapter::new(),
        rpc,
    )
    .await;

    let (is_log_sync, is_need_rebuild) = handler.is_in_sync().await.unwrap();
    assert!(is_log_sync);
    assert!(!is_need_rebuild);
}

#[traced_test]
#[tokio::test]
async fn test_rebuild_detected_when_end_lsn_behind() {
    let mut engine = MockLogEngine::new();
    engine.expect_get_end_lsn().returning(|| Ok(Lsn::new(10)));
    engine
        .expect_get_last_rebuild_lsn()
        .returning(|| Ok(Some(Lsn::new(100))));
    engine
        .expect_get_role()
        .returning(|| Ok((Role::Leader, 7, false)));

    let handler = start_idle_handler(engine).await;
    let (_, is_need_rebuild) = handler.is_in_sync().await.unwrap();
    assert!(is_need_rebuild);
}

#[traced_test]
#[tokio::test]
async fn test_leader_poll_failure_renews_location_once() {
    let mut engine = MockLogEngine::new();
    engine.expect_get_end_lsn().returning(|| Ok(Lsn::new(100)));
    engine.expect_get_last_rebuild_lsn().returning(|| Ok(None));
    engine
        .expect_get_role()
        .returning(|| Ok((Role::Follower, 7, false)));
    engine.expect_get_max_ts_ns().returning(|| Ok(1_000));
    let mut locator = MockLeaderLocator::new();
    locator
        .expect_get_leader()
        .returning(|_| Err(HandlerError::Connect("no leader".to_owned())));
    locator
        .expect_nonblock_renew_leader()
        .times(1)
        .returning(|_| ());

    // a tiny sync threshold so both calls reach the poll
    let config = LogHandlerConfigBuilder::default()
        .keepalive_interval(Duration::from_micros(1))
        .sync_delay_budget(Duration::from_micros(1))
        .build()
        .unwrap();
    let handler = start_handler(
        config,
        engine,
        MockApplyService::new(),
        MockApplyStatus::new(),
        MockReplayService::new(),
        locator,
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await;

    let (is_log_sync, _) = handler.is_in_sync().await.unwrap();
    assert!(!is_log_sync);
    tokio::time::sleep(Duration::from_millis(1)).await;
    // the second failure sits inside the renew interval: no second renewal
    let (is_log_sync, _) = handler.is_in_sync().await.unwrap();
    assert!(!is_log_sync);
}

// Apply/replay integration

#[traced_test]
#[tokio::test]
async fn test_replay_enable_disable_round_trip() {
    let enabled = Arc::new(AtomicBool::new(false));
    let mut replay = MockReplayService::new();
    let enabled_c = Arc::clone(&enabled);
    replay.expect_enable().returning(move |_, _, _| {
        enabled_c.store(true, Ordering::SeqCst);
        Ok(())
    });
    let enabled_c = Arc::clone(&enabled);
    replay.expect_disable().returning(move |_| {
        enabled_c.store(false, Ordering::SeqCst);
        Ok(())
    });
    let enabled_c = Arc::clone(&enabled);
    replay
        .expect_is_enabled()
        .returning(move |_| Ok(enabled_c.load(Ordering::SeqCst)));

    let handler = start_handler(
        LogHandlerConfig::default(),
        MockLogEngine::new(),
        MockApplyService::new(),
        MockApplyStatus::new(),
        replay,
        MockLeaderLocator::new(),
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await;

    handler.enable_replay(Lsn::new(0), 100).await.unwrap();
    assert!(handler.is_replay_enabled().await);
    handler.disable_replay().await.unwrap();
    assert!(!handler.is_replay_enabled().await);
}

#[traced_test]
#[tokio::test]
async fn test_advance_base_info_requires_replay_disabled() {
    let mut replay = MockReplayService::new();
    replay.expect_is_enabled().returning(|_| Ok(true));

    let handler = start_handler(
        LogHandlerConfig::default(),
        MockLogEngine::new(),
        MockApplyService::new(),
        MockApplyStatus::new(),
        replay,
        MockLeaderLocator::new(),
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await;

    let err = handler
        .advance_base_info(BaseInfo::new(Lsn::new(0), 0), false)
        .await
        .unwrap_err();
    assert!(matches!(err, HandlerError::Unexpected(_)));
}

#[traced_test]
#[tokio::test]
async fn test_advance_base_info_forwards_when_replay_disabled() {
    let mut engine = MockLogEngine::new();
    engine
        .expect_advance_base_info()
        .withf(|base_info, is_rebuild| base_info.base_lsn == Lsn::new(0) && *is_rebuild)
        .times(1)
        .returning(|_, _| Ok(()));
    let mut replay = MockReplayService::new();
    replay.expect_is_enabled().returning(|_| Ok(false));

    let handler = start_handler(
        LogHandlerConfig::default(),
        engine,
        MockApplyService::new(),
        MockApplyStatus::new(),
        replay,
        MockLeaderLocator::new(),
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await;

    handler
        .advance_base_info(BaseInfo::new(Lsn::new(0), 0), true)
        .await
        .unwrap();
}

#[traced_test]
#[tokio::test]
async fn test_max_decided_ts_spans_both_frontiers() {
    let mut apply_service = MockApplyService::new();
    apply_service
        .expect_get_min_unapplied_ts_ns()
        .returning(|_| Ok(500));
    let mut replay = MockReplayService::new();
    replay
        .expect_get_min_unreplayed_ts_ns()
        .returning(|_| Ok(300));

    let handler = start_handler(
        LogHandlerConfig::default(),
        MockLogEngine::new(),
        apply_service,
        MockApplyStatus::new(),
        replay,
        MockLeaderLocator::new(),
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await;

    assert_eq!(handler.get_max_decided_log_ts_ns().await.unwrap(), 499);
}

#[traced_test]
#[tokio::test]
async fn test_max_decided_ts_falls_back_without_replay() {
    let mut apply_service = MockApplyService::new();
    apply_service
        .expect_get_min_unapplied_ts_ns()
        .returning(|_| Ok(500));
    let mut replay = MockReplayService::new();
    replay
        .expect_get_min_unreplayed_ts_ns()
        .returning(|_| Err(HandlerError::StateMismatch("replay not enabled".to_owned())));

    let handler = start_handler(
        LogHandlerConfig::default(),
        MockLogEngine::new(),
        apply_service,
        MockApplyStatus::new(),
        replay,
        MockLeaderLocator::new(),
        MockElectionAdapter::new(),
        MockLogRpcProxy::new(),
    )
    .await;

    assert_eq!(handler.get_max_decided_log_ts_ns().await.unwrap(), 499);
}

// Facade passthroughs

#[traced_test]
#[tokio::test]
async fn test_get_base_info_aligns_to_block_floor() {
    let mut engine = MockLogEngine::new();
    engine
        .expect_get_base_info()
        .withf(|base_lsn| *base_lsn == Lsn::new(LOG_BLOCK_SIZE))
        .times(1)
        .returning(|base_lsn| Ok(BaseInfo::new(base_lsn, 42)));

    let handler = start_idle_handler(engine).await;
    let base_info = handler
        .get_base_info(Lsn::new(LOG_BLOCK_SIZE + 5))
        .await
        .unwrap();
    assert_eq!(base_info.base_lsn, Lsn::new(LOG_BLOCK_SIZE));
    assert_eq!(base_info.prev_log_ts_ns, 42);
}

#[traced_test]
#[tokio::test]
async fn test_is_valid_member_on_stable_leader() {
    let mut engine = MockLogEngine::new();
    engine
        .expect_get_role()
        .returning(|| Ok((Role::Leader, 7, false)));
    engine.expect_get_paxos_member_list().returning(|| {
        Ok(MemberList::new(
            vec![Member::new(SELF_ADDR), Member::new(PEER_ADDR)],
            2,
        ))
    });

    let handler = start_idle_handler(engine).await;
    assert!(handler.is_valid_member(PEER_ADDR).await.unwrap());
    assert!(!handler.is_valid_member("127.0.0.9:5001").await.unwrap());
}

#[traced_test]
#[tokio::test]
async fn test_is_valid_member_invalidated_by_role_change() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_c = Arc::clone(&calls);
    let mut engine = MockLogEngine::new();
    engine.expect_get_role().returning(move || {
        let proposal_id = if calls_c.fetch_add(1, Ordering::SeqCst) == 0 {
            7
        } else {
            8
        };
        Ok((Role::Leader, proposal_id, false))
    });
    engine
        .expect_get_paxos_member_list()
        .returning(|| Ok(MemberList::new(vec![Member::new(SELF_ADDR)], 1)));

    let handler = start_idle_handler(engine).await;
    assert_eq!(
        handler.is_valid_member(SELF_ADDR).await.unwrap_err(),
        HandlerError::NotMaster
    );
}
