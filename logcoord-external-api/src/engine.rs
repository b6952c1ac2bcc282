use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use crate::{
    error::HandlerError, AccessMode, BaseInfo, LearnerList, LogStreamId, Lsn, Member, MemberList,
    ProposalId, Role,
};

/// Per-append directives handed to the engine
#[derive(Debug, Default, Clone, Copy)]
pub struct AppendOptions {
    /// Proposal id the caller believes it appends under
    pub proposal_id: ProposalId,
    /// Ask the engine to reject the append when its own proposal id differs
    pub need_check_proposal_id: bool,
    /// Return backpressure instead of waiting for log slot availability
    pub need_nonblock: bool,
}

/// One entry yielded when iterating the log
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// LSN the entry was written at
    pub lsn: Lsn,
    /// Commit timestamp of the entry
    pub ts_ns: i64,
    /// Entry payload
    pub data: Bytes,
}

/// Stream of log entries produced by a seek
pub type LogEntryStream = Pin<Box<dyn Stream<Item = Result<LogEntry, HandlerError>> + Send>>;

/// Callback fired by the engine when the stream must be rebuilt from a
/// newer baseline
pub trait RebuildCb: Send + Sync + 'static {
    /// The engine detected that this replica fell behind the group's
    /// truncation floor
    fn on_rebuild(&self, id: LogStreamId, base_lsn: Lsn);
}

/// The replicated log engine of one stream.
///
/// The engine is a black box: it owns the Paxos machinery, the on-disk log
/// and the election. The handler drives it through this seam and never
/// assumes anything about its internals beyond the documented contracts.
/// Closing the handle releases the stream's resources; every call after
/// `close` fails with `NotInit`.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait LogEngine: Send + Sync + 'static {
    /// Append `buf` to the log.
    ///
    /// Returns the assigned LSN and commit timestamp, both monotone within
    /// one proposal term. `RetryLater` signals transient backpressure;
    /// `NotMaster` signals that `opts.proposal_id` no longer matches the
    /// engine's own.
    async fn append(
        &self,
        opts: AppendOptions,
        buf: Bytes,
        ref_ts_ns: i64,
    ) -> Result<(Lsn, i64), HandlerError>;

    /// Current role, proposal id and whether an election is pending
    async fn get_role(&self) -> Result<(Role, ProposalId, bool), HandlerError>;

    /// Current access mode and its version
    async fn get_access_mode(&self) -> Result<(u64, AccessMode), HandlerError>;

    /// Change the access mode; rejected when `proposal_id` or
    /// `mode_version` is stale
    async fn change_access_mode(
        &self,
        proposal_id: ProposalId,
        mode_version: u64,
        access_mode: AccessMode,
        ref_ts_ns: i64,
    ) -> Result<(), HandlerError>;

    /// Iterate committed entries starting at `lsn`
    async fn seek_by_lsn(&self, lsn: Lsn) -> Result<LogEntryStream, HandlerError>;

    /// Iterate committed entries starting at the first entry whose
    /// timestamp is not below `ts_ns`
    async fn seek_by_ts(&self, ts_ns: i64) -> Result<LogEntryStream, HandlerError>;

    /// Set the initial Paxos membership of a freshly created stream; an
    /// arbiter member may be supplied alongside the voters
    async fn set_initial_member_list(
        &self,
        member_list: MemberList,
        arb_member: Option<Member>,
    ) -> Result<(), HandlerError>;

    /// Raise or lower this replica's election priority
    async fn set_election_priority(&self, priority: u64) -> Result<(), HandlerError>;

    /// Restore the default election priority
    async fn reset_election_priority(&self) -> Result<(), HandlerError>;

    /// Smallest LSN whose entry's timestamp is not below `ts_ns`, at block
    /// granularity
    async fn locate_by_ts_coarsely(&self, ts_ns: i64) -> Result<Lsn, HandlerError>;

    /// Timestamp of the block containing `lsn`, never above the entry's own
    async fn locate_by_lsn_coarsely(&self, lsn: Lsn) -> Result<i64, HandlerError>;

    /// Advance the truncation floor to `lsn`
    async fn advance_base_lsn(&self, lsn: Lsn) -> Result<(), HandlerError>;

    /// LSN right after the last committed entry
    async fn get_end_lsn(&self) -> Result<Lsn, HandlerError>;

    /// LSN right after the last written entry
    async fn get_max_lsn(&self) -> Result<Lsn, HandlerError>;

    /// Timestamp of the last written entry
    async fn get_max_ts_ns(&self) -> Result<i64, HandlerError>;

    /// Timestamp of the last committed entry
    async fn get_end_ts_ns(&self) -> Result<i64, HandlerError>;

    /// Current Paxos membership with its quorum size
    async fn get_paxos_member_list(&self) -> Result<MemberList, HandlerError>;

    /// All learners registered on the stream
    async fn get_global_learner_list(&self) -> Result<LearnerList, HandlerError>;

    /// Resume pulling log from the leader
    async fn enable_sync(&self) -> Result<(), HandlerError>;

    /// Stop pulling log from the leader
    async fn disable_sync(&self) -> Result<(), HandlerError>;

    /// Whether log pulling is currently enabled
    async fn is_sync_enabled(&self) -> bool;

    /// Reset the log to restart from `base_info`; `is_rebuild` marks a
    /// rebuild-triggered reset
    async fn advance_base_info(
        &self,
        base_info: BaseInfo,
        is_rebuild: bool,
    ) -> Result<(), HandlerError>;

    /// Base info generated for the block containing `base_lsn`
    async fn get_base_info(&self, base_lsn: Lsn) -> Result<BaseInfo, HandlerError>;

    /// Baseline of the last rebuild, if one ever happened
    async fn get_last_rebuild_lsn(&self) -> Result<Option<Lsn>, HandlerError>;

    /// Record the region this replica is deployed in
    async fn set_region(&self, region: String) -> Result<(), HandlerError>;

    /// Let this replica vote in elections again
    async fn enable_vote(&self) -> Result<(), HandlerError>;

    /// Bar this replica from voting in elections
    async fn disable_vote(&self) -> Result<(), HandlerError>;

    /// Register the rebuild notification callback
    async fn register_rebuild_cb(&self, cb: Arc<dyn RebuildCb>) -> Result<(), HandlerError>;

    /// Drop the rebuild notification callback
    async fn unregister_rebuild_cb(&self) -> Result<(), HandlerError>;

    /// Shrink the member list's quorum size; leader-only
    async fn change_replica_num(
        &self,
        member_list: MemberList,
        curr_replica_num: u64,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Result<(), HandlerError>;

    /// Add a voting member; leader-only
    async fn add_member(
        &self,
        member: Member,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Result<(), HandlerError>;

    /// Remove a voting member; leader-only. Fails with
    /// `RemovingLeaderDenied` when `member` is the leader itself
    async fn remove_member(
        &self,
        member: Member,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Result<(), HandlerError>;

    /// Add one voting member and remove another, keeping the quorum size;
    /// leader-only
    async fn replace_member(
        &self,
        added: Member,
        removed: Member,
        timeout: Duration,
    ) -> Result<(), HandlerError>;

    /// Register a learner; leader-only
    async fn add_learner(&self, learner: Member, timeout: Duration) -> Result<(), HandlerError>;

    /// Deregister a learner; leader-only
    async fn remove_learner(&self, learner: Member, timeout: Duration)
        -> Result<(), HandlerError>;

    /// Promote a learner into the voting member list; leader-only
    async fn switch_learner_to_acceptor(
        &self,
        member: Member,
        timeout: Duration,
    ) -> Result<(), HandlerError>;

    /// Demote a voting member into a learner; leader-only
    async fn switch_acceptor_to_learner(
        &self,
        member: Member,
        timeout: Duration,
    ) -> Result<(), HandlerError>;

    /// Add an arbiter member; leader-only
    async fn add_arb_member(
        &self,
        member: Member,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Result<(), HandlerError>;

    /// Remove an arbiter member; leader-only
    async fn remove_arb_member(
        &self,
        member: Member,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Result<(), HandlerError>;

    /// Replace one arbiter member with another; leader-only
    async fn replace_arb_member(
        &self,
        added: Member,
        removed: Member,
        timeout: Duration,
    ) -> Result<(), HandlerError>;

    /// Degrade the given acceptors to learners without going through the
    /// member-change log; leader-only
    async fn degrade_acceptor_to_learner(
        &self,
        member_list: MemberList,
        timeout: Duration,
    ) -> Result<(), HandlerError>;

    /// Upgrade the given learners to acceptors without going through the
    /// member-change log; leader-only
    async fn upgrade_learner_to_acceptor(
        &self,
        learner_list: MemberList,
        timeout: Duration,
    ) -> Result<(), HandlerError>;

    /// Release the stream's resources; all later calls fail with `NotInit`
    async fn close(&self);
}
