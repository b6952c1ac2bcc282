use std::time::Duration;

use async_trait::async_trait;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use serde::{Deserialize, Serialize};

use crate::{error::HandlerError, is_valid_replica_num, LogStreamId, Member, MemberList};

/// The reconfiguration a `ConfigChangeCmd` asks the leader to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigChangeKind {
    /// Shrink the Paxos quorum size
    ChangeReplicaNum,
    /// Add a voting member
    AddMember,
    /// Remove a voting member
    RemoveMember,
    /// Add one voting member and remove another
    ReplaceMember,
    /// Register a learner
    AddLearner,
    /// Deregister a learner
    RemoveLearner,
    /// Promote a learner into the voting member list
    SwitchToAcceptor,
    /// Demote a voting member into a learner
    SwitchToLearner,
    /// Add an arbiter member
    AddArbMember,
    /// Remove an arbiter member
    RemoveArbMember,
    /// Replace one arbiter member with another
    ReplaceArbMember,
}

/// Reconfiguration request, forwarded from the receiving replica to the
/// stream's leader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChangeCmd {
    /// Address of the replica the user invoked
    pub src: String,
    /// Stream being reconfigured
    pub stream_id: LogStreamId,
    /// Member entering the configuration, for kinds that add one
    pub added_member: Option<Member>,
    /// Member leaving the configuration, for kinds that remove one
    pub removed_member: Option<Member>,
    /// Full member list, for `ChangeReplicaNum`
    pub member_list: Option<MemberList>,
    /// Quorum size before the change, for `ChangeReplicaNum`
    pub curr_replica_num: u64,
    /// Quorum size after the change, for kinds that resize the quorum
    pub new_replica_num: u64,
    /// The requested reconfiguration
    pub kind: ConfigChangeKind,
    /// Budget for the whole command, shared by every attempt
    pub timeout: Duration,
}

impl ConfigChangeCmd {
    /// Build a `ChangeReplicaNum` command
    #[inline]
    #[must_use]
    pub fn change_replica_num(
        src: String,
        stream_id: LogStreamId,
        member_list: MemberList,
        curr_replica_num: u64,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            src,
            stream_id,
            added_member: None,
            removed_member: None,
            member_list: Some(member_list),
            curr_replica_num,
            new_replica_num,
            kind: ConfigChangeKind::ChangeReplicaNum,
            timeout,
        }
    }

    /// Build a member-targeted command of the given kind
    #[inline]
    #[must_use]
    pub fn with_members(
        src: String,
        stream_id: LogStreamId,
        kind: ConfigChangeKind,
        added_member: Option<Member>,
        removed_member: Option<Member>,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            src,
            stream_id,
            added_member,
            removed_member,
            member_list: None,
            curr_replica_num: 0,
            new_replica_num,
            kind,
            timeout,
        }
    }

    /// Whether this command puts `added_member` into the voting member list
    #[inline]
    #[must_use]
    pub fn is_add_member_list(&self) -> bool {
        matches!(
            self.kind,
            ConfigChangeKind::AddMember
                | ConfigChangeKind::AddArbMember
                | ConfigChangeKind::ReplaceMember
                | ConfigChangeKind::ReplaceArbMember
                | ConfigChangeKind::SwitchToAcceptor
        )
    }

    /// Whether this command takes `removed_member` out of the voting member
    /// list
    #[inline]
    #[must_use]
    pub fn is_remove_member_list(&self) -> bool {
        matches!(
            self.kind,
            ConfigChangeKind::RemoveMember
                | ConfigChangeKind::RemoveArbMember
                | ConfigChangeKind::ReplaceMember
                | ConfigChangeKind::ReplaceArbMember
                | ConfigChangeKind::SwitchToLearner
        )
    }

    /// Whether the command carries everything its kind needs
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.src.is_empty() || self.timeout.is_zero() {
            return false;
        }
        let added_valid = self.added_member.as_ref().is_some_and(Member::is_valid);
        let removed_valid = self.removed_member.as_ref().is_some_and(Member::is_valid);
        match self.kind {
            ConfigChangeKind::ChangeReplicaNum => {
                self.member_list.as_ref().is_some_and(MemberList::is_valid)
                    && is_valid_replica_num(self.curr_replica_num)
                    && is_valid_replica_num(self.new_replica_num)
            }
            ConfigChangeKind::AddMember | ConfigChangeKind::AddArbMember => {
                added_valid && is_valid_replica_num(self.new_replica_num)
            }
            ConfigChangeKind::RemoveMember | ConfigChangeKind::RemoveArbMember => {
                removed_valid && is_valid_replica_num(self.new_replica_num)
            }
            ConfigChangeKind::ReplaceMember | ConfigChangeKind::ReplaceArbMember => {
                added_valid && removed_valid
            }
            ConfigChangeKind::AddLearner | ConfigChangeKind::SwitchToAcceptor => added_valid,
            ConfigChangeKind::RemoveLearner | ConfigChangeKind::SwitchToLearner => removed_valid,
        }
    }
}

/// Leader's verdict on one `ConfigChangeCmd`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChangeCmdResp {
    /// Outcome of executing the command at the leader
    pub ret: Result<(), HandlerError>,
}

impl ConfigChangeCmdResp {
    /// Wrap an execution outcome
    #[inline]
    #[must_use]
    pub fn new(ret: Result<(), HandlerError>) -> Self {
        Self { ret }
    }
}

/// Ask a replica for its stream statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStatReq {
    /// Address of the asking replica
    pub src: String,
    /// Stream being asked about
    pub stream_id: LogStreamId,
}

/// Stream statistics of the asked replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStatResp {
    /// Timestamp of the last entry written at the asked replica
    pub max_ts_ns: i64,
}

/// Proxy sending handler-level requests to a peer replica.
///
/// Implementations own connection management; the handler only supplies
/// the target address and the per-call budgets.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait LogRpcProxy: Send + Sync + 'static {
    /// Deliver a reconfiguration command to `target` and wait for its
    /// verdict. `conn_timeout` bounds connection establishment;
    /// `process_timeout` bounds the whole exchange.
    async fn send_config_change_cmd(
        &self,
        target: String,
        req: ConfigChangeCmd,
        conn_timeout: Duration,
        process_timeout: Duration,
    ) -> Result<ConfigChangeCmdResp, HandlerError>;

    /// Fetch stream statistics from `target`
    async fn get_stat(
        &self,
        target: String,
        req: GetStatReq,
        timeout: Duration,
    ) -> Result<GetStatResp, HandlerError>;
}

#[cfg(test)]
mod test {
    use super::*;

    /// A valid one-second command against stream 1
    fn add_member_cmd() -> ConfigChangeCmd {
        ConfigChangeCmd::with_members(
            "127.0.0.1:5001".to_owned(),
            1,
            ConfigChangeKind::AddMember,
            Some(Member::new("127.0.0.1:5002")),
            None,
            3,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_member_list_classification() {
        let add = add_member_cmd();
        assert!(add.is_add_member_list());
        assert!(!add.is_remove_member_list());

        let replace = ConfigChangeCmd::with_members(
            "127.0.0.1:5001".to_owned(),
            1,
            ConfigChangeKind::ReplaceMember,
            Some(Member::new("127.0.0.1:5002")),
            Some(Member::new("127.0.0.1:5003")),
            0,
            Duration::from_secs(1),
        );
        assert!(replace.is_add_member_list());
        assert!(replace.is_remove_member_list());

        let add_learner = ConfigChangeCmd::with_members(
            "127.0.0.1:5001".to_owned(),
            1,
            ConfigChangeKind::AddLearner,
            Some(Member::new("127.0.0.1:5002")),
            None,
            0,
            Duration::from_secs(1),
        );
        assert!(!add_learner.is_add_member_list());
        assert!(!add_learner.is_remove_member_list());
    }

    #[test]
    fn test_cmd_validity() {
        assert!(add_member_cmd().is_valid());

        let mut zero_timeout = add_member_cmd();
        zero_timeout.timeout = Duration::ZERO;
        assert!(!zero_timeout.is_valid());

        let mut missing_member = add_member_cmd();
        missing_member.added_member = None;
        assert!(!missing_member.is_valid());

        let mut bad_num = add_member_cmd();
        bad_num.new_replica_num = 9;
        assert!(!bad_num.is_valid());

        let change_num = ConfigChangeCmd::change_replica_num(
            "127.0.0.1:5001".to_owned(),
            1,
            MemberList::new(
                vec![Member::new("127.0.0.1:5001"), Member::new("127.0.0.1:5002")],
                3,
            ),
            3,
            2,
            Duration::from_secs(1),
        );
        assert!(change_num.is_valid());
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_resp_carries_remote_error() {
        let resp = ConfigChangeCmdResp::new(Err(HandlerError::NotMaster));
        assert_eq!(resp.ret.unwrap_err(), HandlerError::NotMaster);
        let ok = ConfigChangeCmdResp::new(Ok(()));
        assert!(ok.ret.is_ok());
    }
}
