use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use utils::interval::TimeGate;

use logcoord_external_api::{
    engine::LogEngine,
    error::HandlerError,
    is_valid_replica_num,
    rpc::{ConfigChangeCmd, ConfigChangeKind},
    Member, MemberList,
};

use super::{ConfigDeps, LogHandler};

/// Executes one reconfiguration command against the local engine.
///
/// Only reached when the located leader is this replica; the engine still
/// fences the command against leadership it no longer holds.
struct ConfigChangeCmdHandler<'a, E> {
    /// The local engine
    engine: &'a E,
}

impl<'a, E: LogEngine> ConfigChangeCmdHandler<'a, E> {
    /// Wrap the local engine
    fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Map the command kind onto the engine's one-stage primitives
    async fn handle(&self, req: &ConfigChangeCmd) -> Result<(), HandlerError> {
        if !req.is_valid() {
            return Err(HandlerError::InvalidArgument(
                "config change cmd is incomplete".to_owned(),
            ));
        }
        let timeout = req.timeout;
        match req.kind {
            ConfigChangeKind::ChangeReplicaNum => {
                self.engine
                    .change_replica_num(
                        Self::member_list(req)?,
                        req.curr_replica_num,
                        req.new_replica_num,
                        timeout,
                    )
                    .await
            }
            ConfigChangeKind::AddMember => {
                self.engine
                    .add_member(Self::added(req)?, req.new_replica_num, timeout)
                    .await
            }
            ConfigChangeKind::RemoveMember => {
                self.engine
                    .remove_member(Self::removed(req)?, req.new_replica_num, timeout)
                    .await
            }
            ConfigChangeKind::ReplaceMember => {
                self.engine
                    .replace_member(Self::added(req)?, Self::removed(req)?, timeout)
                    .await
            }
            ConfigChangeKind::AddLearner => {
                self.engine.add_learner(Self::added(req)?, timeout).await
            }
            ConfigChangeKind::RemoveLearner => {
                self.engine.remove_learner(Self::removed(req)?, timeout).await
            }
            ConfigChangeKind::SwitchToAcceptor => {
                self.engine
                    .switch_learner_to_acceptor(Self::added(req)?, timeout)
                    .await
            }
            ConfigChangeKind::SwitchToLearner => {
                self.engine
                    .switch_acceptor_to_learner(Self::removed(req)?, timeout)
                    .await
            }
            ConfigChangeKind::AddArbMember => {
                self.engine
                    .add_arb_member(Self::added(req)?, req.new_replica_num, timeout)
                    .await
            }
            ConfigChangeKind::RemoveArbMember => {
                self.engine
                    .remove_arb_member(Self::removed(req)?, req.new_replica_num, timeout)
                    .await
            }
            ConfigChangeKind::ReplaceArbMember => {
                self.engine
                    .replace_arb_member(Self::added(req)?, Self::removed(req)?, timeout)
                    .await
            }
        }
    }

    /// The member the command adds
    fn added(req: &ConfigChangeCmd) -> Result<Member, HandlerError> {
        req.added_member
            .clone()
            .ok_or_else(|| HandlerError::InvalidArgument("added member is missing".to_owned()))
    }

    /// The member the command removes
    fn removed(req: &ConfigChangeCmd) -> Result<Member, HandlerError> {
        req.removed_member
            .clone()
            .ok_or_else(|| HandlerError::InvalidArgument("removed member is missing".to_owned()))
    }

    /// The member list the command carries
    fn member_list(req: &ConfigChangeCmd) -> Result<MemberList, HandlerError> {
        req.member_list
            .clone()
            .ok_or_else(|| HandlerError::InvalidArgument("member list is missing".to_owned()))
    }
}

impl<E: LogEngine> LogHandler<E> {
    /// Shrink the stream's Paxos quorum size.
    ///
    /// Growing the quorum this way is not allowed; membership additions
    /// carry their own target quorum size.
    #[inline]
    pub async fn change_replica_num(
        &self,
        member_list: MemberList,
        curr_replica_num: u64,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !member_list.is_valid()
            || !is_valid_replica_num(curr_replica_num)
            || !is_valid_replica_num(new_replica_num)
            || curr_replica_num <= new_replica_num
            || timeout.is_zero()
        {
            warn!(
                "invalid argument, id: {}, member_list: {member_list:?}, \
                 curr_replica_num: {curr_replica_num}, new_replica_num: {new_replica_num}",
                deps.id
            );
            return Err(HandlerError::InvalidArgument(
                "bad replica number change".to_owned(),
            ));
        }
        let req = ConfigChangeCmd::change_replica_num(
            deps.self_addr.clone(),
            deps.id,
            member_list,
            curr_replica_num,
            new_replica_num,
            timeout,
        );
        self.submit_config_change_cmd(deps, req).await?;
        info!(
            "change_replica_num success, id: {}, curr_replica_num: {curr_replica_num}, \
             new_replica_num: {new_replica_num}",
            deps.id
        );
        Ok(())
    }

    /// Add a voting member and move the quorum size to `new_replica_num`
    #[inline]
    pub async fn add_member(
        &self,
        added_member: Member,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !added_member.is_valid() || !is_valid_replica_num(new_replica_num) || timeout.is_zero()
        {
            warn!(
                "invalid argument, id: {}, added_member: {added_member}, \
                 new_replica_num: {new_replica_num}",
                deps.id
            );
            return Err(HandlerError::InvalidArgument("bad added member".to_owned()));
        }
        let req = ConfigChangeCmd::with_members(
            deps.self_addr.clone(),
            deps.id,
            ConfigChangeKind::AddMember,
            Some(added_member.clone()),
            None,
            new_replica_num,
            timeout,
        );
        self.submit_config_change_cmd(deps, req).await?;
        info!(
            "add_member success, id: {}, added_member: {added_member}, \
             new_replica_num: {new_replica_num}",
            deps.id
        );
        Ok(())
    }

    /// Remove a voting member and move the quorum size to `new_replica_num`.
    ///
    /// When the removed member currently leads the stream, the dispatcher
    /// blacklists it, waits for leadership to move and retries.
    #[inline]
    pub async fn remove_member(
        &self,
        removed_member: Member,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !removed_member.is_valid() || !is_valid_replica_num(new_replica_num) || timeout.is_zero()
        {
            warn!(
                "invalid argument, id: {}, removed_member: {removed_member}, \
                 new_replica_num: {new_replica_num}",
                deps.id
            );
            return Err(HandlerError::InvalidArgument(
                "bad removed member".to_owned(),
            ));
        }
        let req = ConfigChangeCmd::with_members(
            deps.self_addr.clone(),
            deps.id,
            ConfigChangeKind::RemoveMember,
            None,
            Some(removed_member.clone()),
            new_replica_num,
            timeout,
        );
        self.submit_config_change_cmd(deps, req).await?;
        info!(
            "remove_member success, id: {}, removed_member: {removed_member}, \
             new_replica_num: {new_replica_num}",
            deps.id
        );
        Ok(())
    }

    /// Add one voting member and remove another, keeping the quorum size
    #[inline]
    pub async fn replace_member(
        &self,
        added_member: Member,
        removed_member: Member,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !added_member.is_valid() || !removed_member.is_valid() || timeout.is_zero() {
            warn!(
                "invalid argument, id: {}, added_member: {added_member}, \
                 removed_member: {removed_member}",
                deps.id
            );
            return Err(HandlerError::InvalidArgument(
                "bad member replacement".to_owned(),
            ));
        }
        let req = ConfigChangeCmd::with_members(
            deps.self_addr.clone(),
            deps.id,
            ConfigChangeKind::ReplaceMember,
            Some(added_member.clone()),
            Some(removed_member.clone()),
            0,
            timeout,
        );
        self.submit_config_change_cmd(deps, req).await?;
        info!(
            "replace_member success, id: {}, added_member: {added_member}, \
             removed_member: {removed_member}",
            deps.id
        );
        Ok(())
    }

    /// Register a learner on the stream
    #[inline]
    pub async fn add_learner(
        &self,
        added_learner: Member,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !added_learner.is_valid() || timeout.is_zero() {
            warn!(
                "invalid argument, id: {}, added_learner: {added_learner}",
                deps.id
            );
            return Err(HandlerError::InvalidArgument("bad added learner".to_owned()));
        }
        let req = ConfigChangeCmd::with_members(
            deps.self_addr.clone(),
            deps.id,
            ConfigChangeKind::AddLearner,
            Some(added_learner.clone()),
            None,
            0,
            timeout,
        );
        self.submit_config_change_cmd(deps, req).await?;
        info!(
            "add_learner success, id: {}, added_learner: {added_learner}",
            deps.id
        );
        Ok(())
    }

    /// Deregister a learner from the stream
    #[inline]
    pub async fn remove_learner(
        &self,
        removed_learner: Member,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !removed_learner.is_valid() || timeout.is_zero() {
            warn!(
                "invalid argument, id: {}, removed_learner: {removed_learner}",
                deps.id
            );
            return Err(HandlerError::InvalidArgument(
                "bad removed learner".to_owned(),
            ));
        }
        let req = ConfigChangeCmd::with_members(
            deps.self_addr.clone(),
            deps.id,
            ConfigChangeKind::RemoveLearner,
            None,
            Some(removed_learner.clone()),
            0,
            timeout,
        );
        self.submit_config_change_cmd(deps, req).await?;
        info!(
            "remove_learner success, id: {}, removed_learner: {removed_learner}",
            deps.id
        );
        Ok(())
    }

    /// Promote a learner into the voting member list
    #[inline]
    pub async fn switch_learner_to_acceptor(
        &self,
        learner: Member,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !learner.is_valid() || timeout.is_zero() {
            warn!("invalid argument, id: {}, learner: {learner}", deps.id);
            return Err(HandlerError::InvalidArgument("bad learner".to_owned()));
        }
        let req = ConfigChangeCmd::with_members(
            deps.self_addr.clone(),
            deps.id,
            ConfigChangeKind::SwitchToAcceptor,
            Some(learner.clone()),
            Some(learner.clone()),
            0,
            timeout,
        );
        self.submit_config_change_cmd(deps, req).await?;
        info!(
            "switch_learner_to_acceptor success, id: {}, learner: {learner}",
            deps.id
        );
        Ok(())
    }

    /// Demote a voting member into a learner
    #[inline]
    pub async fn switch_acceptor_to_learner(
        &self,
        member: Member,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !member.is_valid() || timeout.is_zero() {
            warn!("invalid argument, id: {}, member: {member}", deps.id);
            return Err(HandlerError::InvalidArgument("bad member".to_owned()));
        }
        let req = ConfigChangeCmd::with_members(
            deps.self_addr.clone(),
            deps.id,
            ConfigChangeKind::SwitchToLearner,
            Some(member.clone()),
            Some(member.clone()),
            0,
            timeout,
        );
        self.submit_config_change_cmd(deps, req).await?;
        info!(
            "switch_acceptor_to_learner success, id: {}, member: {member}",
            deps.id
        );
        Ok(())
    }

    /// Add an arbiter member and move the quorum size to `new_replica_num`
    #[inline]
    pub async fn add_arb_member(
        &self,
        added_member: Member,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !added_member.is_valid() || !is_valid_replica_num(new_replica_num) || timeout.is_zero()
        {
            warn!(
                "invalid argument, id: {}, added_member: {added_member}, \
                 new_replica_num: {new_replica_num}",
                deps.id
            );
            return Err(HandlerError::InvalidArgument(
                "bad added arbiter member".to_owned(),
            ));
        }
        let req = ConfigChangeCmd::with_members(
            deps.self_addr.clone(),
            deps.id,
            ConfigChangeKind::AddArbMember,
            Some(added_member.clone()),
            None,
            new_replica_num,
            timeout,
        );
        self.submit_config_change_cmd(deps, req).await?;
        info!(
            "add_arb_member success, id: {}, added_member: {added_member}, \
             new_replica_num: {new_replica_num}",
            deps.id
        );
        Ok(())
    }

    /// Remove an arbiter member and move the quorum size to
    /// `new_replica_num`
    #[inline]
    pub async fn remove_arb_member(
        &self,
        removed_member: Member,
        new_replica_num: u64,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !removed_member.is_valid() || !is_valid_replica_num(new_replica_num) || timeout.is_zero()
        {
            warn!(
                "invalid argument, id: {}, removed_member: {removed_member}, \
                 new_replica_num: {new_replica_num}",
                deps.id
            );
            return Err(HandlerError::InvalidArgument(
                "bad removed arbiter member".to_owned(),
            ));
        }
        let req = ConfigChangeCmd::with_members(
            deps.self_addr.clone(),
            deps.id,
            ConfigChangeKind::RemoveArbMember,
            None,
            Some(removed_member.clone()),
            new_replica_num,
            timeout,
        );
        self.submit_config_change_cmd(deps, req).await?;
        info!(
            "remove_arb_member success, id: {}, removed_member: {removed_member}, \
             new_replica_num: {new_replica_num}",
            deps.id
        );
        Ok(())
    }

    /// Replace one arbiter member with another
    #[inline]
    pub async fn replace_arb_member(
        &self,
        added_member: Member,
        removed_member: Member,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !added_member.is_valid() || !removed_member.is_valid() || timeout.is_zero() {
            warn!(
                "invalid argument, id: {}, added_member: {added_member}, \
                 removed_member: {removed_member}",
                deps.id
            );
            return Err(HandlerError::InvalidArgument(
                "bad arbiter member replacement".to_owned(),
            ));
        }
        let req = ConfigChangeCmd::with_members(
            deps.self_addr.clone(),
            deps.id,
            ConfigChangeKind::ReplaceArbMember,
            Some(added_member.clone()),
            Some(removed_member.clone()),
            0,
            timeout,
        );
        self.submit_config_change_cmd(deps, req).await?;
        info!(
            "replace_arb_member success, id: {}, added_member: {added_member}, \
             removed_member: {removed_member}",
            deps.id
        );
        Ok(())
    }

    /// Degrade the given acceptors to learners, engine-direct.
    ///
    /// Invoked only on a replica that already believes itself leader; no
    /// leader routing happens here.
    #[inline]
    pub async fn degrade_acceptor_to_learner(
        &self,
        member_list: MemberList,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !member_list.is_valid() || timeout.is_zero() {
            warn!(
                "invalid argument, id: {}, member_list: {member_list:?}",
                deps.id
            );
            return Err(HandlerError::InvalidArgument("bad member list".to_owned()));
        }
        deps.engine
            .degrade_acceptor_to_learner(member_list.clone(), timeout)
            .await
            .map_err(|e| {
                warn!(
                    "degrade_acceptor_to_learner failed, id: {}, \
                     member_list: {member_list:?}, error: {e}",
                    deps.id
                );
                e
            })?;
        info!(
            "degrade_acceptor_to_learner success, id: {}, member_list: {member_list:?}",
            deps.id
        );
        Ok(())
    }

    /// Upgrade the given learners to acceptors, engine-direct.
    ///
    /// Invoked only on a replica that already believes itself leader; no
    /// leader routing happens here.
    #[inline]
    pub async fn upgrade_learner_to_acceptor(
        &self,
        learner_list: MemberList,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let deps_guard = self.deps.lock().await;
        let deps = deps_guard.as_ref().ok_or(HandlerError::NotInit)?;
        self.check_running()?;
        if !learner_list.is_valid() || timeout.is_zero() {
            warn!(
                "invalid argument, id: {}, learner_list: {learner_list:?}",
                deps.id
            );
            return Err(HandlerError::InvalidArgument("bad learner list".to_owned()));
        }
        deps.engine
            .upgrade_learner_to_acceptor(learner_list.clone(), timeout)
            .await
            .map_err(|e| {
                warn!(
                    "upgrade_learner_to_acceptor failed, id: {}, \
                     learner_list: {learner_list:?}, error: {e}",
                    deps.id
                );
                e
            })?;
        info!(
            "upgrade_learner_to_acceptor success, id: {}, learner_list: {learner_list:?}",
            deps.id
        );
        Ok(())
    }

    /// Drive one reconfiguration command to its verdict.
    ///
    /// Runs under the deps lock for its whole duration. Every iteration
    /// re-checks the lifecycle, so a teardown requested mid-flight makes
    /// the loop exit instead of wedging the destroy behind the deadline.
    async fn submit_config_change_cmd(
        &self,
        deps: &ConfigDeps<E>,
        req: ConfigChangeCmd,
    ) -> Result<(), HandlerError> {
        if !req.is_valid() {
            warn!("invalid config change cmd, id: {}, req: {req:?}", deps.id);
            return Err(HandlerError::InvalidArgument(
                "config change cmd is incomplete".to_owned(),
            ));
        }
        let conn_timeout = req.timeout.min(self.config.min_connect_timeout);
        let retry_interval = self.config.config_change_retry_interval;
        let start = Instant::now();
        let deadline = start + req.timeout;
        let mut renew_gate = TimeGate::new();
        let mut blacklist_warn_gate = TimeGate::new();
        let mut has_added_to_blacklist = false;
        let mut has_removed_from_blacklist = false;
        info!("config change start, id: {}, req: {req:?}", deps.id);
        loop {
            if Instant::now() >= deadline {
                warn!("config change timed out, id: {}, req: {req:?}", deps.id);
                return Err(HandlerError::Timeout);
            }
            // a member about to join must be electable again; stale
            // blacklist entries from an earlier removal would stall it
            if req.is_add_member_list() && !has_removed_from_blacklist {
                let added = req.added_member.as_ref().unwrap_or_else(|| {
                    unreachable!("an add command always carries the added member")
                });
                if let Err(e) = deps
                    .election
                    .remove_from_blacklist(req.stream_id, added.address().to_owned())
                    .await
                {
                    warn!(
                        "remove_from_election_blacklist failed, id: {}, \
                         member: {added}, error: {e}",
                        deps.id
                    );
                    sleep(retry_interval).await;
                    continue;
                }
                has_removed_from_blacklist = true;
            }
            self.check_running()?;
            let mut need_renew = false;
            let leader = match deps.locator.get_leader(deps.id).await {
                Ok(leader) => Some(leader),
                Err(e) => {
                    debug!("get_leader failed, id: {}, error: {e}", deps.id);
                    need_renew = true;
                    None
                }
            };
            let verdict = match leader.as_deref() {
                None => None,
                Some(leader_addr) if leader_addr == deps.self_addr => Some(
                    ConfigChangeCmdHandler::new(deps.engine.as_ref())
                        .handle(&req)
                        .await,
                ),
                Some(leader_addr) => {
                    let process_timeout = deadline.saturating_duration_since(Instant::now());
                    match deps
                        .rpc
                        .send_config_change_cmd(
                            leader_addr.to_owned(),
                            req.clone(),
                            conn_timeout,
                            process_timeout,
                        )
                        .await
                    {
                        Ok(resp) => Some(resp.ret),
                        Err(e) => {
                            warn!(
                                "send_config_change_cmd failed, id: {}, \
                                 leader: {leader_addr}, error: {e}",
                                deps.id
                            );
                            if matches!(e, HandlerError::Connect(_)) {
                                need_renew = true;
                            }
                            None
                        }
                    }
                }
            };
            match verdict {
                Some(Ok(())) => {
                    info!(
                        "config change finish, id: {}, req: {req:?}, cost: {:?}",
                        deps.id,
                        start.elapsed()
                    );
                    return Ok(());
                }
                Some(Err(HandlerError::RetryLater)) => sleep(retry_interval).await,
                Some(Err(HandlerError::NotMaster)) => need_renew = true,
                Some(Err(HandlerError::RemovingLeaderDenied))
                    if req.is_remove_member_list()
                        && req.removed_member.as_ref().map(Member::address)
                            == leader.as_deref() =>
                {
                    // the leader cannot remove itself; force leadership to
                    // move and retry once someone else leads
                    if !has_added_to_blacklist {
                        let leader_addr = leader.clone().unwrap_or_else(|| {
                            unreachable!("a verdict implies a located leader")
                        });
                        match deps
                            .election
                            .add_to_blacklist(deps.id, leader_addr.clone())
                            .await
                        {
                            Ok(()) => {
                                has_added_to_blacklist = true;
                                need_renew = true;
                            }
                            Err(e) => {
                                if blacklist_warn_gate.try_pass(self.config.warn_log_interval) {
                                    warn!(
                                        "add_to_election_blacklist failed, id: {}, \
                                         leader: {leader_addr}, error: {e}",
                                        deps.id
                                    );
                                }
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(
                        "config change cmd failed, id: {}, req: {req:?}, error: {e}",
                        deps.id
                    );
                    return Err(e);
                }
                None => sleep(retry_interval).await,
            }
            if need_renew && renew_gate.try_pass(self.config.renew_leader_interval) {
                deps.locator.nonblock_renew_leader(deps.id);
                info!("renew leader location, id: {}", deps.id);
            }
        }
    }
}
