use tracing::{debug, warn};

use logcoord_external_api::{
    engine::LogEngine, error::HandlerError, location::LeaderLocator, rpc::GetStatReq, LogStreamId,
    Role,
};

use super::{HandlerState, LogHandler};

impl<E: LogEngine> LogHandler<E> {
    /// Whether this replica is caught up with the stream, and whether it
    /// fell behind the group's truncation floor and must be rebuilt.
    ///
    /// The leader is trivially in sync. A follower compares its own max
    /// timestamp against the leader's, polled over RPC at most once per
    /// poll interval; between polls the cached verdict is returned. A poll
    /// that fails leaves the cache untouched and reports out of sync.
    #[inline]
    pub async fn is_in_sync(&self) -> Result<(bool, bool), HandlerError> {
        let state = self.state.read().await;
        self.check_running()?;
        let engine = state.engine()?;
        let end_lsn = engine.get_end_lsn().await.map_err(|e| {
            warn!("get_end_lsn failed, id: {}, error: {e}", state.id);
            e
        })?;
        let last_rebuild_lsn = engine.get_last_rebuild_lsn().await.map_err(|e| {
            warn!("get_last_rebuild_lsn failed, id: {}, error: {e}", state.id);
            e
        })?;
        let is_need_rebuild = last_rebuild_lsn.is_some_and(|rebuild_lsn| end_lsn < rebuild_lsn);

        let mut is_log_sync = false;
        let mut local_max_ts_ns = None;
        let mut leader_max_ts_ns = None;
        let (role, _proposal_id, _is_pending) = engine.get_role().await.map_err(|e| {
            warn!("get_role failed, id: {}, error: {e}", state.id);
            e
        })?;
        if matches!(role, Role::Leader) {
            is_log_sync = true;
        } else {
            let local_max = engine.get_max_ts_ns().await.map_err(|e| {
                warn!("get_max_ts_ns failed, id: {}, error: {e}", state.id);
                e
            })?;
            local_max_ts_ns = Some(local_max);
            let reached_poll_interval = self
                .sync_state
                .lock()
                .poll_gate
                .try_pass(self.config.sync_poll_interval());
            if reached_poll_interval {
                if let Ok(leader_max) = self.fetch_leader_max_ts_ns(&state).await {
                    leader_max_ts_ns = Some(leader_max);
                    let threshold_ns = i64::try_from(
                        self.config.log_sync_threshold().as_nanos(),
                    )
                    .unwrap_or(i64::MAX);
                    is_log_sync = leader_max.saturating_sub(local_max) <= threshold_ns;
                    self.sync_state.lock().cached_is_log_sync = is_log_sync;
                }
            } else {
                is_log_sync = self.sync_state.lock().cached_is_log_sync;
            }
        }
        debug!(
            "is_in_sync, id: {}, is_log_sync: {is_log_sync}, is_need_rebuild: {is_need_rebuild}, \
             local_max_ts_ns: {local_max_ts_ns:?}, leader_max_ts_ns: {leader_max_ts_ns:?}, \
             end_lsn: {end_lsn}, last_rebuild_lsn: {last_rebuild_lsn:?}",
            state.id
        );
        Ok((is_log_sync, is_need_rebuild))
    }

    /// Max timestamp of the leader, fetched with one synchronous RPC.
    ///
    /// Locator and RPC failures schedule a rate-limited, non-blocking
    /// refresh of the cached leader location.
    async fn fetch_leader_max_ts_ns(
        &self,
        state: &HandlerState<E>,
    ) -> Result<i64, HandlerError> {
        let locator = state.locator()?;
        let id = state.id;
        let leader = match locator.get_leader(id).await {
            Ok(leader) => leader,
            Err(e) => {
                warn!("get_leader failed, id: {id}, error: {e}");
                self.try_renew_leader(locator.as_ref(), id);
                return Err(e);
            }
        };
        let req = GetStatReq {
            src: state.self_addr.clone(),
            stream_id: id,
        };
        match state
            .rpc()?
            .get_stat(leader, req, self.config.leader_stat_rpc_timeout)
            .await
        {
            Ok(resp) => Ok(resp.max_ts_ns),
            Err(e) => {
                warn!("get_stat from leader failed, id: {id}, error: {e}");
                self.try_renew_leader(locator.as_ref(), id);
                Err(e)
            }
        }
    }

    /// Schedule a non-blocking leader location refresh, at most once per
    /// renew interval
    fn try_renew_leader(&self, locator: &dyn LeaderLocator, id: LogStreamId) {
        if self
            .sync_state
            .lock()
            .renew_gate
            .try_pass(self.config.renew_leader_interval)
        {
            locator.nonblock_renew_leader(id);
        }
    }
}
