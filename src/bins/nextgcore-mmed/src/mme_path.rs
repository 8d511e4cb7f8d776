//! Device-context lifecycle requests raised by the S11 path
//!
//! The S11 path never tears down the S1 leg itself. When a transaction gives
//! up it asks the lifecycle owner to release the access leg or to continue
//! with deletion.

use crate::context::{EnbUeId, MmeContext, MmeUeId, S1apCause, UeCtxRelAction};

/// Lifecycle owner of MME UEs
pub trait MmePathHandler {
    /// Send S1AP UE Context Release Command for an S1 association.
    fn send_ue_context_release_command(
        &mut self,
        ctx: &MmeContext,
        enb_ue: EnbUeId,
        cause: S1apCause,
        action: UeCtxRelAction,
    );

    /// Delete remaining sessions of a UE, or release it when none are left.
    fn send_delete_session_or_mme_ue_context_release(&mut self, ctx: &MmeContext, mme_ue: MmeUeId);
}

/// Handler that only records the requests in the log
#[derive(Debug, Default)]
pub struct LogPathHandler;

impl MmePathHandler for LogPathHandler {
    fn send_ue_context_release_command(
        &mut self,
        ctx: &MmeContext,
        enb_ue: EnbUeId,
        cause: S1apCause,
        action: UeCtxRelAction,
    ) {
        match ctx.enb_ue_find(enb_ue) {
            Some(e) => log::info!(
                "UEContextReleaseCommand ENB_UE_S1AP_ID[{}] MME_UE_S1AP_ID[{}] cause[{:?}:{}] action[{:?}]",
                e.enb_ue_s1ap_id,
                e.mme_ue_s1ap_id,
                cause.group,
                cause.cause,
                action
            ),
            None => log::warn!("UEContextReleaseCommand for released S1 context [{}]", enb_ue),
        }
    }

    fn send_delete_session_or_mme_ue_context_release(&mut self, ctx: &MmeContext, mme_ue: MmeUeId) {
        match ctx.mme_ue_find(mme_ue) {
            Some(ue) if ue.sess_list.is_empty() => {
                log::info!("[{}] MME UE Context Release", ue.imsi_bcd)
            }
            Some(ue) => log::info!(
                "[{}] Delete Session for {} session(s)",
                ue.imsi_bcd,
                ue.sess_list.len()
            ),
            None => log::warn!("MME UE [{}] already removed", mme_ue),
        }
    }
}
