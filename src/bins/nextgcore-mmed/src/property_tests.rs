//! Property-Based Tests for the MME S11 path
//!
//! Every request yields one committed transaction, teardown walks the
//! sessions of a UE only once, and removing a UE leaves no transaction that
//! could fire against it.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::collections::HashSet;

    use crate::gtp_path::{
        DeleteIndirectAction, GtpDeleteAction, GtpPathResult, GtpReleaseAction,
    };
    use crate::s11_build::BearerResourceParams;
    use crate::test_util::Fixture;
    use ogs_gtp::XactId;

    fn send(f: &mut Fixture, kind: u8) -> GtpPathResult<XactId> {
        match kind {
            0 => f.path.send_create_session_request(f.sess),
            1 => f.path.send_modify_bearer_request(f.bearer, false),
            2 => f
                .path
                .send_delete_session_request(f.sess, GtpDeleteAction::SendDetachAccept),
            3 => f.path.send_release_access_bearers_request(
                f.mme_ue,
                GtpReleaseAction::SendUeContextReleaseCommand,
            ),
            4 => f
                .path
                .send_create_indirect_data_forwarding_tunnel_request(f.mme_ue),
            5 => f.path.send_delete_indirect_data_forwarding_tunnel_request(
                f.mme_ue,
                DeleteIndirectAction::HandoverComplete,
            ),
            _ => f
                .path
                .send_bearer_resource_command(f.bearer, BearerResourceParams::default()),
        }
    }

    fn arb_delete_action() -> impl Strategy<Value = GtpDeleteAction> {
        prop_oneof![
            Just(GtpDeleteAction::SendAuthenticationRequest),
            Just(GtpDeleteAction::SendDetachAccept),
            Just(GtpDeleteAction::SendDeactivateBearerContextRequest),
            Just(GtpDeleteAction::SendReleaseWithUeContextRemove),
            Just(GtpDeleteAction::SendReleaseWithS1RemoveAndUnlink),
            Just(GtpDeleteAction::HandlePdnConnectivityRequest),
            Just(GtpDeleteAction::InPathSwitchRequest),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_one_transaction_per_request(kinds in proptest::collection::vec(0u8..7, 1..32)) {
            let mut f = Fixture::new();
            let mut xacts = Vec::new();
            for kind in &kinds {
                xacts.push(send(&mut f, *kind).unwrap());
            }

            prop_assert_eq!(f.path.xacts().len(), kinds.len());
            let headers = f.sent();
            prop_assert_eq!(headers.len(), kinds.len());

            let mut xids = HashSet::new();
            for (xact, header) in xacts.iter().zip(headers.iter()) {
                let x = f.path.xacts().find(*xact).unwrap();
                prop_assert_eq!(x.message_type(), header.message_type);
                prop_assert_eq!(x.xid(), header.sequence_number);
                prop_assert!(xids.insert(x.xid()));
            }
        }

        #[test]
        fn prop_delete_all_sessions_walks_once(
            paths in proptest::collection::vec(any::<bool>(), 0..6),
            calls in 1usize..4,
            action in arb_delete_action(),
        ) {
            let mut f = Fixture::new();
            let added: Vec<_> = paths
                .iter()
                .enumerate()
                .map(|(i, with_path)| f.add_sess(&format!("apn{}", i), *with_path))
                .collect();

            let mut sent = 0;
            for _ in 0..calls {
                sent += f.path.send_delete_all_sessions(f.mme_ue, action).len();
            }

            let with_path = 1 + paths.iter().filter(|p| **p).count();
            prop_assert_eq!(sent, with_path);
            prop_assert_eq!(f.sent().len(), with_path);
            prop_assert_eq!(f.path.ctx().mme_ue_find(f.mme_ue).unwrap().sess_list.len(), with_path);
            for (sess, with_path) in added.iter().zip(paths.iter()) {
                prop_assert_eq!(f.path.ctx().sess_find(*sess).is_some(), *with_path);
            }
            prop_assert!(f.path.ctx().mme_ue_find(f.mme_ue).unwrap().session_context_will_deleted);
        }

        #[test]
        fn prop_removed_ue_leaves_no_transaction(kinds in proptest::collection::vec(0u8..7, 0..16)) {
            let mut f = Fixture::new();
            for kind in &kinds {
                send(&mut f, *kind).unwrap();
            }

            let removed = f.path.mme_ue_remove(f.mme_ue);
            prop_assert_eq!(removed.mme_ues, vec![f.mme_ue]);
            prop_assert!(f.path.xacts().is_empty());
            prop_assert_eq!(f.expire_all(), 0);
            prop_assert!(f.handler.calls().is_empty());
        }
    }
}
