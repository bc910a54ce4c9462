//! Registry conformance suite against both registry implementations.
//!
//! Each test runs one conformance check so failures point at a single
//! contract clause. The `run_all` tests make sure no check is left out.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::sync::Arc;

use certledger_core::{
    conformance,
    testutil::{seeded_memory_registry, seeded_sqlite_registry},
};

macro_rules! conformance_tests {
    ($module:ident, $make:path) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn find_by_number_missing_returns_none() {
                conformance::find_by_number_missing_returns_none(&$make().await).await;
            }

            #[tokio::test]
            async fn create_then_find_by_number() {
                conformance::create_then_find_by_number(&$make().await).await;
            }

            #[tokio::test]
            async fn create_duplicate_number_is_rejected() {
                conformance::create_duplicate_number_is_rejected(&$make().await).await;
            }

            #[tokio::test]
            async fn attach_anchor_data_anchors() {
                conformance::attach_anchor_data_anchors(&$make().await).await;
            }

            #[tokio::test]
            async fn attach_anchor_data_is_idempotent() {
                conformance::attach_anchor_data_is_idempotent(&$make().await).await;
            }

            #[tokio::test]
            async fn attach_anchor_data_unknown_id() {
                conformance::attach_anchor_data_unknown_id(&$make().await).await;
            }

            #[tokio::test]
            async fn attach_to_revoked_stays_revoked() {
                conformance::attach_to_revoked_stays_revoked(&$make().await).await;
            }

            #[tokio::test]
            async fn revoke_sets_fields() {
                conformance::revoke_sets_fields(&$make().await).await;
            }

            #[tokio::test]
            async fn revoke_twice_is_invalid_state() {
                conformance::revoke_twice_is_invalid_state(&$make().await).await;
            }

            #[tokio::test]
            async fn revoke_unknown_id() {
                conformance::revoke_unknown_id(&$make().await).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_revoke_single_winner() {
                conformance::concurrent_revoke_single_winner(Arc::new($make().await)).await;
            }

            #[tokio::test]
            async fn list_orders_newest_first() {
                conformance::list_orders_newest_first(&$make().await).await;
            }

            #[tokio::test]
            async fn list_applies_filters() {
                conformance::list_applies_filters(&$make().await).await;
            }

            #[tokio::test]
            async fn list_pending_respects_watermark() {
                conformance::list_pending_respects_watermark(&$make().await).await;
            }

            #[tokio::test]
            async fn verification_log_is_append_only() {
                conformance::verification_log_is_append_only(&$make().await).await;
            }

            #[tokio::test]
            async fn list_types_active_sorted() {
                conformance::list_types_active_sorted(&$make().await).await;
            }

            #[tokio::test]
            async fn active_network_prefers_testnet() {
                conformance::active_network_prefers_testnet(&$make().await).await;
            }

            #[tokio::test]
            async fn find_actor_resolves_seeded() {
                conformance::find_actor_resolves_seeded(&$make().await).await;
            }

            #[tokio::test]
            async fn run_all() {
                conformance::run_all($make).await;
            }
        }
    };
}

conformance_tests!(memory, seeded_memory_registry);
conformance_tests!(sqlite, seeded_sqlite_registry);
