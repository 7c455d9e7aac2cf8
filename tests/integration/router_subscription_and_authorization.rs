//! Integration coverage for subscription matching and multi-tenant
//! authorization end to end through the Router: a client only receives
//! events its scopes and filters both admit (spec §3, §4.4.1-2, invariants
//! I3/I5).

use std::time::Duration;

use gateway_core::config::ThrottleConfig;
use gateway_core::request::PollResult;
use gateway_core::router::client::{Scope, ScopeResource};
use gateway_core::stream_key::StreamKey;
use gateway_core::Router;
use gateway_protocol::{Capability, ServerMessage, StreamKind, SubscriptionFilter};

fn feeding_key(farm: &str, site: &str) -> StreamKey {
    StreamKey::new("tenant-a", StreamKind::Feeding, farm, site, None).unwrap()
}

fn other_tenant_key() -> StreamKey {
    StreamKey::new("tenant-b", StreamKind::Feeding, "farm-1", "site-1", None).unwrap()
}

fn result_for(key: &StreamKey) -> PollResult {
    PollResult::success(key.clone(), "cloud".to_owned(), 5, b"{}".to_vec())
}

async fn recv_or_none(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ServerMessage>) -> Option<ServerMessage> {
    tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.unwrap_or(None)
}

#[tokio::test]
async fn a_farm_scoped_client_only_sees_its_own_farm() {
    let router = Router::new();
    let scope = Scope {
        tenant_id: "tenant-a".to_owned(),
        resource: ScopeResource::Farm("farm-1".to_owned()),
        permissions: [Capability::FeedingRead].into_iter().collect(),
        farm_ids: None,
        site_ids: None,
        cage_ids: None,
    };
    let (mut rx, _cancel) = router.register_client("c1", "tenant-a", vec![scope], ThrottleConfig::default()).await;
    router.subscribe("c1", SubscriptionFilter::default(), false).await.unwrap();

    router.route_data(&feeding_key("farm-2", "site-1"), &result_for(&feeding_key("farm-2", "site-1"))).await;
    assert!(recv_or_none(&mut rx).await.is_none(), "out-of-scope farm must not be delivered");

    router.route_data(&feeding_key("farm-1", "site-9"), &result_for(&feeding_key("farm-1", "site-9"))).await;
    let got = recv_or_none(&mut rx).await;
    assert!(matches!(got, Some(ServerMessage::Data { .. })));
}

#[tokio::test]
async fn cross_tenant_events_never_reach_a_client_even_with_a_matching_capability() {
    let router = Router::new();
    let scope = Scope {
        tenant_id: "tenant-a".to_owned(),
        resource: ScopeResource::Any,
        permissions: [Capability::FeedingRead].into_iter().collect(),
        farm_ids: None,
        site_ids: None,
        cage_ids: None,
    };
    let (mut rx, _cancel) = router.register_client("c1", "tenant-a", vec![scope], ThrottleConfig::default()).await;
    router.subscribe("c1", SubscriptionFilter::default(), false).await.unwrap();

    router.route_data(&other_tenant_key(), &result_for(&other_tenant_key())).await;
    assert!(recv_or_none(&mut rx).await.is_none(), "tenant isolation must hold regardless of capability");
}

#[tokio::test]
async fn subscription_filter_on_site_id_excludes_other_sites_within_scope() {
    let router = Router::new();
    let scope = Scope {
        tenant_id: "tenant-a".to_owned(),
        resource: ScopeResource::Any,
        permissions: [Capability::FeedingRead].into_iter().collect(),
        farm_ids: None,
        site_ids: None,
        cage_ids: None,
    };
    let (mut rx, _cancel) = router.register_client("c1", "tenant-a", vec![scope], ThrottleConfig::default()).await;
    router
        .subscribe(
            "c1",
            SubscriptionFilter {
                site_id: Some("site-1".to_owned()),
                ..Default::default()
            },
            false,
        )
        .await
        .unwrap();

    router.route_data(&feeding_key("farm-1", "site-2"), &result_for(&feeding_key("farm-1", "site-2"))).await;
    assert!(recv_or_none(&mut rx).await.is_none());

    router.route_data(&feeding_key("farm-1", "site-1"), &result_for(&feeding_key("farm-1", "site-1"))).await;
    assert!(recv_or_none(&mut rx).await.is_some());
}

#[tokio::test]
async fn unsubscribing_stops_further_delivery_to_that_subscription() {
    let router = Router::new();
    let scope = Scope {
        tenant_id: "tenant-a".to_owned(),
        resource: ScopeResource::Any,
        permissions: [Capability::FeedingRead].into_iter().collect(),
        farm_ids: None,
        site_ids: None,
        cage_ids: None,
    };
    let (mut rx, _cancel) = router.register_client("c1", "tenant-a", vec![scope], ThrottleConfig::default()).await;
    let sub_id = router.subscribe("c1", SubscriptionFilter::default(), false).await.unwrap();

    router.route_data(&feeding_key("farm-1", "site-1"), &result_for(&feeding_key("farm-1", "site-1"))).await;
    assert!(recv_or_none(&mut rx).await.is_some());

    router.unsubscribe("c1", &sub_id).await.unwrap();
    router.route_data(&feeding_key("farm-1", "site-1"), &result_for(&feeding_key("farm-1", "site-1"))).await;
    assert!(recv_or_none(&mut rx).await.is_none());
}

#[tokio::test]
async fn missing_capability_denies_delivery_even_within_the_correct_scope() {
    let router = Router::new();
    let scope = Scope {
        tenant_id: "tenant-a".to_owned(),
        resource: ScopeResource::Any,
        permissions: [Capability::ClimateRead].into_iter().collect(),
        farm_ids: None,
        site_ids: None,
        cage_ids: None,
    };
    let (mut rx, _cancel) = router.register_client("c1", "tenant-a", vec![scope], ThrottleConfig::default()).await;
    router.subscribe("c1", SubscriptionFilter::default(), false).await.unwrap();

    router.route_data(&feeding_key("farm-1", "site-1"), &result_for(&feeding_key("farm-1", "site-1"))).await;
    assert!(recv_or_none(&mut rx).await.is_none());
}
