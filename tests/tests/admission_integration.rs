//! Admission dry-run path: overlay stores, the validator, and the webhook
//! request mapping, plus the staged startup event flow.

use std::collections::BTreeMap;
use std::sync::Arc;

use haptic_integration_tests::{load_config, service, store_of};
use haptic_core::{Event, EventBus, OverlayOp, StoreRead};
use haptic_operator::config_source::ConfigSource;
use haptic_operator::tracker::IndexSynchronizationTracker;
use haptic_operator::webhook::{
    review_request, AdmissionRequest, GroupVersionResource, WebhookState,
};
use haptic_operator::resources::ResourceStores;
use haptic_validation::{DryRunValidator, HaproxyCheck, ProposedChange};

const GUARDED_CONFIG: &str = r#"
watchedResources:
  services:
    apiVersion: v1
    resourceType: services
    indexBy: ["metadata.namespace", "metadata.name"]
templates:
  haproxyCfg: |
    {%- if resources.services.list() | length == 0 %}
    {{ fail("no services left to route") }}
    {%- endif %}
    global
    {%- for svc in resources.services.list() %}
    backend {{ svc.metadata.namespace }}-{{ svc.metadata.name }}
    {%- endfor %}
"#;

fn validator() -> DryRunValidator {
    // "true" accepts anything, keeping these tests about rendering
    DryRunValidator::new(Arc::new(load_config(GUARDED_CONFIG)), HaproxyCheck::new("true"))
}

fn live_stores() -> BTreeMap<String, Arc<haptic_core::Store>> {
    BTreeMap::from([(
        "services".to_string(),
        store_of(&[service("default", "web", "10.0.0.1")]),
    )])
}

#[tokio::test]
async fn test_deleting_last_service_is_rejected() {
    let stores = live_stores();
    let change = ProposedChange {
        resource_type: "services".to_string(),
        namespace: "default".to_string(),
        name: "web".to_string(),
        op: OverlayOp::Delete,
        object: None,
    };
    let admission = validator().validate_change(&stores, &change).await.unwrap();
    assert!(!admission.allowed);
    assert!(admission.reason.unwrap().contains("no services left to route"));
    // dry-run must not have touched the base
    assert_eq!(stores["services"].len(), 1);
}

#[tokio::test]
async fn test_deleting_one_of_two_is_admitted() {
    let stores = BTreeMap::from([(
        "services".to_string(),
        store_of(&[
            service("default", "web", "10.0.0.1"),
            service("default", "api", "10.0.0.2"),
        ]),
    )]);
    let change = ProposedChange {
        resource_type: "services".to_string(),
        namespace: "default".to_string(),
        name: "web".to_string(),
        op: OverlayOp::Delete,
        object: None,
    };
    let admission = validator().validate_change(&stores, &change).await.unwrap();
    assert!(admission.allowed, "{:?}", admission.reason);
}

#[tokio::test]
async fn test_webhook_maps_admission_review() {
    let config = Arc::new(load_config(GUARDED_CONFIG));
    let state = WebhookState {
        validator: DryRunValidator::new(Arc::clone(&config), HaproxyCheck::new("true")),
        stores: Arc::new(ResourceStores::for_config(&config)),
    };

    // an empty cluster plus one incoming service renders fine
    let response = review_request(
        &state,
        &AdmissionRequest {
            uid: "uid-42".to_string(),
            operation: "CREATE".to_string(),
            name: "web".to_string(),
            namespace: "default".to_string(),
            resource: Some(GroupVersionResource {
                group: String::new(),
                version: "v1".to_string(),
                resource: "services".to_string(),
            }),
            object: Some(service("default", "web", "10.0.0.1")),
            old_object: None,
        },
    )
    .await;
    assert!(response.allowed, "{:?}", response.status);
    assert_eq!(response.uid, "uid-42");
}

#[tokio::test]
async fn test_staged_startup_event_flow() {
    let bus = Arc::new(EventBus::new());

    // stage subscribers attach before the bus goes live; buffered events
    // must replay to them on start
    let mut stage_rx = bus.subscribe(64);
    let (source, slot) = ConfigSource::new(Arc::clone(&bus));
    assert!(source.apply_document(GUARDED_CONFIG));
    bus.start();

    assert_eq!(stage_rx.recv().await, Some(Event::ConfigLoaded));
    assert_eq!(stage_rx.recv().await, Some(Event::ConfigValidated));
    assert!(slot.borrow().is_some());

    // stage three/four: per-type sync completions fold into one event
    let tracker_rx = bus.subscribe(64);
    let tracker = IndexSynchronizationTracker::new(["services", "endpoints"]);
    let tracker_task = tokio::spawn(tracker.run(tracker_rx, Arc::clone(&bus)));

    bus.publish(Event::ResourceSyncComplete {
        resource_type: "services".to_string(),
    });
    bus.publish(Event::ResourceSyncComplete {
        resource_type: "services".to_string(), // duplicate, ignored
    });
    bus.publish(Event::ResourceSyncComplete {
        resource_type: "endpoints".to_string(),
    });

    tracker_task.await.unwrap();
    loop {
        match stage_rx.recv().await {
            Some(Event::IndexSynchronized) => break,
            Some(_) => continue,
            None => panic!("bus closed before IndexSynchronized"),
        }
    }
}
