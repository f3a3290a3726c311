//! Interactive-resolution behavior through the public facade: single
//! flight per request code, armed-before-launch delivery, and cross-code
//! isolation.

use std::sync::Arc;
use std::time::Duration;

use smartlock::fake::{
    FakeHostBuilder, FakeHostController, FakeProviderBuilder, FakeProviderController,
    LaunchBehavior, canned_credential,
};
use smartlock::{
    Credential, ProviderResponse, RequestCode, ResolutionHandle, ResultBus, ResultCode,
    ResultEvent, SmartLockBroker, SmartLockError,
};

struct Rig {
    broker: Arc<SmartLockBroker>,
    provider_ctl: FakeProviderController,
    host_ctl: FakeHostController,
    bus: ResultBus,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("smartlock=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn rig(stalled_host: bool) -> Rig {
    init_tracing();
    let bus = ResultBus::default();
    let (provider, provider_ctl) = FakeProviderBuilder::new().build();
    let host_builder = FakeHostBuilder::new(bus.publisher());
    let host_builder = if stalled_host {
        host_builder.stalled()
    } else {
        host_builder
    };
    let (host, host_ctl) = host_builder.build();
    let broker = SmartLockBroker::builder(provider, host)
        .with_result_bus(bus.clone())
        .build();
    Rig {
        broker: Arc::new(broker),
        provider_ctl,
        host_ctl,
        bus,
    }
}

fn needs_save_resolution() -> ProviderResponse<()> {
    ProviderResponse::NeedsResolution {
        code: RequestCode::SaveCredential,
        handle: ResolutionHandle::default(),
    }
}

fn needs_retrieve_resolution() -> ProviderResponse<Credential> {
    ProviderResponse::NeedsResolution {
        code: RequestCode::RetrieveCredential,
        handle: ResolutionHandle::default(),
    }
}

fn needs_hint_resolution() -> ProviderResponse<Credential> {
    ProviderResponse::NeedsResolution {
        code: RequestCode::PickHint,
        handle: ResolutionHandle::default(),
    }
}

#[tokio::test]
async fn retrieve_resolution_returns_picked_credential() {
    let rig = rig(false);
    rig.provider_ctl.push_retrieve(needs_retrieve_resolution());

    // The confirming host publishes from inside launch; the subscription
    // armed before launch must still observe it.
    let credential = rig.broker.retrieve_credentials().await.unwrap();
    assert_eq!(credential.id, canned_credential().id);
    assert_eq!(
        rig.host_ctl.launches(),
        vec![RequestCode::RetrieveCredential]
    );
}

#[tokio::test]
async fn second_store_for_busy_code_fails_fast() {
    // Scenario: a store needing resolution is in flight; a second store
    // arrives before the first resolves.
    let rig = rig(true);
    rig.provider_ctl.push_save(needs_save_resolution());
    rig.provider_ctl.push_save(needs_save_resolution());

    let first = tokio::spawn({
        let broker = Arc::clone(&rig.broker);
        async move { broker.store_credentials(canned_credential()).await }
    });
    while rig.host_ctl.launches().is_empty() {
        tokio::task::yield_now().await;
    }

    let second = tokio::time::timeout(
        Duration::from_secs(1),
        rig.broker.store_credentials(canned_credential()),
    )
    .await
    .expect("gate-busy rejection must not hang");
    assert_eq!(
        second.unwrap_err(),
        SmartLockError::GateBusy(RequestCode::SaveCredential)
    );

    // Only the first store launched a confirmation flow.
    assert_eq!(rig.host_ctl.launches().len(), 1);

    rig.bus
        .publisher()
        .publish(ResultEvent::ok(RequestCode::SaveCredential, None));
    first.await.unwrap().unwrap();

    // The gate is reusable after the first resolution settled.
    rig.provider_ctl.push_save(needs_save_resolution());
    rig.host_ctl
        .push_behavior(LaunchBehavior::Publish(ResultCode::Ok, None));
    rig.broker
        .store_credentials(canned_credential())
        .await
        .unwrap();
    assert_eq!(rig.broker.coordinator().ref_count().await, 0);
}

#[tokio::test]
async fn declined_resolution_fails_only_that_operation() {
    let rig = rig(false);
    rig.provider_ctl.push_save(needs_save_resolution());
    rig.host_ctl
        .push_behavior(LaunchBehavior::Publish(ResultCode::Canceled, None));

    let err = rig
        .broker
        .store_credentials(canned_credential())
        .await
        .unwrap_err();
    assert!(matches!(err, SmartLockError::ResolutionDeclined(_)));

    // The shared session is unaffected; the next operation succeeds.
    rig.broker.retrieve_credentials().await.unwrap();
}

#[tokio::test]
async fn unavailable_host_maps_to_declined() {
    let bus = ResultBus::default();
    let (provider, provider_ctl) = FakeProviderBuilder::new().build();
    let (host, host_ctl) = FakeHostBuilder::new(bus.publisher())
        .failing("picker could not be shown")
        .build();
    let broker = SmartLockBroker::builder(provider, host)
        .with_result_bus(bus)
        .build();
    provider_ctl.push_hint(needs_hint_resolution());

    let err = broker.retrieve_sign_in_hints().await.unwrap_err();
    assert!(matches!(err, SmartLockError::ResolutionDeclined(_)));
    assert_eq!(host_ctl.launches(), vec![RequestCode::PickHint]);
}

#[tokio::test]
async fn results_never_cross_request_codes() {
    let rig = rig(true);
    rig.provider_ctl.push_save(needs_save_resolution());
    rig.provider_ctl.push_hint(needs_hint_resolution());

    let store = tokio::spawn({
        let broker = Arc::clone(&rig.broker);
        async move { broker.store_credentials(canned_credential()).await }
    });
    let hint = tokio::spawn({
        let broker = Arc::clone(&rig.broker);
        async move { broker.retrieve_sign_in_hints().await }
    });

    while rig.host_ctl.launches().len() < 2 {
        tokio::task::yield_now().await;
    }

    // A hint result settles only the hint operation.
    rig.bus.publisher().publish(ResultEvent::ok(
        RequestCode::PickHint,
        Some(Credential::new("grace@example.com").with_name("Grace Hopper")),
    ));
    let hint = hint.await.unwrap().unwrap();
    assert_eq!(hint.email, "grace@example.com");
    assert_eq!(hint.first_name, "Grace");
    assert_eq!(hint.last_name, "Hopper");
    assert!(!store.is_finished());

    rig.bus
        .publisher()
        .publish(ResultEvent::ok(RequestCode::SaveCredential, None));
    store.await.unwrap().unwrap();
    assert_eq!(rig.broker.coordinator().ref_count().await, 0);
}

#[tokio::test]
async fn hint_resolution_without_payload_is_declined() {
    let rig = rig(false);
    rig.provider_ctl.push_hint(needs_hint_resolution());
    rig.host_ctl
        .push_behavior(LaunchBehavior::Publish(ResultCode::Ok, None));

    let err = rig.broker.retrieve_sign_in_hints().await.unwrap_err();
    assert!(matches!(err, SmartLockError::ResolutionDeclined(_)));
}

#[tokio::test]
async fn disable_auto_sign_in_needs_no_resolution() {
    let rig = rig(true);
    rig.broker.disable_auto_sign_in().await.unwrap();
    assert!(rig.host_ctl.launches().is_empty());
}
