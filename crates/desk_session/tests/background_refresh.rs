use std::sync::Arc;
use std::time::Duration;

use desk_crypto::FixedProbe;
use desk_session::{
    AuthSessionController, ControllerOptions, DemoAuthClient, SessionState, DEMO_PASSWORD,
};
use desk_store::{Clock, ManualClock, MemoryKv, SessionRepository};

const NOW: i64 = 1_750_000_000_000;
const HOUR_MS: i64 = 60 * 60 * 1000;
const CHECK: Duration = Duration::from_secs(60);

fn setup() -> (AuthSessionController, Arc<ManualClock>, Arc<DemoAuthClient>) {
    let kv = Arc::new(MemoryKv::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let repo = SessionRepository::new(kv, Arc::new(FixedProbe::default()), clock.clone());
    let client = Arc::new(DemoAuthClient::new(clock.clone()));
    let ctl = AuthSessionController::new(
        repo,
        client.clone(),
        ControllerOptions::new(Duration::from_secs(3600), CHECK),
    );
    (ctl, clock, client)
}

/// Let one check period (plus slack) elapse on the paused runtime clock.
async fn one_period() {
    tokio::time::sleep(CHECK + Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn fresh_token_is_not_refreshed() {
    let (ctl, _clock, client) = setup();
    ctl.login("demo@x.com", DEMO_PASSWORD).await.unwrap();

    one_period().await;
    one_period().await;

    assert_eq!(client.refresh_calls(), 0);
    assert!(ctl.refresh_timer_active());
}

#[tokio::test(start_paused = true)]
async fn token_inside_window_is_refreshed_on_tick() {
    let (ctl, clock, client) = setup();
    ctl.login("demo@x.com", DEMO_PASSWORD).await.unwrap();
    let first = ctl.repository().get_token().unwrap();

    clock.set(first.expires_at - 4 * 60 * 1000);
    one_period().await;

    assert_eq!(client.refresh_calls(), 1);
    let renewed = ctl.repository().get_token().unwrap();
    assert_eq!(renewed.expires_at, clock.now_millis() + HOUR_MS);
    assert!(!ctl.repository().needs_refresh());
    assert_eq!(ctl.snapshot().token(), Some(&renewed));
    assert!(ctl.refresh_timer_active());
}

#[tokio::test(start_paused = true)]
async fn failed_background_refresh_logs_out_and_stops() {
    let (ctl, clock, client) = setup();
    ctl.login("agent@x.com", DEMO_PASSWORD).await.unwrap();
    client.set_offline(true);
    clock.advance(HOUR_MS - 60_000);

    one_period().await;

    assert_eq!(client.refresh_calls(), 1);
    assert_eq!(ctl.snapshot(), SessionState::Unauthenticated);
    assert!(!ctl.repository().has_token());
    assert!(!ctl.refresh_timer_active());

    one_period().await;
    assert_eq!(client.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn logout_cancels_timer() {
    let (ctl, clock, client) = setup();
    ctl.login("demo@x.com", DEMO_PASSWORD).await.unwrap();
    assert!(ctl.refresh_timer_active());

    ctl.logout();
    assert!(!ctl.refresh_timer_active());

    clock.advance(HOUR_MS);
    one_period().await;
    assert_eq!(client.refresh_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn timer_stops_when_token_disappears() {
    let (ctl, _clock, client) = setup();
    ctl.login("demo@x.com", DEMO_PASSWORD).await.unwrap();

    assert!(ctl.repository().clear_all());
    one_period().await;

    assert!(!ctl.refresh_timer_active());
    assert_eq!(client.refresh_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_controller_stops_checking() {
    let (ctl, clock, client) = setup();
    ctl.login("demo@x.com", DEMO_PASSWORD).await.unwrap();
    drop(ctl);

    clock.advance(HOUR_MS);
    one_period().await;
    one_period().await;
    assert_eq!(client.refresh_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_timer_without_logging_out() {
    let (ctl, clock, client) = setup();
    ctl.login("demo@x.com", DEMO_PASSWORD).await.unwrap();
    ctl.shutdown();

    clock.advance(HOUR_MS - 60_000);
    one_period().await;

    assert_eq!(client.refresh_calls(), 0);
    assert!(ctl.snapshot().is_authenticated());
}
