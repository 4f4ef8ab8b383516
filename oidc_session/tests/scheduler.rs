mod common;

use std::{sync::Arc, time::Duration};

use common::{opaque_session_expiring_at, secs, session_expiring_at, TokioClock, T};
use oidc_session::{
    clock::{Clock, TestClock, UnixMillis},
    provider::{
        in_memory::{Issuance, ProviderCall},
        InMemoryProvider,
    },
    scheduler::{RefreshScheduler, RestartHandle, SchedulerState, StartOutcome, StopReason, Tick},
    AccessToken, CheckMode, ProviderError, Session, SessionConfig, SessionManager,
};
use tokio::sync::mpsc;

fn manager_at(provider: &Arc<InMemoryProvider>, config: SessionConfig) -> SessionManager<TestClock> {
    SessionManager::new(provider.clone(), config).with_clock(TestClock::new(T))
}

fn ignore_stop<C>(_: StopReason, _: RestartHandle<C>) {}

type Stops<C> = mpsc::UnboundedReceiver<(StopReason, RestartHandle<C>)>;

fn reporting_scheduler<C>(manager: &SessionManager<C>) -> (RefreshScheduler<C>, Stops<C>)
where
    C: Clock + Clone + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = manager.scheduler(move |reason, restart| {
        let _ = tx.send((reason, restart));
    });
    (scheduler, rx)
}

async fn next_stop<C>(stops: &mut Stops<C>) -> color_eyre::Result<(StopReason, RestartHandle<C>)> {
    stops
        .recv()
        .await
        .ok_or_else(|| color_eyre::eyre::eyre!("scheduler dropped without stopping"))
}

#[tokio::test]
async fn session_inside_threshold_is_renewed_and_rechecked_promptly() {
    let provider = Arc::new(
        InMemoryProvider::new()
            .with_session(opaque_session_expiring_at(T + Duration::from_millis(3_000)))
            .with_issuer(|_| Ok(Some(session_expiring_at(T + secs(3_600))))),
    );
    let manager = manager_at(&provider, SessionConfig::default());
    let scheduler = manager.scheduler(ignore_stop);

    let tick = scheduler.check_once().await;

    assert_eq!(
        tick,
        Tick::Scheduled {
            next_check: T + Duration::from_millis(500),
            renewed: true,
        }
    );
    assert_eq!(
        provider.calls(),
        vec![
            ProviderCall::CachedSession,
            ProviderCall::RenewSilently,
            ProviderCall::StoreSession,
        ]
    );
    assert_eq!(provider.session(), Some(session_expiring_at(T + secs(3_600))));
    assert_eq!(
        scheduler.watch().current().as_deref(),
        Some(&session_expiring_at(T + secs(3_600)))
    );
}

#[tokio::test]
async fn expired_session_is_revoked_and_removed() {
    let provider = Arc::new(InMemoryProvider::new().with_session(session_expiring_at(T - secs(1))));
    let manager = manager_at(&provider, SessionConfig::default());
    let scheduler = manager.scheduler(ignore_stop);

    let tick = scheduler.check_once().await;

    assert_eq!(tick, Tick::Stopped(StopReason::Expired));
    assert_eq!(
        provider.calls(),
        vec![
            ProviderCall::CachedSession,
            ProviderCall::RevokeAccessToken,
            ProviderCall::RemoveSession,
        ]
    );
    assert_eq!(provider.session(), None);
    assert_eq!(scheduler.state(), SchedulerState::Stopped(StopReason::Expired));
}

#[tokio::test]
async fn provider_reported_expiry_in_the_past_is_expired() {
    let provider = Arc::new(
        InMemoryProvider::new().with_session(opaque_session_expiring_at(T - secs(1))),
    );
    let manager = manager_at(&provider, SessionConfig::default());
    let scheduler = manager.scheduler(ignore_stop);

    assert_eq!(scheduler.check_once().await, Tick::Stopped(StopReason::Expired));
    assert_eq!(provider.call_count(ProviderCall::RevokeAccessToken), 1);
}

#[tokio::test]
async fn explicitly_expired_session_is_expired() {
    let session = session_expiring_at(T + secs(3_600)).with_explicitly_expired(true);
    let provider = Arc::new(InMemoryProvider::new().with_session(session));
    let manager = manager_at(&provider, SessionConfig::default());
    let scheduler = manager.scheduler(ignore_stop);

    assert_eq!(scheduler.check_once().await, Tick::Stopped(StopReason::Expired));
    assert_eq!(provider.call_count(ProviderCall::RemoveSession), 1);
}

#[tokio::test]
async fn fresh_session_waits_until_the_threshold() {
    let session = session_expiring_at(T + secs(60));
    let provider = Arc::new(InMemoryProvider::new().with_session(session.clone()));
    let manager = manager_at(&provider, SessionConfig::default());
    let scheduler = manager.scheduler(ignore_stop);

    let tick = scheduler.check_once().await;

    assert_eq!(
        tick,
        Tick::Scheduled {
            next_check: T + secs(55),
            renewed: false,
        }
    );
    assert_eq!(provider.calls(), vec![ProviderCall::CachedSession]);
    assert_eq!(
        scheduler.state(),
        SchedulerState::Scheduled {
            next_check: T + secs(55)
        }
    );
    assert_eq!(scheduler.watch().current().as_deref(), Some(&session));
}

#[tokio::test]
async fn session_on_the_threshold_is_not_rechecked_immediately() {
    let provider = Arc::new(
        InMemoryProvider::new().with_session(opaque_session_expiring_at(T + secs(5))),
    );
    let manager = manager_at(&provider, SessionConfig::default());
    let scheduler = manager.scheduler(ignore_stop);

    assert_eq!(
        scheduler.check_once().await,
        Tick::Scheduled {
            next_check: T + Duration::from_millis(500),
            renewed: false,
        }
    );
}

#[tokio::test]
async fn unknown_expiry_is_rechecked_later() {
    let session = Session::new().with_access_token(AccessToken::from_static("opaque"));
    let provider = Arc::new(InMemoryProvider::new().with_session(session));
    let config = SessionConfig::default().with_unknown_expiry_recheck(secs(90));
    let manager = manager_at(&provider, config);
    let scheduler = manager.scheduler(ignore_stop);

    assert_eq!(
        scheduler.check_once().await,
        Tick::Scheduled {
            next_check: T + secs(90),
            renewed: false,
        }
    );
    assert_eq!(provider.calls(), vec![ProviderCall::CachedSession]);
}

#[tokio::test]
async fn full_chain_mode_renews_a_stale_cached_session() {
    let provider = Arc::new(
        InMemoryProvider::new()
            .with_session(session_expiring_at(T - secs(10)))
            .with_issuer(|_| Ok(Some(session_expiring_at(T + secs(60))))),
    );
    let config = SessionConfig::default().with_check_mode(CheckMode::FullChain);
    let manager = manager_at(&provider, config);
    let scheduler = manager.scheduler(ignore_stop);

    assert_eq!(
        scheduler.check_once().await,
        Tick::Scheduled {
            next_check: T + secs(55),
            renewed: false,
        }
    );
    assert_eq!(
        provider.calls(),
        vec![
            ProviderCall::CachedSession,
            ProviderCall::RemoveSession,
            ProviderCall::RenewSilently,
        ]
    );
}

#[tokio::test]
async fn missing_session_stops_without_touching_the_provider() -> color_eyre::Result<()> {
    let provider = Arc::new(InMemoryProvider::new());
    let manager = manager_at(&provider, SessionConfig::default());
    let (scheduler, mut stops) = reporting_scheduler(&manager);

    let _ = scheduler.start();
    let (reason, _restart) = next_stop(&mut stops).await?;

    assert_eq!(reason, StopReason::NoSession);
    assert_eq!(provider.calls(), vec![ProviderCall::CachedSession]);
    assert_eq!(scheduler.active_loop(), None);
    Ok(())
}

#[tokio::test]
async fn failed_renewal_stops_and_reports() -> color_eyre::Result<()> {
    let provider = Arc::new(
        InMemoryProvider::new()
            .with_session(session_expiring_at(T + secs(2)))
            .with_issuer(|issuance| match issuance {
                Issuance::Silent => Err(ProviderError::NoActiveSession),
                _ => Ok(None),
            }),
    );
    let manager = manager_at(&provider, SessionConfig::default());
    let (scheduler, mut stops) = reporting_scheduler(&manager);
    let mut watcher = scheduler.watch();

    let _ = scheduler.start();
    let (reason, _restart) = next_stop(&mut stops).await?;

    assert_eq!(reason, StopReason::RenewalFailed);
    assert_eq!(scheduler.state(), SchedulerState::Stopped(StopReason::RenewalFailed));
    assert_eq!(provider.call_count(ProviderCall::RenewViaPopup), 0);
    assert_eq!(provider.call_count(ProviderCall::StoreSession), 0);

    watcher.changed().await?;
    assert!(watcher.current().is_none());
    Ok(())
}

#[tokio::test]
async fn empty_renewal_stops_the_loop() {
    let provider = Arc::new(
        InMemoryProvider::new().with_session(opaque_session_expiring_at(T + secs(2))),
    );
    let manager = manager_at(&provider, SessionConfig::default());
    let scheduler = manager.scheduler(ignore_stop);

    assert_eq!(
        scheduler.check_once().await,
        Tick::Stopped(StopReason::RenewalFailed)
    );
    assert_eq!(
        provider.calls(),
        vec![ProviderCall::CachedSession, ProviderCall::RenewSilently]
    );
}

#[tokio::test]
async fn renewal_that_cannot_be_stored_stops_the_loop() {
    let provider = Arc::new(
        InMemoryProvider::new()
            .with_session(opaque_session_expiring_at(T + secs(2)))
            .with_issuer(|_| Ok(Some(opaque_session_expiring_at(T + secs(3_600)))))
            .with_failing(ProviderCall::StoreSession),
    );
    let manager = manager_at(&provider, SessionConfig::default());
    let scheduler = manager.scheduler(ignore_stop);
    let watcher = scheduler.watch();

    assert_eq!(
        scheduler.check_once().await,
        Tick::Stopped(StopReason::RenewalFailed)
    );
    assert_eq!(
        provider.calls(),
        vec![
            ProviderCall::CachedSession,
            ProviderCall::RenewSilently,
            ProviderCall::StoreSession,
        ]
    );
    assert!(watcher.current().is_none());
}

#[tokio::test]
async fn panicking_provider_still_reports_the_stop() -> color_eyre::Result<()> {
    let provider = Arc::new(
        InMemoryProvider::new()
            .with_session(opaque_session_expiring_at(T + secs(2)))
            .with_issuer(|_| -> Result<Option<Session>, ProviderError> {
                panic!("identity provider client crashed")
            }),
    );
    let manager = manager_at(&provider, SessionConfig::default());
    let (scheduler, mut stops) = reporting_scheduler(&manager);

    let _ = scheduler.start();
    let (reason, _restart) = next_stop(&mut stops).await?;

    assert_eq!(reason, StopReason::Aborted);
    assert_eq!(scheduler.state(), SchedulerState::Stopped(StopReason::Aborted));
    assert_eq!(scheduler.active_loop(), None);
    Ok(())
}

#[tokio::test]
async fn second_start_is_ignored() {
    let provider = Arc::new(InMemoryProvider::new());
    let manager = manager_at(&provider, SessionConfig::default());
    let scheduler = manager.scheduler(ignore_stop);

    let first = scheduler.start();
    let second = scheduler.start();

    assert!(matches!(first, StartOutcome::Started(_)));
    assert_eq!(second, StartOutcome::AlreadyRunning(first.loop_id()));
}

#[tokio::test]
async fn restart_handle_begins_a_new_loop() -> color_eyre::Result<()> {
    let provider = Arc::new(InMemoryProvider::new());
    let manager = manager_at(&provider, SessionConfig::default());
    let (scheduler, mut stops) = reporting_scheduler(&manager);

    let first = scheduler.start().loop_id();
    let (_, restart) = next_stop(&mut stops).await?;

    provider.set_session(Some(session_expiring_at(T + secs(600))));
    let second = match restart.restart() {
        StartOutcome::Started(id) => id,
        other => color_eyre::eyre::bail!("expected a new loop, got {:?}", other),
    };

    assert_ne!(first, second);
    assert_eq!(scheduler.active_loop(), Some(second));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn loop_keeps_a_short_lived_session_alive() {
    let clock = TokioClock::new(T);
    let lifetime = secs(6);
    let provider = Arc::new(
        InMemoryProvider::new()
            .with_session(opaque_session_expiring_at(clock.now() + lifetime))
            .with_issuer(move |_| Ok(Some(opaque_session_expiring_at(clock.now() + lifetime)))),
    );
    let manager = SessionManager::new(provider.clone(), SessionConfig::default()).with_clock(clock);
    let scheduler = manager.scheduler(|reason, _| panic!("refresh loop stopped: {:?}", reason));

    let id = scheduler.start().loop_id();
    tokio::time::sleep(secs(7)).await;

    assert!(provider.call_count(ProviderCall::RenewSilently) >= 1);
    assert_eq!(provider.call_count(ProviderCall::RevokeAccessToken), 0);
    assert_eq!(scheduler.active_loop(), Some(id));

    let current = provider.session().and_then(|s| s.expires_at());
    assert!(current.map_or(false, |expiry| expiry > clock.now()));
}

#[tokio::test(start_paused = true)]
async fn loop_sleeps_until_the_threshold_before_renewing() {
    let clock = TokioClock::new(T);
    let provider = Arc::new(
        InMemoryProvider::new()
            .with_session(opaque_session_expiring_at(clock.now() + secs(125)))
            .with_issuer(move |_| Ok(Some(opaque_session_expiring_at(clock.now() + secs(3_600))))),
    );
    let manager = SessionManager::new(provider.clone(), SessionConfig::default()).with_clock(clock);
    let scheduler = manager.scheduler(|reason, _| panic!("refresh loop stopped: {:?}", reason));

    let _ = scheduler.start();

    tokio::time::sleep(secs(119)).await;
    assert_eq!(provider.call_count(ProviderCall::RenewSilently), 0);

    // Exactly on the threshold the session still counts as fresh, so the
    // renewal happens on the floored re-check half a second later.
    tokio::time::sleep(Duration::from_millis(1_700)).await;
    assert_eq!(provider.call_count(ProviderCall::RenewSilently), 1);
    assert_eq!(
        scheduler.state(),
        SchedulerState::Scheduled {
            next_check: UnixMillis(T.0 + 121_000)
        }
    );
}
