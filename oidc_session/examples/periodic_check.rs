use std::{sync::Arc, time::Duration};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use clap::Parser;
use oidc_session::{
    clock::{Clock, System},
    freshness::SessionStatus,
    provider::{in_memory::Issuance, InMemoryProvider},
    scheduler::SchedulerState,
    AccessToken, Authentication, IdToken, Session, SessionConfig, SessionManager,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// How long each issued session lives, in seconds
    #[arg(short, long, env = "SESSION_LIFETIME_SECS", default_value_t = 20)]
    lifetime: u64,

    /// How long before expiry a session is renewed, in seconds
    #[arg(short, long, env = "SESSION_RENEW_THRESHOLD_SECS", default_value_t = 5)]
    threshold: u64,

    /// How long to run for, in seconds
    #[arg(short, long, env = "RUN_FOR_SECS", default_value_t = 60)]
    duration: u64,
}

/// Mints an unsigned token carrying only `sub` and `exp`
fn mint(subject: &str, lifetime: Duration) -> String {
    let exp = (System.now() + lifetime).as_secs();
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{}","exp":{}}}"#, subject, exp));
    format!("{}.{}.", header, claims)
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let lifetime = Duration::from_secs(opts.lifetime);

    let provider = Arc::new(InMemoryProvider::new().with_issuer(move |issuance| {
        tracing::info!(?issuance, "identity provider issuing session");
        let subject = match issuance {
            Issuance::Callback => "signed-in-user",
            Issuance::Silent | Issuance::Popup => "renewed-user",
        };
        Ok(Some(
            Session::new()
                .with_access_token(AccessToken::new(mint(subject, lifetime)))
                .with_id_token(IdToken::new(mint(subject, lifetime))),
        ))
    }));

    let config = SessionConfig::new(Duration::from_secs(opts.threshold));
    let manager = SessionManager::new(provider, config);

    if let Authentication::Redirecting(_) = manager.authenticate("/dashboard").await? {
        tracing::info!("no session yet, completing sign in");
        let completed = manager.complete_login().await?;
        tracing::info!(return_to = %completed.return_to, "signed in");
    }

    let scheduler = manager.scheduler(|reason, _restart| {
        tracing::error!(?reason, "session is no longer being renewed");
    });
    let _ = scheduler.start();

    let mut watcher = manager.watch();
    tokio::spawn(async move {
        while watcher.changed().await.is_ok() {
            let session = watcher.current();
            tracing::info!(
                token = format_args!("{:#?}", session.as_ref().and_then(|s| s.access_token())),
                "new session published"
            );
        }
    });

    let threshold = manager.config().renew_threshold();
    let mut interval = time::interval(Duration::from_secs(2));
    let deadline = time::Instant::now() + Duration::from_secs(opts.duration);
    while time::Instant::now() < deadline {
        interval.tick().await;

        let session = manager.user().await?;
        let expiry = session.expiry();
        let time_left = expiry.map(|e| System.now().millis_until(e));
        let status = time_left.map(|t| SessionStatus::classify(t, threshold));

        match (status, scheduler.state()) {
            (_, SchedulerState::Stopped(reason)) => {
                tracing::error!(?reason, "refresh loop has stopped");
                break;
            }
            (Some(SessionStatus::Fresh), state) | (None, state) => {
                tracing::debug!(?status, ?state, time_left_ms = time_left, "pulled session")
            }
            (Some(SessionStatus::Stale), state) => {
                tracing::warn!(?status, ?state, time_left_ms = time_left, "pulled session")
            }
            (Some(SessionStatus::Expired), state) => {
                tracing::error!(?status, ?state, time_left_ms = time_left, "pulled session")
            }
        }
    }

    Ok(())
}
