use crate::Session;
use std::{ops, sync::Arc};
use thiserror::Error;
use tokio::sync::watch;

/// Publishes the current session to any number of [`SessionWatcher`]s
#[derive(Clone, Debug)]
pub struct SessionPublisher {
    tx: Arc<watch::Sender<Option<Arc<Session>>>>,
}

impl Default for SessionPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPublisher {
    /// Constructs a publisher with no current session
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Publishes a new current session, or `None` once the session is gone
    pub fn publish(&self, session: Option<Session>) {
        self.tx.send_replace(session.map(Arc::new));
    }

    /// Creates a watcher observing this publisher
    pub fn subscribe(&self) -> SessionWatcher {
        SessionWatcher {
            watcher: self.tx.subscribe(),
        }
    }
}

/// A watcher that can be used to observe the current identity
#[derive(Clone, Debug)]
pub struct SessionWatcher {
    watcher: watch::Receiver<Option<Arc<Session>>>,
}

/// An outstanding borrow of the current session
///
/// This borrow should be held for as brief a time as possible, as outstanding
/// borrows will block publishing of a new session.
#[derive(Debug)]
pub struct BorrowedSession<'a> {
    inner: watch::Ref<'a, Option<Arc<Session>>>,
}

impl<'a> ops::Deref for BorrowedSession<'a> {
    type Target = Option<Arc<Session>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// The session publisher was dropped; no new sessions will be published
#[derive(Clone, Copy, Debug, Error)]
#[error("session publisher has quit")]
pub struct SessionPublisherQuit {
    _p: (),
}

impl From<watch::error::RecvError> for SessionPublisherQuit {
    fn from(_: watch::error::RecvError) -> Self {
        Self { _p: () }
    }
}

impl SessionWatcher {
    /// Borrows the current session
    ///
    /// This borrow should be short-lived as outstanding borrows will block the
    /// publisher being able to report new sessions.
    pub fn session(&self) -> BorrowedSession<'_> {
        BorrowedSession {
            inner: self.watcher.borrow(),
        }
    }

    /// Clones out the current session
    pub fn current(&self) -> Option<Arc<Session>> {
        self.watcher.borrow().clone()
    }

    /// A future that returns as ready whenever a new session is published
    ///
    /// If the publisher is ever dropped, then this function will return an
    /// error indicating that no new sessions will be published.
    pub async fn changed(&mut self) -> Result<(), SessionPublisherQuit> {
        Ok(self.watcher.changed().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccessToken;

    #[tokio::test]
    async fn watchers_observe_published_sessions() {
        let publisher = SessionPublisher::new();
        let mut watcher = publisher.subscribe();
        assert!(watcher.session().is_none());

        let session = Session::new().with_access_token(AccessToken::from_static("first"));
        publisher.publish(Some(session.clone()));

        watcher.changed().await.unwrap();
        assert_eq!(watcher.current().as_deref(), Some(&session));

        publisher.publish(None);
        watcher.changed().await.unwrap();
        assert!(watcher.current().is_none());
    }

    #[tokio::test]
    async fn dropping_the_publisher_ends_the_watch() {
        let publisher = SessionPublisher::new();
        let mut watcher = publisher.subscribe();
        drop(publisher);

        assert!(watcher.changed().await.is_err());
    }
}
