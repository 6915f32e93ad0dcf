use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::error::AuthError;
use crate::forum::{Authenticator, Credentials, Session};

type Login = Shared<BoxFuture<'static, Result<Session, AuthError>>>;

/// Per-course forum sessions with at most one login in flight per course.
///
/// Every caller for a course awaits the same shared login future, so they
/// all observe the same session or the same failure. Failed logins are
/// dropped from the cache so the next caller starts a fresh attempt.
#[derive(Clone)]
pub struct SessionCache {
    logins: Arc<DashMap<String, Login>>,
    authenticator: Arc<dyn Authenticator>,
}

impl SessionCache {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { logins: Arc::new(DashMap::new()), authenticator }
    }

    pub async fn get_or_create(&self, course: &str, credentials: &Credentials) -> Result<Session, AuthError> {
        let login = self
            .logins
            .entry(course.to_string())
            .or_insert_with(|| {
                tracing::info!(course, "logging in to forum");
                let authenticator = self.authenticator.clone();
                let credentials = credentials.clone();
                async move { authenticator.authenticate(&credentials).await }.boxed().shared()
            })
            .value()
            .clone();

        let result = login.clone().await;
        if let Err(e) = &result {
            tracing::warn!(course, error = %e, "forum login failed");
            self.logins.remove_if(course, |_, cached| cached.ptr_eq(&login));
        }
        result
    }

    /// Drop `stale` if it is still the cached session for `course`. A session
    /// some other caller already replaced is left alone.
    pub fn invalidate(&self, course: &str, stale: &Session) {
        let removed = self
            .logins
            .remove_if(course, |_, cached| matches!(cached.peek(), Some(Ok(s)) if s == stale));
        if removed.is_some() {
            tracing::info!(course, "discarded stale forum session");
        }
    }

    pub fn is_cached(&self, course: &str) -> bool {
        self.logins.contains_key(course)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingAuth {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl Authenticator for CountingAuth {
        async fn authenticate(&self, _: &Credentials) -> Result<Session, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && n == 0 {
                return Err(AuthError::MissingSessionCookie);
            }
            Session::from_cookies(vec![("session_id".into(), format!("s{n}"))])
        }
    }

    fn creds() -> Credentials {
        Credentials { email: "c@x.edu".into(), password: "pw".into(), mode: Default::default() }
    }

    fn cache(fail_first: bool) -> (SessionCache, Arc<CountingAuth>) {
        let auth = Arc::new(CountingAuth { calls: AtomicUsize::new(0), fail_first });
        (SessionCache::new(auth.clone()), auth)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_login() {
        let (cache, auth) = cache(false);
        let c = creds();
        let (a, b, d) = tokio::join!(
            cache.get_or_create("6.031", &c),
            cache.get_or_create("6.031", &c),
            cache.get_or_create("6.031", &c)
        );
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.clone().unwrap());
        assert_eq!(b.unwrap(), d.unwrap());
    }

    #[tokio::test]
    async fn sequential_callers_reuse_session() {
        let (cache, auth) = cache(false);
        cache.get_or_create("c", &creds()).await.unwrap();
        cache.get_or_create("c", &creds()).await.unwrap();
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn courses_are_isolated() {
        let (cache, auth) = cache(false);
        cache.get_or_create("a", &creds()).await.unwrap();
        cache.get_or_create("b", &creds()).await.unwrap();
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_is_shared_then_forgotten() {
        let (cache, auth) = cache(true);
        let c = creds();
        let (a, b) = tokio::join!(cache.get_or_create("c", &c), cache.get_or_create("c", &c));
        assert_eq!(a.unwrap_err(), AuthError::MissingSessionCookie);
        assert_eq!(b.unwrap_err(), AuthError::MissingSessionCookie);
        assert!(!cache.is_cached("c"));

        let s = cache.get_or_create("c", &c).await.unwrap();
        assert_eq!(s.csrf_token(), Some("s1"));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_new_login() {
        let (cache, auth) = cache(false);
        let first = cache.get_or_create("c", &creds()).await.unwrap();
        cache.invalidate("c", &first);
        let second = cache.get_or_create("c", &creds()).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);

        // a stale handle no longer matches the cached session
        cache.invalidate("c", &first);
        assert!(cache.is_cached("c"));
    }
}
