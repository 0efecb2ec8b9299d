//! In-memory session store keyed by a cookie.
//!
//! # Responsibilities
//! - Map a session cookie (random UUID) to shared session state
//! - Emit `Set-Cookie` when a new session gains its first value
//! - Expire the cookie and drop state when a session is cleared
//! - Evict sessions idle longer than the configured timeout
//!
//! # Design Decisions
//! - `load` checks idleness only for the session it resolves; the full
//!   sweep over the store runs at most once per quarter of the idle
//!   timeout, claimed by whichever request swaps the sweep timestamp

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header::SET_COOKIE;
use axum::http::HeaderValue;
use dashmap::DashMap;

use crate::message::{Cookie, Request, Response};
use crate::session::{Session, SessionError, SessionManager, SessionValue};

/// Default name of the session cookie.
pub const DEFAULT_COOKIE_NAME: &str = "GATEWAY_SESSION";

struct SessionData {
    values: DashMap<String, SessionValue>,
    /// Milliseconds since the manager's epoch.
    last_access: AtomicU64,
}

struct Store {
    sessions: DashMap<String, Arc<SessionData>>,
    epoch: Instant,
    idle_timeout: Duration,
    cookie_name: String,
    /// Milliseconds since the epoch at which the last sweep started.
    last_sweep: AtomicU64,
    sweeps: AtomicU64,
}

impl Store {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn is_idle(&self, data: &SessionData, now: u64) -> bool {
        now.saturating_sub(data.last_access.load(Ordering::Relaxed))
            > self.idle_timeout.as_millis() as u64
    }
}

/// Sessions held in process memory.
#[derive(Clone)]
pub struct InMemorySessionManager {
    store: Arc<Store>,
}

impl InMemorySessionManager {
    pub fn new(cookie_name: impl Into<String>, idle_timeout: Duration) -> Self {
        Self {
            store: Arc::new(Store {
                sessions: DashMap::new(),
                epoch: Instant::now(),
                idle_timeout,
                cookie_name: cookie_name.into(),
                last_sweep: AtomicU64::new(0),
                sweeps: AtomicU64::new(0),
            }),
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.store.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.sessions.is_empty()
    }

    /// Number of full sweeps run so far.
    pub fn sweeps(&self) -> u64 {
        self.store.sweeps.load(Ordering::Relaxed)
    }

    fn evict_idle(&self, now: u64) {
        let store = &self.store;
        let interval = store.idle_timeout.as_millis() as u64 / 4;
        let last = store.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last) < interval {
            return;
        }
        if store
            .last_sweep
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let sweep = store.sweeps.fetch_add(1, Ordering::Relaxed) + 1;
        let before = store.sessions.len();
        store.sessions.retain(|_, data| !store.is_idle(data, now));
        let evicted = before.saturating_sub(store.sessions.len());
        if evicted > 0 {
            tracing::debug!(evicted, sweep, "Evicted idle sessions");
        }
    }

    /// The live session stored under `id`; an idle one is dropped instead.
    fn resolve(&self, id: &str, now: u64) -> Option<Arc<SessionData>> {
        let data = self.store.sessions.get(id)?.clone();
        if self.store.is_idle(&data, now) {
            self.store.sessions.remove(id);
            return None;
        }
        Some(data)
    }
}

impl Default for InMemorySessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_COOKIE_NAME, Duration::from_secs(30 * 60))
    }
}

impl SessionManager for InMemorySessionManager {
    fn load(&self, request: &Request) -> Result<Arc<dyn Session>, SessionError> {
        let now = self.store.now_ms();
        self.evict_idle(now);

        let existing = request
            .cookie(&self.store.cookie_name)
            .and_then(|cookie| {
                let data = self.resolve(&cookie.value, now)?;
                Some((cookie.value, data))
            });

        let session = match existing {
            Some((id, data)) => {
                data.last_access.store(now, Ordering::Relaxed);
                MemorySession {
                    id,
                    data,
                    is_new: false,
                    invalidated: AtomicBool::new(false),
                    store: self.store.clone(),
                }
            }
            None => MemorySession {
                id: uuid::Uuid::new_v4().to_string(),
                data: Arc::new(SessionData {
                    values: DashMap::new(),
                    last_access: AtomicU64::new(now),
                }),
                is_new: true,
                invalidated: AtomicBool::new(false),
                store: self.store.clone(),
            },
        };
        Ok(Arc::new(session))
    }
}

struct MemorySession {
    id: String,
    data: Arc<SessionData>,
    is_new: bool,
    invalidated: AtomicBool,
    store: Arc<Store>,
}

impl MemorySession {
    fn cookie(&self) -> Cookie {
        Cookie::new(self.store.cookie_name.clone(), self.id.clone())
            .with_path("/")
            .with_http_only(true)
    }

    fn set_cookie(response: &mut Response, cookie: &Cookie) -> Result<(), SessionError> {
        let value = HeaderValue::from_str(&cookie.to_set_cookie())
            .map_err(|e| SessionError::Cookie(e.to_string()))?;
        response.headers.append(SET_COOKIE, value);
        Ok(())
    }
}

impl Session for MemorySession {
    fn get(&self, key: &str) -> Option<SessionValue> {
        self.data.values.get(key).map(|v| v.value().clone())
    }

    fn put(&self, key: &str, value: SessionValue) -> Option<SessionValue> {
        self.data.values.insert(key.to_string(), value)
    }

    fn remove(&self, key: &str) -> Option<SessionValue> {
        self.data.values.remove(key).map(|(_, v)| v)
    }

    fn get_or_insert_with(&self, key: &str, init: &mut dyn FnMut() -> SessionValue) -> SessionValue {
        self.data
            .values
            .entry(key.to_string())
            .or_insert_with(|| init())
            .value()
            .clone()
    }

    fn keys(&self) -> Vec<String> {
        self.data.values.iter().map(|e| e.key().clone()).collect()
    }

    fn clear(&self) {
        self.data.values.clear();
        self.invalidated.store(true, Ordering::Relaxed);
    }

    fn save(&self, response: &mut Response) -> Result<(), SessionError> {
        let empty = self.data.values.is_empty();

        if self.is_new {
            if empty {
                return Ok(());
            }
            self.store.sessions.insert(self.id.clone(), self.data.clone());
            return Self::set_cookie(response, &self.cookie());
        }

        if empty && self.invalidated.load(Ordering::Relaxed) {
            self.store.sessions.remove(&self.id);
            return Self::set_cookie(response, &self.cookie().with_max_age(0));
        }

        self.data
            .last_access
            .store(self.store.now_ms(), Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;
    use axum::http::Method;

    fn request_with_cookie(cookie: Option<&str>) -> Request {
        let mut request = Request::from_uri(Method::GET, "http://example.com/").unwrap();
        if let Some(cookie) = cookie {
            request
                .headers
                .insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        request
    }

    fn session_cookie(response: &Response) -> String {
        let header = response.headers[SET_COOKIE].to_str().unwrap();
        header.split(';').next().unwrap().to_string()
    }

    #[test]
    fn test_new_session_is_persisted_on_save() {
        let manager = InMemorySessionManager::default();
        let session = manager.load(&request_with_cookie(None)).unwrap();
        session.put("user", Arc::new("bjensen".to_string()));

        let mut response = Response::default();
        session.save(&mut response).unwrap();
        assert_eq!(manager.len(), 1);

        let cookie = session_cookie(&response);
        assert!(cookie.starts_with("GATEWAY_SESSION="));

        let reloaded = manager.load(&request_with_cookie(Some(&cookie))).unwrap();
        assert_eq!(
            reloaded.get_as::<String>("user").as_deref().map(String::as_str),
            Some("bjensen")
        );
    }

    #[test]
    fn test_empty_new_session_sets_no_cookie() {
        let manager = InMemorySessionManager::default();
        let session = manager.load(&request_with_cookie(None)).unwrap();
        let mut response = Response::default();
        session.save(&mut response).unwrap();
        assert!(response.headers.get(SET_COOKIE).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_cleared_session_expires_cookie() {
        let manager = InMemorySessionManager::default();
        let session = manager.load(&request_with_cookie(None)).unwrap();
        session.put("k", Arc::new(1u32));
        let mut response = Response::default();
        session.save(&mut response).unwrap();
        let cookie = session_cookie(&response);

        let existing = manager.load(&request_with_cookie(Some(&cookie))).unwrap();
        existing.clear();
        let mut response = Response::default();
        existing.save(&mut response).unwrap();
        assert!(response.headers[SET_COOKIE]
            .to_str()
            .unwrap()
            .contains("Max-Age=0"));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_get_or_insert_with_initializes_once() {
        let manager = InMemorySessionManager::default();
        let session = manager.load(&request_with_cookie(None)).unwrap();
        let mut calls = 0;
        let first = session.get_or_insert_with("jar", &mut || {
            calls += 1;
            Arc::new(10u32)
        });
        let second = session.get_or_insert_with("jar", &mut || {
            calls += 1;
            Arc::new(20u32)
        });
        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_idle_sessions_are_evicted() {
        let manager = InMemorySessionManager::new("SID", Duration::from_millis(0));
        let session = manager.load(&request_with_cookie(None)).unwrap();
        session.put("k", Arc::new(1u32));
        session.save(&mut Response::default()).unwrap();
        assert_eq!(manager.len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        let _ = manager.load(&request_with_cookie(None)).unwrap();
        assert!(manager.is_empty());
    }

    #[test]
    fn test_load_does_not_sweep_every_call() {
        let manager = InMemorySessionManager::new("SID", Duration::from_secs(60));
        for _ in 0..100 {
            let _ = manager.load(&request_with_cookie(None)).unwrap();
        }
        assert_eq!(manager.sweeps(), 0);
    }

    #[test]
    fn test_idle_session_is_not_resumed_between_sweeps() {
        let manager = InMemorySessionManager::new("SID", Duration::from_millis(20));
        let session = manager.load(&request_with_cookie(None)).unwrap();
        session.put("k", Arc::new(1u32));
        let mut response = Response::default();
        session.save(&mut response).unwrap();
        let cookie = session_cookie(&response);

        std::thread::sleep(Duration::from_millis(40));
        let resumed = manager.load(&request_with_cookie(Some(&cookie))).unwrap();
        assert!(resumed.get("k").is_none());
    }
}
