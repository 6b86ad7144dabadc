//! Session lifecycle
//!
//! A backend session is created once per (company, modality) and cached on
//! disk for a fixed TTL so a restarted client picks the conversation back up
//! without another round-trip. [`SessionStore`] drives the state machine:
//!
//! ```text
//! idle ──start──▶ creating ──ok──▶ active ──poll──▶ expired
//!   │                 └──err──▶ error                  │
//!   └──start (cached)──────────────▶ active            │
//!          error / expired ──retry/start──▶ creating ◀─┘
//! ```
//!
//! Nothing here retries on its own: leaving `error` or `expired` always
//! takes an explicit `start` or `retry`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::protocol::SessionId;

/// Backend sessions live about 24h; stay safely under that.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(23 * 60 * 60);

// =============================================================================
// State machine
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Creating,
    Active { session_id: SessionId },
    Expired,
    Error { message: String },
}

impl SessionState {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Active { session_id } => Some(session_id),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Creating => "creating",
            Self::Active { .. } => "active",
            Self::Expired => "expired",
            Self::Error { .. } => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub enum SessionTransition {
    /// idle|error|expired|active → creating
    Begin,
    /// creating → active
    Created { session_id: SessionId },
    /// idle|error|expired|active → active (valid cache entry, no request)
    Restore { session_id: SessionId },
    /// creating → error
    Fail { message: String },
    /// active → expired (expiry poll found the cache entry stale)
    Expire,
    /// any → idle
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply {transition} while session is {from}")]
pub struct TransitionError {
    pub from: &'static str,
    pub transition: String,
}

impl SessionState {
    pub fn apply(&self, transition: SessionTransition) -> std::result::Result<Self, TransitionError> {
        use SessionState::*;
        use SessionTransition::*;

        match (self, transition) {
            (_, Reset) => Ok(Idle),

            (Idle | Error { .. } | Expired | Active { .. }, Begin) => Ok(Creating),
            (Idle | Error { .. } | Expired | Active { .. }, Restore { session_id }) => {
                Ok(Active { session_id })
            }

            (Creating, Created { session_id }) => Ok(Active { session_id }),
            (Creating, Fail { message }) => Ok(Error { message }),

            (Active { .. }, Expire) => Ok(Expired),

            (from, transition) => Err(TransitionError {
                from: from.name(),
                transition: format!("{transition:?}"),
            }),
        }
    }
}

// =============================================================================
// Clock
// =============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// =============================================================================
// Cache
// =============================================================================

/// What gets written to the short-lived cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub flow_type: Option<String>,
}

impl StoredSession {
    /// Valid iff younger than `ttl` and created for the same modality.
    pub fn is_valid(&self, now: DateTime<Utc>, ttl: Duration, flow_type: Option<&str>) -> bool {
        if self.flow_type.as_deref() != flow_type {
            return false;
        }
        // A record from the future (clock moved back) is treated as fresh.
        match now.signed_duration_since(self.created_at).to_std() {
            Ok(age) => age < ttl,
            Err(_) => true,
        }
    }
}

/// Cache entries are scoped to a company and a modality so switching
/// modality never silently reuses an unrelated session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub company_id: String,
    pub flow_type: Option<String>,
}

impl CacheKey {
    pub fn new(company_id: impl Into<String>, flow_type: Option<&str>) -> Self {
        Self {
            company_id: company_id.into(),
            flow_type: flow_type.map(str::to_string),
        }
    }

    /// Stable, filesystem-safe name for this key. Distinct keys always get
    /// distinct names.
    pub fn file_stem(&self) -> String {
        let flow = match &self.flow_type {
            Some(flow) => escape(flow),
            None => "_".to_string(),
        };
        format!("nova_session_{}__{}", escape(&self.company_id), flow)
    }
}

/// Percent-encode every byte outside `[A-Za-z0-9-]`. `_` is escaped too, so
/// the `__` separator and the `_` placeholder cannot be forged.
fn escape(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

pub trait SessionCache: Send + Sync {
    /// Unreadable or corrupt entries read as absent.
    fn load(&self, key: &CacheKey) -> Option<StoredSession>;
    fn store(&self, key: &CacheKey, session: &StoredSession) -> Result<()>;
    fn remove(&self, key: &CacheKey);
    /// Drop every entry; returns how many were removed.
    fn clear(&self) -> Result<usize>;
}

/// One JSON file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileSessionCache {
    dir: PathBuf,
}

impl FileSessionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }
}

impl SessionCache for FileSessionCache {
    fn load(&self, key: &CacheKey) -> Option<StoredSession> {
        let path = self.path_for(key);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Ignoring corrupt session cache {:?}: {}", path, e);
                None
            }
        }
    }

    fn store(&self, key: &CacheKey, session: &StoredSession) -> Result<()> {
        let json = serde_json::to_string(session)?;
        std::fs::write(self.path_for(key), json)?;
        Ok(())
    }

    fn remove(&self, key: &CacheKey) {
        let _ = std::fs::remove_file(self.path_for(key));
    }

    fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_session = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("nova_session_") && n.ends_with(".json"));
            if is_session {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Process-local cache, for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemorySessionCache {
    entries: Mutex<HashMap<CacheKey, StoredSession>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionCache for MemorySessionCache {
    fn load(&self, key: &CacheKey) -> Option<StoredSession> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn store(&self, key: &CacheKey, session: &StoredSession) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ChatError::Config("session cache lock poisoned".into()))?;
        entries.insert(key.clone(), session.clone());
        Ok(())
    }

    fn remove(&self, key: &CacheKey) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    fn clear(&self) -> Result<usize> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ChatError::Config("session cache lock poisoned".into()))?;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

// =============================================================================
// Backend seam
// =============================================================================

/// Body of `POST /create_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSessionRequest {
    pub company_id: String,
    pub uid: Option<String>,
    pub language_code: String,
    pub flow_type: Option<String>,
}

/// Anything that can mint a backend session.
pub trait SessionBackend: Send + Sync {
    fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> impl Future<Output = Result<SessionId>> + Send;
}

// =============================================================================
// Store
// =============================================================================

pub struct SessionStore<B> {
    backend: B,
    cache: Arc<dyn SessionCache>,
    clock: Arc<dyn Clock>,
    company_id: String,
    language_code: String,
    uid: Option<String>,
    ttl: Duration,
    state: SessionState,
    flow_type: Option<String>,
}

impl<B: SessionBackend> SessionStore<B> {
    pub fn new(
        backend: B,
        cache: Arc<dyn SessionCache>,
        company_id: impl Into<String>,
        language_code: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            cache,
            clock: Arc::new(SystemClock),
            company_id: company_id.into(),
            language_code: language_code.into(),
            uid: None,
            ttl: DEFAULT_SESSION_TTL,
            state: SessionState::Idle,
            flow_type: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_uid(mut self, uid: Option<String>) -> Self {
        self.uid = uid;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.state.session_id()
    }

    pub fn flow_type(&self) -> Option<&str> {
        self.flow_type.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            SessionState::Error { message } => Some(message),
            _ => None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn key(&self) -> CacheKey {
        CacheKey::new(&self.company_id, self.flow_type.as_deref())
    }

    fn transition(&mut self, transition: SessionTransition) {
        match self.state.apply(transition) {
            Ok(next) => {
                debug!(from = %self.state, to = %next, "Session state change");
                self.state = next;
            }
            Err(e) => warn!("Ignoring session transition: {}", e),
        }
    }

    /// Adopt a cached session for `flow_type` or create a new one.
    pub async fn start(&mut self, flow_type: Option<String>) -> &SessionState {
        self.flow_type = flow_type;

        if let Some(stored) = self.restore() {
            info!(session_id = %stored.session_id, "Restored cached session");
            self.transition(SessionTransition::Restore {
                session_id: stored.session_id,
            });
            return &self.state;
        }

        self.transition(SessionTransition::Begin);

        let request = CreateSessionRequest {
            company_id: self.company_id.clone(),
            uid: self.uid.clone(),
            language_code: self.language_code.clone(),
            flow_type: self.flow_type.clone(),
        };

        match self.backend.create_session(&request).await {
            Ok(session_id) => {
                info!(session_id = %session_id, flow_type = ?self.flow_type, "Created session");
                self.persist(&session_id);
                self.transition(SessionTransition::Created { session_id });
            }
            Err(e) => {
                warn!("Session creation failed: {}", e);
                self.transition(SessionTransition::Fail {
                    message: e.to_string(),
                });
            }
        }
        &self.state
    }

    /// Start again with the last modality; a still-valid cached session is
    /// reused.
    pub async fn retry(&mut self) -> &SessionState {
        let flow_type = self.flow_type.clone();
        self.start(flow_type).await
    }

    /// Forget the current session. Does not start a new one.
    pub fn reset(&mut self) {
        self.cache.remove(&self.key());
        self.transition(SessionTransition::Reset);
    }

    /// The cached entry for the current modality, if still valid. Stale or
    /// mismatched entries are removed.
    pub fn restore(&self) -> Option<StoredSession> {
        let key = self.key();
        let stored = self.cache.load(&key)?;
        if stored.is_valid(self.clock.now(), self.ttl, self.flow_type.as_deref()) {
            Some(stored)
        } else {
            debug!("Dropping stale session cache entry");
            self.cache.remove(&key);
            None
        }
    }

    /// One tick of the expiry watcher. Returns true if the session just
    /// expired.
    pub fn check_expiry(&mut self) -> bool {
        if !self.state.is_active() || self.restore().is_some() {
            return false;
        }
        info!("Session expired");
        self.transition(SessionTransition::Expire);
        true
    }

    fn persist(&self, session_id: &SessionId) {
        let stored = StoredSession {
            session_id: session_id.clone(),
            created_at: self.clock.now(),
            flow_type: self.flow_type.clone(),
        };
        if let Err(e) = self.cache.store(&self.key(), &stored) {
            warn!("Could not cache session: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub(crate) fn new(now: DateTime<Utc>) -> Self {
            Self(Mutex::new(now))
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub(crate) calls: AtomicUsize,
        pub(crate) fail: bool,
        pub(crate) last_flow: Mutex<Option<String>>,
    }

    impl SessionBackend for FakeBackend {
        async fn create_session(&self, request: &CreateSessionRequest) -> Result<SessionId> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_flow.lock().unwrap() = request.flow_type.clone();
            if self.fail {
                Err(ChatError::SessionCreation("503 Service Unavailable".into()))
            } else {
                Ok(SessionId::Number(100 + n as i64))
            }
        }
    }

    fn store_with(
        backend: FakeBackend,
        cache: Arc<dyn SessionCache>,
        clock: Arc<ManualClock>,
    ) -> SessionStore<FakeBackend> {
        SessionStore::new(backend, cache, "acme", "en").with_clock(clock)
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    // ── state machine ───────────────────────────────────────────────────

    #[test]
    fn valid_transitions() {
        let creating = SessionState::Idle.apply(SessionTransition::Begin).unwrap();
        assert_eq!(creating, SessionState::Creating);
        let active = creating
            .apply(SessionTransition::Created {
                session_id: SessionId::Number(1),
            })
            .unwrap();
        assert!(active.is_active());
        assert_eq!(
            active.apply(SessionTransition::Expire).unwrap(),
            SessionState::Expired
        );
        assert_eq!(
            SessionState::Expired.apply(SessionTransition::Begin).unwrap(),
            SessionState::Creating
        );
        assert_eq!(
            SessionState::Creating
                .apply(SessionTransition::Fail {
                    message: "boom".into()
                })
                .unwrap(),
            SessionState::Error {
                message: "boom".into()
            }
        );
    }

    #[test]
    fn invalid_transitions() {
        assert!(SessionState::Idle.apply(SessionTransition::Expire).is_err());
        assert!(
            SessionState::Idle
                .apply(SessionTransition::Created {
                    session_id: SessionId::Number(1)
                })
                .is_err()
        );
        assert!(SessionState::Creating.apply(SessionTransition::Begin).is_err());
        assert!(SessionState::Expired.apply(SessionTransition::Expire).is_err());
        let err = SessionState::Idle
            .apply(SessionTransition::Fail {
                message: "x".into(),
            })
            .unwrap_err();
        assert_eq!(err.from, "idle");
    }

    #[test]
    fn reset_from_anywhere() {
        for state in [
            SessionState::Idle,
            SessionState::Creating,
            SessionState::Expired,
            SessionState::Error {
                message: "x".into(),
            },
        ] {
            assert_eq!(state.apply(SessionTransition::Reset).unwrap(), SessionState::Idle);
        }
    }

    // ── validity ────────────────────────────────────────────────────────

    #[test]
    fn stored_session_validity() {
        let now = epoch();
        let ttl = Duration::from_secs(60);
        let stored = StoredSession {
            session_id: SessionId::Number(1),
            created_at: now - chrono::Duration::seconds(59),
            flow_type: Some("sales".into()),
        };
        assert!(stored.is_valid(now, ttl, Some("sales")));
        assert!(!stored.is_valid(now, ttl, Some("support")));
        assert!(!stored.is_valid(now, ttl, None));
        assert!(!stored.is_valid(now + chrono::Duration::seconds(1), ttl, Some("sales")));
    }

    #[test]
    fn cache_keys_differ_by_modality() {
        let a = CacheKey::new("acme", Some("sales"));
        let b = CacheKey::new("acme", Some("support"));
        let none = CacheKey::new("acme", None);
        assert_ne!(a.file_stem(), b.file_stem());
        assert_ne!(a.file_stem(), none.file_stem());
        assert_eq!(
            CacheKey::new("a/b", Some("x y")).file_stem(),
            "nova_session_a%2Fb__x%20y"
        );
    }

    #[test]
    fn cache_keys_never_collide() {
        let stems: Vec<String> = [
            CacheKey::new("acme.io", None),
            CacheKey::new("acme io", None),
            CacheKey::new("acme%io", None),
            CacheKey::new("acme/io", None),
            CacheKey::new("acme", Some("_")),
            CacheKey::new("acme__x", None),
            CacheKey::new("acme", Some("x")),
        ]
        .iter()
        .map(CacheKey::file_stem)
        .collect();
        let unique: std::collections::HashSet<&String> = stems.iter().collect();
        assert_eq!(unique.len(), stems.len(), "{stems:?}");
    }

    #[test]
    fn similar_company_ids_do_not_share_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileSessionCache::new(dir.path()).unwrap();
        let stored = StoredSession {
            session_id: SessionId::Text("dotted".into()),
            created_at: Utc::now(),
            flow_type: None,
        };
        cache.store(&CacheKey::new("acme.io", None), &stored).unwrap();
        assert!(cache.load(&CacheKey::new("acme io", None)).is_none());
        assert_eq!(cache.load(&CacheKey::new("acme.io", None)), Some(stored));
    }

    // ── store ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_creates_and_caches() {
        let cache = Arc::new(MemorySessionCache::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let mut store = store_with(FakeBackend::default(), cache.clone(), clock);

        let state = store.start(Some("sales".into())).await.clone();
        assert_eq!(
            state,
            SessionState::Active {
                session_id: SessionId::Number(101)
            }
        );
        assert_eq!(store.backend().calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.backend().last_flow.lock().unwrap().as_deref(),
            Some("sales")
        );

        let cached = cache.load(&CacheKey::new("acme", Some("sales"))).unwrap();
        assert_eq!(cached.session_id, SessionId::Number(101));
        assert_eq!(cached.created_at, epoch());
    }

    #[tokio::test]
    async fn start_adopts_valid_cache_without_request() {
        let cache = Arc::new(MemorySessionCache::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        cache
            .store(
                &CacheKey::new("acme", Some("sales")),
                &StoredSession {
                    session_id: SessionId::Text("cached".into()),
                    created_at: epoch() - chrono::Duration::hours(1),
                    flow_type: Some("sales".into()),
                },
            )
            .unwrap();

        let mut store = store_with(FakeBackend::default(), cache, clock);
        store.start(Some("sales".into())).await;
        assert_eq!(store.session_id(), Some(&SessionId::Text("cached".into())));
        assert_eq!(store.backend().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn other_modality_gets_its_own_session() {
        let cache = Arc::new(MemorySessionCache::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let mut store = store_with(FakeBackend::default(), cache, clock);

        store.start(Some("sales".into())).await;
        store.start(Some("support".into())).await;
        assert_eq!(store.session_id(), Some(&SessionId::Number(102)));
        store.start(Some("sales".into())).await;
        assert_eq!(store.session_id(), Some(&SessionId::Number(101)));
        assert_eq!(store.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_is_error_state_and_retry_recovers() {
        let cache = Arc::new(MemorySessionCache::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let backend = FakeBackend {
            fail: true,
            ..Default::default()
        };
        let mut store = store_with(backend, cache.clone(), clock);

        store.start(Some("sales".into())).await;
        assert_eq!(
            store.error(),
            Some("Session creation failed: 503 Service Unavailable")
        );
        assert!(cache.load(&CacheKey::new("acme", Some("sales"))).is_none());

        store.backend.fail = false;
        store.retry().await;
        assert!(store.state().is_active());
        assert_eq!(store.flow_type(), Some("sales"));
    }

    #[tokio::test]
    async fn retry_reuses_valid_cache() {
        let cache = Arc::new(MemorySessionCache::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let mut store = store_with(FakeBackend::default(), cache, clock);

        store.start(Some("sales".into())).await;
        store.retry().await;
        assert_eq!(store.backend().calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.session_id(), Some(&SessionId::Number(101)));
    }

    #[tokio::test]
    async fn reset_drops_cache_and_goes_idle() {
        let cache = Arc::new(MemorySessionCache::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let mut store = store_with(FakeBackend::default(), cache.clone(), clock);

        store.start(Some("sales".into())).await;
        store.reset();
        assert_eq!(store.state(), &SessionState::Idle);
        assert!(cache.load(&CacheKey::new("acme", Some("sales"))).is_none());

        store.start(Some("sales".into())).await;
        assert_eq!(store.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_cache_is_rejected_and_expires_on_poll() {
        let ttl = Duration::from_secs(23 * 60 * 60);
        let cache = Arc::new(MemorySessionCache::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let mut store = store_with(FakeBackend::default(), cache.clone(), clock.clone()).with_ttl(ttl);

        store.start(Some("sales".into())).await;
        assert!(!store.check_expiry());

        // created_at is now exactly TTL + 1ms in the past
        clock.advance(ttl + Duration::from_millis(1));
        assert!(store.restore().is_none());
        assert!(cache.load(&CacheKey::new("acme", Some("sales"))).is_none());

        assert!(store.check_expiry());
        assert_eq!(store.state(), &SessionState::Expired);
        assert_eq!(store.session_id(), None);
        assert!(!store.check_expiry());
    }

    #[tokio::test]
    async fn stale_cache_on_start_creates_new_session() {
        let cache = Arc::new(MemorySessionCache::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        cache
            .store(
                &CacheKey::new("acme", Some("sales")),
                &StoredSession {
                    session_id: SessionId::Number(7),
                    created_at: epoch() - chrono::Duration::hours(24),
                    flow_type: Some("sales".into()),
                },
            )
            .unwrap();

        let mut store = store_with(FakeBackend::default(), cache, clock);
        store.start(Some("sales".into())).await;
        assert_eq!(store.session_id(), Some(&SessionId::Number(101)));
    }

    // ── file cache ──────────────────────────────────────────────────────

    #[test]
    fn file_cache_roundtrip_and_clear() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = FileSessionCache::new(tmp.path().join("sessions")).unwrap();
        let key = CacheKey::new("acme", Some("sales"));
        let stored = StoredSession {
            session_id: SessionId::Text("s1".into()),
            created_at: epoch(),
            flow_type: Some("sales".into()),
        };

        assert!(cache.load(&key).is_none());
        cache.store(&key, &stored).unwrap();
        assert_eq!(cache.load(&key), Some(stored.clone()));

        cache.store(&CacheKey::new("acme", None), &stored).unwrap();
        std::fs::write(cache.dir().join("unrelated.txt"), "keep").unwrap();
        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.load(&key).is_none());
        assert!(cache.dir().join("unrelated.txt").exists());
    }

    #[test]
    fn file_cache_ignores_corrupt_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = FileSessionCache::new(tmp.path()).unwrap();
        let key = CacheKey::new("acme", None);
        std::fs::write(cache.dir().join(format!("{}.json", key.file_stem())), "{oops").unwrap();
        assert!(cache.load(&key).is_none());
    }

    #[test]
    fn stored_session_json_shape() {
        let stored = StoredSession {
            session_id: SessionId::Number(5),
            created_at: epoch(),
            flow_type: None,
        };
        let value: serde_json::Value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["sessionId"], 5);
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["flowType"], serde_json::Value::Null);
    }
}
