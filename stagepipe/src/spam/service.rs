//! Mail collaborators and an in-memory implementation.
//!
//! The traits model the three remote calls the spam report depends on. Each
//! has a hard limit that the pipeline has to respect: a message lookup takes
//! at most [`ServiceLimits::max_users_batch`] users per call, and at most
//! [`ServiceLimits::max_spam_requests`] spam checks may run at once.

use super::models::{MsgId, User};
use crate::errors::{ConfigError, ServiceError};
use crate::testing::ConcurrencyProbe;
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

#[allow(clippy::expect_used)]
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("email pattern is valid")
});

/// Resolves an email address (or alias) to its canonical user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Looks up the user owning `email`.
    async fn get_user(&self, email: String) -> Result<User, ServiceError>;
}

/// Lists the messages of a group of users.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Returns the message ids of every user in `users`.
    async fn get_messages(&self, users: Vec<User>) -> Result<Vec<MsgId>, ServiceError>;
}

/// Classifies a single message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpamChecker: Send + Sync {
    /// Returns whether the message is spam.
    async fn has_spam(&self, id: MsgId) -> Result<bool, ServiceError>;
}

/// Hard limits enforced by [`MailService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLimits {
    /// Most users accepted by one `get_messages` call.
    #[serde(default = "default_max_users_batch")]
    pub max_users_batch: usize,
    /// Most `has_spam` calls allowed in flight at once.
    #[serde(default = "default_max_spam_requests")]
    pub max_spam_requests: usize,
}

const fn default_max_users_batch() -> usize {
    2
}

const fn default_max_spam_requests() -> usize {
    5
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_users_batch: default_max_users_batch(),
            max_spam_requests: default_max_spam_requests(),
        }
    }
}

/// Simulated per-call latency, drawn uniformly from `min_ms..=max_ms`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Latency {
    /// Lower bound in milliseconds.
    pub min_ms: u64,
    /// Upper bound in milliseconds.
    pub max_ms: u64,
}

impl Latency {
    /// No delay at all.
    #[must_use]
    pub const fn none() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    /// A fixed delay.
    #[must_use]
    pub const fn fixed(ms: u64) -> Self {
        Self { min_ms: ms, max_ms: ms }
    }

    /// A random delay within a range.
    #[must_use]
    pub const fn between(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    async fn wait(&self) {
        if self.max_ms == 0 {
            return;
        }
        let ms = if self.min_ms >= self.max_ms {
            self.min_ms
        } else {
            rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Call counters kept by [`MailService`].
#[derive(Debug, Default)]
pub struct ServiceStats {
    user_lookups: AtomicU64,
    message_batches: AtomicU64,
    spam_checks: AtomicU64,
    rejected: AtomicU64,
}

impl ServiceStats {
    /// `get_user` calls.
    #[must_use]
    pub fn user_lookups(&self) -> u64 {
        self.user_lookups.load(Ordering::Relaxed)
    }

    /// `get_messages` calls.
    #[must_use]
    pub fn message_batches(&self) -> u64 {
        self.message_batches.load(Ordering::Relaxed)
    }

    /// `has_spam` calls.
    #[must_use]
    pub fn spam_checks(&self) -> u64 {
        self.spam_checks.load(Ordering::Relaxed)
    }

    /// Calls rejected for exceeding a limit.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// In-memory mail backend implementing every collaborator trait.
#[derive(Debug)]
pub struct MailService {
    users: HashMap<String, User>,
    aliases: HashMap<String, String>,
    mailboxes: HashMap<u64, Vec<MsgId>>,
    spam: HashSet<MsgId>,
    limits: ServiceLimits,
    latency: Latency,
    stats: ServiceStats,
    spam_probe: ConcurrencyProbe,
}

impl MailService {
    /// Starts building a service.
    #[must_use]
    pub fn builder() -> MailServiceBuilder {
        MailServiceBuilder::default()
    }

    /// A small fixed dataset with aliases and a few spam messages.
    ///
    /// | user | aliases | messages (spam marked *) |
    /// |------|---------|--------------------------|
    /// | 1 alice@mail.ru | alice.smith@mail.ru | 101*, 102 |
    /// | 2 bob@mail.ru | | 201 |
    /// | 3 carol@mail.ru | c.jones@mail.ru | 301*, 302*, 303 |
    /// | 4 dave@mail.ru | | |
    #[must_use]
    pub fn sample(latency: Latency) -> Self {
        let mut builder = Self::builder()
            .user(1, "alice@mail.ru")
            .user(2, "bob@mail.ru")
            .user(3, "carol@mail.ru")
            .user(4, "dave@mail.ru")
            .alias("alice.smith@mail.ru", "alice@mail.ru")
            .alias("c.jones@mail.ru", "carol@mail.ru")
            .latency(latency);
        for (owner, id, spam) in [
            ("alice@mail.ru", 101, true),
            ("alice@mail.ru", 102, false),
            ("bob@mail.ru", 201, false),
            ("carol@mail.ru", 301, true),
            ("carol@mail.ru", 302, true),
            ("carol@mail.ru", 303, false),
        ] {
            builder = builder.message(owner, MsgId(id), spam);
        }

        // the dataset above is internally consistent
        match builder.build() {
            Ok(service) => service,
            Err(err) => unreachable!("sample dataset is invalid: {err}"),
        }
    }

    /// Returns the configured limits.
    #[must_use]
    pub const fn limits(&self) -> ServiceLimits {
        self.limits
    }

    /// Returns the call counters.
    #[must_use]
    pub const fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    /// Highest number of simultaneous `has_spam` calls observed.
    #[must_use]
    pub fn peak_spam_requests(&self) -> usize {
        self.spam_probe.peak()
    }

    fn reject(&self, err: ServiceError) -> ServiceError {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        debug!(error = %err, "Mail service rejected a call");
        err
    }
}

#[async_trait]
impl UserDirectory for MailService {
    async fn get_user(&self, email: String) -> Result<User, ServiceError> {
        self.stats.user_lookups.fetch_add(1, Ordering::Relaxed);
        self.latency.wait().await;

        if !EMAIL_PATTERN.is_match(&email) {
            return Err(ServiceError::invalid_input(email, "not an email address"));
        }
        let canonical = self.aliases.get(&email).unwrap_or(&email);
        self.users
            .get(canonical)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(email))
    }
}

#[async_trait]
impl MessageStore for MailService {
    async fn get_messages(&self, users: Vec<User>) -> Result<Vec<MsgId>, ServiceError> {
        self.stats.message_batches.fetch_add(1, Ordering::Relaxed);
        if users.len() > self.limits.max_users_batch {
            return Err(self.reject(ServiceError::BatchTooLarge {
                size: users.len(),
                max: self.limits.max_users_batch,
            }));
        }
        self.latency.wait().await;

        Ok(users
            .iter()
            .filter_map(|user| self.mailboxes.get(&user.id))
            .flatten()
            .copied()
            .collect())
    }
}

#[async_trait]
impl SpamChecker for MailService {
    async fn has_spam(&self, id: MsgId) -> Result<bool, ServiceError> {
        self.stats.spam_checks.fetch_add(1, Ordering::Relaxed);
        let _guard = self.spam_probe.enter();
        if self.spam_probe.current() > self.limits.max_spam_requests {
            return Err(self.reject(ServiceError::TooManyRequests {
                limit: self.limits.max_spam_requests,
            }));
        }
        self.latency.wait().await;

        Ok(self.spam.contains(&id))
    }
}

/// Builder for [`MailService`].
#[derive(Debug, Default)]
pub struct MailServiceBuilder {
    users: Vec<User>,
    aliases: Vec<(String, String)>,
    messages: Vec<(String, MsgId, bool)>,
    limits: ServiceLimits,
    latency: Latency,
}

impl MailServiceBuilder {
    /// Registers a user under its canonical address.
    #[must_use]
    pub fn user(mut self, id: u64, email: impl Into<String>) -> Self {
        self.users.push(User::new(id, email));
        self
    }

    /// Registers an alternative address for an existing user.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.push((alias.into(), canonical.into()));
        self
    }

    /// Adds a message to the mailbox of `owner` (canonical address).
    #[must_use]
    pub fn message(mut self, owner: impl Into<String>, id: MsgId, spam: bool) -> Self {
        self.messages.push((owner.into(), id, spam));
        self
    }

    /// Sets the limits.
    #[must_use]
    pub const fn limits(mut self, limits: ServiceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the simulated latency.
    #[must_use]
    pub const fn latency(mut self, latency: Latency) -> Self {
        self.latency = latency;
        self
    }

    /// Builds the service.
    ///
    /// # Errors
    ///
    /// Returns an error if an alias or message references an unknown user,
    /// or a limit is zero.
    pub fn build(self) -> Result<MailService, ConfigError> {
        if self.limits.max_users_batch == 0 {
            return Err(ConfigError::must_be_positive("max_users_batch"));
        }
        if self.limits.max_spam_requests == 0 {
            return Err(ConfigError::must_be_positive("max_spam_requests"));
        }

        let users: HashMap<String, User> = self
            .users
            .into_iter()
            .map(|user| (user.email.clone(), user))
            .collect();

        let mut aliases = HashMap::new();
        for (alias, canonical) in self.aliases {
            if !users.contains_key(&canonical) {
                return Err(ConfigError::new("aliases", format!("'{alias}' points to unknown user '{canonical}'")));
            }
            aliases.insert(alias, canonical);
        }

        let mut mailboxes: HashMap<u64, Vec<MsgId>> = HashMap::new();
        let mut spam = HashSet::new();
        for (owner, id, is_spam) in self.messages {
            let Some(user) = users.get(&owner) else {
                return Err(ConfigError::new("messages", format!("message {id} belongs to unknown user '{owner}'")));
            };
            mailboxes.entry(user.id).or_default().push(id);
            if is_spam {
                spam.insert(id);
            }
        }

        Ok(MailService {
            users,
            aliases,
            mailboxes,
            spam,
            limits: self.limits,
            latency: self.latency,
            stats: ServiceStats::default(),
            spam_probe: ConcurrencyProbe::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_alias_resolves_to_canonical_user() {
        let service = MailService::sample(Latency::none());

        let direct = service.get_user("alice@mail.ru".to_string()).await.unwrap();
        let aliased = service.get_user("alice.smith@mail.ru".to_string()).await.unwrap();

        assert_eq!(direct, aliased);
        assert_eq!(direct.id, 1);
        assert_eq!(service.stats().user_lookups(), 2);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_addresses() {
        let service = MailService::sample(Latency::none());

        let err = service.get_user("nobody@mail.ru".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let err = service.get_user("not-an-email".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn test_get_messages_respects_batch_limit() {
        let service = MailService::sample(Latency::none());
        let users = vec![
            User::new(1, "alice@mail.ru"),
            User::new(3, "carol@mail.ru"),
        ];

        let ids = service.get_messages(users.clone()).await.unwrap();
        assert_eq!(ids, vec![MsgId(101), MsgId(102), MsgId(301), MsgId(302), MsgId(303)]);

        let mut too_many = users;
        too_many.push(User::new(2, "bob@mail.ru"));
        let err = service.get_messages(too_many).await.unwrap_err();
        assert_eq!(err, ServiceError::BatchTooLarge { size: 3, max: 2 });
        assert_eq!(service.stats().rejected(), 1);
    }

    #[tokio::test]
    async fn test_has_spam() {
        let service = MailService::sample(Latency::none());
        assert!(service.has_spam(MsgId(301)).await.unwrap());
        assert!(!service.has_spam(MsgId(303)).await.unwrap());
        assert_eq!(service.stats().spam_checks(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_has_spam_rejects_over_limit() {
        let service = Arc::new(MailService::sample(Latency::fixed(50)));

        let calls: Vec<_> = (0..8)
            .map(|i| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.has_spam(MsgId(100 + i)).await })
            })
            .collect();

        let mut rejected = 0;
        for call in calls {
            if let Err(ServiceError::TooManyRequests { limit }) = call.await.unwrap() {
                assert_eq!(limit, 5);
                rejected += 1;
            }
        }

        assert!(rejected >= 1, "8 simultaneous checks should exceed the limit of 5");
        assert_eq!(service.stats().rejected(), rejected);
    }

    #[test]
    fn test_builder_validation() {
        let err = MailService::builder()
            .user(1, "a@mail.ru")
            .alias("b@mail.ru", "missing@mail.ru")
            .build()
            .unwrap_err();
        assert_eq!(err.field, "aliases");

        let err = MailService::builder()
            .message("ghost@mail.ru", MsgId(1), false)
            .build()
            .unwrap_err();
        assert_eq!(err.field, "messages");

        let err = MailService::builder()
            .limits(ServiceLimits {
                max_users_batch: 0,
                max_spam_requests: 5,
            })
            .build()
            .unwrap_err();
        assert_eq!(err.field, "max_users_batch");
    }

    #[tokio::test]
    async fn test_latency_range() {
        let started = std::time::Instant::now();
        Latency::between(5, 10).wait().await;
        assert!(started.elapsed() >= Duration::from_millis(5));
    }
}
