//! Spam report pipeline assembled from the generic stages.

use super::models::{MsgData, MsgId, User};
use super::service::{MailService, MessageStore, SpamChecker, UserDirectory};
use crate::errors::{ConfigError, ServiceError};
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::stages::{
    AggregateStage, BatchFetcher, BatchStage, BoundedStage, DedupStage, FlaggedFirst,
    IdentityResolver, ItemOperation, SourceStage,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Stage names of the spam report pipeline, in order.
pub mod stage_names {
    /// Emits the input emails.
    pub const SOURCE: &str = "source";
    /// Resolves emails to distinct users.
    pub const SELECT_USERS: &str = "select_users";
    /// Lists messages in batches of users.
    pub const SELECT_MESSAGES: &str = "select_messages";
    /// Classifies messages under the in-flight limit.
    pub const CHECK_SPAM: &str = "check_spam";
    /// Sorts and renders the report.
    pub const COMBINE_RESULTS: &str = "combine_results";
}

/// Resolves emails to users through a [`UserDirectory`].
pub struct UserLookup(Arc<dyn UserDirectory>);

impl UserLookup {
    /// Wraps a collaborator.
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self(directory)
    }
}

#[async_trait]
impl IdentityResolver for UserLookup {
    type Input = String;
    type Record = User;

    async fn resolve(&self, email: String) -> Result<User, ServiceError> {
        self.0.get_user(email).await
    }
}

/// Lists message ids for a batch of users through a [`MessageStore`].
pub struct MessageFetch(Arc<dyn MessageStore>);

impl MessageFetch {
    /// Wraps a collaborator.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self(store)
    }
}

#[async_trait]
impl BatchFetcher for MessageFetch {
    type Input = User;
    type Output = MsgId;

    async fn fetch(&self, batch: Vec<User>) -> Result<Vec<MsgId>, ServiceError> {
        self.0.get_messages(batch).await
    }
}

/// Classifies one message through a [`SpamChecker`].
pub struct SpamCheck(Arc<dyn SpamChecker>);

impl SpamCheck {
    /// Wraps a collaborator.
    #[must_use]
    pub fn new(checker: Arc<dyn SpamChecker>) -> Self {
        Self(checker)
    }
}

#[async_trait]
impl ItemOperation for SpamCheck {
    type Input = MsgId;
    type Output = MsgData;

    async fn apply(&self, id: MsgId) -> Result<MsgData, ServiceError> {
        let has_spam = self.0.has_spam(id).await?;
        Ok(MsgData::new(id, has_spam))
    }
}

/// The collaborators the spam report talks to.
#[derive(Clone)]
pub struct SpamServices {
    /// Email to user resolution.
    pub directory: Arc<dyn UserDirectory>,
    /// Message listing.
    pub store: Arc<dyn MessageStore>,
    /// Spam classification.
    pub checker: Arc<dyn SpamChecker>,
}

impl SpamServices {
    /// Bundles separate collaborators.
    #[must_use]
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn MessageStore>,
        checker: Arc<dyn SpamChecker>,
    ) -> Self {
        Self {
            directory,
            store,
            checker,
        }
    }

    /// Uses one [`MailService`] for all three roles.
    #[must_use]
    pub fn from_service(service: &Arc<MailService>) -> Self {
        Self {
            directory: Arc::clone(service) as Arc<dyn UserDirectory>,
            store: Arc::clone(service) as Arc<dyn MessageStore>,
            checker: Arc::clone(service) as Arc<dyn SpamChecker>,
        }
    }
}

impl std::fmt::Debug for SpamServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpamServices").finish_non_exhaustive()
    }
}

/// Builds the spam report: emails in, one `"<has_spam> <id>"` line per
/// message out, spam first, then by ascending id.
///
/// Batch size and the in-flight limit come from the builder's configuration.
///
/// # Errors
///
/// Returns an error if the batch size or in-flight limit is zero.
pub fn spam_report_pipeline(
    builder: PipelineBuilder,
    emails: Vec<String>,
    services: SpamServices,
) -> Result<Pipeline<String>, ConfigError> {
    let batch_size = builder.config().batch_size;
    let max_in_flight = builder.config().max_in_flight;

    Ok(builder
        .stage(SourceStage::new(stage_names::SOURCE, emails))
        .stage(DedupStage::new(
            stage_names::SELECT_USERS,
            UserLookup::new(services.directory),
        ))
        .stage(BatchStage::new(
            stage_names::SELECT_MESSAGES,
            MessageFetch::new(services.store),
            batch_size,
        )?)
        .stage(BoundedStage::new(
            stage_names::CHECK_SPAM,
            SpamCheck::new(services.checker),
            max_in_flight,
        )?)
        .stage(AggregateStage::new(
            stage_names::COMBINE_RESULTS,
            FlaggedFirst,
            |data: MsgData| data.to_string(),
        )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::spam::service::{Latency, MockMessageStore, MockSpamChecker, MockUserDirectory};
    use pretty_assertions::assert_eq;

    fn emails(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn mocks(lookups: usize) -> SpamServices {
        let mut directory = MockUserDirectory::new();
        directory
            .expect_get_user()
            .times(lookups)
            .returning(|email: String| match email.as_str() {
                "a" => Ok(User::new(1, "a")),
                "b" => Ok(User::new(2, "b")),
                _ => Err(ServiceError::not_found(email)),
            });

        let mut store = MockMessageStore::new();
        store
            .expect_get_messages()
            .returning(|users: Vec<User>| Ok(users.iter().map(|user| MsgId(user.id * 10)).collect()));

        let mut checker = MockSpamChecker::new();
        checker
            .expect_has_spam()
            .returning(|id: MsgId| Ok(id == MsgId(10)));

        SpamServices::new(Arc::new(directory), Arc::new(store), Arc::new(checker))
    }

    #[tokio::test]
    async fn test_sample_report() {
        let service = Arc::new(MailService::sample(Latency::none()));
        let input = emails(&[
            "alice@mail.ru",
            "alice.smith@mail.ru",
            "bob@mail.ru",
            "carol@mail.ru",
            "c.jones@mail.ru",
            "dave@mail.ru",
        ]);

        let output = spam_report_pipeline(
            PipelineBuilder::new("spam"),
            input,
            SpamServices::from_service(&service),
        )
        .unwrap()
        .run()
        .await
        .unwrap();

        assert_eq!(
            output.items,
            vec!["true 101", "true 301", "true 302", "false 102", "false 201", "false 303"]
        );
        assert!(output.report.is_clean());
        assert_eq!(service.stats().user_lookups(), 6);
        assert_eq!(service.stats().message_batches(), 2);
        assert_eq!(service.stats().spam_checks(), 6);
        assert_eq!(service.stats().rejected(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_inputs_with_tight_limits() {
        let builder = PipelineBuilder::new("spam")
            .with_config(PipelineConfig::new().with_batch_size(2).with_max_in_flight(1))
            .unwrap();

        let output = spam_report_pipeline(builder, emails(&["a", "a", "b"]), mocks(3))
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(output.items, vec!["true 10", "false 20"]);
        let users = output.report.stage(stage_names::SELECT_USERS).unwrap();
        assert_eq!(users.items_in, 3);
        assert_eq!(users.items_out, 2);
    }

    #[tokio::test]
    async fn test_unknown_email_is_skipped() {
        let output = spam_report_pipeline(PipelineBuilder::new("spam"), emails(&["b", "zed"]), mocks(2))
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(output.items, vec!["false 20"]);
    }

    #[tokio::test]
    async fn test_failed_spam_check_omits_message() {
        let mut directory = MockUserDirectory::new();
        directory
            .expect_get_user()
            .returning(|email: String| Ok(User::new(1, email)));
        let mut store = MockMessageStore::new();
        store
            .expect_get_messages()
            .times(1)
            .returning(|_| Ok(vec![MsgId(1), MsgId(2), MsgId(3)]));
        let mut checker = MockSpamChecker::new();
        checker.expect_has_spam().returning(|id: MsgId| {
            if id == MsgId(2) {
                Err(ServiceError::unavailable("checker down"))
            } else {
                Ok(false)
            }
        });
        let services = SpamServices::new(Arc::new(directory), Arc::new(store), Arc::new(checker));

        let output = spam_report_pipeline(PipelineBuilder::new("spam"), emails(&["x@mail.ru"]), services)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(output.items, vec!["false 1", "false 3"]);
    }

    #[test]
    fn test_stage_layout() {
        let service = Arc::new(MailService::sample(Latency::none()));
        let pipeline = spam_report_pipeline(
            PipelineBuilder::new("spam"),
            Vec::new(),
            SpamServices::from_service(&service),
        )
        .unwrap();

        assert_eq!(
            pipeline.stage_names(),
            vec![
                stage_names::SOURCE,
                stage_names::SELECT_USERS,
                stage_names::SELECT_MESSAGES,
                stage_names::CHECK_SPAM,
                stage_names::COMBINE_RESULTS,
            ]
        );
    }
}
