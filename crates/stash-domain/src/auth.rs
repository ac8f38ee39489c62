use anyhow::Result;
use async_trait::async_trait;
use stash_storage::SecureStorage;
use tracing::{debug, instrument};

use crate::{
    catalogue::{FlagFamily, RecordSpec, DAY_MS, HOUR_MS},
    models::RegistrationDraft,
    OwnedRecords,
};

pub const REGISTRATION_DATA: RecordSpec = RecordSpec::durable("registrationData", 7 * DAY_MS);
pub const NEWSLETTER_SUBSCRIPTIONS: RecordSpec =
    RecordSpec::durable("newsletterSubscriptions", 30 * DAY_MS);
pub const EMAIL: RecordSpec = RecordSpec::session("email", HOUR_MS);
pub const FIRST_NAME: RecordSpec = RecordSpec::session("firstName", HOUR_MS);
pub const LAST_NAME: RecordSpec = RecordSpec::session("lastName", HOUR_MS);

pub const PASSWORD_RESET_SENT: FlagFamily = FlagFamily::new("passwordResetSent_", HOUR_MS);
pub const VERIFICATION_EMAIL_SENT: FlagFamily =
    FlagFamily::new("verificationEmailSent_", HOUR_MS);

pub const AUTH_RECORDS: &[RecordSpec] = &[
    REGISTRATION_DATA,
    NEWSLETTER_SUBSCRIPTIONS,
    EMAIL,
    FIRST_NAME,
    LAST_NAME,
];
pub const AUTH_FLAGS: &[FlagFamily] = &[PASSWORD_RESET_SENT, VERIFICATION_EMAIL_SENT];

/// Identity fields, registration drafts and one-shot auth markers.
#[derive(Clone)]
pub struct AuthStorage {
    storage: SecureStorage,
}

impl AuthStorage {
    pub fn new(storage: SecureStorage) -> Self {
        Self { storage }
    }

    pub async fn get_email(&self) -> Result<Option<String>> {
        EMAIL.load(&self.storage).await
    }

    pub async fn save_email(&self, email: &str) -> Result<()> {
        EMAIL.save(&self.storage, email).await
    }

    pub async fn clear_email(&self) -> Result<()> {
        EMAIL.clear(&self.storage).await
    }

    pub async fn get_first_name(&self) -> Result<Option<String>> {
        FIRST_NAME.load(&self.storage).await
    }

    pub async fn save_first_name(&self, name: &str) -> Result<()> {
        FIRST_NAME.save(&self.storage, name).await
    }

    pub async fn clear_first_name(&self) -> Result<()> {
        FIRST_NAME.clear(&self.storage).await
    }

    pub async fn get_last_name(&self) -> Result<Option<String>> {
        LAST_NAME.load(&self.storage).await
    }

    pub async fn save_last_name(&self, name: &str) -> Result<()> {
        LAST_NAME.save(&self.storage, name).await
    }

    pub async fn clear_last_name(&self) -> Result<()> {
        LAST_NAME.clear(&self.storage).await
    }

    pub async fn get_saved_registration_data(&self) -> Result<Option<RegistrationDraft>> {
        REGISTRATION_DATA.load(&self.storage).await
    }

    #[instrument(skip_all)]
    pub async fn save_registration_data(&self, draft: &RegistrationDraft) -> Result<()> {
        REGISTRATION_DATA.save(&self.storage, draft).await
    }

    pub async fn clear_registration_data(&self) -> Result<()> {
        REGISTRATION_DATA.clear(&self.storage).await
    }

    pub async fn get_newsletter_subscriptions(&self) -> Result<Vec<String>> {
        Ok(NEWSLETTER_SUBSCRIPTIONS
            .load(&self.storage)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_newsletter_subscriptions(&self, emails: &[String]) -> Result<()> {
        NEWSLETTER_SUBSCRIPTIONS.save(&self.storage, emails).await
    }

    /// Add an address unless it is already subscribed; returns whether it was added.
    #[instrument(skip_all)]
    pub async fn add_newsletter_email(&self, email: &str) -> Result<bool> {
        let email = email.trim();
        let mut list = self.get_newsletter_subscriptions().await?;
        if list.iter().any(|existing| existing.eq_ignore_ascii_case(email)) {
            debug!("newsletter address already present");
            return Ok(false);
        }
        list.push(email.to_string());
        self.save_newsletter_subscriptions(&list).await?;
        Ok(true)
    }

    pub async fn clear_newsletter_subscriptions(&self) -> Result<()> {
        NEWSLETTER_SUBSCRIPTIONS.clear(&self.storage).await
    }

    pub async fn mark_password_reset_sent(&self, email: &str) -> Result<()> {
        PASSWORD_RESET_SENT.mark(&self.storage, email).await
    }

    pub async fn was_password_reset_sent(&self, email: &str) -> Result<bool> {
        PASSWORD_RESET_SENT.is_marked(&self.storage, email).await
    }

    pub async fn clear_password_reset_sent(&self, email: &str) -> Result<()> {
        PASSWORD_RESET_SENT.clear(&self.storage, email).await
    }

    pub async fn mark_verification_email_sent(&self, email: &str) -> Result<()> {
        VERIFICATION_EMAIL_SENT.mark(&self.storage, email).await
    }

    pub async fn was_verification_email_sent(&self, email: &str) -> Result<bool> {
        VERIFICATION_EMAIL_SENT.is_marked(&self.storage, email).await
    }

    /// Remove every auth-owned record and flag across both tiers.
    #[instrument(skip_all)]
    pub async fn clear_all(&self) -> Result<()> {
        for record in AUTH_RECORDS {
            record.clear(&self.storage).await?;
        }
        for family in AUTH_FLAGS {
            family.clear_all(&self.storage)?;
        }
        Ok(())
    }
}

#[async_trait]
impl OwnedRecords for AuthStorage {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn clear_all(&self) -> Result<()> {
        AuthStorage::clear_all(self).await
    }
}
