use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use flora_contracts::admin::{financial_report, FinancialReport};
use flora_contracts::errors::GenerationError;
use flora_contracts::events::{read_events, EventKind, EventLog, StudioEvent};
use flora_contracts::ledger::{
    find_package, list_packages, list_transactions, record_transaction, replace_packages,
    transactions_for, CreditLedger, CreditPackage, Transaction,
};
use flora_contracts::models::{
    normalize_email, normalize_language, GenerationRequest, GenerationResult, Mode, ResultSource,
    Role, Session, StylePreferences, Submission, UserProfile, DEFAULT_LANGUAGE,
};
use flora_contracts::projects::{delete_project, find_project, projects_for, save_project, Project};
use flora_contracts::settings::{resolve_stored_credential, AdminSettings, Credential};
use flora_contracts::store::{keys, KeyValueStore};
use flora_contracts::usage::{list_usage, record_usage, UsageEntry};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::config::StudioConfig;
use crate::mock::MockFallback;
use crate::pipeline::{CancelToken, GenerationPipeline};
use crate::service::{GeminiService, ImageService};

/// Guests get exactly this many generations before signing in.
pub const GUEST_FREE_GENERATIONS: u32 = 1;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StudioError {
    pub fn generation(&self) -> Option<&GenerationError> {
        match self {
            Self::Generation(err) => Some(err),
            Self::Other(_) => None,
        }
    }
}

/// How far a submission got with the signed-in user's credits.
#[derive(Debug, Default)]
struct ChargeProgress {
    charged: bool,
    recorded: bool,
    refunded: bool,
}

/// A finished submission: the request that produced it, the image, and the
/// credits it finally cost.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub request: GenerationRequest,
    pub result: GenerationResult,
    pub credits_charged: u64,
    pub balance: Option<u64>,
}

/// Owns all mutable application state: session, ledger, projects, settings.
///
/// Every mutation goes through `&mut self`, so at most one generation can be
/// in flight per studio.
pub struct Studio {
    config: StudioConfig,
    store: KeyValueStore,
    pipeline: GenerationPipeline,
    events: EventLog,
    session: Session,
}

impl Studio {
    pub fn open(config: StudioConfig) -> Result<Self> {
        let service = GeminiService::new(&config.api_base);
        Self::with_service(config, Box::new(service))
    }

    pub fn with_service(config: StudioConfig, service: Box<dyn ImageService>) -> Result<Self> {
        config.costs.validate()?;
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
        let store = KeyValueStore::open(config.state_path()).with_quota(config.store_quota_bytes);
        let mock = MockFallback::new(config.mock_image_url.clone(), config.mock_delay)?;
        let pipeline = GenerationPipeline::new(
            service,
            mock,
            config.failure_policy,
            config.image_model.clone(),
            config.request_timeout,
        );
        let events = EventLog::new(config.events_path(), Uuid::new_v4().to_string());
        let session = match store.get::<Option<UserProfile>>(keys::USER_PROFILE, None) {
            Some(profile) => Session::User(profile),
            None => Session::Guest,
        };

        let mut studio = Self {
            config,
            store,
            pipeline,
            events,
            session,
        };
        studio.apply_admin_settings();
        studio.emit(
            EventKind::SessionStarted,
            json!({
                "user_id": studio.session.owner_id(),
                "service": studio.pipeline.service_name(),
                "model": studio.pipeline.model(),
                "policy": studio.pipeline.policy().to_string(),
            }),
        );
        Ok(studio)
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn current_user(&self) -> Option<&UserProfile> {
        self.session.user()
    }

    pub fn store(&self) -> &KeyValueStore {
        &self.store
    }

    pub fn cost_for(&self, mode: Mode) -> u64 {
        self.config.costs.cost_for(mode)
    }

    pub fn credential(&self) -> Option<Credential> {
        resolve_stored_credential(&self.store, self.config.default_credential.as_deref())
    }

    // Users and sessions

    pub fn users(&self) -> Vec<UserProfile> {
        self.store.get(keys::USER_DIRECTORY, Vec::new())
    }

    /// Finds or registers the profile for `email` and makes it current. New
    /// profiles receive the starting credit grant.
    pub fn sign_in(&mut self, email: &str, name: &str) -> Result<UserProfile> {
        let email = normalize_email(email)?;
        let role = if self.config.is_admin_email(&email) {
            Role::Admin
        } else {
            Role::User
        };
        let mut directory = self.users();
        let profile = match directory.iter_mut().find(|profile| profile.email == email) {
            Some(existing) => {
                if role == Role::Admin {
                    existing.role = Role::Admin;
                }
                existing.clone()
            }
            None => {
                let profile = UserProfile::new(&email, name, role)?;
                directory.push(profile.clone());
                let mut ledger = CreditLedger::load(&self.store, &profile.id);
                ledger.deposit(self.config.starting_credits);
                ledger.save(&mut self.store, &profile.id)?;
                record_transaction(
                    &mut self.store,
                    Transaction::grant(&profile.id, self.config.starting_credits, "welcome"),
                )?;
                profile
            }
        };
        self.store.set(keys::USER_DIRECTORY, &directory)?;
        self.store.set(keys::USER_PROFILE, &Some(profile.clone()))?;
        self.session = Session::User(profile.clone());
        self.emit(
            EventKind::SignedIn,
            json!({"user_id": profile.id, "role": profile.role}),
        );
        Ok(profile)
    }

    pub fn sign_out(&mut self) -> Result<()> {
        let previous = self.session.owner_id().to_string();
        self.store.remove(keys::USER_PROFILE)?;
        self.session = Session::Guest;
        self.emit(EventKind::SignedOut, json!({"user_id": previous}));
        Ok(())
    }

    pub fn guest_uses(&self) -> u32 {
        self.store.get(keys::GUEST_USAGE, 0u32)
    }

    pub fn balance(&self) -> Option<u64> {
        self.current_user()
            .map(|user| CreditLedger::load(&self.store, &user.id).balance())
    }

    // Generation

    pub fn submit(&mut self, submission: Submission) -> Result<GenerationOutcome, StudioError> {
        self.submit_with_cancel(submission, &CancelToken::new())
    }

    /// Validates, charges, runs the pipeline and settles the ledger.
    ///
    /// Credits are kept only when the image came from the real service;
    /// mock substitutions, surfaced failures and cancellations are refunded.
    pub fn submit_with_cancel(
        &mut self,
        submission: Submission,
        cancel: &CancelToken,
    ) -> Result<GenerationOutcome, StudioError> {
        let request = match GenerationRequest::try_from(submission) {
            Ok(request) => request,
            Err(err) => return Err(self.reject(err, None)),
        };
        let mode = request.mode;
        let cost = self.cost_for(mode);
        let owner_id = self.session.owner_id().to_string();

        let ledger = match self.current_user() {
            None => {
                if self.guest_uses() >= GUEST_FREE_GENERATIONS {
                    return Err(self.reject(GenerationError::AuthenticationRequired, Some(mode)));
                }
                None
            }
            Some(user) => {
                let ledger = CreditLedger::load(&self.store, &user.id);
                if !ledger.can_afford(cost) {
                    let err = GenerationError::InsufficientCredits {
                        balance: ledger.balance(),
                        cost,
                    };
                    return Err(self.reject(err, Some(mode)));
                }
                Some(ledger)
            }
        };

        let balance_before = ledger.as_ref().map(CreditLedger::balance);
        let mut progress = ChargeProgress::default();
        let outcome = self.charge_and_generate(request, ledger, cost, cancel, &mut progress);
        if outcome.is_err() && progress.charged && !progress.refunded {
            if let Some(balance) = balance_before {
                self.undo_charge(&owner_id, balance, cost, mode, progress.recorded);
            }
        }
        outcome
    }

    fn charge_and_generate(
        &mut self,
        request: GenerationRequest,
        mut ledger: Option<CreditLedger>,
        cost: u64,
        cancel: &CancelToken,
        progress: &mut ChargeProgress,
    ) -> Result<GenerationOutcome, StudioError> {
        let mode = request.mode;
        let owner_id = self.session.owner_id().to_string();

        if let Some(ledger) = ledger.as_mut() {
            ledger.charge(cost)?;
            progress.charged = true;
            ledger.save(&mut self.store, &owner_id)?;
            record_transaction(&mut self.store, Transaction::charge(&owner_id, cost, mode.as_str()))?;
            progress.recorded = true;
            self.emit(
                EventKind::CreditsCharged,
                json!({"user_id": owner_id, "credits": cost, "balance": ledger.balance()}),
            );
        }

        self.emit(
            EventKind::GenerationStarted,
            json!({
                "user_id": owner_id,
                "mode": mode,
                "quality_hint": request.quality_hint,
                "source_image": request.source_image.fingerprint(),
            }),
        );

        let credential = self.credential();
        let preferences = self.preferences();
        let preferences = (mode == Mode::Humanize && !preferences.is_empty()).then_some(&preferences);
        let result = self
            .pipeline
            .run(&request, credential.as_ref(), preferences, cancel);

        if ledger.is_none() && !matches!(result, Err(GenerationError::Cancelled)) {
            let uses = self.guest_uses().saturating_add(1);
            self.store.set(keys::GUEST_USAGE, &uses)?;
        }

        let kept = matches!(&result, Ok(generated) if generated.source == ResultSource::Service);
        let mut credits_charged = 0;
        if let Some(ledger) = ledger.as_mut() {
            if kept {
                credits_charged = cost;
            } else {
                ledger.refund(cost);
                ledger.save(&mut self.store, &owner_id)?;
                record_transaction(&mut self.store, Transaction::refund(&owner_id, cost, mode.as_str()))?;
                progress.refunded = true;
                self.emit(
                    EventKind::CreditsRefunded,
                    json!({"user_id": owner_id, "credits": cost, "balance": ledger.balance()}),
                );
            }
        }

        let result = match result {
            Ok(result) => result,
            Err(err) => return Err(self.reject(err, Some(mode))),
        };

        let api_cost_usd = if kept { self.config.costs.api_cost_usd } else { 0.0 };
        let fallback_code = result.fallback.as_ref().map(|fallback| fallback.code());
        record_usage(
            &mut self.store,
            UsageEntry::new(&owner_id, mode, credits_charged, api_cost_usd, result.source, fallback_code),
        )?;
        if let Some(code) = fallback_code {
            self.emit(
                EventKind::GenerationFallback,
                json!({"user_id": owner_id, "mode": mode, "reason": code}),
            );
        }
        self.emit(
            EventKind::GenerationFinished,
            json!({
                "user_id": owner_id,
                "mode": mode,
                "source": result.source,
                "credits": credits_charged,
                "result_image": result.image.fingerprint(),
            }),
        );

        Ok(GenerationOutcome {
            request,
            result,
            credits_charged,
            balance: ledger.map(|ledger| ledger.balance()),
        })
    }

    /// Puts the balance back after a submission failed between charge and
    /// settlement. Best effort: the store may be the thing that failed.
    fn undo_charge(&mut self, owner_id: &str, balance: u64, cost: u64, mode: Mode, recorded: bool) {
        if let Err(err) = CreditLedger::new(balance).save(&mut self.store, owner_id) {
            tracing::warn!(user_id = owner_id, error = %format!("{err:#}"), "failed to restore balance");
        }
        if recorded {
            let refund = Transaction::refund(owner_id, cost, mode.as_str());
            if let Err(err) = record_transaction(&mut self.store, refund) {
                tracing::warn!(user_id = owner_id, error = %format!("{err:#}"), "failed to record refund");
            }
        }
        self.emit(
            EventKind::CreditsRefunded,
            json!({"user_id": owner_id, "credits": cost, "balance": balance}),
        );
    }

    fn reject(&self, err: GenerationError, mode: Option<Mode>) -> StudioError {
        let preflight = err.is_preflight();
        tracing::info!(code = err.code(), preflight, "generation rejected");
        self.emit(
            EventKind::GenerationRejected,
            json!({
                "user_id": self.session.owner_id(),
                "mode": mode,
                "code": err.code(),
                "preflight": preflight,
            }),
        );
        StudioError::Generation(err)
    }

    // Projects

    pub fn save_project(&mut self, outcome: &GenerationOutcome) -> Result<Project> {
        let owner_id = self.session.owner_id().to_string();
        let project = save_project(
            &mut self.store,
            &owner_id,
            &outcome.request.instruction,
            outcome.request.mode,
            outcome.request.source_image.clone(),
            outcome.result.image.clone(),
        )?;
        self.emit(
            EventKind::ProjectSaved,
            json!({"user_id": owner_id, "project_id": project.id}),
        );
        Ok(project)
    }

    pub fn projects(&self) -> Vec<Project> {
        projects_for(&self.store, self.session.owner_id())
    }

    pub fn project(&self, id: &str) -> Option<Project> {
        find_project(&self.store, id).filter(|project| project.owner_id == self.session.owner_id())
    }

    pub fn delete_project(&mut self, id: &str) -> Result<bool> {
        let owner_id = self.session.owner_id().to_string();
        let removed = delete_project(&mut self.store, &owner_id, id)?;
        if removed {
            self.emit(
                EventKind::ProjectDeleted,
                json!({"user_id": owner_id, "project_id": id}),
            );
        }
        Ok(removed)
    }

    // Credits

    pub fn packages(&self) -> Vec<CreditPackage> {
        list_packages(&self.store)
    }

    /// Mock checkout: credits the package to the signed-in user.
    pub fn purchase(&mut self, package_id: &str) -> Result<Transaction> {
        let Some(user) = self.current_user().cloned() else {
            bail!("sign in to buy credits");
        };
        let Some(package) = find_package(&self.store, package_id) else {
            bail!("unknown credit package '{}'", package_id.trim());
        };
        let mut ledger = CreditLedger::load(&self.store, &user.id);
        ledger.deposit(package.credits);
        ledger.save(&mut self.store, &user.id)?;
        let tx = Transaction::purchase(&user.id, &package.id, package.credits, package.price_usd);
        record_transaction(&mut self.store, tx.clone())?;
        self.emit(
            EventKind::CreditsPurchased,
            json!({
                "user_id": user.id,
                "package_id": package.id,
                "credits": package.credits,
                "amount_usd": package.price_usd,
                "balance": ledger.balance(),
            }),
        );
        Ok(tx)
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.current_user()
            .map(|user| transactions_for(&self.store, &user.id))
            .unwrap_or_default()
    }

    // Preferences

    pub fn preferences(&self) -> StylePreferences {
        let all: BTreeMap<String, StylePreferences> =
            self.store.get(keys::STYLE_PREFERENCES, BTreeMap::new());
        all.get(self.session.owner_id()).cloned().unwrap_or_default()
    }

    pub fn set_preferences(&mut self, preferences: StylePreferences) -> Result<()> {
        let mut all: BTreeMap<String, StylePreferences> =
            self.store.get(keys::STYLE_PREFERENCES, BTreeMap::new());
        let owner_id = self.session.owner_id().to_string();
        if preferences.is_empty() {
            all.remove(&owner_id);
        } else {
            all.insert(owner_id, preferences);
        }
        self.store.set(keys::STYLE_PREFERENCES, &all)
    }

    pub fn language(&self) -> String {
        self.store
            .get(keys::LANGUAGE, DEFAULT_LANGUAGE.to_string())
    }

    pub fn set_language(&mut self, raw: &str) -> Result<String> {
        let code = normalize_language(raw)?;
        self.store.set(keys::LANGUAGE, &code)?;
        Ok(code)
    }

    // Admin

    fn require_admin(&self) -> Result<&UserProfile> {
        match self.current_user() {
            Some(user) if user.is_admin() => Ok(user),
            Some(_) => bail!("admin access required"),
            None => bail!("sign in as an admin first"),
        }
    }

    pub fn admin_settings(&self) -> Result<AdminSettings> {
        self.require_admin()?;
        Ok(AdminSettings::load(&self.store).redacted())
    }

    pub fn update_admin_settings(&mut self, update: impl FnOnce(&mut AdminSettings)) -> Result<AdminSettings> {
        let admin_id = self.require_admin()?.id.clone();
        let mut settings = AdminSettings::load(&self.store);
        update(&mut settings);
        settings.save(&mut self.store)?;
        self.apply_admin_settings();
        self.emit(
            EventKind::AdminSettingsUpdated,
            json!({
                "user_id": admin_id,
                "credential_configured": self.credential().is_some(),
            }),
        );
        Ok(settings.redacted())
    }

    pub fn set_packages(&mut self, packages: &[CreditPackage]) -> Result<()> {
        self.require_admin()?;
        replace_packages(&mut self.store, packages)
    }

    pub fn financial_report(&self) -> Result<FinancialReport> {
        self.require_admin()?;
        Ok(financial_report(
            &self.users(),
            &list_transactions(&self.store),
            &list_usage(&self.store),
        ))
    }

    /// The newest `limit` events across all sessions, oldest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<StudioEvent>> {
        self.require_admin()?;
        let mut events = read_events(self.events.path())?;
        let skip = events.len().saturating_sub(limit);
        Ok(events.split_off(skip))
    }

    fn apply_admin_settings(&mut self) {
        let settings = AdminSettings::load(&self.store);
        let model = settings
            .image_model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(self.config.image_model.as_str())
            .to_string();
        self.pipeline.set_model(model);
        let mock_url = settings
            .mock_image_url
            .clone()
            .or_else(|| self.config.mock_image_url.clone());
        self.pipeline.mock_mut().set_reference_url(mock_url);
    }

    fn emit(&self, kind: EventKind, fields: Value) {
        if let Err(err) = self.events.record(kind, fields) {
            tracing::warn!(event = kind.as_str(), error = %err, "failed to record event");
        }
    }
}
