use crate::auth::UserManager;
use crate::config::ConsoleConfig;
use crate::connection::{ConnectionConfig, FileConnectionConfig};
use crate::db::Database;
use crate::errors::AppResult;
use crate::logging::LogSinks;
use crate::models::{
    ActionOutcome, ApplyReport, AutostartReport, ServiceAction, Transition, UserAction,
};
use crate::pipeline::SettingsPipeline;
use crate::session::SessionManager;
use crate::settings::SettingsStore;
use crate::supervisor::Supervisor;
use crate::views::{
    ApiView, LoggingView, MainView, ParsersView, ServerView, ServicesView, UsersView, WebUiView,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct Console {
    store: Arc<dyn SettingsStore>,
    connection: Arc<dyn ConnectionConfig>,
    supervisor: Arc<Supervisor>,
    pipeline: Arc<SettingsPipeline>,
    users: UserManager,
    sessions: SessionManager,
}

impl Console {
    pub fn open(config: &ConsoleConfig, config_path: &Path, logs: Arc<LogSinks>) -> AppResult<Self> {
        let db = Arc::new(Database::new(&config.database)?);
        db.ensure_parser_settings(&config.parsers)?;
        let users = UserManager::new(db.clone());
        users.ensure_admin(&config.admin_password)?;

        let connection: Arc<dyn ConnectionConfig> = Arc::new(FileConnectionConfig::new(config_path));
        Ok(Self::new(db, connection, users, logs, config))
    }

    pub fn new(
        db: Arc<Database>,
        connection: Arc<dyn ConnectionConfig>,
        users: UserManager,
        logs: Arc<LogSinks>,
        config: &ConsoleConfig,
    ) -> Self {
        let store: Arc<dyn SettingsStore> = db;
        let supervisor = Arc::new(Supervisor::new(
            &config.parsers,
            store.clone(),
            config.stop_policy(),
        ));
        let pipeline = Arc::new(SettingsPipeline::new(
            store.clone(),
            connection.clone(),
            logs,
            supervisor.clone(),
        ));
        Self {
            store,
            connection,
            supervisor,
            pipeline,
            users,
            sessions: SessionManager::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub async fn boot(&self) -> AppResult<Option<AutostartReport>> {
        self.pipeline.refresh_logging();
        if !self.store.get("autostart")?.bool_value() {
            tracing::info!("autostart disabled, parsers left stopped");
            return Ok(None);
        }
        Ok(Some(self.supervisor.autostart().await))
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    pub async fn login(&self, username: &str, password: &str) -> AppResult<Option<String>> {
        if !self.users.authenticate(username, password)? {
            tracing::info!(user = %username, "login rejected");
            return Ok(None);
        }
        let token = self.sessions.open_session(username).await;
        tracing::info!(user = %username, "login succeeded");
        Ok(Some(token))
    }

    pub async fn logout(&self, token: &str) -> bool {
        self.sessions.close_session(token).await
    }

    pub async fn is_authenticated(&self, token: Option<&str>) -> bool {
        self.caller(token).await.is_some()
    }

    async fn caller(&self, token: Option<&str>) -> Option<String> {
        match token {
            Some(token) => self.sessions.username(token).await,
            None => None,
        }
    }

    pub async fn submit_settings(
        &self,
        token: Option<&str>,
        raw: &BTreeMap<String, String>,
    ) -> AppResult<ActionOutcome<ApplyReport>> {
        let Some(user) = self.caller(token).await else {
            tracing::debug!(keys = raw.len(), "ignoring settings submission without session");
            return Ok(ActionOutcome::Ignored);
        };
        tracing::info!(user = %user, keys = raw.len(), "settings submitted");
        Ok(ActionOutcome::Applied(self.pipeline.apply(raw).await?))
    }

    pub async fn user_action(
        &self,
        token: Option<&str>,
        action: UserAction,
    ) -> AppResult<ActionOutcome<()>> {
        let Some(user) = self.caller(token).await else {
            tracing::debug!("ignoring user action without session");
            return Ok(ActionOutcome::Ignored);
        };
        match action {
            UserAction::Create { username, password } => {
                self.users.create(&username, &password)?;
                tracing::info!(user = %user, target = %username, "user created");
            }
            UserAction::Update { username, password } => {
                self.users.update(&username, &password)?;
                tracing::info!(user = %user, target = %username, "user password updated");
            }
            UserAction::Remove { username } => {
                self.users.remove(&username)?;
                self.sessions.close_user_sessions(&username).await;
                tracing::info!(user = %user, target = %username, "user removed");
            }
        }
        Ok(ActionOutcome::Applied(()))
    }

    pub async fn service_action(
        &self,
        token: Option<&str>,
        parser: &str,
        action: ServiceAction,
    ) -> AppResult<ActionOutcome<Transition>> {
        let Some(user) = self.caller(token).await else {
            tracing::debug!(parser, "ignoring service action without session");
            return Ok(ActionOutcome::Ignored);
        };
        tracing::info!(user = %user, parser, action = ?action, "service action requested");
        let transition = match action {
            ServiceAction::Start => self.supervisor.start(parser).await?,
            ServiceAction::Stop => self.supervisor.stop(parser).await?,
            ServiceAction::Restart => self.supervisor.restart(parser).await?,
        };
        Ok(ActionOutcome::Applied(transition))
    }

    pub async fn main_view(&self, token: Option<&str>) -> AppResult<MainView> {
        MainView::load(self.store.as_ref(), self.is_authenticated(token).await)
    }

    pub async fn api_view(&self, token: Option<&str>) -> AppResult<ApiView> {
        let auth = self.is_authenticated(token).await;
        ApiView::load(self.store.as_ref(), self.connection.as_ref(), auth)
    }

    pub async fn server_view(&self, token: Option<&str>) -> AppResult<ServerView> {
        ServerView::load(self.store.as_ref(), self.is_authenticated(token).await)
    }

    pub async fn logging_view(&self, token: Option<&str>) -> AppResult<LoggingView> {
        LoggingView::load(self.store.as_ref(), self.is_authenticated(token).await)
    }

    pub async fn webui_view(&self, token: Option<&str>) -> AppResult<WebUiView> {
        WebUiView::load(self.store.as_ref(), self.is_authenticated(token).await)
    }

    pub async fn parsers_view(&self, token: Option<&str>) -> AppResult<ParsersView> {
        let auth = self.is_authenticated(token).await;
        ParsersView::load(self.store.as_ref(), self.supervisor.parsers(), auth)
    }

    pub async fn services_view(&self, token: Option<&str>) -> AppResult<ServicesView> {
        Ok(ServicesView {
            auth: self.is_authenticated(token).await,
            parsers: self.supervisor.status().await?,
        })
    }

    pub async fn users_view(&self, token: Option<&str>) -> AppResult<UsersView> {
        Ok(UsersView {
            auth: self.is_authenticated(token).await,
            users: self.users.list()?,
        })
    }
}
