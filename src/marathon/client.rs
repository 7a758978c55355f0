//! Orchestrator REST client

use super::app::App;
use crate::error::Result;
use serde::Deserialize;
use std::net::IpAddr;
use tracing::debug;

/// Client for the orchestrator's application API
#[derive(Debug, Clone)]
pub struct MarathonClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct AppEnvelope {
    app: App,
}

#[derive(Deserialize)]
struct AppsEnvelope {
    apps: Vec<App>,
}

impl MarathonClient {
    /// Client for the orchestrator at `ip:port`
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self::with_base_url(format!("http://{ip}:{port}"))
    }

    /// Client for an explicit base URL (tests point this at a fake)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Fetch a single application with its tasks
    pub async fn get_app(&self, app_id: &str) -> Result<App> {
        let url = format!(
            "{}/v2/apps{}?embed=apps.tasks",
            self.base_url,
            Self::rooted(app_id)
        );
        debug!(%url, "fetching app");

        let envelope: AppEnvelope = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(envelope.app)
    }

    /// Fetch every application, tasks embedded
    pub async fn get_apps(&self) -> Result<Vec<App>> {
        let url = format!("{}/v2/apps?embed=apps.tasks", self.base_url);
        debug!(%url, "fetching all apps");

        let envelope: AppsEnvelope = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(envelope.apps)
    }

    /// App ids are rooted paths (`/prod/web`); tolerate a missing slash
    fn rooted(app_id: &str) -> String {
        if app_id.starts_with('/') {
            app_id.to_string()
        } else {
            format!("/{app_id}")
        }
    }
}
