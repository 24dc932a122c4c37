//! Starts an experiment through the control plane's HTTP API.
//!
//! The request runs on its own task. The event connection never waits on
//! it, and a failed launch is logged without affecting the observer.

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::LaunchConfig;
use crate::error::ObserverError;

/// Body of `POST /api/experiments`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LaunchRequest<'a> {
    experiment_type: &'a str,
    parameters: &'a Map<String, Value>,
}

/// HTTP client for the launch endpoint.
#[derive(Debug, Clone)]
pub struct Launcher {
    client: reqwest::Client,
    endpoint: String,
}

impl Launcher {
    /// A launcher posting to `{base_url}/api/experiments`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/experiments", base_url.trim_end_matches('/')),
        }
    }

    /// The full endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ask the control plane to start an experiment.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::Launch`] if the request fails or the server
    /// answers with a non-success status.
    pub async fn launch(
        &self,
        experiment_type: &str,
        parameters: &Map<String, Value>,
    ) -> Result<(), ObserverError> {
        let body = LaunchRequest {
            experiment_type,
            parameters,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ObserverError::Launch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ObserverError::Launch(format!("{status}: {text}")));
        }
        Ok(())
    }
}

/// Run the configured launch in the background and log the result.
pub fn spawn_launch(config: LaunchConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let launcher = Launcher::new(&config.base_url);
        info!(
            endpoint = launcher.endpoint(),
            experiment_type = config.experiment_type,
            "launching experiment"
        );
        match launcher
            .launch(&config.experiment_type, &config.parameters)
            .await
        {
            Ok(()) => info!(experiment_type = config.experiment_type, "experiment launched"),
            Err(e) => error!(error = %e, "experiment launch failed"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_url() {
        assert_eq!(
            Launcher::new("http://control:8000/").endpoint(),
            "http://control:8000/api/experiments"
        );
        assert_eq!(
            Launcher::new("http://control:8000").endpoint(),
            "http://control:8000/api/experiments"
        );
    }

    #[test]
    fn request_body_uses_camel_case() {
        let mut parameters = Map::new();
        parameters.insert("max_agents".to_owned(), Value::from(8));
        let body = LaunchRequest {
            experiment_type: "self_replication",
            parameters: &parameters,
        };
        let json = serde_json::to_value(&body).unwrap_or_default();
        assert_eq!(
            json,
            serde_json::json!({
                "experimentType": "self_replication",
                "parameters": {"max_agents": 8}
            })
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_launch_error() {
        let launcher = Launcher::new("http://127.0.0.1:1");
        let result = launcher.launch("self_replication", &Map::new()).await;
        assert!(matches!(result, Err(ObserverError::Launch(_))));
    }
}
