use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use coordination::{AgentRole, RefinementPolicy, VoterPanel};
use serde::{Deserialize, Serialize};

/// An OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Base URL up to and including `/v1`
    pub url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.3
}

impl Endpoint {
    fn from_env() -> Self {
        Self {
            url: std::env::var("SWARM_BASE_URL").unwrap_or_else(|_| "http://localhost:8080/v1".into()),
            model: std::env::var("SWARM_MODEL").unwrap_or_else(|_| "qwen2.5-coder-14b-instruct".into()),
            api_key: std::env::var("SWARM_API_KEY").ok().filter(|k| !k.is_empty()),
            temperature: default_temperature(),
        }
    }

    /// Full URL of the chat-completions route.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.url.trim_end_matches('/'))
    }
}

/// One member of the voting panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterConfig {
    pub id: String,
    /// Falls back to the validation-vote endpoint, then the default endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Text files indexed by the keyword retriever
    pub documents: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Pretty JSON run result
    pub run_result: PathBuf,
    /// JSONL phase-event log
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            run_result: PathBuf::from("swarm-run.json"),
            events: std::env::var("SWARM_EVENTS_PATH").ok().map(PathBuf::from),
        }
    }
}

/// Top-level swarm configuration.
///
/// Defaults come from the environment (`SWARM_BASE_URL`, `SWARM_MODEL`,
/// `SWARM_API_KEY`, `SWARM_MAX_ROUNDS`, `SWARM_EVENTS_PATH`); a TOML file
/// overrides any subset of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Endpoint used by every role without an override
    pub endpoint: Endpoint,
    /// Role name -> endpoint override
    pub roles: BTreeMap<String, Endpoint>,
    pub voters: Vec<VoterConfig>,
    pub policy: RefinementPolicy,
    pub retrieval: RetrievalConfig,
    pub output: OutputConfig,
    /// Whole-request HTTP timeout; the per-call policy timeout is separate
    pub http_timeout_secs: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        let mut policy = RefinementPolicy::default();
        if let Some(max_rounds) = std::env::var("SWARM_MAX_ROUNDS").ok().and_then(|v| v.parse().ok()) {
            policy.max_rounds = max_rounds;
        }
        Self {
            endpoint: Endpoint::from_env(),
            roles: BTreeMap::new(),
            voters: (1..=3)
                .map(|i| VoterConfig {
                    id: format!("voter-{i}"),
                    endpoint: None,
                })
                .collect(),
            policy,
            retrieval: RetrievalConfig::default(),
            output: OutputConfig::default(),
            http_timeout_secs: 300,
        }
    }
}

impl SwarmConfig {
    /// Environment defaults, overridden by `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render config as TOML")
    }

    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        self.voter_panel()?;
        for name in self.roles.keys() {
            name.parse::<AgentRole>().map_err(anyhow::Error::msg)?;
        }
        if self.endpoint.url.trim().is_empty() {
            bail!("endpoint.url must not be empty");
        }
        Ok(())
    }

    /// Endpoint for `role`: its override, else the default endpoint.
    pub fn endpoint_for(&self, role: AgentRole) -> &Endpoint {
        self.roles
            .iter()
            .find(|(name, _)| name.parse::<AgentRole>().ok() == Some(role))
            .map(|(_, ep)| ep)
            .unwrap_or(&self.endpoint)
    }

    pub fn voter_panel(&self) -> Result<VoterPanel> {
        Ok(VoterPanel::new(self.voters.iter().map(|v| v.id.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SwarmConfig::default();
        config.validate().unwrap();
        assert_eq!(config.voters.len(), 3);
        assert!(config.endpoint.completions_url().ends_with("/chat/completions"));
    }

    #[test]
    fn test_toml_overrides_subset() {
        let config = SwarmConfig::from_toml(
            r#"
            http_timeout_secs = 60

            [endpoint]
            url = "http://gpu-01:8000/v1/"
            model = "coder"

            [roles.validation_vote]
            url = "http://gpu-02:8000/v1"
            model = "judge"
            temperature = 0.1

            [policy]
            max_rounds = 7
            escalation_top_k = 2

            [[voters]]
            id = "strict"

            [output]
            run_result = "runs/latest.json"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.http_timeout_secs, 60);
        assert_eq!(config.endpoint.completions_url(), "http://gpu-01:8000/v1/chat/completions");
        assert_eq!(config.policy.max_rounds, 7);
        assert_eq!(config.policy.persistence_threshold, 0.3);
        assert_eq!(config.endpoint_for(AgentRole::ValidationVote).model, "judge");
        assert_eq!(config.endpoint_for(AgentRole::Cleaning).model, "coder");
        assert_eq!(config.voter_panel().unwrap().len(), 1);
        assert_eq!(config.output.run_result, PathBuf::from("runs/latest.json"));
    }

    #[test]
    fn test_rejects_even_panel_and_unknown_role() {
        let even = SwarmConfig::from_toml(
            r#"
            [[voters]]
            id = "a"
            [[voters]]
            id = "b"
            "#,
        )
        .unwrap();
        assert!(even.validate().is_err());

        let unknown = SwarmConfig::from_toml(
            r#"
            [roles.judge]
            url = "http://x/v1"
            model = "m"
            "#,
        )
        .unwrap();
        assert!(unknown.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.toml");
        std::fs::write(&path, "[policy]\nmax_rounds = 2\n").unwrap();
        let config = SwarmConfig::load(Some(&path)).unwrap();
        assert_eq!(config.policy.max_rounds, 2);
        assert!(SwarmConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
