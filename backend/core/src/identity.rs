//! Character-identity client — fetches current character and world facts
//! from a TibiaData-compatible API.
//!
//! This collaborator is optional to every core flow: lookups are
//! timeout-bounded and a failure surfaces as [`CoreError::Upstream`] (or
//! `NotFound` for an unknown character) without touching ledger state.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::{CoreError, Result};

// ─────────────────────────────────────────────────────────
// Upstream response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CharacterResponse {
    character: Option<CharacterEnvelope>,
}

#[derive(Debug, Deserialize)]
struct CharacterEnvelope {
    character: Option<CharacterInfo>,
}

#[derive(Debug, Deserialize)]
struct CharacterInfo {
    name: Option<String>,
    level: Option<i64>,
    vocation: Option<String>,
    world: Option<String>,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorldsResponse {
    worlds: Option<WorldsEnvelope>,
}

#[derive(Debug, Deserialize)]
struct WorldsEnvelope {
    #[serde(default)]
    regular_worlds: Vec<WorldInfo>,
    #[serde(default)]
    tournament_worlds: Vec<WorldInfo>,
}

#[derive(Debug, Deserialize)]
struct WorldInfo {
    name: Option<String>,
    location: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────

/// Verified facts about a named character, as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterFacts {
    pub name: String,
    pub level: i64,
    pub vocation: String,
    pub world: String,
    pub comment: Option<String>,
}

/// A world known to the upstream game service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldFacts {
    pub name: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IdentityClient {
    client: Client,
    base_url: String,
}

impl IdentityClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.identity_timeout_secs))
            .build()
            .map_err(|e| CoreError::Upstream(e.to_string()))?;

        Ok(IdentityClient {
            client,
            base_url: config.identity_api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch current level, vocation, and world for a named character.
    pub async fn fetch_character_facts(&self, name: &str) -> Result<CharacterFacts> {
        let url = format!("{}/character/{}", self.base_url, name);
        debug!("Fetching character facts from {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            warn!("Identity API returned {} for character '{name}'", response.status());
            return Err(CoreError::Upstream(format!(
                "identity API returned {}",
                response.status()
            )));
        }

        let body: CharacterResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Upstream(e.to_string()))?;

        parse_character(name, body)
    }

    /// Fetch the upstream world list, for syncing into the registry.
    pub async fn fetch_worlds(&self) -> Result<Vec<WorldFacts>> {
        let url = format!("{}/worlds", self.base_url);

        let body: WorldsResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| CoreError::Upstream(e.to_string()))?;

        let envelope = body.worlds.unwrap_or(WorldsEnvelope {
            regular_worlds: Vec::new(),
            tournament_worlds: Vec::new(),
        });

        let worlds = envelope
            .regular_worlds
            .into_iter()
            .chain(envelope.tournament_worlds)
            .filter_map(|w| {
                w.name.map(|name| WorldFacts {
                    name,
                    location: w.location,
                })
            })
            .collect();

        Ok(worlds)
    }
}

/// Decode the nested character envelope. An empty or name-less payload means
/// the character does not exist upstream.
fn parse_character(requested: &str, body: CharacterResponse) -> Result<CharacterFacts> {
    let info = body
        .character
        .and_then(|c| c.character)
        .ok_or_else(|| CoreError::NotFound {
            entity: "Character",
            name: requested.to_string(),
        })?;

    let name = match info.name {
        Some(name) if !name.is_empty() => name,
        _ => {
            return Err(CoreError::NotFound {
                entity: "Character",
                name: requested.to_string(),
            })
        }
    };

    Ok(CharacterFacts {
        name,
        level: info.level.unwrap_or(0),
        vocation: info.vocation.unwrap_or_else(|| "None".to_string()),
        world: info.world.unwrap_or_default(),
        comment: info.comment,
    })
}

#[cfg(test)]
pub(crate) fn parse_character_json(requested: &str, json: &str) -> Result<CharacterFacts> {
    let body: CharacterResponse =
        serde_json::from_str(json).map_err(|e| CoreError::Upstream(e.to_string()))?;
    parse_character(requested, body)
}
