use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

pub mod settings;
pub mod store;


pub use settings::{apply_updates, AgentSettings, SettingsError};
pub use store::TenantStore;

/// A configured chatbot owned by one user account.
///
/// The unit of ownership for integration records.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: i64,
    pub owner_id: String,
    pub settings: AgentSettings,
}

/// Registry of sessions and agents.
///
/// Resolves a session token to its user and an agent to its owner.
///
/// When backed by a [`TenantStore`], a cache miss falls through to the store
/// so rows written after startup are still seen.
pub struct TenantRegistry {
    /// Session token -> user id
    sessions: Arc<DashMap<String, String>>,
    /// Agent id -> Agent
    agents: Arc<DashMap<i64, Agent>>,
    store: Option<Arc<TenantStore>>,
}

impl TenantRegistry {
    /// Create new empty registry
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            agents: Arc::new(DashMap::new()),
            store: None,
        }
    }

    /// Build a registry from everything persisted in `store`, keeping the
    /// store for later cache misses.
    pub fn load(store: Arc<TenantStore>) -> anyhow::Result<Self> {
        let registry = Self {
            store: Some(Arc::clone(&store)),
            ..Self::new()
        };
        for (token, user_id) in store.load_sessions()? {
            registry.add_session(&token, &user_id);
        }
        for agent in store.load_agents()? {
            registry.add_agent(agent);
        }
        Ok(registry)
    }

    pub fn add_session(&self, token: &str, user_id: &str) {
        self.sessions.insert(token.to_string(), user_id.to_string());
    }

    /// Look up the user owning a session token
    pub fn user_for_token(&self, token: &str) -> Option<String> {
        if let Some(user) = self.sessions.get(token) {
            return Some(user.clone());
        }
        let store = self.store.as_ref()?;
        match store.find_session(token) {
            Ok(Some(user_id)) => {
                self.add_session(token, &user_id);
                Some(user_id)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Session lookup failed");
                None
            }
        }
    }

    pub fn add_agent(&self, agent: Agent) {
        self.agents.insert(agent.id, agent);
    }

    pub fn get_agent(&self, agent_id: i64) -> Option<Agent> {
        if let Some(agent) = self.agents.get(&agent_id) {
            return Some(agent.clone());
        }
        let store = self.store.as_ref()?;
        match store.find_agent(agent_id) {
            Ok(Some(agent)) => {
                self.add_agent(agent.clone());
                Some(agent)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(agent_id, error = %e, "Agent lookup failed");
                None
            }
        }
    }

    /// Replace an agent's settings. Returns `false` if the agent is unknown.
    pub fn update_settings(&self, agent_id: i64, settings: AgentSettings) -> bool {
        if self.get_agent(agent_id).is_none() {
            return false;
        }
        match self.agents.get_mut(&agent_id) {
            Some(mut agent) => {
                agent.settings = settings;
                true
            }
            None => false,
        }
    }

    /// Validate that `user_id` owns `agent_id`
    ///
    /// A missing agent and someone else's agent are the same error, so
    /// callers cannot tell which agent ids exist.
    pub fn validate_owner(&self, user_id: &str, agent_id: i64) -> Result<Agent, OwnershipError> {
        match self.get_agent(agent_id) {
            Some(agent) if agent.owner_id == user_id => Ok(agent),
            _ => Err(OwnershipError),
        }
    }

    /// Get count of cached agents
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The agent is missing or belongs to another user.
#[derive(Debug, PartialEq)]
pub struct OwnershipError;
