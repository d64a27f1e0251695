use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("Contract '{0}' not found")]
    NotFound(String),
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Payload for '{contract}' is missing required field '{field}'")]
    MissingField { contract: String, field: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub topic: String,
    pub schema: serde_json::Value,
}

impl Contract {
    fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.schema
            .get("required")
            .and_then(|r| r.as_array())
            .into_iter()
            .flatten()
            .filter_map(|f| f.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    contracts: BTreeMap<String, Contract>, // "stats@v1" -> Contract
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` contract of a directory. Unreadable files are skipped.
    pub async fn load_contracts_from_dir<P: AsRef<Path>>(contracts_dir: P) -> Result<Self, ContractError> {
        let mut registry = Self::new();
        let mut entries = fs::read_dir(contracts_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("[contracts] failed to read {}: {e}", path.display());
                    continue;
                }
            };
            match serde_json::from_str::<Contract>(&content) {
                Ok(contract) => registry.insert(contract),
                Err(e) => warn!("[contracts] invalid JSON in {}: {e}", path.display()),
            }
        }

        Ok(registry)
    }

    pub fn insert(&mut self, contract: Contract) {
        let name = extract_contract_name(&contract.topic);
        info!("[contracts] loaded contract: {name}");
        self.contracts.insert(name, contract);
    }

    /// Parses the payload and checks the contract's top-level `required` fields.
    /// Topics without a contract only need to be valid JSON.
    pub fn validate_message(&self, topic: &str, payload: &[u8]) -> Result<serde_json::Value, ContractError> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        let name = extract_contract_name(topic);

        if let Some(contract) = self.contracts.get(&name) {
            for field in contract.required_fields() {
                if value.get(field).is_none() {
                    return Err(ContractError::MissingField { contract: name, field: field.to_string() });
                }
            }
        }
        Ok(value)
    }

    pub fn list_contracts(&self) -> Vec<String> {
        self.contracts.keys().cloned().collect()
    }

    pub fn get_contract(&self, contract_name: &str) -> Result<&Contract, ContractError> {
        self.contracts
            .get(contract_name)
            .ok_or_else(|| ContractError::NotFound(contract_name.to_string()))
    }
}

/// "crowdwatch/zones/stats@v1" -> "stats@v1"
fn extract_contract_name(topic: &str) -> String {
    topic.rsplit('/').next().unwrap_or(topic).to_string()
}
