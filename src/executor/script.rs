//! Script loading, validation, and hashing

use super::stdlib::StdlibFunc;
use super::types::{FunctionDef, Script};
use crate::error::EngineError;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

impl Script {
    /// Parse a JSON-encoded script and validate it
    pub fn from_json(source: &str) -> Result<Script, EngineError> {
        let script: Script = serde_json::from_str(source)
            .map_err(|e| EngineError::InvalidScript(format!("malformed script: {}", e)))?;
        script.validate()?;
        Ok(script)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Reject scripts whose routines cannot be resolved unambiguously
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for function in &self.functions {
            if !seen.insert(function.name.as_str()) {
                return Err(EngineError::InvalidScript(format!(
                    "function '{}' is defined more than once",
                    function.name
                )));
            }
            if StdlibFunc::from_name(&function.name).is_some() {
                return Err(EngineError::InvalidScript(format!(
                    "function '{}' shadows a built-in",
                    function.name
                )));
            }

            let mut params = HashSet::new();
            if let Some(dup) = function.params.iter().find(|p| !params.insert(p.as_str())) {
                return Err(EngineError::InvalidScript(format!(
                    "function '{}' declares parameter '{}' twice",
                    function.name, dup
                )));
            }
        }
        Ok(())
    }

    /// SHA-256 of the canonical JSON encoding, hex encoded
    pub fn digest(&self) -> Result<String, EngineError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| EngineError::InvalidScript(format!("unencodable script: {}", e)))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}
