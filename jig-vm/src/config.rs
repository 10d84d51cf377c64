use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::call_stack::MAX_CALL_DEPTH;
use crate::error::ExecError;

/// Maximum linear memory per container: 16 MB.
pub const MAX_WASM_MEMORY_BYTES: usize = 16 * 1024 * 1024;

/// Hydro sizing and engine limits for one transaction.
///
/// Every counter buckets raw units into hydros of `*_hydro_size` units and
/// fails once more than `*_max_hydros` would be billed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecOpts {
    #[serde(default = "default_move_data_hydro_size")]
    pub move_data_hydro_size: u64,
    #[serde(default = "default_move_data_max_hydros")]
    pub move_data_max_hydros: u64,
    #[serde(default = "default_wasm_execution_hydro_size")]
    pub wasm_execution_hydro_size: u64,
    #[serde(default = "default_wasm_execution_max_hydros")]
    pub wasm_execution_max_hydros: u64,
    #[serde(default = "default_one")]
    pub num_cont_hydro_size: u64,
    #[serde(default = "default_num_cont_max_hydros")]
    pub num_cont_max_hydros: u64,
    #[serde(default = "default_one")]
    pub num_sigs_hydro_size: u64,
    #[serde(default = "default_num_sigs_max_hydros")]
    pub num_sigs_max_hydros: u64,
    #[serde(default = "default_one")]
    pub origin_check_hydro_size: u64,
    #[serde(default = "default_origin_check_max_hydros")]
    pub origin_check_max_hydros: u64,
    #[serde(default = "default_one")]
    pub new_jig_hydro_size: u64,
    #[serde(default = "default_new_jig_max_hydros")]
    pub new_jig_max_hydros: u64,
    #[serde(default = "default_deploy_max_hydros")]
    pub deploy_max_hydros: u64,
    /// Hydros charged for every DEPLOY instruction.
    #[serde(default = "default_deploy_hydro_cost")]
    pub deploy_hydro_cost: u64,
    /// Minimum coin amount a transaction must FUND. Zero disables the check.
    #[serde(default = "default_min_fund_amount")]
    pub min_fund_amount: u64,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: u8,
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,
}

fn default_one() -> u64 {
    1
}

fn default_move_data_hydro_size() -> u64 {
    10_000
}

fn default_move_data_max_hydros() -> u64 {
    500
}

fn default_wasm_execution_hydro_size() -> u64 {
    10_000
}

fn default_wasm_execution_max_hydros() -> u64 {
    10_000
}

fn default_num_cont_max_hydros() -> u64 {
    100
}

fn default_num_sigs_max_hydros() -> u64 {
    50
}

fn default_origin_check_max_hydros() -> u64 {
    100
}

fn default_new_jig_max_hydros() -> u64 {
    200
}

fn default_deploy_max_hydros() -> u64 {
    30_000
}

fn default_deploy_hydro_cost() -> u64 {
    1_000
}

fn default_min_fund_amount() -> u64 {
    100
}

fn default_max_call_depth() -> u8 {
    MAX_CALL_DEPTH
}

fn default_max_memory_bytes() -> usize {
    MAX_WASM_MEMORY_BYTES
}

impl Default for ExecOpts {
    fn default() -> Self {
        Self {
            move_data_hydro_size: default_move_data_hydro_size(),
            move_data_max_hydros: default_move_data_max_hydros(),
            wasm_execution_hydro_size: default_wasm_execution_hydro_size(),
            wasm_execution_max_hydros: default_wasm_execution_max_hydros(),
            num_cont_hydro_size: default_one(),
            num_cont_max_hydros: default_num_cont_max_hydros(),
            num_sigs_hydro_size: default_one(),
            num_sigs_max_hydros: default_num_sigs_max_hydros(),
            origin_check_hydro_size: default_one(),
            origin_check_max_hydros: default_origin_check_max_hydros(),
            new_jig_hydro_size: default_one(),
            new_jig_max_hydros: default_new_jig_max_hydros(),
            deploy_max_hydros: default_deploy_max_hydros(),
            deploy_hydro_cost: default_deploy_hydro_cost(),
            min_fund_amount: default_min_fund_amount(),
            max_call_depth: default_max_call_depth(),
            max_memory_bytes: default_max_memory_bytes(),
        }
    }
}

impl ExecOpts {
    /// Default limits without a funding requirement.
    pub fn unfunded() -> Self {
        Self {
            min_fund_amount: 0,
            ..Self::default()
        }
    }

    /// Total fuel handed to wasmtime for one transaction.
    pub fn fuel_budget(&self) -> u64 {
        self.wasm_execution_hydro_size
            .saturating_mul(self.wasm_execution_max_hydros)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ExecError> {
        let opts: ExecOpts = toml::from_str(contents).map_err(|e| ExecError::ConfigError {
            reason: format!("failed to parse exec options: {}", e),
        })?;
        opts.validate()?;
        Ok(opts)
    }

    /// Load options from a TOML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ExecError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ExecError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ExecError> {
        toml::to_string_pretty(self).map_err(|e| ExecError::ConfigError {
            reason: format!("failed to serialize exec options: {}", e),
        })
    }

    fn validate(&self) -> Result<(), ExecError> {
        let sizes = [
            ("move_data_hydro_size", self.move_data_hydro_size),
            ("wasm_execution_hydro_size", self.wasm_execution_hydro_size),
            ("num_cont_hydro_size", self.num_cont_hydro_size),
            ("num_sigs_hydro_size", self.num_sigs_hydro_size),
            ("origin_check_hydro_size", self.origin_check_hydro_size),
            ("new_jig_hydro_size", self.new_jig_hydro_size),
        ];
        for (name, size) in sizes {
            if size == 0 {
                return Err(ExecError::ConfigError {
                    reason: format!("{name} must be greater than zero"),
                });
            }
        }
        if self.max_call_depth == 0 {
            return Err(ExecError::ConfigError {
                reason: "max_call_depth must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_roundtrip() {
        let opts = ExecOpts::default();
        let toml_str = opts.to_toml_string().unwrap();
        let parsed = ExecOpts::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed, opts);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let opts = ExecOpts::from_toml_str("min_fund_amount = 0\nnum_sigs_max_hydros = 3\n").unwrap();
        assert_eq!(opts.min_fund_amount, 0);
        assert_eq!(opts.num_sigs_max_hydros, 3);
        assert_eq!(opts.move_data_hydro_size, default_move_data_hydro_size());
        assert_eq!(opts.max_call_depth, MAX_CALL_DEPTH);
    }

    #[test]
    fn test_zero_hydro_size_rejected() {
        match ExecOpts::from_toml_str("move_data_hydro_size = 0").unwrap_err() {
            ExecError::ConfigError { reason } => assert!(reason.contains("move_data_hydro_size")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("exec.toml");
        std::fs::write(&path, "deploy_hydro_cost = 7\n").unwrap();
        let opts = ExecOpts::load(&path).unwrap();
        assert_eq!(opts.deploy_hydro_cost, 7);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ExecOpts::load("/nonexistent/path/exec.toml");
        assert!(matches!(result, Err(ExecError::ConfigError { .. })));
    }
}
