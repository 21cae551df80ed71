//! Sample config tests for hgk-gateway-config.
// crates/hgk-gateway-config/tests/sample_config.rs
// =============================================================================
// Module: Sample Config Tests
// Description: Keep the shipped sample config and policy loadable.
// Purpose: Catch drift between the samples and the config schema.
// =============================================================================

use std::path::PathBuf;

use hgk_gateway_config::GatewayConfig;
use hgk_gateway_core::PolicyEnforcer;

type TestResult = Result<(), String>;

fn sample_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../configs")
}

#[test]
fn sample_config_and_policy_load() -> TestResult {
    let config = GatewayConfig::load(Some(&sample_dir().join("hgk-gateway.toml")))
        .map_err(|err| err.to_string())?;
    if config.services.len() != 1 || config.auth.len() != 1 || config.tools.len() != 1 {
        return Err("sample config lost a section".to_string());
    }
    let policy_path = config.policy_path().ok_or("sample config names a policy")?;
    let enforcer = PolicyEnforcer::try_load(&policy_path).map_err(|err| err.to_string())?;
    if enforcer.policy_count() != 3 {
        return Err(format!("expected 3 policies, got {}", enforcer.policy_count()));
    }
    if enforcer.limiter_names() != vec!["global-rate".to_string()] {
        return Err("expected the global-rate limiter".to_string());
    }
    Ok(())
}
