//! Canary plan loading and validation.
//!
//! A plan is a declarative TOML document of weight stages. Invalid
//! plans are rejected at load time — a plan that parses is guaranteed
//! to have strictly increasing weights ending at exactly 100.
//!
//! ```toml
//! [[stage]]
//! weight_percent = 10
//! soak = "5m"
//! error_rate_threshold = 0.01
//! p95_latency_threshold_ms = 200.0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use cutover_core::{DeployError, DeployResult, GateThresholds, parse_duration};

/// One canary stage: a traffic weight held for a soak period, then
/// evaluated against its thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct CanaryStage {
    pub weight_percent: u8,
    pub soak: Duration,
    pub thresholds: GateThresholds,
}

/// A validated, ordered list of canary stages.
#[derive(Debug, Clone, PartialEq)]
pub struct CanaryPlan {
    stages: Vec<CanaryStage>,
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    stage: Vec<RawStage>,
}

#[derive(Deserialize)]
struct RawStage {
    weight_percent: u8,
    soak: String,
    error_rate_threshold: f64,
    p95_latency_threshold_ms: f64,
}

impl CanaryPlan {
    /// Load and validate a plan from a TOML file.
    pub fn load(path: &Path) -> DeployResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeployError::InvalidPlan(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a plan from TOML text.
    pub fn from_toml_str(content: &str) -> DeployResult<Self> {
        let raw: RawPlan = toml::from_str(content)
            .map_err(|e| DeployError::InvalidPlan(format!("parse: {e}")))?;

        if raw.stage.is_empty() {
            return Err(DeployError::InvalidPlan("plan has no stages".into()));
        }

        let mut stages = Vec::with_capacity(raw.stage.len());
        let mut prev_weight: Option<u8> = None;
        for (i, raw_stage) in raw.stage.iter().enumerate() {
            let n = i + 1;

            if raw_stage.weight_percent > 100 {
                return Err(DeployError::InvalidPlan(format!(
                    "stage {n}: weight {} exceeds 100",
                    raw_stage.weight_percent
                )));
            }
            if let Some(prev) = prev_weight {
                if raw_stage.weight_percent <= prev {
                    return Err(DeployError::InvalidPlan(format!(
                        "stage {n}: weight {} does not increase over {prev}",
                        raw_stage.weight_percent
                    )));
                }
            }
            prev_weight = Some(raw_stage.weight_percent);

            let soak = parse_duration(&raw_stage.soak).ok_or_else(|| {
                DeployError::InvalidPlan(format!("stage {n}: bad soak \"{}\"", raw_stage.soak))
            })?;
            if soak.is_zero() {
                return Err(DeployError::InvalidPlan(format!("stage {n}: zero soak")));
            }

            if !(0.0..=1.0).contains(&raw_stage.error_rate_threshold) {
                return Err(DeployError::InvalidPlan(format!(
                    "stage {n}: error rate threshold {} outside 0.0-1.0",
                    raw_stage.error_rate_threshold
                )));
            }
            if raw_stage.p95_latency_threshold_ms <= 0.0 {
                return Err(DeployError::InvalidPlan(format!(
                    "stage {n}: non-positive latency threshold"
                )));
            }

            stages.push(CanaryStage {
                weight_percent: raw_stage.weight_percent,
                soak,
                thresholds: GateThresholds {
                    error_rate: raw_stage.error_rate_threshold,
                    p95_latency_ms: raw_stage.p95_latency_threshold_ms,
                },
            });
        }

        if stages.last().map(|s| s.weight_percent) != Some(100) {
            return Err(DeployError::InvalidPlan(
                "final stage must have weight 100".into(),
            ));
        }

        Ok(Self { stages })
    }

    /// Build a plan from already-typed stages (for tests and embedding).
    pub fn from_stages(stages: Vec<CanaryStage>) -> DeployResult<Self> {
        let mut prev: Option<u8> = None;
        for stage in &stages {
            if stage.weight_percent > 100 || prev.is_some_and(|p| stage.weight_percent <= p) {
                return Err(DeployError::InvalidPlan(
                    "weights must strictly increase up to 100".into(),
                ));
            }
            prev = Some(stage.weight_percent);
        }
        if stages.last().map(|s| s.weight_percent) != Some(100) {
            return Err(DeployError::InvalidPlan(
                "final stage must have weight 100".into(),
            ));
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[CanaryStage] {
        &self.stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[[stage]]
weight_percent = 10
soak = "5m"
error_rate_threshold = 0.01
p95_latency_threshold_ms = 200.0

[[stage]]
weight_percent = 50
soak = "5m"
error_rate_threshold = 0.01
p95_latency_threshold_ms = 200.0

[[stage]]
weight_percent = 100
soak = "5m"
error_rate_threshold = 0.01
p95_latency_threshold_ms = 200.0
"#;

    #[test]
    fn valid_plan_parses() {
        let plan = CanaryPlan::from_toml_str(VALID).unwrap();
        assert_eq!(plan.stages().len(), 3);
        assert_eq!(plan.stages()[0].weight_percent, 10);
        assert_eq!(plan.stages()[0].soak, Duration::from_secs(300));
        assert_eq!(plan.stages()[2].weight_percent, 100);
        assert_eq!(plan.stages()[1].thresholds.error_rate, 0.01);
    }

    #[test]
    fn empty_plan_rejected() {
        let err = CanaryPlan::from_toml_str("").unwrap_err();
        assert!(matches!(err, DeployError::InvalidPlan(_)));
    }

    #[test]
    fn non_increasing_weights_rejected_at_load() {
        let doc = VALID.replace("weight_percent = 50", "weight_percent = 10");
        let err = CanaryPlan::from_toml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("does not increase"));
    }

    #[test]
    fn decreasing_weights_rejected_at_load() {
        let doc = VALID.replace("weight_percent = 50", "weight_percent = 5");
        let err = CanaryPlan::from_toml_str(&doc).unwrap_err();
        assert!(matches!(err, DeployError::InvalidPlan(_)));
    }

    #[test]
    fn final_stage_must_be_full_weight() {
        let doc = VALID.replace("weight_percent = 100", "weight_percent = 90");
        let err = CanaryPlan::from_toml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("weight 100"));
    }

    #[test]
    fn bad_soak_rejected() {
        let doc = VALID.replacen("soak = \"5m\"", "soak = \"eventually\"", 1);
        let err = CanaryPlan::from_toml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("bad soak"));
    }

    #[test]
    fn error_rate_threshold_must_be_a_fraction() {
        let doc = VALID.replacen("error_rate_threshold = 0.01", "error_rate_threshold = 3.0", 1);
        let err = CanaryPlan::from_toml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("0.0-1.0"));
    }

    #[test]
    fn from_stages_validates_too() {
        let stage = |w: u8| CanaryStage {
            weight_percent: w,
            soak: Duration::from_secs(1),
            thresholds: GateThresholds {
                error_rate: 0.01,
                p95_latency_ms: 200.0,
            },
        };
        assert!(CanaryPlan::from_stages(vec![stage(10), stage(100)]).is_ok());
        assert!(CanaryPlan::from_stages(vec![stage(10), stage(10), stage(100)]).is_err());
        assert!(CanaryPlan::from_stages(vec![stage(10), stage(50)]).is_err());
    }
}
