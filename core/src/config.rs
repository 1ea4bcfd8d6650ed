use serde::{Deserialize, Serialize};

// ── Metric aggregation ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Identity-like fields (store numbers, location keys). When several
    /// rows carry one of these, the first occurrence wins; they are never
    /// summed. Every other field is additive.
    pub first_wins_fields: Vec<String>,
    /// First-wins entity field naming the entity's location when the
    /// assignment does not carry one.
    #[serde(default)]
    pub location_key_field: Option<String>,
}

// ── Confidence density ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityConfig {
    /// EMA weight given to this run's match ratio, in (0, 1].
    pub decay: f64,
    /// Prior assumed for a pattern with no persisted density.
    pub initial_density: f64,
    /// A pattern is anomalous when its match ratio falls more than this
    /// below its prior density.
    pub anomaly_threshold: f64,
    /// Density at or above which a pattern is advisory "trusted".
    pub trusted_threshold: f64,
    /// Density below which a pattern stays in "shadow".
    pub shadow_threshold: f64,
}

// ── Batch execution ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Rows per page for entity and metric loads.
    pub page_size: usize,
    /// Evaluation worker threads. 0 uses rayon's default.
    #[serde(default)]
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalcConfig {
    pub aggregation: AggregationConfig,
    pub density: DensityConfig,
    pub batch: BatchConfig,
}

impl CalcConfig {
    /// Load from a JSON file (normally `data/calc_config.json`).
    /// In tests, use CalcConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: CalcConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let d = &self.density;
        if !(d.decay > 0.0 && d.decay <= 1.0) {
            anyhow::bail!("density.decay must be in (0, 1], got {}", d.decay);
        }
        for (name, value) in [
            ("initial_density", d.initial_density),
            ("anomaly_threshold", d.anomaly_threshold),
            ("trusted_threshold", d.trusted_threshold),
            ("shadow_threshold", d.shadow_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("density.{name} must be in [0, 1], got {value}");
            }
        }
        if d.shadow_threshold > d.trusted_threshold {
            anyhow::bail!(
                "density.shadow_threshold ({}) exceeds trusted_threshold ({})",
                d.shadow_threshold,
                d.trusted_threshold
            );
        }
        if self.batch.page_size == 0 {
            anyhow::bail!("batch.page_size must be > 0");
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            aggregation: AggregationConfig {
                first_wins_fields: vec![
                    "store_id".into(),
                    "location_id".into(),
                    "employee_number".into(),
                ],
                location_key_field: Some("store_id".into()),
            },
            density: DensityConfig {
                decay:             0.3,
                initial_density:   0.5,
                anomaly_threshold: 0.2,
                trusted_threshold: 0.95,
                shadow_threshold:  0.6,
            },
            batch: BatchConfig {
                page_size:      500,
                worker_threads: 2,
            },
        }
    }
}
