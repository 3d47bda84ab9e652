//! Named memory presets: retention + search defaults.
//!
//! A preset resolves differently for read and write operations: readers get
//! search parameters (limit, threshold, scoring weights), writers get
//! retention parameters (base TTLs, importance multipliers, access boost).
//! Workflow-level `memory_config` overrides are applied on top.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::Deserialize;

use super::store::{AccessBoost, RetentionPolicy, SearchParams};

/// Read-side defaults resolved from a preset.
#[derive(Debug, Clone, Copy)]
pub struct PresetRead {
    pub limit: usize,
    pub similarity_threshold: f64,
    pub vector_weight: f64,
    pub temporal_weight: f64,
    pub context_weight: f64,
    pub text_weight: f64,
    pub decay_half_life_hours: f64,
}

impl PresetRead {
    /// Materializes search parameters for this preset.
    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            limit: self.limit,
            similarity_threshold: self.similarity_threshold,
            vector_weight: self.vector_weight,
            temporal_weight: self.temporal_weight,
            context_weight: self.context_weight,
            text_weight: self.text_weight,
            decay_half_life: Duration::from_secs_f64(self.decay_half_life_hours * 3600.0),
            ..SearchParams::default()
        }
    }
}

/// Write-side defaults resolved from a preset.
#[derive(Debug, Clone)]
pub struct PresetWrite {
    pub short_term_hours: f64,
    pub long_term_hours: f64,
    /// Importance rules: matched against entry metadata (see
    /// [`RetentionPolicy`]); each match multiplies the base TTL.
    pub importance_rules: HashMap<String, f64>,
    pub access_boost: Option<AccessBoost>,
}

impl PresetWrite {
    /// Materializes a retention policy for this preset.
    pub fn retention_policy(&self, decay_enabled: bool) -> RetentionPolicy {
        RetentionPolicy {
            decay_enabled,
            short_term_hours: self.short_term_hours,
            long_term_hours: self.long_term_hours,
            importance_rules: self.importance_rules.clone(),
            access_boost: self.access_boost,
            ..RetentionPolicy::default()
        }
    }
}

/// Named bundle of read and write defaults.
#[derive(Debug, Clone)]
pub struct MemoryPreset {
    pub name: &'static str,
    pub read: PresetRead,
    pub write: PresetWrite,
}

fn rules(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

static PRESETS: Lazy<Vec<MemoryPreset>> = Lazy::new(|| {
    vec![
        // Raw perception buffer: tiny window, aggressive expiry.
        MemoryPreset {
            name: "sensory",
            read: PresetRead {
                limit: 3,
                similarity_threshold: 0.75,
                vector_weight: 0.6,
                temporal_weight: 0.3,
                context_weight: 0.0,
                text_weight: 0.1,
                decay_half_life_hours: 0.25,
            },
            write: PresetWrite {
                short_term_hours: 0.25,
                long_term_hours: 1.0,
                importance_rules: HashMap::new(),
                access_boost: None,
            },
        },
        // Active task state for the current session.
        MemoryPreset {
            name: "working",
            read: PresetRead {
                limit: 5,
                similarity_threshold: 0.6,
                vector_weight: 0.5,
                temporal_weight: 0.3,
                context_weight: 0.1,
                text_weight: 0.1,
                decay_half_life_hours: 2.0,
            },
            write: PresetWrite {
                short_term_hours: 2.0,
                long_term_hours: 8.0,
                importance_rules: rules(&[("pinned", 2.0)]),
                access_boost: Some(AccessBoost {
                    factor: 1.5,
                    cap_hours: 8.0,
                }),
            },
        },
        // Events tied to a run or conversation.
        MemoryPreset {
            name: "episodic",
            read: PresetRead {
                limit: 8,
                similarity_threshold: 0.55,
                vector_weight: 0.5,
                temporal_weight: 0.2,
                context_weight: 0.1,
                text_weight: 0.2,
                decay_half_life_hours: 24.0,
            },
            write: PresetWrite {
                short_term_hours: 4.0,
                long_term_hours: 168.0,
                importance_rules: rules(&[("user_correction", 3.0), ("pinned", 2.0)]),
                access_boost: Some(AccessBoost {
                    factor: 1.5,
                    cap_hours: 336.0,
                }),
            },
        },
        // Durable facts; lexical + vector balance favors meaning.
        MemoryPreset {
            name: "semantic",
            read: PresetRead {
                limit: 10,
                similarity_threshold: 0.6,
                vector_weight: 0.5,
                temporal_weight: 0.2,
                context_weight: 0.0,
                text_weight: 0.3,
                decay_half_life_hours: 168.0,
            },
            write: PresetWrite {
                short_term_hours: 24.0,
                long_term_hours: 720.0,
                importance_rules: rules(&[("verified_fact", 3.0), ("user_correction", 3.0)]),
                access_boost: Some(AccessBoost {
                    factor: 2.0,
                    cap_hours: 2160.0,
                }),
            },
        },
        // How-to knowledge: slow decay, recency matters less.
        MemoryPreset {
            name: "procedural",
            read: PresetRead {
                limit: 6,
                similarity_threshold: 0.6,
                vector_weight: 0.6,
                temporal_weight: 0.1,
                context_weight: 0.0,
                text_weight: 0.3,
                decay_half_life_hours: 120.0,
            },
            write: PresetWrite {
                short_term_hours: 12.0,
                long_term_hours: 360.0,
                importance_rules: rules(&[("verified_fact", 2.0)]),
                access_boost: Some(AccessBoost {
                    factor: 1.5,
                    cap_hours: 720.0,
                }),
            },
        },
        // Orchestration self-observation; close to log retention.
        MemoryPreset {
            name: "meta",
            read: PresetRead {
                limit: 5,
                similarity_threshold: 0.5,
                vector_weight: 0.4,
                temporal_weight: 0.4,
                context_weight: 0.0,
                text_weight: 0.2,
                decay_half_life_hours: 6.0,
            },
            write: PresetWrite {
                short_term_hours: 1.0,
                long_term_hours: 24.0,
                importance_rules: HashMap::new(),
                access_boost: None,
            },
        },
    ]
});

/// Looks up a preset by name.
pub fn preset(name: &str) -> Option<&'static MemoryPreset> {
    PRESETS.iter().find(|p| p.name == name)
}

/// All preset names, for validation messages.
pub fn preset_names() -> Vec<&'static str> {
    PRESETS.iter().map(|p| p.name).collect()
}

/// Workflow-level `memory_config` overrides applied over a preset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryOverrides {
    pub decay_enabled: Option<bool>,
    pub short_term_hours: Option<f64>,
    pub long_term_hours: Option<f64>,
    pub check_interval_minutes: Option<u64>,
    pub similarity_threshold: Option<f64>,
    pub limit: Option<usize>,
    pub vector_weight: Option<f64>,
    pub temporal_weight: Option<f64>,
    pub context_weight: Option<f64>,
    pub text_weight: Option<f64>,
}

impl MemoryOverrides {
    pub fn apply_to_policy(&self, policy: &mut RetentionPolicy) {
        if let Some(v) = self.decay_enabled {
            policy.decay_enabled = v;
        }
        if let Some(v) = self.short_term_hours {
            policy.short_term_hours = v;
        }
        if let Some(v) = self.long_term_hours {
            policy.long_term_hours = v;
        }
        if let Some(v) = self.check_interval_minutes {
            policy.check_interval = Duration::from_secs(v * 60);
        }
    }

    pub fn apply_to_search(&self, params: &mut SearchParams) {
        if let Some(v) = self.similarity_threshold {
            params.similarity_threshold = v;
        }
        if let Some(v) = self.limit {
            params.limit = v;
        }
        if let Some(v) = self.vector_weight {
            params.vector_weight = v;
        }
        if let Some(v) = self.temporal_weight {
            params.temporal_weight = v;
        }
        if let Some(v) = self.context_weight {
            params.context_weight = v;
        }
        if let Some(v) = self.text_weight {
            params.text_weight = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: all six presets resolve by name.
    #[test]
    fn six_presets_exist() {
        for name in ["sensory", "working", "episodic", "semantic", "procedural", "meta"] {
            assert!(preset(name).is_some(), "missing preset {}", name);
        }
        assert!(preset("unknown").is_none());
        assert_eq!(preset_names().len(), 6);
    }

    /// **Scenario**: a preset resolves differently for read vs write.
    #[test]
    fn read_write_resolution_differs() {
        let p = preset("episodic").unwrap();
        let params = p.read.search_params();
        assert_eq!(params.limit, 8);
        assert!((params.similarity_threshold - 0.55).abs() < 1e-9);

        let policy = p.write.retention_policy(true);
        assert!(policy.decay_enabled);
        assert!((policy.short_term_hours - 4.0).abs() < 1e-9);
        assert!((policy.long_term_hours - 168.0).abs() < 1e-9);
        assert!(policy.importance_rules.contains_key("user_correction"));
    }

    /// **Scenario**: overrides patch only the fields they set.
    #[test]
    fn overrides_patch_fields() {
        let p = preset("semantic").unwrap();
        let mut policy = p.write.retention_policy(true);
        let mut params = p.read.search_params();
        let overrides: MemoryOverrides = serde_yaml::from_str(
            "short_term_hours: 48\nsimilarity_threshold: 0.8\ndecay_enabled: false\n",
        )
        .unwrap();
        overrides.apply_to_policy(&mut policy);
        overrides.apply_to_search(&mut params);
        assert!((policy.short_term_hours - 48.0).abs() < 1e-9);
        assert!(!policy.decay_enabled);
        assert!((params.similarity_threshold - 0.8).abs() < 1e-9);
        // Untouched fields keep preset values.
        assert!((policy.long_term_hours - 720.0).abs() < 1e-9);
        assert_eq!(params.limit, 10);
    }

    /// **Scenario**: unknown override keys are rejected at deserialization.
    #[test]
    fn overrides_reject_unknown_keys() {
        let res: Result<MemoryOverrides, _> = serde_yaml::from_str("bogus_field: 1\n");
        assert!(res.is_err());
    }
}
