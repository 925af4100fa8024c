//! Task categories and their structural-control tuning.
//!
//! Lower ControlNet strength and higher denoise give the sampler more
//! freedom to introduce content that is not in the source photo; higher
//! strength keeps the room's architecture intact. The tiers are fixed
//! constants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// What kind of edit a generation request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// Restyle the whole room while keeping its structure.
    #[default]
    Style,
    Add,
    Replace,
    Furniture,
    Material,
    Surface,
}

/// ControlNet strength applied to every structural-conditioning node,
/// paired with the sampler's denoise fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlTuning {
    pub control_strength: f64,
    pub denoise: f64,
}

/// New content is expected to diverge from the source structure.
const TUNING_CREATIVE: ControlTuning = ControlTuning {
    control_strength: 0.08,
    denoise: 0.90,
};

const TUNING_MATERIAL: ControlTuning = ControlTuning {
    control_strength: 0.10,
    denoise: 0.85,
};

const TUNING_STRUCTURAL: ControlTuning = ControlTuning {
    control_strength: 0.12,
    denoise: 0.85,
};

/// All categories, in declaration order.
pub const ALL_TASK_CATEGORIES: &[TaskCategory] = &[
    TaskCategory::Style,
    TaskCategory::Add,
    TaskCategory::Replace,
    TaskCategory::Furniture,
    TaskCategory::Material,
    TaskCategory::Surface,
];

impl TaskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskCategory::Style => "style",
            TaskCategory::Add => "add",
            TaskCategory::Replace => "replace",
            TaskCategory::Furniture => "furniture",
            TaskCategory::Material => "material",
            TaskCategory::Surface => "surface",
        }
    }

    pub fn tuning(self) -> ControlTuning {
        match self {
            TaskCategory::Add | TaskCategory::Replace | TaskCategory::Furniture => TUNING_CREATIVE,
            TaskCategory::Material | TaskCategory::Surface => TUNING_MATERIAL,
            TaskCategory::Style => TUNING_STRUCTURAL,
        }
    }

    /// Parse a free-form label, falling back to [`TaskCategory::Style`]
    /// for anything unrecognised.
    ///
    /// Labels come from an upstream text model and are not trusted to be
    /// exact, so this never fails.
    pub fn from_label_or_default(label: &str) -> Self {
        label.parse().unwrap_or_else(|_| {
            if !label.trim().is_empty() {
                tracing::debug!(label, "Unknown task category, using style");
            }
            TaskCategory::Style
        })
    }
}

impl FromStr for TaskCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ALL_TASK_CATEGORIES
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                let valid: Vec<&str> = ALL_TASK_CATEGORIES.iter().map(|c| c.as_str()).collect();
                CoreError::Validation(format!(
                    "Unknown task category: '{s}'. Valid categories: {}",
                    valid.join(", ")
                ))
            })
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creative_categories_loosen_control() {
        for cat in [TaskCategory::Add, TaskCategory::Replace, TaskCategory::Furniture] {
            let t = cat.tuning();
            assert_eq!(t.control_strength, 0.08, "{cat}");
            assert_eq!(t.denoise, 0.90, "{cat}");
        }
    }

    #[test]
    fn material_categories_use_medium_control() {
        for cat in [TaskCategory::Material, TaskCategory::Surface] {
            let t = cat.tuning();
            assert_eq!(t.control_strength, 0.10, "{cat}");
            assert_eq!(t.denoise, 0.85, "{cat}");
        }
    }

    #[test]
    fn style_keeps_structure() {
        let t = TaskCategory::Style.tuning();
        assert_eq!(t.control_strength, 0.12);
        assert_eq!(t.denoise, 0.85);
    }

    #[test]
    fn every_category_round_trips_through_its_label() {
        for &cat in ALL_TASK_CATEGORIES {
            assert_eq!(cat.as_str().parse::<TaskCategory>().unwrap(), cat);
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(" Add ".parse::<TaskCategory>().unwrap(), TaskCategory::Add);
        assert_eq!("SURFACE".parse::<TaskCategory>().unwrap(), TaskCategory::Surface);
    }

    #[test]
    fn strict_parse_rejects_unknown() {
        let err = "paint".parse::<TaskCategory>().unwrap_err();
        assert!(err.to_string().contains("paint"));
    }

    #[test]
    fn lenient_parse_defaults_to_style() {
        assert_eq!(TaskCategory::from_label_or_default("paint"), TaskCategory::Style);
        assert_eq!(TaskCategory::from_label_or_default(""), TaskCategory::Style);
        assert_eq!(TaskCategory::from_label_or_default("replace"), TaskCategory::Replace);
    }

    #[test]
    fn serde_uses_snake_case_labels() {
        let json = serde_json::to_string(&TaskCategory::Furniture).unwrap();
        assert_eq!(json, "\"furniture\"");
        let back: TaskCategory = serde_json::from_str("\"material\"").unwrap();
        assert_eq!(back, TaskCategory::Material);
    }
}
