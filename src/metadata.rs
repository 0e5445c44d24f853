//! Metadata Sidecar - interactive zones and animation targets
//!
//! The sidecar travels next to the rendered document and is read by the
//! interactive runtime. Zone and animation ids refer to stable element ids
//! in the document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::classify::BoundaryKind;
use crate::geometry::Rect;

pub const FRAME_ID: &str = "card-frame";
pub const STATS_GROUP_ID: &str = "stats-group";
pub const TAP_ZONE_ID: &str = "tap-zone";
pub const INSPECT_ZONE_ID: &str = "inspect-zone";
pub const STATS_ZONE_ID: &str = "stats-zone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneAction {
    Tap,
    Inspect,
    TargetStats,
}

impl ZoneAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneAction::Tap => "tap",
            ZoneAction::Inspect => "inspect",
            ZoneAction::TargetStats => "target_stats",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneTrigger {
    Click,
    Hover,
}

impl ZoneTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneTrigger::Click => "click",
            ZoneTrigger::Hover => "hover",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveZone {
    pub id: String,
    pub bounds: Rect,
    pub action: ZoneAction,
    pub trigger: ZoneTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, Value>>,
}

impl InteractiveZone {
    pub fn new(id: impl Into<String>, bounds: Rect, action: ZoneAction, trigger: ZoneTrigger) -> Self {
        Self {
            id: id.into(),
            bounds,
            action,
            trigger,
            data: None,
        }
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.get_or_insert_with(BTreeMap::new).insert(key.to_string(), value);
        self
    }

    /// Zone covering one template boundary.
    pub fn for_boundary(kind: BoundaryKind, bounds: Rect) -> Self {
        let (id, action, trigger) = match kind {
            BoundaryKind::StatsText => (STATS_ZONE_ID.to_string(), ZoneAction::TargetStats, ZoneTrigger::Click),
            BoundaryKind::NameText => ("name-zone".to_string(), ZoneAction::Inspect, ZoneTrigger::Hover),
            BoundaryKind::EffectText => ("effect-zone".to_string(), ZoneAction::Inspect, ZoneTrigger::Hover),
            BoundaryKind::CostSymbols => ("cost-zone".to_string(), ZoneAction::Inspect, ZoneTrigger::Hover),
            BoundaryKind::KeywordSymbols => ("keyword-zone".to_string(), ZoneAction::Inspect, ZoneTrigger::Hover),
            BoundaryKind::SetIcon => ("set-icon-zone".to_string(), ZoneAction::Inspect, ZoneTrigger::Hover),
        };
        Self::new(id, bounds, action, trigger).with_data("boundary", json!(kind.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationTarget {
    pub element_id: String,
    pub animation_type: String,
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

impl AnimationTarget {
    fn new(element_id: &str, animation_type: &str, properties: Value, duration: &str, trigger: &str) -> Self {
        let properties = match properties {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        Self {
            element_id: element_id.to_string(),
            animation_type: animation_type.to_string(),
            properties,
            duration: Some(duration.to_string()),
            trigger: Some(trigger.to_string()),
        }
    }
}

/// Frame glow on hover, stats pulse on target, frame shake on damage.
pub fn default_animation_targets() -> Vec<AnimationTarget> {
    vec![
        AnimationTarget::new(
            FRAME_ID,
            "glow",
            json!({ "color": "#00ff00", "intensity": 0.8 }),
            "0.3s",
            "hover",
        ),
        AnimationTarget::new(
            STATS_GROUP_ID,
            "pulse",
            json!({ "scale_from": 1.0, "scale_to": 1.1 }),
            "0.5s",
            "target",
        ),
        AnimationTarget::new(
            FRAME_ID,
            "shake",
            json!({ "intensity": 2.0, "direction": "horizontal" }),
            "0.2s",
            "damage",
        ),
    ]
}

/// Sidecar record written next to every rendered card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSidecar {
    pub card_id: String,
    pub interactive_zones: Vec<InteractiveZone>,
    pub animation_targets: Vec<AnimationTarget>,
    pub game_state: BTreeMap<String, String>,
    /// Version tag of the template the card was rendered from.
    pub version: String,
    pub generated_at: DateTime<Utc>,
}

impl CardSidecar {
    pub fn zone(&self, id: &str) -> Option<&InteractiveZone> {
        self.interactive_zones.iter().find(|z| z.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_json_shape() {
        let sidecar = CardSidecar {
            card_id: "c1".into(),
            interactive_zones: vec![
                InteractiveZone::new(TAP_ZONE_ID, Rect::canvas(), ZoneAction::Tap, ZoneTrigger::Click),
                InteractiveZone::for_boundary(BoundaryKind::StatsText, Rect::new(100.0, 1800.0, 1300.0, 150.0)),
            ],
            animation_targets: default_animation_targets(),
            game_state: BTreeMap::from([("card_type".to_string(), "Creature".to_string())]),
            version: "1.0.0".into(),
            generated_at: Utc::now(),
        };
        let v = serde_json::to_value(&sidecar).unwrap();
        assert_eq!(v["interactive_zones"][0]["action"], "tap");
        assert!(v["interactive_zones"][0].get("data").is_none());
        assert_eq!(v["interactive_zones"][1]["id"], "stats-zone");
        assert_eq!(v["interactive_zones"][1]["action"], "target_stats");
        assert_eq!(v["interactive_zones"][1]["bounds"]["width"], 1300.0);
        assert_eq!(v["animation_targets"][1]["element_id"], "stats-group");
        assert_eq!(v["animation_targets"][2]["trigger"], "damage");

        let back: CardSidecar = serde_json::from_value(v).unwrap();
        assert_eq!(back, sidecar);
    }
}
