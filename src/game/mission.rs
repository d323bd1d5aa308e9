//! Mission Definitions
//!
//! Immutable mission records and the catalog they live in.
//! The catalog is built once at process start and never mutated.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::geo::GeoPoint;

// =============================================================================
// MISSION ID
// =============================================================================

/// Unique mission identifier.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissionId(pub String);

impl MissionId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MissionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// Difficulty tier (also drives marker colour on the map).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Green marker
    Novice,
    /// Amber marker
    Geologist,
    /// Red marker
    Expert,
}

/// Mission kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionKind {
    /// Completable once; contributes to completed set and fragments.
    Main,
    /// Repeatable forever; XP on every completion.
    Side,
}

// =============================================================================
// QUIZ DESCRIPTORS
// =============================================================================

/// Field key used by free-text quizzes.
pub const ANSWER_FIELD: &str = "answer";

/// One closed option set of a categorical quiz.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceSlot {
    /// Answer field key
    pub key: String,
    /// Allowed values
    pub options: Vec<String>,
}

/// A numeric field with its inclusive acceptance band.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeField {
    /// Answer field key
    pub key: String,
    /// Display label
    pub label: String,
    /// Lowest accepted value
    pub min: i64,
    /// Highest accepted value
    pub max: i64,
}

/// One independently solvable part of a multi-check quiz.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubCheck {
    /// Every field must parse to an integer inside its band.
    NumericRanges {
        /// Checked fields
        fields: Vec<RangeField>,
    },
    /// The text must contain at least one keyword from every group.
    Keywords {
        /// Answer field key of the reasoning text
        field: String,
        /// Keyword groups (AND across groups, OR within a group)
        groups: Vec<Vec<String>>,
    },
}

impl SubCheck {
    /// Answer field keys this check reads.
    pub fn field_keys(&self) -> Vec<&str> {
        match self {
            SubCheck::NumericRanges { fields } => fields.iter().map(|f| f.key.as_str()).collect(),
            SubCheck::Keywords { field, .. } => vec![field.as_str()],
        }
    }
}

/// Comparison rule of a quiz, carried as data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuizDescriptor {
    /// Exact, substring, or whitelisted-alternate match on one text field.
    FreeText {
        /// Expected answer
        expected: String,
        /// Mission-specific accepted phrases (substring match)
        #[serde(default)]
        alternates: Vec<String>,
    },
    /// Two closed choices; the pair must be one of `accepted`.
    CategoricalPair {
        /// First choice
        first: ChoiceSlot,
        /// Second choice
        second: ChoiceSlot,
        /// Accepted (first, second) pairs
        accepted: Vec<(String, String)>,
    },
    /// Several independent checks, all of which must pass.
    SubChecks {
        /// Checks in display order
        checks: Vec<SubCheck>,
    },
}

impl QuizDescriptor {
    /// Answer field keys the player can type into.
    pub fn field_keys(&self) -> Vec<&str> {
        match self {
            QuizDescriptor::FreeText { .. } => vec![ANSWER_FIELD],
            QuizDescriptor::CategoricalPair { first, second, .. } => {
                vec![first.key.as_str(), second.key.as_str()]
            }
            QuizDescriptor::SubChecks { checks } => {
                checks.iter().flat_map(SubCheck::field_keys).collect()
            }
        }
    }

    /// Number of independently solvable parts.
    pub fn part_count(&self) -> usize {
        match self {
            QuizDescriptor::SubChecks { checks } => checks.len(),
            _ => 1,
        }
    }
}

/// Quiz attached to a mission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    /// Question shown to the player
    pub question: String,
    /// How answers are checked
    pub descriptor: QuizDescriptor,
}

// =============================================================================
// MISSION
// =============================================================================

/// Immutable mission definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    /// Unique ID
    pub id: MissionId,
    /// Title
    pub title: String,
    /// Briefing text
    pub description: String,
    /// Default prompt for the image-edit collaborator
    pub prompt_hint: String,
    /// Difficulty tier
    pub difficulty: Difficulty,
    /// XP granted on finalization
    pub xp_reward: u32,
    /// Rank needed to enter (not enforced)
    pub rank_requirement: String,
    /// Marker location (None = location agnostic)
    pub target: Option<GeoPoint>,
    /// Narrative fragment granted on first completion
    pub fragment_id: Option<u32>,
    /// Main or side
    pub kind: MissionKind,
    /// Optional quiz
    pub quiz: Option<Quiz>,
    /// Optional photo evidence instruction
    pub evidence_instruction: Option<String>,
}

impl Mission {
    /// Is this a main mission?
    #[inline]
    pub fn is_main(&self) -> bool {
        self.kind == MissionKind::Main
    }

    /// Does the mission have an evidence step?
    #[inline]
    pub fn has_evidence_step(&self) -> bool {
        self.evidence_instruction.is_some()
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// Catalog construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Two missions share an ID.
    #[error("Duplicate mission id: {0}")]
    DuplicateId(MissionId),

    /// XP reward must be positive.
    #[error("Mission {0} has zero xp reward")]
    ZeroReward(MissionId),

    /// A side mission carries a fragment.
    #[error("Side mission {0} cannot grant a fragment")]
    SideFragment(MissionId),

    /// A numeric band has min > max.
    #[error("Mission {0} has an empty numeric band")]
    EmptyBand(MissionId),
}

/// All missions of a session (BTreeMap for deterministic iteration).
#[derive(Clone, Debug, Default)]
pub struct MissionCatalog {
    missions: BTreeMap<MissionId, Mission>,
}

impl MissionCatalog {
    /// Build a catalog, validating the definitions.
    pub fn new(missions: Vec<Mission>) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        for mission in missions {
            if mission.xp_reward == 0 {
                return Err(CatalogError::ZeroReward(mission.id));
            }
            if mission.kind == MissionKind::Side && mission.fragment_id.is_some() {
                return Err(CatalogError::SideFragment(mission.id));
            }
            if let Some(Quiz { descriptor: QuizDescriptor::SubChecks { checks }, .. }) = &mission.quiz {
                let empty_band = checks.iter().any(|c| matches!(
                    c,
                    SubCheck::NumericRanges { fields } if fields.iter().any(|f| f.min > f.max)
                ));
                if empty_band {
                    return Err(CatalogError::EmptyBand(mission.id));
                }
            }
            if map.contains_key(&mission.id) {
                return Err(CatalogError::DuplicateId(mission.id));
            }
            map.insert(mission.id.clone(), mission);
        }
        Ok(Self { missions: map })
    }

    /// The Yongchun Pi reference content.
    pub fn reference() -> Self {
        Self {
            missions: reference_missions()
                .into_iter()
                .map(|m| (m.id.clone(), m))
                .collect(),
        }
    }

    /// Get a mission by ID.
    pub fn get(&self, id: &MissionId) -> Option<&Mission> {
        self.missions.get(id)
    }

    /// Iterate missions in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Mission> {
        self.missions.values()
    }

    /// Number of missions.
    pub fn len(&self) -> usize {
        self.missions.len()
    }

    /// Is the catalog empty?
    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }

    /// Distinct fragment ids offered by main missions.
    pub fn fragment_ids(&self) -> BTreeSet<u32> {
        self.missions
            .values()
            .filter(|m| m.is_main())
            .filter_map(|m| m.fragment_id)
            .collect()
    }

    /// Total number of collectible fragments.
    pub fn fragment_total(&self) -> usize {
        self.fragment_ids().len()
    }
}

// =============================================================================
// REFERENCE CONTENT
// =============================================================================

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn range(key: &str, label: &str, min: i64, max: i64) -> RangeField {
    RangeField { key: key.to_string(), label: label.to_string(), min, max }
}

/// Missions around Yongchun Pi Wetland Park (Taipei).
pub fn reference_missions() -> Vec<Mission> {
    vec![
        Mission {
            id: MissionId::from("1"),
            title: "Mission 01: 四獸山連線".to_string(),
            description: "透過方位與地形觀察理解永春陂是被四獸山包圍的山谷窪地。".to_string(),
            prompt_hint: "Overlay digital measurement grid on mountain peaks, visualize hydrological flow into the valley".to_string(),
            difficulty: Difficulty::Novice,
            xp_reward: 300,
            rank_requirement: "Cadet".to_string(),
            target: Some(GeoPoint::new(25.032647652556317, 121.58009862209747)),
            fragment_id: Some(0),
            kind: MissionKind::Main,
            quiz: Some(Quiz {
                question: "請對照Mapy，填入四獸山的高度".to_string(),
                descriptor: QuizDescriptor::SubChecks {
                    checks: vec![
                        SubCheck::NumericRanges {
                            fields: vec![
                                range("tiger", "虎山", 135, 145),
                                range("leopard", "豹山", 139, 143),
                                range("lion", "獅山", 147, 153),
                                range("elephant", "象山", 180, 188),
                            ],
                        },
                        SubCheck::Keywords {
                            field: "reason".to_string(),
                            groups: vec![
                                strings(&["高", "山"]),
                                strings(&["低", "窪", "水", "凹"]),
                            ],
                        },
                    ],
                },
            }),
            evidence_instruction: None,
        },
        Mission {
            id: MissionId::from("2"),
            title: "Mission 02: 岩層解密".to_string(),
            description: "請先回答地質問題，驗證所在地層後，再進行岩層採樣分析。".to_string(),
            prompt_hint: "描述岩石特徵 (例如：羽毛狀節理)".to_string(),
            difficulty: Difficulty::Geologist,
            xp_reward: 300,
            rank_requirement: "Scout".to_string(),
            target: Some(GeoPoint::new(25.028155021059753, 121.57924699325368)),
            fragment_id: Some(1),
            kind: MissionKind::Main,
            quiz: Some(Quiz {
                question: "請問我們現在在哪一層？".to_string(),
                descriptor: QuizDescriptor::FreeText {
                    expected: "南港層".to_string(),
                    alternates: strings(&["南港"]),
                },
            }),
            evidence_instruction: Some(
                "請拍攝所收集到的砂岩照片，並描述它的樣子。例如：羽毛狀、貝殼狀、放射狀".to_string(),
            ),
        },
        Mission {
            id: MissionId::from("3"),
            title: "Mission 03: 等高線挑戰".to_string(),
            description: "請打開Mapy並截圖，在截圖上畫出爬上永春崗平台的路線，同時觀察Mapy裡的等高線圖".to_string(),
            prompt_hint: "Project holographic red contour lines onto the terrain, high density on steep slopes".to_string(),
            difficulty: Difficulty::Expert,
            xp_reward: 300,
            rank_requirement: "Ranger".to_string(),
            target: Some(GeoPoint::new(25.029229726415355, 121.57698592023897)),
            fragment_id: Some(2),
            kind: MissionKind::Main,
            quiz: Some(Quiz {
                question: "爬完的感受？".to_string(),
                descriptor: QuizDescriptor::CategoricalPair {
                    first: ChoiceSlot { key: "density".to_string(), options: strings(&["密集", "稀疏"]) },
                    second: ChoiceSlot { key: "feeling".to_string(), options: strings(&["累", "不累"]) },
                    accepted: vec![
                        ("密集".to_string(), "累".to_string()),
                        ("稀疏".to_string(), "不累".to_string()),
                    ],
                },
            }),
            evidence_instruction: Some("上傳您的Mapy截圖，並繪製路線。".to_string()),
        },
        Mission {
            id: MissionId::from("s1"),
            title: "擋土牆獵人".to_string(),
            description: "校園或步道周邊有許多保護邊坡的擋土牆。請尋找擋土牆，觀察其結構與排水狀況。良好的排水設施對於防止邊坡滑動至關重要。".to_string(),
            prompt_hint: "Analyze retaining wall structure, highlight drainage holes in red, check for structural cracks".to_string(),
            difficulty: Difficulty::Novice,
            xp_reward: 50,
            rank_requirement: "Freelancer".to_string(),
            target: None,
            fragment_id: None,
            kind: MissionKind::Side,
            quiz: None,
            evidence_instruction: Some("請拍攝擋土牆正面照片，需清楚呈現排水設施或植生狀況。".to_string()),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_catalog() {
        let catalog = MissionCatalog::reference();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.fragment_total(), 3);

        let side = catalog.get(&MissionId::from("s1")).unwrap();
        assert_eq!(side.kind, MissionKind::Side);
        assert!(side.target.is_none());
        assert!(side.quiz.is_none());
    }

    #[test]
    fn test_reference_passes_validation() {
        assert!(MissionCatalog::new(reference_missions()).is_ok());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut missions = reference_missions();
        let dup = missions[0].clone();
        missions.push(dup);
        assert_eq!(
            MissionCatalog::new(missions).unwrap_err(),
            CatalogError::DuplicateId(MissionId::from("1"))
        );
    }

    #[test]
    fn test_side_fragment_rejected() {
        let mut missions = reference_missions();
        missions[3].fragment_id = Some(9);
        assert!(matches!(MissionCatalog::new(missions), Err(CatalogError::SideFragment(_))));
    }

    #[test]
    fn test_field_keys() {
        let catalog = MissionCatalog::reference();
        let m1 = catalog.get(&MissionId::from("1")).unwrap();
        let quiz = m1.quiz.as_ref().unwrap();
        assert_eq!(quiz.descriptor.field_keys(), vec!["tiger", "leopard", "lion", "elephant", "reason"]);
        assert_eq!(quiz.descriptor.part_count(), 2);
    }

    #[test]
    fn test_descriptor_json_is_tagged() {
        let d = QuizDescriptor::FreeText { expected: "x".into(), alternates: vec![] };
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"kind\":\"free_text\""));
    }
}
