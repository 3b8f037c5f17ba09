//! Evaluation presets.
//!
//! A preset is a named fragment of extra scoring instructions that is spliced
//! into the fixed rubric.  The table is built once at start-up and never
//! mutated afterwards.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

/// Id of the preset used when the client sends nothing or an unknown id.
pub const DEFAULT_PRESET_ID: &str = "minimal";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub rules: String,
}

impl Preset {
    fn new(id: &str, name: &str, rules: &str) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            rules: rules.to_owned(),
        }
    }
}

/// Read-only lookup table of presets keyed by id.  Always contains
/// [`DEFAULT_PRESET_ID`].
#[derive(Debug, Clone)]
pub struct PresetTable {
    presets: HashMap<String, Preset>,
}

impl PresetTable {
    /// The three presets the service ships with.
    pub fn builtin() -> Self {
        let presets = [
            Preset::new(
                "minimal",
                "미니멀 기준",
                "과한 로고, 강한 색 대비, 잡다한 액세서리는 감점. 톤온톤 조화, 여백감, 절제된 디테일은 가산.",
            ),
            Preset::new(
                "street",
                "스트릿 기준",
                "포인트 컬러, 로고, 오버핏 허용. 실루엣의 힘, 스니커 매칭, 레이어링 완성도 강조.",
            ),
            Preset::new(
                "formal",
                "포멀 기준",
                "컬러는 절제, 핏의 정확성, 신발/벨트/가방의 격식 매칭 중시. 캐주얼 요소는 감점.",
            ),
        ];
        Self {
            presets: presets.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Build a table from an explicit list.  Ids must be unique and the
    /// default preset must be present.
    pub fn from_presets(list: Vec<Preset>) -> Result<Self> {
        let mut presets = HashMap::with_capacity(list.len());
        for preset in list {
            if preset.id.trim().is_empty() {
                bail!("preset id must not be empty");
            }
            if presets.contains_key(&preset.id) {
                bail!("duplicate preset id '{}'", preset.id);
            }
            presets.insert(preset.id.clone(), preset);
        }
        if !presets.contains_key(DEFAULT_PRESET_ID) {
            return Err(anyhow!(
                "preset table must define the '{}' preset",
                DEFAULT_PRESET_ID
            ));
        }
        Ok(Self { presets })
    }

    /// Load a JSON array of `{id, name, rules}` objects.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read preset file '{}'", path.display()))?;
        let list: Vec<Preset> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse preset file '{}'", path.display()))?;
        Self::from_presets(list)
            .with_context(|| format!("Invalid preset file '{}'", path.display()))
    }

    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.get(id)
    }

    /// Resolve a client-supplied id.  The lookup is exact; missing, blank and
    /// unknown ids all map to the default preset.
    pub fn resolve(&self, id: Option<&str>) -> &Preset {
        id.and_then(|id| self.presets.get(id))
            .unwrap_or_else(|| self.default_preset())
    }

    pub fn default_preset(&self) -> &Preset {
        // Presence is checked in every constructor.
        &self.presets[DEFAULT_PRESET_ID]
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.presets.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl Default for PresetTable {
    fn default() -> Self {
        Self::builtin()
    }
}
