//! Named model/reasoning presets ("fast" / "default" / "max") and
//! project-type detection used to seed default configuration.
//!
//! The preset table is defined in `presets.toml` and embedded in the binary
//! at compile time, the way the teacher embeds its invariant library.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// A single agent kind's model/reasoning selection within a preset.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSelection {
    pub model: String,
    pub reasoning: String,
}

/// One named preset: a fixed model/reasoning selection across all kinds.
#[derive(Debug, Clone, Deserialize)]
pub struct Preset {
    pub name: String,
    pub description: String,
    pub models: HashMap<String, ModelSelection>,
}

#[derive(Debug, Deserialize)]
struct PresetLibrary {
    presets: Vec<Preset>,
}

static PRESETS_TOML: &str = include_str!("presets.toml");

/// Load the embedded preset library.
///
/// # Panics
///
/// Panics if the embedded TOML is malformed. This is a compile-time
/// invariant -- if the binary was built, the TOML is valid.
pub fn load_presets() -> Vec<Preset> {
    let lib: PresetLibrary = toml::from_str(PRESETS_TOML).expect("embedded presets.toml is invalid");
    lib.presets
}

/// Look up a preset by name ("fast", "default", "max").
pub fn preset(name: &str) -> Option<Preset> {
    load_presets().into_iter().find(|p| p.name == name)
}

pub const DEFAULT_PRESET: &str = "default";

/// Detect the project type by looking for marker files in `dir`. Used to
/// pick sensible defaults for prompt context; has no effect on task
/// execution itself.
pub fn detect_project_type(dir: &Path) -> Option<String> {
    if dir.join("Cargo.toml").exists() {
        Some("rust".to_string())
    } else if dir.join("package.json").exists() {
        Some("node".to_string())
    } else if dir.join("pyproject.toml").exists() || dir.join("setup.py").exists() {
        Some("python".to_string())
    } else if dir.join("go.mod").exists() {
        Some("go".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_presets_returns_three_named_presets() {
        let presets = load_presets();
        let names: Vec<&str> = presets.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["fast", "default", "max"]);
    }

    #[test]
    fn preset_lookup_by_name() {
        let p = preset("max").unwrap();
        assert!(p.models.contains_key("claude"));
        assert_eq!(p.models["claude"].reasoning, "high");
    }

    #[test]
    fn unknown_preset_name_returns_none() {
        assert!(preset("ultra-mega").is_none());
    }

    #[test]
    fn every_preset_covers_the_same_kinds() {
        let presets = load_presets();
        let mut kind_sets: Vec<Vec<&String>> = presets
            .iter()
            .map(|p| {
                let mut ks: Vec<&String> = p.models.keys().collect();
                ks.sort();
                ks
            })
            .collect();
        kind_sets.dedup();
        assert_eq!(kind_sets.len(), 1, "all presets should cover the same agent kinds");
    }

    #[test]
    fn detect_rust_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        assert_eq!(detect_project_type(dir.path()), Some("rust".to_string()));
    }

    #[test]
    fn detect_unknown_project() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_project_type(dir.path()), None);
    }
}
