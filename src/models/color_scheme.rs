use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::scheme::{EditableScheme, Scheme};

/// RGB triple as stored in scheme files
pub type Rgb = [u8; 3];

/// A named color palette
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorScheme {
    /// Unique scheme name (may carry the editable-copy prefix)
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Palette slot -> color
    #[serde(default)]
    pub colors: BTreeMap<String, Rgb>,
    /// Shipped with the application rather than created by the user
    #[serde(skip)]
    pub bundled: bool,
}

impl ColorScheme {
    /// Create an empty user scheme
    pub fn new(name: impl Into<String>) -> Self {
        ColorScheme {
            name: name.into(),
            description: String::new(),
            colors: BTreeMap::new(),
            bundled: false,
        }
    }

    /// Builder-style color assignment
    pub fn with_color(mut self, slot: &str, rgb: Rgb) -> Self {
        self.colors.insert(slot.to_string(), rgb);
        self
    }

    pub fn color(&self, slot: &str) -> Option<Rgb> {
        self.colors.get(slot).copied()
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        use anyhow::Context;
        toml::to_string_pretty(self)
            .with_context(|| format!("Failed to serialize scheme '{}'", self.name))
    }

    /// Parse from TOML
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        toml::from_str(contents).context("Failed to parse scheme")
    }
}

impl Scheme for ColorScheme {
    fn name(&self) -> &str {
        &self.name
    }
}

impl EditableScheme for ColorScheme {
    fn renamed(&self, name: &str) -> Self {
        ColorScheme {
            name: name.to_string(),
            description: self.description.clone(),
            colors: self.colors.clone(),
            bundled: false,
        }
    }
}

/// Schemes compiled into the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltInScheme {
    CatppuccinMocha,
    CatppuccinLatte,
    TokyonightNight,
    TokyonightStorm,
    TokyonightDay,
}

impl BuiltInScheme {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "catppuccin-mocha" => Some(Self::CatppuccinMocha),
            "catppuccin-latte" => Some(Self::CatppuccinLatte),
            "tokyonight-night" => Some(Self::TokyonightNight),
            "tokyonight-storm" => Some(Self::TokyonightStorm),
            "tokyonight-day" => Some(Self::TokyonightDay),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CatppuccinMocha => "catppuccin-mocha",
            Self::CatppuccinLatte => "catppuccin-latte",
            Self::TokyonightNight => "tokyonight-night",
            Self::TokyonightStorm => "tokyonight-storm",
            Self::TokyonightDay => "tokyonight-day",
        }
    }

    pub fn all() -> &'static [BuiltInScheme] {
        &[
            Self::CatppuccinMocha,
            Self::CatppuccinLatte,
            Self::TokyonightNight,
            Self::TokyonightStorm,
            Self::TokyonightDay,
        ]
    }

    fn description(&self) -> &'static str {
        match self {
            Self::CatppuccinMocha => "Catppuccin Mocha (dark)",
            Self::CatppuccinLatte => "Catppuccin Latte (light)",
            Self::TokyonightNight => "Tokyo Night (dark)",
            Self::TokyonightStorm => "Tokyo Night Storm (darker blue)",
            Self::TokyonightDay => "Tokyo Night Day (light)",
        }
    }

    /// Palette in slot order:
    /// text, subtext, selection, accent, success, danger, surface, overlay, base, status_bg
    fn palette(&self) -> [Rgb; 10] {
        match self {
            Self::CatppuccinMocha => [
                [205, 214, 244],
                [166, 173, 200],
                [137, 180, 250],
                [249, 226, 175],
                [166, 227, 161],
                [243, 139, 168],
                [54, 58, 79],
                [108, 112, 134],
                [30, 30, 46],
                [69, 71, 90],
            ],
            Self::CatppuccinLatte => [
                [76, 79, 105],
                [108, 111, 133],
                [30, 102, 245],
                [223, 142, 29],
                [64, 160, 43],
                [210, 15, 57],
                [204, 208, 218],
                [156, 160, 176],
                [239, 241, 245],
                [188, 192, 204],
            ],
            Self::TokyonightNight => [
                [192, 202, 245],
                [169, 177, 214],
                [61, 89, 161],
                [224, 175, 104],
                [158, 206, 106],
                [247, 118, 142],
                [30, 32, 48],
                [68, 75, 106],
                [26, 27, 38],
                [36, 40, 59],
            ],
            Self::TokyonightStorm => [
                [192, 202, 245],
                [169, 177, 214],
                [61, 89, 161],
                [224, 175, 104],
                [158, 206, 106],
                [247, 118, 142],
                [28, 31, 44],
                [68, 75, 106],
                [24, 27, 38],
                [36, 40, 59],
            ],
            Self::TokyonightDay => [
                [52, 59, 88],
                [78, 89, 131],
                [179, 198, 255],
                [150, 80, 0],
                [51, 125, 7],
                [186, 33, 66],
                [232, 235, 246],
                [165, 173, 203],
                [230, 233, 244],
                [214, 219, 237],
            ],
        }
    }

    pub fn to_scheme(&self) -> ColorScheme {
        const SLOTS: [&str; 10] = [
            "text",
            "subtext",
            "selection",
            "accent",
            "success",
            "danger",
            "surface",
            "overlay",
            "base",
            "status_bg",
        ];

        let colors = SLOTS
            .iter()
            .zip(self.palette())
            .map(|(slot, rgb)| (slot.to_string(), rgb))
            .collect();

        ColorScheme {
            name: self.name().to_string(),
            description: self.description().to_string(),
            colors,
            bundled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup_is_case_insensitive() {
        assert_eq!(
            BuiltInScheme::from_name("Catppuccin-Mocha"),
            Some(BuiltInScheme::CatppuccinMocha)
        );
        assert_eq!(BuiltInScheme::from_name("solarized"), None);
        for builtin in BuiltInScheme::all() {
            assert_eq!(BuiltInScheme::from_name(builtin.name()), Some(*builtin));
        }
    }

    #[test]
    fn test_builtin_scheme_is_bundled() {
        let scheme = BuiltInScheme::TokyonightDay.to_scheme();
        assert!(scheme.bundled);
        assert_eq!(scheme.name, "tokyonight-day");
        assert_eq!(scheme.colors.len(), 10);
        assert_eq!(scheme.color("base"), Some([230, 233, 244]));
    }

    #[test]
    fn test_renamed_copy_is_user_owned() {
        let original = BuiltInScheme::CatppuccinLatte.to_scheme();
        let copy = original.renamed("_@user_catppuccin-latte");

        assert!(!copy.bundled);
        assert_eq!(copy.name, "_@user_catppuccin-latte");
        assert_eq!(copy.colors, original.colors);
        assert_eq!(copy.description, original.description);
    }

    #[test]
    fn test_toml_does_not_carry_bundled_flag() {
        let scheme = BuiltInScheme::CatppuccinMocha.to_scheme();
        let toml_str = scheme.to_toml().unwrap();
        assert!(!toml_str.contains("bundled"));

        let parsed = ColorScheme::from_toml(&toml_str).unwrap();
        assert!(!parsed.bundled);
        assert_eq!(parsed.name, scheme.name);
    }

    #[test]
    fn test_parse_minimal_scheme() {
        let toml_str = r#"
        name = "_@user_Mine"

        [colors]
        text = [1, 2, 3]
        "#;

        let scheme = ColorScheme::from_toml(toml_str).unwrap();
        assert_eq!(scheme.name(), "_@user_Mine");
        assert_eq!(scheme.description, "");
        assert_eq!(scheme.color("text"), Some([1, 2, 3]));
    }
}
