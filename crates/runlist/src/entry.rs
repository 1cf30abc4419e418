//! Run list entries: a unit (cookbook) plus a recipe category.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directory under the configuration root that holds units.
pub const COOKBOOKS_DIR: &str = "cookbooks";

/// Recipe category within a unit.
///
/// The declaration order is the execution order: every `Lib` entry of a
/// run list precedes every `Default` entry, which precedes every `Validate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Shared library recipe other units may depend on
    Lib,
    /// The unit's canonical recipe; its presence activates the unit
    Default,
    /// Post-install check that confirms the batch converged
    Validate,
}

impl Category {
    /// All categories in execution order
    pub const ALL: [Category; 3] = [Category::Lib, Category::Default, Category::Validate];

    /// Recipe name as it appears on disk and in qualified entries
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lib => "lib",
            Self::Default => "default",
            Self::Validate => "validate",
        }
    }

    /// Position in the global ordering (lib < default < validate)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Lib => 0,
            Self::Default => 1,
            Self::Validate => 2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lib" => Ok(Self::Lib),
            "" | "default" => Ok(Self::Default),
            "validate" => Ok(Self::Validate),
            other => Err(Error::UnknownCategory {
                category: other.to_string(),
                entry: s.to_string(),
            }),
        }
    }
}

/// Reference to one recipe of one unit, e.g. `app1::lib` or `app1`.
///
/// Serializes as the bare string form. Parsing also accepts the legacy
/// `recipe[app1::lib]` wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitRef {
    unit: String,
    category: Category,
}

impl UnitRef {
    /// Create a reference, validating the unit name
    pub fn new(unit: &str, category: Category) -> Result<Self> {
        validate_unit_name(unit)?;
        Ok(Self {
            unit: unit.to_string(),
            category,
        })
    }

    /// Reference to a unit's default recipe
    pub fn default_of(unit: &str) -> Result<Self> {
        Self::new(unit, Category::Default)
    }

    /// Unit (cookbook) name
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Recipe category
    pub fn category(&self) -> Category {
        self.category
    }

    /// Same reference with a different category
    pub fn with_category(&self, category: Category) -> Self {
        Self {
            unit: self.unit.clone(),
            category,
        }
    }

    /// Cookbook equality: units match, categories ignored
    pub fn same_unit(&self, other: &UnitRef) -> bool {
        self.unit == other.unit
    }

    /// Whether this entry belongs to `unit`
    pub fn is_unit(&self, unit: &str) -> bool {
        self.unit == unit
    }

    /// Qualified name used in the convergence tool's log lines (`unit::recipe`)
    pub fn qualified(&self) -> String {
        format!("{}::{}", self.unit, self.category)
    }

    /// Path of the recipe file under a configuration root
    pub fn recipe_path(&self, dir: &Path) -> PathBuf {
        recipe_path(dir, &self.unit, self.category)
    }

    /// Whether the recipe file exists under a configuration root
    pub fn exists_in(&self, dir: &Path) -> bool {
        self.recipe_path(dir).is_file()
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            Category::Default => f.write_str(&self.unit),
            other => write!(f, "{}::{}", self.unit, other),
        }
    }
}

impl FromStr for UnitRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let inner = match trimmed.strip_prefix("recipe[") {
            Some(rest) => rest.strip_suffix(']').ok_or_else(|| Error::InvalidEntry {
                entry: s.to_string(),
            })?,
            None => trimmed,
        };

        let (unit, category) = match inner.split_once("::") {
            Some((unit, recipe)) => {
                let category = recipe.parse().map_err(|_| Error::UnknownCategory {
                    category: recipe.to_string(),
                    entry: s.to_string(),
                })?;
                (unit, category)
            }
            None => (inner, Category::Default),
        };

        if unit.is_empty() {
            return Err(Error::InvalidEntry {
                entry: s.to_string(),
            });
        }
        Self::new(unit, category)
    }
}

impl TryFrom<String> for UnitRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<UnitRef> for String {
    fn from(value: UnitRef) -> Self {
        value.to_string()
    }
}

/// Validate a unit name (`[A-Za-z0-9_-]+`)
pub fn validate_unit_name(unit: &str) -> Result<()> {
    let valid = !unit.is_empty()
        && unit
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidUnit(unit.to_string()))
    }
}

/// `{dir}/cookbooks/{unit}/recipes/{category}.rb`
pub fn recipe_path(dir: &Path, unit: &str, category: Category) -> PathBuf {
    dir.join(COOKBOOKS_DIR)
        .join(unit)
        .join("recipes")
        .join(format!("{}.rb", category.as_str()))
}

/// Whether a unit has a recipe file for `category` under `dir`
pub fn recipe_exists(dir: &Path, unit: &str, category: Category) -> bool {
    recipe_path(dir, unit, category).is_file()
}
