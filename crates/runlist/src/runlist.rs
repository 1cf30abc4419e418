//! Ordered run list and the category-ordering rules applied to it.
//!
//! Every operation here is pure over the list value, except that recipe
//! existence is checked against a configuration root on disk.

use crate::entry::{Category, UnitRef, recipe_exists, validate_unit_name};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ordered sequence of unit references, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunList {
    entries: Vec<UnitRef>,
}

impl RunList {
    /// Create a run list from already-parsed entries
    pub fn new(entries: Vec<UnitRef>) -> Self {
        Self { entries }
    }

    /// Parse a run list from its string entries
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let entries = entries
            .iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<UnitRef>>>()?;
        Ok(Self { entries })
    }

    /// Entries in execution order
    pub fn entries(&self) -> &[UnitRef] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in execution order
    pub fn iter(&self) -> std::slice::Iter<'_, UnitRef> {
        self.entries.iter()
    }

    /// Entries rendered in document form (`unit` or `unit::category`)
    pub fn to_strings(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// Whether this exact unit + category is present
    pub fn contains(&self, entry: &UnitRef) -> bool {
        self.entries.contains(entry)
    }

    /// Whether any entry belongs to `unit`
    pub fn contains_unit(&self, unit: &str) -> bool {
        self.entries.iter().any(|e| e.is_unit(unit))
    }

    /// Whether `unit` has an entry of the given category
    pub fn has_entry(&self, unit: &str, category: Category) -> bool {
        self.entries
            .iter()
            .any(|e| e.is_unit(unit) && e.category() == category)
    }

    /// Distinct unit names, in order of first appearance
    pub fn units(&self) -> Vec<String> {
        let mut units: Vec<String> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !units.iter().any(|u| u == entry.unit()) {
                units.push(entry.unit().to_string());
            }
        }
        units
    }

    /// Entries that are not `lib` recipes (the ones that report progress)
    pub fn non_lib_entries(&self) -> impl Iterator<Item = &UnitRef> {
        self.entries.iter().filter(|e| e.category() != Category::Lib)
    }

    /// Whether all lib entries precede all default entries, which precede
    /// all validate entries.
    pub fn is_category_ordered(&self) -> bool {
        self.entries
            .windows(2)
            .all(|pair| pair[0].category().rank() <= pair[1].category().rank())
    }

    /// A unit is active when its default recipe is in the run list and
    /// present on disk.
    pub fn is_active(&self, unit: &str, dir: &Path) -> bool {
        self.has_entry(unit, Category::Default) && recipe_exists(dir, unit, Category::Default)
    }

    /// Entries of one category for every active unit, plus any unit in
    /// `extra` not already found.
    ///
    /// Lib and validate recipes are only surfaced for units whose default
    /// recipe is active, so unit directories that were never installed are
    /// not swept into the run. Extra candidates are being activated by the
    /// caller, so for them the default recipe only has to exist on disk.
    pub fn category_entries(
        &self,
        dir: &Path,
        category: Category,
        extra: &[&str],
    ) -> Result<Vec<UnitRef>> {
        let mut found: Vec<UnitRef> = Vec::new();

        for unit in self.units() {
            if self.is_active(&unit, dir) && recipe_exists(dir, &unit, category) {
                found.push(UnitRef::new(&unit, category)?);
            }
        }

        for unit in extra {
            validate_unit_name(unit)?;
            if found.iter().any(|e| e.is_unit(unit)) {
                continue;
            }
            if recipe_exists(dir, unit, Category::Default) && recipe_exists(dir, unit, category) {
                found.push(UnitRef::new(unit, category)?);
            }
        }

        Ok(found)
    }

    /// Rebuild the list with `added` units merged in, grouped by category
    /// across the whole list: libs, then defaults, then validates.
    ///
    /// Validate entries are taken from the current list only.
    pub fn merge(&self, added: &[&str], dir: &Path) -> Result<RunList> {
        let mut entries = self.category_entries(dir, Category::Lib, added)?;
        entries.extend(self.category_entries(dir, Category::Default, added)?);
        entries.extend(self.category_entries(dir, Category::Validate, &[])?);
        Ok(RunList::new(entries))
    }

    /// Insert a single unit, keeping the category ordering.
    ///
    /// - lib goes right after the leading run of lib entries
    /// - default goes right after the leading run of lib + default entries
    /// - validate is appended, if the recipe exists
    ///
    /// Entries already present are left alone. Returns the entries that were
    /// inserted.
    pub fn insert_app(&mut self, unit: &str, dir: &Path) -> Result<Vec<UnitRef>> {
        let default = UnitRef::default_of(unit)?;
        if !default.exists_in(dir) {
            return Err(Error::MissingDefaultRecipe {
                unit: unit.to_string(),
                path: default.recipe_path(dir),
            });
        }

        let mut inserted = Vec::new();

        let lib = default.with_category(Category::Lib);
        if self.contains(&lib) {
            log::info!("{} already in run list, not adding lib recipe", lib);
        } else if lib.exists_in(dir) {
            let pos = self.leading_run(|c| c == Category::Lib);
            self.entries.insert(pos, lib.clone());
            inserted.push(lib);
        }

        if self.contains(&default) {
            log::info!("{} already in run list, not adding default recipe", default);
        } else {
            let pos = self.leading_run(|c| c != Category::Validate);
            self.entries.insert(pos, default.clone());
            inserted.push(default.clone());
        }

        let validate = default.with_category(Category::Validate);
        if validate.exists_in(dir) && !self.contains(&validate) {
            self.entries.push(validate.clone());
            inserted.push(validate);
        }

        Ok(inserted)
    }

    /// Order the run list so `deps` and then `unit` converge before
    /// everything else, while `unit`'s own validation runs last.
    pub fn sorted_with_priority(
        &self,
        unit: &str,
        deps: &[&str],
        dir: &Path,
    ) -> Result<Prioritized> {
        let target = UnitRef::default_of(unit)?;
        if !target.exists_in(dir) {
            return Err(Error::MissingDefaultRecipe {
                unit: unit.to_string(),
                path: target.recipe_path(dir),
            });
        }

        let mut priority: Vec<&str> = Vec::with_capacity(deps.len());
        for dep in deps {
            validate_unit_name(dep)?;
            if *dep != unit && !priority.contains(dep) {
                priority.push(*dep);
            }
        }
        let is_priority = |e: &UnitRef| e.is_unit(unit) || priority.iter().any(|d| e.is_unit(d));

        let mut extra = priority.clone();
        extra.push(unit);
        let lib = self.category_entries(dir, Category::Lib, &extra)?;

        let mut default = Vec::new();
        for dep in &priority {
            if recipe_exists(dir, dep, Category::Default) {
                default.push(UnitRef::default_of(dep)?);
            }
        }
        default.push(target.clone());
        default.extend(
            self.category_entries(dir, Category::Default, &[])?
                .into_iter()
                .filter(|e| !is_priority(e)),
        );

        let mut validate = Vec::new();
        for dep in &priority {
            if recipe_exists(dir, dep, Category::Validate) {
                validate.push(UnitRef::new(dep, Category::Validate)?);
            }
        }
        validate.extend(
            self.category_entries(dir, Category::Validate, &[])?
                .into_iter()
                .filter(|e| !is_priority(e)),
        );
        let own_validate = target.with_category(Category::Validate);
        if own_validate.exists_in(dir) {
            validate.push(own_validate);
        }

        Ok(Prioritized {
            lib,
            default,
            validate,
        })
    }

    /// Drop every entry of `unit`, whatever its category. Returns how many
    /// entries were removed.
    pub fn remove_unit(&mut self, unit: &str) -> usize {
        let before = self.entries.len();
        // Partial removal is not supported: nothing tracks whether another
        // unit still needs this one's lib recipe.
        self.entries.retain(|e| !e.is_unit(unit));
        before - self.entries.len()
    }

    /// Length of the leading run of entries whose category satisfies `pred`
    fn leading_run(&self, pred: impl Fn(Category) -> bool) -> usize {
        self.entries
            .iter()
            .take_while(|e| pred(e.category()))
            .count()
    }
}

impl<'a> IntoIterator for &'a RunList {
    type Item = &'a UnitRef;
    type IntoIter = std::slice::Iter<'a, UnitRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Run list split into category groups by [`RunList::sorted_with_priority`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prioritized {
    /// Library recipes, dependencies first
    pub lib: Vec<UnitRef>,
    /// Default recipes, dependencies and the target unit first
    pub default: Vec<UnitRef>,
    /// Validation recipes, the target unit's last
    pub validate: Vec<UnitRef>,
}

impl Prioritized {
    /// Concatenate the groups into one run list
    pub fn into_run_list(self) -> RunList {
        let mut entries = self.lib;
        entries.extend(self.default);
        entries.extend(self.validate);
        RunList::new(entries)
    }
}
