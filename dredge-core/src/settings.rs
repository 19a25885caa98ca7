use crate::util::same_name;
use std::{
    any::{self, TypeId},
    collections::BTreeMap,
    fmt::{self, Debug, Display},
    hash::{DefaultHasher, Hash, Hasher},
};

/// Identity of a Rust type used as a mapping target.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeId {
    id: TypeId,
    name: &'static str,
}

impl ShapeId {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Debug for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Per query options of the mapping compiler.
///
/// Part of the plan cache key: two queries with different settings never share
/// a compiled plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingSettings {
    /// Per record type, column name to member name.
    pub aliases: BTreeMap<ShapeId, BTreeMap<String, String>>,
    /// Per nested record type, the first column of its own column range.
    pub splits: BTreeMap<ShapeId, String>,
    /// Match members by their declared column name (`#[dredge(column = "..")]`,
    /// `rename_all`) instead of the Rust field name.
    pub use_declared_field_names: bool,
    /// Fail with `UnmappedMember` instead of skipping unresolved members.
    pub strict: bool,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            aliases: Default::default(),
            splits: Default::default(),
            use_declared_field_names: true,
            strict: false,
        }
    }
}

impl MappingSettings {
    pub fn new() -> Self {
        Self::default()
    }
    /// Reads member `member` of `T` from column `column`.
    pub fn alias<T: ?Sized + 'static>(
        mut self,
        column: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        self.aliases
            .entry(ShapeId::of::<T>())
            .or_default()
            .insert(column.into(), member.into());
        self
    }
    /// The columns of the nested record `T` start at `column`.
    pub fn split<T: ?Sized + 'static>(mut self, column: impl Into<String>) -> Self {
        self.splits.insert(ShapeId::of::<T>(), column.into());
        self
    }
    pub fn use_declared_field_names(mut self, value: bool) -> Self {
        self.use_declared_field_names = value;
        self
    }
    pub fn strict(mut self, value: bool) -> Self {
        self.strict = value;
        self
    }
    /// Column aliased to `member` of `shape`.
    pub fn aliased_column(&self, shape: ShapeId, member: &str) -> Option<&str> {
        self.aliases
            .get(&shape)?
            .iter()
            .find(|(_, m)| same_name(m, member))
            .map(|(c, _)| c.as_str())
    }
    pub fn split_of(&self, shape: ShapeId) -> Option<&str> {
        self.splits.get(&shape).map(String::as_str)
    }
    /// Hash of the settings, used in the plan cache key.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}
