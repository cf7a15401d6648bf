//! Table schema: access groups and the column families they own.

use std::collections::BTreeSet;

use thiserror::Error;

/// Column family declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnFamilySpec {
    /// Code stored in every key of the family. Code 0 is reserved for row
    /// deletes.
    pub id: u16,
    pub name: String,
    /// Versions kept per cell; 0 keeps all of them.
    pub max_versions: u32,
    /// Inserts are summed instead of versioned.
    pub counter: bool,
}

impl ColumnFamilySpec {
    pub fn new(id: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            max_versions: 0,
            counter: false,
        }
    }

    pub fn max_versions(self, max_versions: u32) -> Self {
        Self {
            max_versions,
            ..self
        }
    }

    pub fn counter(self, counter: bool) -> Self {
        Self { counter, ..self }
    }
}

/// Group of column families stored together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessGroupSpec {
    pub name: String,
    pub column_families: Vec<ColumnFamilySpec>,
}

impl AccessGroupSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_families: Vec::new(),
        }
    }

    pub fn column_family(mut self, family: ColumnFamilySpec) -> Self {
        self.column_families.push(family);
        self
    }
}

/// Error raised when a schema declaration is inconsistent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema declares no access group")]
    Empty,
    #[error("column family code 0 is reserved (family `{0}`)")]
    ReservedFamilyCode(String),
    #[error("duplicate column family code {0}")]
    DuplicateFamilyCode(u16),
    #[error("duplicate access group `{0}`")]
    DuplicateAccessGroup(String),
}

/// Validated table schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    generation: u32,
    access_groups: Vec<AccessGroupSpec>,
}

impl Schema {
    pub fn builder(generation: u32) -> SchemaBuilder {
        SchemaBuilder {
            generation,
            access_groups: Vec::new(),
        }
    }

    /// Schema revision; bumped on every alter.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn access_groups(&self) -> &[AccessGroupSpec] {
        &self.access_groups
    }

    /// Largest column family code declared by any access group.
    pub fn max_column_family_id(&self) -> u16 {
        self.column_families().map(|cf| cf.id).max().unwrap_or(0)
    }

    pub fn column_families(&self) -> impl Iterator<Item = &ColumnFamilySpec> {
        self.access_groups
            .iter()
            .flat_map(|ag| ag.column_families.iter())
    }

    pub fn column_family(&self, id: u16) -> Option<&ColumnFamilySpec> {
        self.column_families().find(|cf| cf.id == id)
    }
}

/// Builder for [`Schema`].
#[derive(Clone, Debug)]
pub struct SchemaBuilder {
    generation: u32,
    access_groups: Vec<AccessGroupSpec>,
}

impl SchemaBuilder {
    pub fn access_group(mut self, access_group: AccessGroupSpec) -> Self {
        self.access_groups.push(access_group);
        self
    }

    /// Validate the declaration.
    pub fn build(self) -> Result<Schema, SchemaError> {
        if self.access_groups.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut names = BTreeSet::new();
        let mut codes = BTreeSet::new();
        for ag in &self.access_groups {
            if !names.insert(ag.name.as_str()) {
                return Err(SchemaError::DuplicateAccessGroup(ag.name.clone()));
            }
            for cf in &ag.column_families {
                if cf.id == 0 {
                    return Err(SchemaError::ReservedFamilyCode(cf.name.clone()));
                }
                if !codes.insert(cf.id) {
                    return Err(SchemaError::DuplicateFamilyCode(cf.id));
                }
            }
        }
        Ok(Schema {
            generation: self.generation,
            access_groups: self.access_groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_groups() -> SchemaBuilder {
        Schema::builder(3)
            .access_group(
                AccessGroupSpec::new("default")
                    .column_family(ColumnFamilySpec::new(1, "name"))
                    .column_family(ColumnFamilySpec::new(4, "hits").counter(true)),
            )
            .access_group(
                AccessGroupSpec::new("blobs")
                    .column_family(ColumnFamilySpec::new(2, "body").max_versions(1)),
            )
    }

    #[test]
    fn family_lookup_and_max_id() {
        let schema = two_groups().build().unwrap();
        assert_eq!(schema.generation(), 3);
        assert_eq!(schema.max_column_family_id(), 4);
        assert!(schema.column_family(4).unwrap().counter);
        assert_eq!(schema.column_family(2).unwrap().max_versions, 1);
        assert!(schema.column_family(3).is_none());
    }

    #[test]
    fn rejects_inconsistent_declarations() {
        assert_eq!(Schema::builder(1).build(), Err(SchemaError::Empty));

        let dup = two_groups()
            .access_group(AccessGroupSpec::new("x").column_family(ColumnFamilySpec::new(2, "b2")))
            .build();
        assert_eq!(dup, Err(SchemaError::DuplicateFamilyCode(2)));

        let reserved = Schema::builder(1)
            .access_group(AccessGroupSpec::new("a").column_family(ColumnFamilySpec::new(0, "z")))
            .build();
        assert_eq!(reserved, Err(SchemaError::ReservedFamilyCode("z".into())));

        let names = two_groups().access_group(AccessGroupSpec::new("blobs")).build();
        assert_eq!(names, Err(SchemaError::DuplicateAccessGroup("blobs".into())));
    }
}
