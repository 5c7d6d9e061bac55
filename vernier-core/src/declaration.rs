//! Per-entity declarations.

use crate::error::{ConfigError, VernierResult};
use crate::query::{check_field_name, ConditionTemplate};
use std::collections::BTreeMap;

/// Names of the columns stamped on create and on update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampFields {
    pub created: Option<String>,
    pub updated: Option<String>,
}

impl TimestampFields {
    pub fn new(created: impl Into<String>, updated: impl Into<String>) -> Self {
        Self {
            created: Some(created.into()),
            updated: Some(updated.into()),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Static description of one table. Built once, shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDeclaration {
    table: String,
    timestamps: TimestampFields,
    serialized_fields: BTreeMap<String, String>,
    orderable_fields: Vec<String>,
    condition_templates: Vec<ConditionTemplate>,
    mandatory_conditions: Vec<String>,
}

impl EntityDeclaration {
    pub fn builder(table: impl Into<String>) -> EntityDeclarationBuilder {
        EntityDeclarationBuilder::new(table)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn timestamps(&self) -> &TimestampFields {
        &self.timestamps
    }

    /// Column name to codec name.
    pub fn serialized_fields(&self) -> &BTreeMap<String, String> {
        &self.serialized_fields
    }

    pub fn orderable_fields(&self) -> &[String] {
        &self.orderable_fields
    }

    /// Templates in declaration order.
    pub fn condition_templates(&self) -> &[ConditionTemplate] {
        &self.condition_templates
    }

    pub fn mandatory_conditions(&self) -> &[String] {
        &self.mandatory_conditions
    }

    /// Whether some template binds the given parameter name.
    pub fn declares_param(&self, param: &str) -> bool {
        self.condition_templates.iter().any(|t| t.param == param)
    }
}

/// Builder for [`EntityDeclaration`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct EntityDeclarationBuilder {
    table: String,
    timestamps: TimestampFields,
    serialized_fields: BTreeMap<String, String>,
    orderable_fields: Vec<String>,
    condition_templates: Vec<String>,
    mandatory_conditions: Vec<String>,
}

impl EntityDeclarationBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            timestamps: TimestampFields::default(),
            serialized_fields: BTreeMap::new(),
            orderable_fields: Vec::new(),
            condition_templates: Vec::new(),
            mandatory_conditions: Vec::new(),
        }
    }

    pub fn timestamps(mut self, timestamps: TimestampFields) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn created_field(mut self, column: impl Into<String>) -> Self {
        self.timestamps.created = Some(column.into());
        self
    }

    pub fn updated_field(mut self, column: impl Into<String>) -> Self {
        self.timestamps.updated = Some(column.into());
        self
    }

    /// Store `column` through the named codec.
    pub fn serialize(mut self, column: impl Into<String>, codec: impl Into<String>) -> Self {
        self.serialized_fields.insert(column.into(), codec.into());
        self
    }

    pub fn orderable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.orderable_fields
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// Add a `column operator :param` template.
    pub fn condition(mut self, template: impl Into<String>) -> Self {
        self.condition_templates.push(template.into());
        self
    }

    /// Add a fixed SQL fragment ANDed into every conditional query.
    pub fn mandatory_condition(mut self, fragment: impl Into<String>) -> Self {
        self.mandatory_conditions.push(fragment.into());
        self
    }

    pub fn build(self) -> VernierResult<EntityDeclaration> {
        check_field_name(&self.table).map_err(|_| ConfigError::InvalidValue {
            field: "table".to_string(),
            value: self.table.clone(),
            reason: "table name must match ^\\w+$".to_string(),
        })?;

        let columns = self
            .timestamps
            .created
            .iter()
            .chain(self.timestamps.updated.iter())
            .chain(self.serialized_fields.keys())
            .chain(self.orderable_fields.iter());
        for column in columns {
            check_field_name(column).map_err(|_| ConfigError::InvalidValue {
                field: format!("{} column", self.table),
                value: column.clone(),
                reason: "column name must match ^\\w+$".to_string(),
            })?;
        }

        let condition_templates = self
            .condition_templates
            .iter()
            .map(|t| t.parse::<ConditionTemplate>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EntityDeclaration {
            table: self.table,
            timestamps: self.timestamps,
            serialized_fields: self.serialized_fields,
            orderable_fields: self.orderable_fields,
            condition_templates,
            mandatory_conditions: self.mandatory_conditions,
        })
    }
}
