//! Dynamic query builder.
//!
//! Turns a flat condition map into a parameterized predicate using the
//! condition templates an entity declares, and renders whitelisted ORDER BY
//! and validated LIMIT/OFFSET clauses. Caller values are always bound; the
//! only caller-influenced text in a statement is a whitelisted column name,
//! an `ASC`/`DESC` keyword or a validated integer.

use crate::declaration::EntityDeclaration;
use crate::error::{ConfigError, ValidationError, VernierResult};
use crate::{value_kind, Conditions};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

static FIELD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+$").expect("field name pattern is valid"));

static TEMPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(\w+)\s+(=|!=|<>|>=|<=|>|<|pre_like|suf_like|like|in)\s*(\()?\s*:(\w+)\s*(\))?\s*$",
    )
    .expect("condition template pattern is valid")
});

/// Reject anything but word characters in an identifier.
pub fn check_field_name(name: &str) -> VernierResult<()> {
    if FIELD_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFieldName {
            name: name.to_string(),
        }
        .into())
    }
}

/// [`check_field_name`] over a list of identifiers.
pub fn check_field_names<'a, I>(names: I) -> VernierResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().try_for_each(check_field_name)
}

// ============================================================================
// CONDITION TEMPLATES
// ============================================================================

/// Operator class of a condition template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// `LIKE value%`
    PrefixLike,
    /// `LIKE %value`
    SuffixLike,
    /// `LIKE %value%`
    ContainsLike,
    /// `IN (?, ?, ...)`
    In,
}

impl Operator {
    fn parse(token: &str) -> Option<Self> {
        Some(match token.to_ascii_lowercase().as_str() {
            "=" => Operator::Eq,
            "!=" | "<>" => Operator::NotEq,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "pre_like" => Operator::PrefixLike,
            "suf_like" => Operator::SuffixLike,
            "like" => Operator::ContainsLike,
            "in" => Operator::In,
            _ => return None,
        })
    }

    /// SQL spelling of the operator.
    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "<>",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::PrefixLike | Operator::SuffixLike | Operator::ContainsLike => "LIKE",
            Operator::In => "IN",
        }
    }
}

/// A parsed `column operator :param` condition template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionTemplate {
    pub field: String,
    pub operator: Operator,
    pub param: String,
}

impl ConditionTemplate {
    /// Render this template against a caller value, appending bind values.
    fn render(&self, value: &Value, params: &mut Vec<Value>) -> VernierResult<String> {
        match self.operator {
            Operator::In => {
                let items = value.as_array().ok_or_else(|| ValidationError::InListRequiresArray {
                    param: self.param.clone(),
                })?;
                for item in items {
                    self.check_scalar(item)?;
                    params.push(item.clone());
                }
                let marks = vec!["?"; items.len()].join(", ");
                Ok(format!("{} IN ({})", self.field, marks))
            }
            Operator::PrefixLike | Operator::SuffixLike | Operator::ContainsLike => {
                self.check_scalar(value)?;
                let text = scalar_text(value);
                let pattern = match self.operator {
                    Operator::PrefixLike => format!("{}%", text),
                    Operator::SuffixLike => format!("%{}", text),
                    _ => format!("%{}%", text),
                };
                params.push(Value::String(pattern));
                Ok(format!("{} LIKE ?", self.field))
            }
            _ => {
                self.check_scalar(value)?;
                params.push(value.clone());
                Ok(format!("{} {} ?", self.field, self.operator.sql()))
            }
        }
    }

    fn check_scalar(&self, value: &Value) -> VernierResult<()> {
        match value {
            Value::Array(_) | Value::Object(_) => Err(ValidationError::NonScalarCondition {
                param: self.param.clone(),
            }
            .into()),
            _ => Ok(()),
        }
    }
}

impl FromStr for ConditionTemplate {
    type Err = ConfigError;

    fn from_str(template: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidConditionTemplate {
            template: template.to_string(),
        };
        let caps = TEMPLATE.captures(template).ok_or_else(invalid)?;
        let operator = Operator::parse(&caps[2]).ok_or_else(invalid)?;
        // Parentheses must be balanced and belong to IN lists only.
        let open = caps.get(3).is_some();
        let close = caps.get(5).is_some();
        if open != close || (open && operator != Operator::In) {
            return Err(invalid());
        }
        Ok(Self {
            field: caps[1].to_string(),
            operator,
            param: caps[4].to_string(),
        })
    }
}

impl fmt::Display for ConditionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::In => write!(f, "{} IN (:{})", self.field, self.param),
            Operator::PrefixLike => write!(f, "{} PRE_LIKE :{}", self.field, self.param),
            Operator::SuffixLike => write!(f, "{} SUF_LIKE :{}", self.field, self.param),
            _ => write!(f, "{} {} :{}", self.field, self.operator.sql(), self.param),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// ORDERING AND PAGING
// ============================================================================

/// Ordered list of `(column, direction)` pairs as supplied by the caller.
///
/// Nothing is validated on construction; [`QueryBuilder::order_by`] checks
/// every pair against the entity's whitelist before rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBys(Vec<(String, String)>);

impl OrderBys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw `(column, direction)` pair.
    pub fn push(mut self, field: impl Into<String>, direction: impl Into<String>) -> Self {
        self.0.push((field.into(), direction.into()));
        self
    }

    pub fn asc(self, field: impl Into<String>) -> Self {
        self.push(field, "ASC")
    }

    pub fn desc(self, field: impl Into<String>) -> Self {
        self.push(field, "DESC")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(f, d)| (f.as_str(), d.as_str()))
    }

    /// JSON form used in argument signatures: `[[column, direction], ...]`.
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|(f, d)| Value::Array(vec![Value::from(f.as_str()), Value::from(d.as_str())]))
                .collect(),
        )
    }
}

impl<F: Into<String>, D: Into<String>> FromIterator<(F, D)> for OrderBys {
    fn from_iter<T: IntoIterator<Item = (F, D)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(f, d)| (f.into(), d.into())).collect())
    }
}

/// Raw start/limit pair as supplied by the caller.
///
/// `Value::Null` stands for "absent". Values stay raw until
/// [`Paging::resolve`] so that a malformed bound fails with a
/// [`ValidationError`] instead of being coerced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paging {
    start: Value,
    limit: Value,
}

impl Default for Paging {
    fn default() -> Self {
        Self::none()
    }
}

impl Paging {
    /// Both bounds present.
    pub fn new(start: impl Into<Value>, limit: impl Into<Value>) -> Self {
        Self {
            start: start.into(),
            limit: limit.into(),
        }
    }

    /// No paging.
    pub fn none() -> Self {
        Self {
            start: Value::Null,
            limit: Value::Null,
        }
    }

    /// Either bound may be absent; resolving a half-specified pair fails.
    pub fn from_parts(start: Option<Value>, limit: Option<Value>) -> Self {
        Self {
            start: start.unwrap_or(Value::Null),
            limit: limit.unwrap_or(Value::Null),
        }
    }

    /// Validate and return `(start, limit)`, or `None` when no paging applies.
    pub fn resolve(&self) -> VernierResult<Option<(u64, u64)>> {
        match (&self.start, &self.limit) {
            (Value::Null, Value::Null) => Ok(None),
            (Value::Null, _) | (_, Value::Null) => Err(ValidationError::IncompletePaging.into()),
            (start, limit) => Ok(Some((
                paging_bound("start", start)?,
                paging_bound("limit", limit)?,
            ))),
        }
    }

    /// JSON form used in argument signatures: `[start, limit]`.
    pub fn to_value(&self) -> Value {
        Value::Array(vec![self.start.clone(), self.limit.clone()])
    }
}

fn paging_bound(name: &str, value: &Value) -> VernierResult<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        ValidationError::InvalidPagingValue {
            name: name.to_string(),
            value: match value {
                Value::String(s) => s.clone(),
                other => format!("{} {}", value_kind(other), other),
            },
        }
        .into()
    })
}

// ============================================================================
// STATEMENTS
// ============================================================================

/// WHERE-clause body and its bind values. `sql` is empty when nothing applies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// ` WHERE <predicate>` or nothing.
    pub fn where_clause(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }
}

/// A complete parameterized statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Builds statements for one declared entity.
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'a> {
    declaration: &'a EntityDeclaration,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(declaration: &'a EntityDeclaration) -> Self {
        Self { declaration }
    }

    /// Drop `null`, `""` and `[]` entries.
    pub fn filter_conditions(conditions: &Conditions) -> Conditions {
        conditions
            .iter()
            .filter(|(_, value)| match value {
                Value::Null => false,
                Value::String(s) => !s.is_empty(),
                Value::Array(items) => !items.is_empty(),
                _ => true,
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Match the filtered conditions against the declared templates.
    ///
    /// Templates apply in declaration order. Keys that match no template are
    /// ignored.
    pub fn predicate(&self, conditions: &Conditions) -> VernierResult<Predicate> {
        let filtered = Self::filter_conditions(conditions);
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        for template in self.declaration.condition_templates() {
            if let Some(value) = filtered.get(&template.param) {
                clauses.push(template.render(value, &mut params)?);
            }
        }

        for key in filtered.keys() {
            if !self.declaration.declares_param(key) {
                tracing::trace!(
                    table = self.declaration.table(),
                    condition = %key,
                    "Ignoring condition without a declared template"
                );
            }
        }

        clauses.extend(
            self.declaration
                .mandatory_conditions()
                .iter()
                .map(|c| format!("({})", c)),
        );

        Ok(Predicate {
            sql: clauses.join(" AND "),
            params,
        })
    }

    /// ` ORDER BY a ASC, b DESC` or nothing.
    pub fn order_by(&self, order_bys: &OrderBys) -> VernierResult<String> {
        if order_bys.is_empty() {
            return Ok(String::new());
        }
        let allowed = self.declaration.orderable_fields();
        let mut parts = Vec::new();
        for (field, direction) in order_bys.iter() {
            if !allowed.iter().any(|a| a == field) {
                return Err(ValidationError::UnknownOrderField {
                    field: field.to_string(),
                    allowed: allowed.join(","),
                }
                .into());
            }
            let direction = direction.to_ascii_uppercase();
            if direction != "ASC" && direction != "DESC" {
                return Err(ValidationError::InvalidOrderDirection { direction }.into());
            }
            parts.push(format!("{} {}", field, direction));
        }
        Ok(format!(" ORDER BY {}", parts.join(", ")))
    }

    /// ` LIMIT n OFFSET m` or nothing.
    pub fn limit(paging: &Paging) -> VernierResult<String> {
        Ok(match paging.resolve()? {
            Some((start, limit)) => format!(" LIMIT {} OFFSET {}", limit, start),
            None => String::new(),
        })
    }

    /// Append validated ordering and paging to a caller-built statement.
    pub fn paged(&self, sql: &str, order_bys: &OrderBys, paging: &Paging) -> VernierResult<String> {
        let order = self.order_by(order_bys)?;
        let limit = Self::limit(paging)?;
        Ok(format!("{}{}{}", sql, order, limit))
    }

    /// `SELECT * FROM t WHERE ... ORDER BY ... LIMIT ...`
    pub fn select(
        &self,
        conditions: &Conditions,
        order_bys: &OrderBys,
        paging: &Paging,
    ) -> VernierResult<Statement> {
        // Validate ordering and paging before doing anything with conditions.
        let order = self.order_by(order_bys)?;
        let limit = Self::limit(paging)?;
        let predicate = self.predicate(conditions)?;
        Ok(Statement::new(
            format!(
                "SELECT * FROM {}{}{}{}",
                self.declaration.table(),
                predicate.where_clause(),
                order,
                limit
            ),
            predicate.params,
        ))
    }

    /// `SELECT COUNT(*) FROM t WHERE ...`
    pub fn count(&self, conditions: &Conditions) -> VernierResult<Statement> {
        let predicate = self.predicate(conditions)?;
        Ok(Statement::new(
            format!(
                "SELECT COUNT(*) FROM {}{}",
                self.declaration.table(),
                predicate.where_clause()
            ),
            predicate.params,
        ))
    }

    /// `SELECT id FROM t WHERE ...`
    pub fn select_ids(&self, conditions: &Conditions) -> VernierResult<Statement> {
        let predicate = self.predicate(conditions)?;
        Ok(Statement::new(
            format!(
                "SELECT {} FROM {}{}",
                crate::ID_COLUMN,
                self.declaration.table(),
                predicate.where_clause()
            ),
            predicate.params,
        ))
    }

    /// `DELETE FROM t WHERE ...`, or `None` when no declared template applies.
    ///
    /// Mandatory conditions alone never qualify a delete.
    pub fn delete(&self, conditions: &Conditions) -> VernierResult<Option<Statement>> {
        let filtered = Self::filter_conditions(conditions);
        if !filtered.keys().any(|k| self.declaration.declares_param(k)) {
            return Ok(None);
        }
        let predicate = self.predicate(&filtered)?;
        Ok(Some(Statement::new(
            format!(
                "DELETE FROM {}{}",
                self.declaration.table(),
                predicate.where_clause()
            ),
            predicate.params,
        )))
    }
}
