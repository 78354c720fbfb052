use std::collections::BTreeMap;

use anyhow::Context;
use roster_shared::ListQuery;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::calendar::RangeNormalizer;
use crate::filter::{FieldSpec, FilterValue, FilterValues};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WhereValue {
    Eq(String),
    Range { from: String, to: String },
}

/// Backend filter object, keyed by wire field. Sorted keys keep the
/// serialized form byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WhereClause(BTreeMap<String, WhereValue>);

impl WhereClause {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, wire_field: &str) -> Option<&WhereValue> {
        self.0.get(wire_field)
    }
}

#[derive(Serialize)]
struct FilterParam<'a> {
    #[serde(rename = "where")]
    where_clause: &'a WhereClause,
}

/// Turns applied filter values into the backend's where clause and its
/// query-string form.
#[derive(Debug, Clone)]
pub struct QuerySerializer {
    fields: Vec<FieldSpec>,
    normalizer: RangeNormalizer,
}

impl QuerySerializer {
    pub fn new(fields: Vec<FieldSpec>, normalizer: RangeNormalizer) -> Self {
        Self { fields, normalizer }
    }

    /// Blank text, empty enum selections and ranges without a start are
    /// left out; values for undeclared fields are ignored.
    #[instrument(skip_all, fields(values = applied.len()))]
    pub fn build_where(&self, applied: &FilterValues) -> anyhow::Result<WhereClause> {
        let mut clause = BTreeMap::new();

        for (name, value) in applied {
            let Some(field) = self.fields.iter().find(|field| &field.name == name) else {
                warn!(field = %name, "ignoring value for undeclared filter field");
                continue;
            };
            if value.is_empty() {
                continue;
            }

            let wire_value = match value {
                FilterValue::Text(text) => WhereValue::Eq(text.trim().to_string()),
                FilterValue::Choice(choice) => WhereValue::Eq(choice.trim().to_string()),
                FilterValue::Range(range) => {
                    let Some(bounds) = self
                        .normalizer
                        .normalize_range(range)
                        .with_context(|| format!("invalid date range for {name}"))?
                    else {
                        continue;
                    };
                    WhereValue::Range {
                        from: bounds.from_iso(),
                        to: bounds.to_iso(),
                    }
                }
            };
            clause.insert(field.wire_field.clone(), wire_value);
        }

        debug!(keys = clause.len(), "built where clause");
        Ok(WhereClause(clause))
    }

    /// `None` when nothing is filtered, so the caller omits the parameter
    /// instead of sending `{"where":{}}`.
    pub fn serialize(&self, applied: &FilterValues) -> anyhow::Result<Option<String>> {
        let clause = self.build_where(applied)?;
        encode_filter(&clause)
    }

    pub fn list_query(
        &self,
        page: u32,
        limit: u32,
        applied: &FilterValues,
    ) -> anyhow::Result<ListQuery> {
        Ok(ListQuery {
            page,
            limit,
            filter: self.serialize(applied)?,
        })
    }
}

pub fn encode_filter(clause: &WhereClause) -> anyhow::Result<Option<String>> {
    if clause.is_empty() {
        return Ok(None);
    }
    let encoded = serde_json::to_string(&FilterParam {
        where_clause: clause,
    })
    .context("failed to encode filter parameter")?;
    Ok(Some(encoded))
}
