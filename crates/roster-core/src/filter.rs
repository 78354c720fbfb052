use std::collections::BTreeMap;

use anyhow::{anyhow, bail};
use tracing::{debug, instrument, trace};

use crate::calendar::{CalendarSystem, DateRange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text, matched by the backend.
    Text,
    /// One of a fixed option set; the empty selection means "any".
    Enum { options: Vec<String> },
    /// Inclusive calendar-day range.
    DateRange,
}

/// A filterable field of one list screen. `name` is the key the UI binds
/// to, `wire_field` the key the backend filters on (UI `search` may filter
/// the `title` column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub wire_field: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn text(name: &str, wire_field: &str) -> Self {
        Self {
            name: name.to_string(),
            wire_field: wire_field.to_string(),
            kind: FieldKind::Text,
        }
    }

    pub fn choice(name: &str, wire_field: &str, options: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            wire_field: wire_field.to_string(),
            kind: FieldKind::Enum {
                options: options.iter().map(|opt| opt.to_string()).collect(),
            },
        }
    }

    pub fn date_range(name: &str, wire_field: &str) -> Self {
        Self {
            name: name.to_string(),
            wire_field: wire_field.to_string(),
            kind: FieldKind::DateRange,
        }
    }

    /// Parses a declaration such as `text:title`, `enum:status:active|deactive`
    /// or `date:createdAt`. A missing wire field defaults to the UI name.
    pub fn parse(name: &str, decl: &str) -> anyhow::Result<Self> {
        let mut parts = decl.trim().splitn(3, ':');
        let kind = parts.next().unwrap_or_default().trim();
        let wire_field = parts
            .next()
            .map(str::trim)
            .filter(|wire| !wire.is_empty())
            .unwrap_or(name);

        match kind {
            "text" => Ok(Self::text(name, wire_field)),
            "date" | "date-range" => Ok(Self::date_range(name, wire_field)),
            "enum" => {
                let options = parts
                    .next()
                    .ok_or_else(|| anyhow!("enum field {name} declares no options"))?
                    .split('|')
                    .map(str::trim)
                    .filter(|opt| !opt.is_empty())
                    .collect::<Vec<_>>();
                if options.is_empty() {
                    bail!("enum field {name} declares no options");
                }
                Ok(Self::choice(name, wire_field, &options))
            }
            other => Err(anyhow!("unknown kind {other:?} for filter field {name}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    Choice(String),
    Range(DateRange),
}

impl FilterValue {
    /// Empty values are kept in the draft (the input still shows them) but
    /// never reach the where clause.
    pub fn is_empty(&self) -> bool {
        match self {
            FilterValue::Text(text) => text.trim().is_empty(),
            FilterValue::Choice(choice) => choice.trim().is_empty(),
            FilterValue::Range(range) => range.is_empty(),
        }
    }

    /// Interprets raw input according to the field kind; date ranges use
    /// `start[..end]`.
    pub fn parse_for(
        field: &FieldSpec,
        calendar: CalendarSystem,
        raw: &str,
    ) -> anyhow::Result<Self> {
        match field.kind {
            FieldKind::Text => Ok(FilterValue::Text(raw.to_string())),
            FieldKind::Enum { .. } => Ok(FilterValue::Choice(raw.trim().to_string())),
            FieldKind::DateRange => Ok(FilterValue::Range(DateRange::parse(calendar, raw)?)),
        }
    }
}

pub type FilterValues = BTreeMap<String, FilterValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    /// The list reflects the draft.
    Idle,
    /// The draft diverged; the list still shows the applied filters.
    Dirty,
}

/// Two-tier filter state of one list screen plus the page number it
/// governs.
#[derive(Debug, Clone)]
pub struct FilterStateController {
    fields: Vec<FieldSpec>,
    draft: FilterValues,
    applied: FilterValues,
    page: u32,
    phase: FilterPhase,
}

impl FilterStateController {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            draft: FilterValues::new(),
            applied: FilterValues::new(),
            page: 1,
            phase: FilterPhase::Idle,
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn draft(&self) -> &FilterValues {
        &self.draft
    }

    pub fn applied(&self) -> &FilterValues {
        &self.applied
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn phase(&self) -> FilterPhase {
        self.phase
    }

    /// Rejects unknown fields, values of the wrong kind, enum values
    /// outside the option set and inverted date ranges. The applied set is
    /// untouched either way.
    #[instrument(skip(self))]
    pub fn set_draft(&mut self, name: &str, value: FilterValue) -> anyhow::Result<()> {
        let field = self
            .field(name)
            .ok_or_else(|| anyhow!("unknown filter field: {name}"))?;

        match (&field.kind, &value) {
            (FieldKind::Text, FilterValue::Text(_)) => {}
            (FieldKind::Enum { options }, FilterValue::Choice(choice)) => {
                if !choice.is_empty() && !options.iter().any(|opt| opt == choice) {
                    bail!(
                        "{choice:?} is not an option of {name} (expected one of {})",
                        options.join(", ")
                    );
                }
            }
            (FieldKind::DateRange, FilterValue::Range(range)) => {
                if range.is_inverted() {
                    bail!("date range for {name} ends before it starts");
                }
            }
            (kind, value) => {
                bail!("filter field {name} is {kind:?} but got {value:?}");
            }
        }

        trace!(field = name, "draft filter changed");
        self.draft.insert(name.to_string(), value);
        self.phase = FilterPhase::Dirty;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn apply(&mut self) -> &FilterValues {
        self.applied = self.draft.clone();
        self.page = 1;
        self.phase = FilterPhase::Idle;
        debug!(applied = self.applied.len(), "applied draft filters");
        &self.applied
    }

    #[instrument(skip(self))]
    pub fn reset(&mut self) {
        self.draft.clear();
        self.applied.clear();
        self.page = 1;
        self.phase = FilterPhase::Idle;
        debug!("reset filters");
    }

    /// Pages are 1-based; anything lower is lifted to 1. Upper bound
    /// clamping needs the total and is done by the screen.
    pub fn set_page(&mut self, page: u32) -> u32 {
        self.page = page.max(1);
        self.page
    }
}
