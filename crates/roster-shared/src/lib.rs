use serde::{
  Deserialize,
  Serialize
};
use serde_json::{
  Map,
  Value
};

pub const STATUS_FIELD: &str = "status";

/// One listed entity as the backend
/// returned it. Resources differ in
/// their business fields, so the row
/// keeps the raw JSON object and only
/// interprets the identifier and the
/// status field.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Default,
)]
#[serde(transparent)]
pub struct Row {
  fields: Map<String, Value>
}

impl Row {
  pub fn from_map(
    fields: Map<String, Value>
  ) -> Self {
    Self {
      fields
    }
  }

  /// Returns `None` for anything that
  /// is not a JSON object.
  pub fn from_value(
    value: Value
  ) -> Option<Self> {
    match value {
      | Value::Object(fields) => {
        Some(Self {
          fields
        })
      }
      | _ => None
    }
  }

  pub fn fields(
    &self
  ) -> &Map<String, Value> {
    &self.fields
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<&Value> {
    self.fields.get(key)
  }

  /// Identifiers arrive as strings
  /// (`_id`) or numbers (`id`); both
  /// are compared in their string form.
  pub fn id(
    &self,
    id_field: &str
  ) -> Option<String> {
    match self.fields.get(id_field)? {
      | Value::String(raw) => {
        Some(raw.clone())
      }
      | Value::Number(num) => {
        Some(num.to_string())
      }
      | _ => None
    }
  }

  pub fn status(&self) -> Option<&str> {
    self
      .fields
      .get(STATUS_FIELD)
      .and_then(Value::as_str)
  }

  pub fn set_status(
    &mut self,
    status: &str
  ) {
    self.fields.insert(
      STATUS_FIELD.to_string(),
      Value::String(status.to_string())
    );
  }

  /// Plain-text rendering of a field
  /// for tables; strings lose their
  /// quotes, missing fields are empty.
  pub fn display_field(
    &self,
    key: &str
  ) -> String {
    match self.fields.get(key) {
      | None | Some(Value::Null) => {
        String::new()
      }
      | Some(Value::String(raw)) => {
        raw.clone()
      }
      | Some(other) => other.to_string()
    }
  }
}

/// Outbound parameters of a list read.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct ListQuery {
  pub page:   u32,
  pub limit:  u32,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub filter: Option<String>
}

impl ListQuery {
  /// Query-string pairs in wire order.
  /// `filter` is left out entirely when
  /// there is nothing to filter on.
  pub fn pairs(
    &self
  ) -> Vec<(&'static str, String)> {
    let mut pairs = vec![
      ("page", self.page.to_string()),
      ("limit", self.limit.to_string()),
    ];
    if let Some(filter) =
      self.filter.as_ref()
    {
      pairs.push((
        "filter",
        filter.clone()
      ));
    }
    pairs
  }
}

/// Canonical result of a list read,
/// whatever envelope the backend used.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Default,
)]
pub struct ListPage {
  pub items:       Vec<Row>,
  pub total_count: u64
}

impl ListPage {
  pub fn empty() -> Self {
    Self::default()
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct StatusChange {
  pub id_field: String,
  pub id:       String,
  pub from:     String,
  pub to:       String
}

impl StatusChange {
  /// Body of the status write, e.g.
  /// `{"adminId": "7", "status":
  /// "deactive"}`.
  pub fn body(&self) -> Value {
    let mut body = Map::new();
    body.insert(
      self.id_field.clone(),
      Value::String(self.id.clone())
    );
    body.insert(
      STATUS_FIELD.to_string(),
      Value::String(self.to.clone())
    );
    Value::Object(body)
  }
}
