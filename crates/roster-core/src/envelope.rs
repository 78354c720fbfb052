use roster_shared::{ListPage, Row};
use serde_json::Value;
use tracing::{trace, warn};

/// Which envelope shape a response was read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeShape {
    Aggregation,
    BareArray,
    Keyed,
    Unknown,
}

/// Reconciles the list envelopes observed across endpoints into a
/// [`ListPage`]. The first matching rule wins:
///
/// 1. `result[0]` exists: items from `result[0].data`, total from
///    `result[0].total[0].count`
/// 2. the envelope is an array
/// 3. `list` (or the resource's own key) is an array; total from `total`
///    when numeric
/// 4. anything else is an empty page
#[derive(Debug, Clone, Default)]
pub struct ResultUnwrapper {
    known_key: Option<String>,
}

impl ResultUnwrapper {
    pub fn new(known_key: Option<String>) -> Self {
        Self { known_key }
    }

    pub fn unwrap(&self, envelope: &Value) -> ListPage {
        self.unwrap_with_shape(envelope).0
    }

    pub fn unwrap_with_shape(&self, envelope: &Value) -> (ListPage, EnvelopeShape) {
        if let Some(first) = envelope
            .get("result")
            .and_then(Value::as_array)
            .and_then(|result| result.first())
        {
            let items = first.get("data").map(rows_from).unwrap_or_default();
            let total_count = first
                .get("total")
                .and_then(Value::as_array)
                .and_then(|total| total.first())
                .and_then(|entry| entry.get("count"))
                .and_then(as_count)
                .unwrap_or(0);
            trace!(items = items.len(), total_count, "unwrapped aggregation envelope");
            return (ListPage { items, total_count }, EnvelopeShape::Aggregation);
        }

        if envelope.is_array() {
            let items = rows_from(envelope);
            let total_count = items.len() as u64;
            return (ListPage { items, total_count }, EnvelopeShape::BareArray);
        }

        let keyed = std::iter::once("list")
            .chain(self.known_key.as_deref())
            .find_map(|key| envelope.get(key).filter(|value| value.is_array()));
        if let Some(list) = keyed {
            let items = rows_from(list);
            let total_count = envelope
                .get("total")
                .and_then(as_count)
                .unwrap_or(items.len() as u64);
            return (ListPage { items, total_count }, EnvelopeShape::Keyed);
        }

        warn!("unrecognized list envelope; treating as empty");
        (ListPage::empty(), EnvelopeShape::Unknown)
    }
}

fn rows_from(value: &Value) -> Vec<Row> {
    let Some(values) = value.as_array() else {
        return Vec::new();
    };

    let rows = values
        .iter()
        .cloned()
        .filter_map(Row::from_value)
        .collect::<Vec<_>>();
    if rows.len() != values.len() {
        warn!(
            dropped = values.len() - rows.len(),
            "dropped non-object list items"
        );
    }
    rows
}

fn as_count(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64))
}
