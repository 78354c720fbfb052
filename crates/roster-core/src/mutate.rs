use std::collections::HashSet;

use anyhow::anyhow;
use parking_lot::Mutex;
use roster_shared::{Row, StatusChange};
use tracing::{debug, info, instrument, warn};

use crate::transport::{Transport, TransportError};

/// Two-state status toggle, e.g. `active ⇄ deactive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleRule {
    on: String,
    off: String,
}

impl Default for ToggleRule {
    fn default() -> Self {
        Self::new("active", "deactive")
    }
}

impl ToggleRule {
    pub fn new(on: &str, off: &str) -> Self {
        Self {
            on: on.to_string(),
            off: off.to_string(),
        }
    }

    /// Parses `on,off`.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let (on, off) = raw
            .split_once(',')
            .ok_or_else(|| anyhow!("expected two statuses like active,deactive, got: {raw}"))?;
        let (on, off) = (on.trim(), off.trim());
        if on.is_empty() || off.is_empty() || on == off {
            return Err(anyhow!("toggle statuses must be two distinct values, got: {raw}"));
        }
        Ok(Self::new(on, off))
    }

    pub fn on(&self) -> &str {
        &self.on
    }

    pub fn off(&self) -> &str {
        &self.off
    }

    pub fn next(&self, current: &str) -> Option<&str> {
        if current == self.on {
            Some(self.off.as_str())
        } else if current == self.off {
            Some(self.on.as_str())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    #[error("a status change for {id} is already in flight")]
    InFlight { id: String },

    #[error("no loaded row has id {id}")]
    UnknownEntity { id: String },

    #[error("row {id} has no status to toggle")]
    MissingStatus { id: String },

    #[error("status {status:?} of row {id} has no toggle counterpart")]
    UnknownStatus { id: String, status: String },

    #[error("status change for {id} failed and was rolled back: {source}")]
    Rejected {
        id: String,
        #[source]
        source: TransportError,
    },
}

/// Removes the id from the in-flight set however the mutation ends,
/// including when its future is dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.id);
    }
}

/// Applies status toggles to loaded rows before the backend confirms them
/// and reverts them when the write fails.
#[derive(Debug)]
pub struct OptimisticMutator {
    status_path: String,
    id_field: String,
    rule: ToggleRule,
    in_flight: Mutex<HashSet<String>>,
}

impl OptimisticMutator {
    pub fn new(status_path: impl Into<String>, id_field: impl Into<String>, rule: ToggleRule) -> Self {
        Self {
            status_path: status_path.into(),
            id_field: id_field.into(),
            rule,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_processing(&self, id: &str) -> bool {
        self.in_flight.lock().contains(id)
    }

    pub fn processing_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Flips the row's status in `rows`, then writes it. A second toggle of
    /// the same id while the first is pending is rejected. On failure the
    /// row goes back to its previous status, unless a newer fetch has
    /// already replaced it.
    #[instrument(skip(self, transport, rows), fields(path = %self.status_path))]
    pub async fn toggle<T>(
        &self,
        transport: &T,
        rows: &Mutex<Vec<Row>>,
        id: &str,
    ) -> Result<StatusChange, MutationError>
    where
        T: Transport + ?Sized,
    {
        let (change, _guard) = {
            let mut rows = rows.lock();
            let row = rows
                .iter_mut()
                .find(|row| row.id(&self.id_field).as_deref() == Some(id))
                .ok_or_else(|| MutationError::UnknownEntity { id: id.to_string() })?;

            let current = row
                .status()
                .ok_or_else(|| MutationError::MissingStatus { id: id.to_string() })?
                .to_string();
            let next = self
                .rule
                .next(&current)
                .ok_or_else(|| MutationError::UnknownStatus {
                    id: id.to_string(),
                    status: current.clone(),
                })?
                .to_string();

            if !self.in_flight.lock().insert(id.to_string()) {
                debug!(id, "rejecting toggle while another is in flight");
                return Err(MutationError::InFlight { id: id.to_string() });
            }
            let guard = InFlightGuard {
                in_flight: &self.in_flight,
                id: id.to_string(),
            };

            row.set_status(&next);
            debug!(id, from = %current, to = %next, "applied optimistic status");

            let change = StatusChange {
                id_field: self.id_field.clone(),
                id: id.to_string(),
                from: current,
                to: next,
            };
            (change, guard)
        };

        match transport.put_json(&self.status_path, &change.body()).await {
            Ok(()) => {
                info!(id, status = %change.to, "status change confirmed");
                Ok(change)
            }
            Err(source) => {
                warn!(id, error = %source, "status change failed; rolling back");
                rollback(rows, &self.id_field, &change);
                Err(MutationError::Rejected {
                    id: id.to_string(),
                    source,
                })
            }
        }
    }
}

fn rollback(rows: &Mutex<Vec<Row>>, id_field: &str, change: &StatusChange) {
    let mut rows = rows.lock();
    let Some(row) = rows
        .iter_mut()
        .find(|row| row.id(id_field).as_deref() == Some(change.id.as_str()))
    else {
        debug!(id = %change.id, "row left the list before rollback");
        return;
    };

    if row.status() == Some(change.to.as_str()) {
        row.set_status(&change.from);
    } else {
        debug!(id = %change.id, "row was refreshed since the toggle; keeping it");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use roster_shared::{ListQuery, Row};
    use serde_json::{Value, json};

    use super::{MutationError, OptimisticMutator, ToggleRule};
    use crate::transport::{Transport, TransportError};

    struct StatusTransport {
        fail: bool,
        writes: AtomicUsize,
        last_body: Mutex<Option<Value>>,
    }

    impl StatusTransport {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                writes: AtomicUsize::new(0),
                last_body: Mutex::new(None),
            }
        }
    }

    #[async_trait::async_trait]
    impl Transport for StatusTransport {
        async fn get_list(&self, _path: &str, _query: &ListQuery) -> Result<Value, TransportError> {
            Ok(json!([]))
        }

        async fn put_json(&self, path: &str, body: &Value) -> Result<(), TransportError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.writes.fetch_add(1, Ordering::SeqCst);
            *self.last_body.lock() = Some(body.clone());
            if self.fail {
                return Err(TransportError::Network {
                    path: path.to_string(),
                    message: "connection reset".to_string(),
                });
            }
            Ok(())
        }
    }

    fn rows() -> Mutex<Vec<Row>> {
        Mutex::new(vec![
            Row::from_value(json!({"_id": "a1", "title": "first", "status": "active"}))
                .expect("row"),
            Row::from_value(json!({"_id": "b2", "title": "second", "status": "deactive"}))
                .expect("row"),
        ])
    }

    fn status_of(rows: &Mutex<Vec<Row>>, id: &str) -> Option<String> {
        rows.lock()
            .iter()
            .find(|row| row.id("_id").as_deref() == Some(id))
            .and_then(|row| row.status().map(str::to_string))
    }

    fn mutator() -> OptimisticMutator {
        OptimisticMutator::new("blog/changeStatus", "_id", ToggleRule::default())
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_rolls_back() {
        let rows = rows();
        let transport = StatusTransport::new(true);

        let err = mutator()
            .toggle(&transport, &rows, "a1")
            .await
            .expect_err("write fails");

        assert!(matches!(err, MutationError::Rejected { .. }));
        assert_eq!(status_of(&rows, "a1").as_deref(), Some("active"));
        assert_eq!(transport.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn optimistic_status_is_visible_before_confirmation() {
        let rows = rows();
        let transport = StatusTransport::new(false);
        let mutator = mutator();

        let (change, seen) = tokio::join!(mutator.toggle(&transport, &rows, "b2"), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            (status_of(&rows, "b2"), mutator.is_processing("b2"))
        });

        let change = change.expect("toggle succeeds");
        assert_eq!(seen, (Some("active".to_string()), true));
        assert_eq!(change.to, "active");
        assert_eq!(status_of(&rows, "b2").as_deref(), Some("active"));
        assert!(!mutator.is_processing("b2"));
        assert_eq!(
            transport.last_body.lock().clone(),
            Some(json!({"_id": "b2", "status": "active"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_toggle_on_same_row_is_rejected() {
        let rows = rows();
        let transport = StatusTransport::new(false);
        let mutator = mutator();

        let (first, second, other) = tokio::join!(
            mutator.toggle(&transport, &rows, "a1"),
            mutator.toggle(&transport, &rows, "a1"),
            mutator.toggle(&transport, &rows, "b2"),
        );

        assert!(first.is_ok());
        assert_eq!(
            second,
            Err(MutationError::InFlight {
                id: "a1".to_string()
            })
        );
        assert!(other.is_ok());
        assert_eq!(status_of(&rows, "a1").as_deref(), Some("deactive"));
        assert_eq!(transport.writes.load(Ordering::SeqCst), 2);
        assert_eq!(mutator.processing_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_keeps_rows_replaced_by_a_refresh() {
        let rows = rows();
        let transport = StatusTransport::new(true);
        let mutator = mutator();

        let (result, ()) = tokio::join!(mutator.toggle(&transport, &rows, "a1"), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            *rows.lock() = vec![
                Row::from_value(json!({"_id": "a1", "status": "archived"})).expect("row"),
            ];
        });

        assert!(result.is_err());
        assert_eq!(status_of(&rows, "a1").as_deref(), Some("archived"));
    }

    #[tokio::test]
    async fn unknown_rows_and_statuses_are_refused() {
        let rows = Mutex::new(vec![
            Row::from_value(json!({"_id": "c3", "status": "pending"})).expect("row"),
            Row::from_value(json!({"_id": "d4"})).expect("row"),
        ]);
        let transport = StatusTransport::new(false);
        let mutator = mutator();

        assert!(matches!(
            mutator.toggle(&transport, &rows, "zz").await,
            Err(MutationError::UnknownEntity { .. })
        ));
        assert!(matches!(
            mutator.toggle(&transport, &rows, "c3").await,
            Err(MutationError::UnknownStatus { .. })
        ));
        assert!(matches!(
            mutator.toggle(&transport, &rows, "d4").await,
            Err(MutationError::MissingStatus { .. })
        ));
        assert_eq!(transport.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn toggle_rule_parses_pairs() {
        let rule = ToggleRule::parse("open, closed").expect("rule");
        assert_eq!(rule.next("open"), Some("closed"));
        assert_eq!(rule.next("closed"), Some("open"));
        assert_eq!(rule.next("other"), None);
        assert!(ToggleRule::parse("open").is_err());
        assert!(ToggleRule::parse("open,open").is_err());
    }
}
