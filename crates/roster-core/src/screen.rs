use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use roster_shared::{Row, StatusChange};
use tracing::{debug, info, instrument};

use crate::calendar::{CalendarSystem, RangeNormalizer};
use crate::config::Config;
use crate::envelope::ResultUnwrapper;
use crate::fetch::{FetchOutcome, PaginatedFetcher};
use crate::filter::{FilterPhase, FilterStateController, FilterValue, FilterValues};
use crate::mutate::{MutationError, OptimisticMutator};
use crate::notify::{NoticeKind, Notifier, TracingNotifier};
use crate::page::PageInfo;
use crate::query::QuerySerializer;
use crate::resource::ResourceSpec;
use crate::transport::{Transport, TransportError};

pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(600);

#[derive(Debug, Default)]
struct ListView {
    total_count: u64,
    is_loading: bool,
    loaded: bool,
}

/// What a debounced search keystroke ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// A later keystroke arrived within the debounce window.
    Superseded,
    Fetched(FetchOutcome),
}

/// One list screen: filters, the current page, the loaded rows and the
/// status toggles on them. Every page change and every change of the
/// applied filters issues exactly one fetch.
pub struct ListScreen {
    resource: ResourceSpec,
    calendar: CalendarSystem,
    debounce: Duration,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    serializer: QuerySerializer,
    fetcher: PaginatedFetcher,
    mutator: OptimisticMutator,
    filters: Mutex<FilterStateController>,
    rows: Mutex<Vec<Row>>,
    view: Mutex<ListView>,
    search_generation: AtomicU64,
}

impl ListScreen {
    pub fn new(resource: ResourceSpec, transport: Arc<dyn Transport>) -> Self {
        let serializer = QuerySerializer::new(resource.fields.clone(), RangeNormalizer::default());
        let fetcher = PaginatedFetcher::new(
            resource.list_path(),
            ResultUnwrapper::new(resource.list_key.clone()),
        );
        let mutator = OptimisticMutator::new(
            resource.status_path(),
            resource.id_field.clone(),
            resource.toggle.clone(),
        );
        let filters = FilterStateController::new(resource.fields.clone());

        Self {
            resource,
            calendar: CalendarSystem::default(),
            debounce: DEFAULT_SEARCH_DEBOUNCE,
            transport,
            notifier: Arc::new(TracingNotifier),
            serializer,
            fetcher,
            mutator,
            filters: Mutex::new(filters),
            rows: Mutex::new(Vec::new()),
            view: Mutex::new(ListView::default()),
            search_generation: AtomicU64::new(0),
        }
    }

    /// Applies the calendar, timezone and debounce settings of `cfg`.
    pub fn from_config(
        cfg: &Config,
        resource: ResourceSpec,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let calendar = cfg.calendar()?;
        let normalizer = cfg.range_normalizer()?;
        let debounce = cfg.search_debounce()?;
        Ok(Self::new(resource, transport)
            .with_calendar(calendar)
            .with_normalizer(normalizer)
            .with_debounce(debounce))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_normalizer(mut self, normalizer: RangeNormalizer) -> Self {
        self.serializer = QuerySerializer::new(self.resource.fields.clone(), normalizer);
        self
    }

    pub fn with_calendar(mut self, calendar: CalendarSystem) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn resource(&self) -> &ResourceSpec {
        &self.resource
    }

    pub fn draft_filters(&self) -> FilterValues {
        self.filters.lock().draft().clone()
    }

    pub fn applied_filters(&self) -> FilterValues {
        self.filters.lock().applied().clone()
    }

    pub fn phase(&self) -> FilterPhase {
        self.filters.lock().phase()
    }

    pub fn current_page(&self) -> u32 {
        self.filters.lock().page()
    }

    pub fn items(&self) -> Vec<Row> {
        self.rows.lock().clone()
    }

    pub fn total_count(&self) -> u64 {
        self.view.lock().total_count
    }

    pub fn is_loading(&self) -> bool {
        self.view.lock().is_loading
    }

    pub fn is_processing(&self, id: &str) -> bool {
        self.mutator.is_processing(id)
    }

    pub fn page_info(&self) -> PageInfo {
        PageInfo::new(
            self.current_page(),
            self.resource.page_size,
            self.total_count(),
        )
    }

    /// Changes only the draft; the list keeps showing the applied filters.
    /// Invalid input is returned to the caller, not notified.
    pub fn set_draft_filter(&self, field: &str, value: FilterValue) -> anyhow::Result<()> {
        self.filters.lock().set_draft(field, value)
    }

    /// Like [`ListScreen::set_draft_filter`], interpreting `raw` according
    /// to the field's kind.
    pub fn set_draft_input(&self, field: &str, raw: &str) -> anyhow::Result<()> {
        let value = {
            let filters = self.filters.lock();
            let spec = filters
                .field(field)
                .ok_or_else(|| anyhow!("unknown filter field: {field}"))?;
            FilterValue::parse_for(spec, self.calendar, raw)?
        };
        self.set_draft_filter(field, value)
    }

    #[instrument(skip(self), fields(resource = %self.resource.name))]
    pub async fn apply_filters(&self) -> FetchOutcome {
        self.cancel_pending_search();
        self.filters.lock().apply();
        self.load().await
    }

    #[instrument(skip(self), fields(resource = %self.resource.name))]
    pub async fn reset_filters(&self) -> FetchOutcome {
        self.cancel_pending_search();
        self.filters.lock().reset();
        self.load().await
    }

    /// Moves to page `page`, clamped into the pages the last load reported.
    #[instrument(skip(self), fields(resource = %self.resource.name))]
    pub async fn set_page(&self, page: u32) -> FetchOutcome {
        let target = {
            let view = self.view.lock();
            if view.loaded {
                PageInfo::new(page, self.resource.page_size, view.total_count).clamp(page)
            } else {
                page.max(1)
            }
        };
        if target != page {
            debug!(requested = page, target, "clamped page request");
        }
        self.filters.lock().set_page(target);
        self.load().await
    }

    /// Reloads the current page with the applied filters.
    #[instrument(skip(self), fields(resource = %self.resource.name))]
    pub async fn refresh(&self) -> FetchOutcome {
        self.load().await
    }

    /// Free-text input: updates the draft at once and applies it after the
    /// debounce window unless another keystroke arrives first.
    #[instrument(skip(self), fields(resource = %self.resource.name))]
    pub async fn search(&self, field: &str, text: &str) -> anyhow::Result<SearchOutcome> {
        self.set_draft_filter(field, FilterValue::Text(text.to_string()))?;
        let generation = self.search_generation.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::time::sleep(self.debounce).await;

        if self.search_generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "search keystroke superseded");
            return Ok(SearchOutcome::Superseded);
        }
        Ok(SearchOutcome::Fetched(self.apply_filters().await))
    }

    /// An explicit apply or reset makes any keystroke still waiting out
    /// its debounce window redundant.
    fn cancel_pending_search(&self) {
        self.search_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Optimistically toggles the row's status; see [`OptimisticMutator`].
    #[instrument(skip(self), fields(resource = %self.resource.name))]
    pub async fn toggle_status(&self, id: &str) -> Result<StatusChange, MutationError> {
        let result = self
            .mutator
            .toggle(self.transport.as_ref(), &self.rows, id)
            .await;

        match &result {
            Ok(change) => self.notifier.notify(
                NoticeKind::Success,
                &format!("{} {} is now {}", self.resource.name, change.id, change.to),
            ),
            Err(err) => self.notifier.notify(NoticeKind::Error, &err.to_string()),
        }
        result
    }

    async fn load(&self) -> FetchOutcome {
        let (page, applied) = {
            let filters = self.filters.lock();
            (filters.page(), filters.applied().clone())
        };

        let query = match self
            .serializer
            .list_query(page, self.resource.page_size, &applied)
        {
            Ok(query) => query,
            Err(err) => {
                let err = TransportError::Request(format!("{err:#}"));
                self.settle_failure(&err);
                return FetchOutcome::Failed(err);
            }
        };

        self.view.lock().is_loading = true;
        let (ticket, outcome) = self
            .fetcher
            .fetch_ticketed(self.transport.as_ref(), query)
            .await;

        match outcome {
            FetchOutcome::Fresh(list) => {
                // The ticket is checked again under the view lock so a
                // response from another thread cannot slip in between.
                let mut view = self.view.lock();
                if !self.fetcher.is_latest(ticket) {
                    debug!(ticket, "list response overtaken before it was stored");
                    return FetchOutcome::Stale;
                }
                *self.rows.lock() = list.items.clone();
                view.total_count = list.total_count;
                view.is_loading = false;
                view.loaded = true;
                info!(
                    resource = %self.resource.name,
                    page,
                    items = list.items.len(),
                    total = list.total_count,
                    "list loaded"
                );
                FetchOutcome::Fresh(list)
            }
            FetchOutcome::Failed(err) => {
                {
                    let mut view = self.view.lock();
                    if !self.fetcher.is_latest(ticket) {
                        return FetchOutcome::Stale;
                    }
                    self.clear_list(&mut view);
                }
                self.notify_load_failure(&err);
                FetchOutcome::Failed(err)
            }
            FetchOutcome::Stale => FetchOutcome::Stale,
        }
    }

    fn settle_failure(&self, err: &TransportError) {
        self.clear_list(&mut self.view.lock());
        self.notify_load_failure(err);
    }

    fn clear_list(&self, view: &mut ListView) {
        self.rows.lock().clear();
        view.total_count = 0;
        view.is_loading = false;
    }

    fn notify_load_failure(&self, err: &TransportError) {
        self.notifier.notify(
            NoticeKind::Error,
            &format!("failed to load {}: {err}", self.resource.name),
        );
    }
}
