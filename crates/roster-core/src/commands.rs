use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument};

use crate::cli::{Command, KeyVal};
use crate::config::Config;
use crate::fetch::FetchOutcome;
use crate::http::HttpTransport;
use crate::notify::{NoticeKind, Notifier};
use crate::render::Renderer;
use crate::resource::ResourceSpec;
use crate::screen::ListScreen;
use crate::transport::Transport;

/// Prints notices on stderr as they arrive.
#[derive(Debug, Clone)]
pub struct StderrNotifier {
    renderer: Renderer,
}

impl StderrNotifier {
    pub fn new(renderer: Renderer) -> Self {
        Self { renderer }
    }
}

impl Notifier for StderrNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        debug!(%kind, message, "notice");
        self.renderer.print_notice(kind, message);
    }
}

#[instrument(skip(cfg, renderer, command))]
pub async fn dispatch(cfg: &Config, renderer: &Renderer, command: Command) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Resources => cmd_resources(cfg, renderer),
        Command::List {
            resource,
            page,
            filters,
        } => {
            let screen = open_screen(cfg, renderer, &resource, page, &filters).await?;
            renderer.print_rows(screen.resource(), &screen.items(), &screen.page_info())
        }
        Command::Toggle {
            resource,
            id,
            page,
            filters,
        } => cmd_toggle(cfg, renderer, &resource, &id, page, &filters).await,
    }
}

fn cmd_resources(cfg: &Config, renderer: &Renderer) -> anyhow::Result<()> {
    let specs = cfg
        .resource_names()
        .iter()
        .map(|name| ResourceSpec::from_config(cfg, name))
        .collect::<anyhow::Result<Vec<_>>>()?;
    renderer.print_resources(&specs)
}

async fn cmd_toggle(
    cfg: &Config,
    renderer: &Renderer,
    resource: &str,
    id: &str,
    page: u32,
    filters: &[KeyVal],
) -> anyhow::Result<()> {
    let screen = open_screen(cfg, renderer, resource, page, filters).await?;
    let change = screen
        .toggle_status(id)
        .await
        .with_context(|| format!("failed to toggle {resource} {id}"))?;
    info!(id = %change.id, from = %change.from, to = %change.to, "toggled status");

    renderer.print_rows(screen.resource(), &screen.items(), &screen.page_info())
}

/// Builds the list screen for `resource`, applies `filters` and loads
/// `page`.
async fn open_screen(
    cfg: &Config,
    renderer: &Renderer,
    resource: &str,
    page: u32,
    filters: &[KeyVal],
) -> anyhow::Result<ListScreen> {
    let spec = ResourceSpec::from_config(cfg, resource)?;
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(&cfg.api_base_url(), cfg.api_timeout()?)?);
    let screen = ListScreen::from_config(cfg, spec, transport)?
        .with_notifier(Arc::new(StderrNotifier::new(renderer.clone())));

    for filter in filters {
        screen
            .set_draft_input(&filter.key, &filter.value)
            .with_context(|| format!("invalid filter {}={}", filter.key, filter.value))?;
    }

    let mut outcome = if filters.is_empty() {
        screen.refresh().await
    } else {
        screen.apply_filters().await
    };
    if page > 1 && matches!(outcome, FetchOutcome::Fresh(_)) {
        outcome = screen.set_page(page).await;
    }

    match outcome {
        FetchOutcome::Fresh(_) => Ok(screen),
        FetchOutcome::Failed(err) => {
            Err(anyhow::Error::new(err).context(format!("failed to load {resource}")))
        }
        FetchOutcome::Stale => Err(anyhow!("list load for {resource} was superseded")),
    }
}
