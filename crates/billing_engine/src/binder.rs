use std::sync::Arc;
use std::time::Duration;

use billing_core::{
    update, DebounceTicket, Effect, LoadFailure, Msg, PagerView, QueryState, RequestId, SortView,
    TableBody, TableConfig, TableState, TableView,
};
use billing_logging::{billing_debug, billing_trace, billing_warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ListSource;

pub const NO_DATA_TEXT: &str = "No data";

/// Endpoint-specific filters merged into every list request.
pub type ExtraParams = Arc<dyn Fn() -> Vec<(String, String)> + Send + Sync>;

/// Where a binder paints its table.
pub trait TableSurface<T>: Send {
    fn clear(&mut self);
    /// Called once per item, in response order.
    fn row(&mut self, item: &T);
    /// A single full-width row: "no data" or an error message.
    fn message_row(&mut self, text: &str);
    fn pager(&mut self, pager: &PagerView<'_>, sort: Option<SortView<'_>>);
}

/// Paints one frame: rows in order, or exactly one message row, then the pager.
/// Nothing loaded yet means an empty body.
pub fn paint<T>(view: &TableView<'_, T>, surface: &mut dyn TableSurface<T>) {
    surface.clear();
    match view.body {
        TableBody::Rows(rows) => {
            for row in rows {
                surface.row(row);
            }
        }
        TableBody::NoData => surface.message_row(NO_DATA_TEXT),
        TableBody::Error(message) => surface.message_row(message),
        TableBody::Pending => {}
    }
    surface.pager(&view.pager, view.sort);
}

/// Handle to a running table binder.
///
/// The driver task owns the table state; the handle only forwards user
/// actions. Dropping the handle stops the driver and cancels its request.
pub struct TableBinder<T> {
    msg_tx: mpsc::UnboundedSender<Msg<T>>,
    stop: CancellationToken,
}

impl<T: Send + 'static> TableBinder<T> {
    /// Starts the driver on the current tokio runtime and issues the first load.
    pub fn spawn(
        source: Arc<dyn ListSource<T>>,
        endpoint: impl Into<String>,
        extras: Option<ExtraParams>,
        surface: Box<dyn TableSurface<T>>,
        config: TableConfig,
    ) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let driver = Driver {
            state: TableState::new(config),
            source,
            endpoint: endpoint.into(),
            extras,
            surface,
            msg_tx: msg_tx.clone(),
            in_flight: None,
            debounce: None,
        };
        tokio::spawn(driver.run(msg_rx, stop.clone()));
        let binder = Self { msg_tx, stop };
        binder.send(Msg::Initialize);
        binder
    }

    pub fn search_input(&self, text: impl Into<String>) {
        self.send(Msg::SearchInput(text.into()));
    }

    pub fn set_limit(&self, limit: u32) {
        self.send(Msg::LimitChanged(limit));
    }

    pub fn change_page(&self, delta: i64) {
        self.send(Msg::PageDelta(delta));
    }

    pub fn sort_by(&self, field: impl Into<String>) {
        self.send(Msg::SortClicked(field.into()));
    }

    pub fn refresh(&self) {
        self.send(Msg::Refresh);
    }

    /// Stops the driver: the in-flight request is cancelled and nothing paints again.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    fn send(&self, msg: Msg<T>) {
        if self.msg_tx.send(msg).is_err() {
            billing_warn!("Table binder driver is gone; dropping message");
        }
    }
}

impl<T> Drop for TableBinder<T> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct Driver<T> {
    state: TableState<T>,
    source: Arc<dyn ListSource<T>>,
    endpoint: String,
    extras: Option<ExtraParams>,
    surface: Box<dyn TableSurface<T>>,
    msg_tx: mpsc::UnboundedSender<Msg<T>>,
    in_flight: Option<(RequestId, CancellationToken)>,
    debounce: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Driver<T> {
    async fn run(
        mut self,
        mut msg_rx: mpsc::UnboundedReceiver<Msg<T>>,
        stop: CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                msg = msg_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            let state = std::mem::take(&mut self.state);
            let (state, effects) = update(state, msg);
            self.state = state;
            for effect in effects {
                self.execute(effect);
            }
            if self.state.consume_dirty() {
                paint(&self.state.view(), self.surface.as_mut());
            }
        }
        self.shutdown();
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Load { request, query } => self.start_load(request, query),
            Effect::CancelLoad { request } => {
                if let Some((current, token)) = self.in_flight.take() {
                    if current == request {
                        billing_trace!("Cancelling list request {:?}", request);
                        token.cancel();
                    } else {
                        self.in_flight = Some((current, token));
                    }
                }
            }
            Effect::StartDebounce { ticket, delay } => self.arm_debounce(ticket, delay),
        }
    }

    fn start_load(&mut self, request: RequestId, query: QueryState) {
        let mut params = query.to_params();
        if let Some(extras) = &self.extras {
            params.extend(extras());
        }
        billing_debug!("Loading {} {:?}", self.endpoint, params);

        let token = CancellationToken::new();
        self.in_flight = Some((request, token.clone()));
        let source = self.source.clone();
        let endpoint = self.endpoint.clone();
        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let msg = tokio::select! {
                biased;
                _ = token.cancelled() => Msg::LoadFailed {
                    request,
                    failure: LoadFailure::Cancelled,
                },
                result = source.fetch_page(&endpoint, &params) => match result {
                    Ok(page) => Msg::LoadSucceeded { request, page },
                    // The gateway has already ended the session on 401.
                    Err(err) if err.is_cancelled() || err.is_unauthorized() => Msg::LoadFailed {
                        request,
                        failure: LoadFailure::Cancelled,
                    },
                    Err(err) => {
                        billing_warn!("Loading {} failed: {}", endpoint, err);
                        Msg::LoadFailed {
                            request,
                            failure: LoadFailure::Error(err.to_string()),
                        }
                    }
                },
            };
            let _ = msg_tx.send(msg);
        });
    }

    fn arm_debounce(&mut self, ticket: DebounceTicket, delay: Duration) {
        if let Some(previous) = self.debounce.take() {
            previous.abort();
        }
        let msg_tx = self.msg_tx.clone();
        self.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = msg_tx.send(Msg::DebounceElapsed(ticket));
        }));
    }

    fn shutdown(&mut self) {
        if let Some((_, token)) = self.in_flight.take() {
            token.cancel();
        }
        if let Some(debounce) = self.debounce.take() {
            debounce.abort();
        }
    }
}
