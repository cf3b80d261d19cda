use std::time::Duration;

use crate::view_model::{PagerView, SortView, TableBody, TableView};
use crate::{Effect, QueryState, SortDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DebounceTicket(pub u64);

/// Initial settings for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    pub page: u32,
    pub limit: u32,
    pub search: String,
    pub page_sizes: Vec<u32>,
    pub search_debounce: Duration,
    pub sort_field: Option<String>,
    pub sort_direction: SortDirection,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            search: String::new(),
            page_sizes: vec![10, 20, 50, 100],
            search_debounce: Duration::from_millis(400),
            sort_field: None,
            sort_direction: SortDirection::Asc,
        }
    }
}

/// State owned by exactly one table binder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableState<T> {
    query: QueryState,
    page_sizes: Vec<u32>,
    search_debounce: Duration,
    pending_search: String,
    debounce: DebounceTicket,
    next_request: u64,
    in_flight: Option<RequestId>,
    body: TableBody<T>,
    dirty: bool,
}

impl<T> Default for TableState<T> {
    fn default() -> Self {
        Self::new(TableConfig::default())
    }
}

impl<T> TableState<T> {
    pub fn new(config: TableConfig) -> Self {
        let query = QueryState {
            page: config.page.max(1),
            limit: config.limit.max(1),
            search: config.search,
            sort_field: config.sort_field,
            sort_direction: config.sort_direction,
            ..QueryState::default()
        };
        Self {
            query,
            page_sizes: config.page_sizes,
            search_debounce: config.search_debounce,
            pending_search: String::new(),
            debounce: DebounceTicket(0),
            next_request: 0,
            in_flight: None,
            body: TableBody::Pending,
            dirty: false,
        }
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    pub fn in_flight(&self) -> Option<RequestId> {
        self.in_flight
    }

    pub fn body(&self) -> &TableBody<T> {
        &self.body
    }

    pub fn view(&self) -> TableView<'_, T> {
        let query = &self.query;
        let first = u64::from(query.page - 1) * u64::from(query.limit) + 1;
        let shown = match &self.body {
            TableBody::Rows(rows) => rows.len() as u64,
            _ => 0,
        };
        let range_label = if shown == 0 {
            format!("0 of {}", query.total_count)
        } else {
            format!("{}–{} of {}", first, first + shown - 1, query.total_count)
        };
        TableView {
            body: &self.body,
            search: &query.search,
            sort: query.sort_field.as_deref().map(|field| SortView {
                field,
                direction: query.sort_direction,
            }),
            loading: self.in_flight.is_some(),
            pager: PagerView {
                page: query.page,
                limit: query.limit,
                total: query.total_count,
                page_count: query.page_count(),
                page_sizes: &self.page_sizes,
                prev_enabled: query.page > 1,
                next_enabled: u64::from(query.page) * u64::from(query.limit)
                    < query.total_count,
                range_label,
            },
        }
    }

    /// Returns whether the body changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn query_mut(&mut self) -> &mut QueryState {
        &mut self.query
    }

    /// Cancels whatever is in flight and issues a load for the current query.
    pub(crate) fn begin_load(&mut self) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(2);
        if let Some(previous) = self.in_flight.take() {
            effects.push(Effect::CancelLoad { request: previous });
        }
        self.next_request += 1;
        let request = RequestId(self.next_request);
        self.in_flight = Some(request);
        effects.push(Effect::Load {
            request,
            query: self.query.clone(),
        });
        effects
    }

    pub(crate) fn arm_debounce(&mut self, text: String) -> Effect {
        self.pending_search = text;
        self.debounce = DebounceTicket(self.debounce.0 + 1);
        Effect::StartDebounce {
            ticket: self.debounce,
            delay: self.search_debounce,
        }
    }

    /// Moves the pending search text into the query if `ticket` is current.
    pub(crate) fn settle_debounce(&mut self, ticket: DebounceTicket) -> bool {
        if ticket != self.debounce {
            return false;
        }
        self.query.search = std::mem::take(&mut self.pending_search);
        self.query.page = 1;
        // A ticket settles once.
        self.debounce = DebounceTicket(self.debounce.0 + 1);
        true
    }

    pub(crate) fn is_current(&self, request: RequestId) -> bool {
        self.in_flight == Some(request)
    }

    pub(crate) fn apply_rows(&mut self, items: Vec<T>, total: u64) {
        self.in_flight = None;
        self.query.total_count = total;
        self.body = if items.is_empty() {
            TableBody::NoData
        } else {
            TableBody::Rows(items)
        };
        self.dirty = true;
    }

    pub(crate) fn apply_error(&mut self, message: String) {
        self.in_flight = None;
        self.body = TableBody::Error(message);
        self.dirty = true;
    }

    pub(crate) fn clear_in_flight(&mut self) {
        self.in_flight = None;
    }
}
