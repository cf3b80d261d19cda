use crate::{DebounceTicket, ListPage, RequestId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg<T> {
    /// Binder attached to its controls; issue the first load.
    Initialize,
    /// User edited the search box (raw, not yet debounced).
    SearchInput(String),
    /// Debounce timer fired.
    DebounceElapsed(DebounceTicket),
    /// User picked a page size.
    LimitChanged(u32),
    /// User clicked prev (-1) or next (+1).
    PageDelta(i64),
    /// User clicked a sortable column header.
    SortClicked(String),
    /// Reload with the current query, e.g. after a mutation elsewhere.
    Refresh,
    /// List endpoint answered.
    LoadSucceeded {
        request: RequestId,
        page: ListPage<T>,
    },
    /// List request failed or was aborted.
    LoadFailed {
        request: RequestId,
        failure: LoadFailure,
    },
    /// Fallback for placeholder wiring.
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    /// The request was aborted because a newer one replaced it.
    Cancelled,
    /// Network, server or decoding failure with a displayable message.
    Error(String),
}
