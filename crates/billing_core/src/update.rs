use crate::{Effect, LoadFailure, Msg, TableState};

/// Pure update function: applies a message to state and returns any effects.
///
/// Only the response to the most recently issued load may change the body;
/// every new load cancels the one before it.
pub fn update<T>(mut state: TableState<T>, msg: Msg<T>) -> (TableState<T>, Vec<Effect>) {
    let effects = match msg {
        Msg::Initialize | Msg::Refresh => state.begin_load(),
        Msg::SearchInput(text) => vec![state.arm_debounce(text)],
        Msg::DebounceElapsed(ticket) => {
            if state.settle_debounce(ticket) {
                state.begin_load()
            } else {
                Vec::new()
            }
        }
        Msg::LimitChanged(limit) => {
            if limit == 0 {
                return (state, Vec::new());
            }
            let query = state.query_mut();
            query.limit = limit;
            query.page = 1;
            state.begin_load()
        }
        Msg::PageDelta(delta) => {
            let Some(page) = i64::from(state.query().page)
                .checked_add(delta)
                .and_then(|target| u32::try_from(target).ok())
            else {
                return (state, Vec::new());
            };
            if page < 1 {
                return (state, Vec::new());
            }
            state.query_mut().page = page;
            state.begin_load()
        }
        Msg::SortClicked(field) => {
            let query = state.query_mut();
            if query.sort_field.as_deref() == Some(field.as_str()) {
                query.sort_direction = query.sort_direction.toggled();
            } else {
                query.sort_field = Some(field);
                query.sort_direction = crate::SortDirection::Asc;
            }
            state.begin_load()
        }
        Msg::LoadSucceeded { request, page } => {
            if state.is_current(request) {
                state.apply_rows(page.items, page.total);
            }
            Vec::new()
        }
        Msg::LoadFailed { request, failure } => {
            if state.is_current(request) {
                match failure {
                    LoadFailure::Cancelled => state.clear_in_flight(),
                    LoadFailure::Error(message) => state.apply_error(message),
                }
            }
            Vec::new()
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}
