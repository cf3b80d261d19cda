use crate::SortDirection;

/// What the table body currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TableBody<T> {
    /// Nothing loaded yet.
    #[default]
    Pending,
    Rows(Vec<T>),
    /// The endpoint answered with zero items.
    NoData,
    /// Displayed as a single full-width row.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableView<'a, T> {
    pub body: &'a TableBody<T>,
    pub search: &'a str,
    pub sort: Option<SortView<'a>>,
    pub loading: bool,
    pub pager: PagerView<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortView<'a> {
    pub field: &'a str,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerView<'a> {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub page_count: u64,
    pub page_sizes: &'a [u32],
    pub prev_enabled: bool,
    pub next_enabled: bool,
    pub range_label: String,
}
