use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_param(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// Paging, sorting and search parameters of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryState {
    pub page: u32,
    pub limit: u32,
    pub search: String,
    pub sort_field: Option<String>,
    pub sort_direction: SortDirection,
    pub total_count: u64,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            search: String::new(),
            sort_field: None,
            sort_direction: SortDirection::Asc,
            total_count: 0,
        }
    }
}

impl QueryState {
    /// Query-string pairs understood by the list endpoints.
    ///
    /// `search` is omitted when empty; `sort_by`/`sort_dir` are omitted until a
    /// column has been chosen.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("page".to_string(), self.page.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        if !self.search.is_empty() {
            params.push(("search".to_string(), self.search.clone()));
        }
        if let Some(field) = &self.sort_field {
            params.push(("sort_by".to_string(), field.clone()));
            params.push((
                "sort_dir".to_string(),
                self.sort_direction.as_param().to_string(),
            ));
        }
        params
    }

    /// Number of pages for the last known total; at least 1.
    pub fn page_count(&self) -> u64 {
        let limit = u64::from(self.limit.max(1));
        self.total_count.div_ceil(limit).max(1)
    }
}

/// One page of a list endpoint response: `{"items": [...], "total": n}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u64,
}

impl<T> ListPage<T> {
    pub fn new(items: Vec<T>, total: u64) -> Self {
        Self { items, total }
    }
}
