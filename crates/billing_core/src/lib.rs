//! Billing core: pure table state machine and view-model helpers.
mod effect;
mod msg;
mod query;
mod state;
mod update;
mod view_model;

pub use effect::Effect;
pub use msg::{LoadFailure, Msg};
pub use query::{ListPage, QueryState, SortDirection};
pub use state::{DebounceTicket, RequestId, TableConfig, TableState};
pub use update::update;
pub use view_model::{PagerView, SortView, TableBody, TableView};
