use std::time::Duration;

use crate::{DebounceTicket, QueryState, RequestId};

/// Side effects requested by [`crate::update`]; executed by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Issue a list request for `query`. Only a response tagged with
    /// `request` will be accepted afterwards.
    Load { request: RequestId, query: QueryState },
    /// Abort a request that has been superseded.
    CancelLoad { request: RequestId },
    /// Deliver `Msg::DebounceElapsed(ticket)` after `delay`.
    StartDebounce {
        ticket: DebounceTicket,
        delay: Duration,
    },
}
