//! GDB/MI protocol core: record parsing, a token-correlated command channel,
//! variable-object tracking and breakpoint lifecycle coordination.

mod breakpoints;
mod channel;
mod config;
mod error;
mod parser;
mod protocol;
mod session;
mod variables;

#[cfg(test)]
mod test_support;

pub use breakpoints::{
    BoundLocation, BreakpointCoordinator, BreakpointLocation, BreakpointOptions,
    BreakpointRequest, BreakpointState, RequestId, WatchAccess,
};
pub use channel::MiChannel;
pub use config::MiConfig;
pub use error::{MiError, Result};
pub use parser::{parse, parse_value};
pub use protocol::{
    quote_argument, AsyncKind, AsyncRecord, List, ListItem, OutOfBandRecord, Record,
    ResultClass, ResultRecord, StreamKind, StreamRecord, Tuple, Value,
};
pub use session::{MiSession, SessionEvent, SubscriptionId, Transcript, Transport};
pub use variables::{
    ChangeSet, DisplayFormat, EvalContext, VariableChange, VariableKind, VariableNode,
    VariableState, VariableStore,
};
