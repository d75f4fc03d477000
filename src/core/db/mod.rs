/// Database Module
///
/// The database layer is split into four concerns:
/// - **Connection Management** (`connection.rs`): the shared handle, its type registry and execution state
/// - **Query Execution** (`query.rs`): blocking execution and result decoding
/// - **Cancellable Execution** (`cancellable.rs`): worker-thread execution with polling and interrupts
/// - **Schema Introspection** (`schema.rs`): table and column metadata
pub mod cancellable;
pub mod connection;
pub mod query;
pub mod schema;

pub use cancellable::*;
pub use connection::*;
pub use query::*;
pub use schema::*;
