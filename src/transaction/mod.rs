// Transaction module - nested, reference-counted transactions
//
// - resource: one datasource's connection plus its saved settings
// - state: the Transaction (retain counter, begin-point stack, resources)
// - context: per-thread slot and the `Transactions` entry points
// - scope: RAII block guard

mod context;
mod state;
mod resource;
mod scope;

pub use context::Transactions;
pub use state::Transaction;
pub use scope::TransactionScope;
