// Core modules: error model, cell values, naming, type inference, and the store.
pub mod error;
pub mod infer;
pub mod naming;
pub mod store;
pub mod value;
