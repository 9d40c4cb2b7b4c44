mod pool;

pub use pool::{Buffer, Pool, PutError};
