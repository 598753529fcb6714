//! chainstore-core: write buffering and atomic commits for a reorg-tolerant
//! indexing pipeline.
//!
//! # Architecture
//!
//! ```text
//! ChainStore
//!   ├── connect()        → DatabaseState (finalized head + hot window)
//!   ├── transact()       finalized append
//!   ├── transact_hot()   hot-window replace, handler per block
//!   └── transact_hot2()  hot-window replace, handler per range
//!          │
//!          ▼
//!   WriteBuffer ──flush──▶ Transaction ──exec──▶ Backend (memory / SQLite)
//! ```

pub mod backend;
pub mod buffer;
pub mod config;
pub mod error;
pub mod handler;
pub mod op;
pub mod store;
pub mod types;

pub use backend::{Backend, Transaction};
pub use buffer::WriteBuffer;
pub use config::StoreConfig;
pub use error::StoreError;
pub use handler::{FinalizedHandler, HotBlockHandler, HotRangeHandler, NoopHandler};
pub use op::WriteOp;
pub use store::ChainStore;
pub use types::{DatabaseState, FinalTxInfo, HashAndHeight, HotTxInfo};
