//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **SqliteLedger**: `webhook_deliveries` テーブル（本番用）
//! - **MemoryLedger**: テスト・DB なしの開発用

pub mod memory_ledger;
pub mod sqlite_ledger;

pub use self::memory_ledger::MemoryLedger;
pub use self::sqlite_ledger::SqliteLedger;
