//! App - アプリケーション層
//!
//! ports を組み合わせて配送処理を組み立てる。
//!
//! # 主要コンポーネント
//! - **DeliveryWorker**: 1 回の配送（auth 解決 → POST → ledger 記録）
//! - **DeliveryService**: backend 選択と enqueue / stats の入口

pub mod service;
pub mod worker;

pub use self::service::DeliveryService;
pub use self::worker::DeliveryWorker;
