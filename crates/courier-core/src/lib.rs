//! courier-core
//!
//! Webhook delivery core for lead distribution.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（job, auth config, ledger record, ids, errors）
//! - **ports**: 抽象化レイヤー（QueueBackend, DeliveryLedger, JobProcessor, Clock, IdGenerator）
//! - **auth**: auth config の解決・マージ・疎通確認
//! - **queue**: DurableQueue (Redis) / FallbackQueue (in-process) と retry
//! - **impls**: ledger 実装（SQLite, in-memory）
//! - **app**: DeliveryWorker と DeliveryService
//! - **config** / **telemetry** / **http**: 設定・ログ・HTTP client

pub mod app;
pub mod auth;
pub mod config;
pub mod domain;
pub mod http;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod telemetry;

pub use app::{DeliveryService, DeliveryWorker};
pub use config::CourierConfig;
pub use domain::{AuthConfig, DeliveryRecord, DeliveryStatus, JobId, WebhookJob};
pub use ports::{QueueKind, QueueStats};
