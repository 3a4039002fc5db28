//! Actor-based checker pipeline
//!
//! Each component runs as an independent async task communicating via Tokio
//! channels. The scheduler owns all scheduling state (single writer); every
//! other task only sends messages into it.
//!
//! ## Architecture Overview
//!
//! ```text
//!   ┌──────────────────┐   Registry(snapshot)   ┌──────────────────┐
//!   │ RegistryPoller   ├───────────────────────►│ SchedulerActor   │
//!   │ (polls store)    │                        │ (due-time table) │
//!   └──────────────────┘                        └───┬──────────▲───┘
//!                                        CheckJob   │          │ Complete(id)
//!                                    (bounded mpsc) │          │
//!                                                ┌──▼──────────┴───┐
//!                                                │  FetcherPool    │
//!                                                │  (W workers)    │
//!                                                └──┬──────────────┘
//!                                                   │ Publish(url_id, metric)
//!                                                ┌──▼──────────────┐
//!                                                │ PublisherActor  │──► durable queue
//!                                                └─────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control
//!    messages
//! 2. **Jobs**: due URLs flow to the fetcher pool over a bounded channel,
//!    which is also the backpressure point
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod fetcher;
pub mod messages;
pub mod publisher;
pub mod registry;
pub mod scheduler;
