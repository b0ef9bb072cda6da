#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

mod client;
mod delegate;
mod dispatch;
mod error;
mod macros;
mod message;
mod reconnect;
mod registry;
mod scheduler;
mod session;
mod transport;

pub use client::{BayeuxClient, ClientConfig};
pub use delegate::{CallbackQueue, Delegate, DelegateSink, NoopDelegate, Queue, QueueExt, TokioQueue};
pub use dispatch::{MetaChannelDispatcher, MetaChannelHandlers, Route};
pub use error::BayeuxError;
pub use message::{Advice, ChannelSpec, Message, MetaChannel, ReconnectAdvice};
pub use reconnect::{AlwaysReachable, PosixError, Reachability};
pub use registry::Callback;
pub use session::{Session, SessionState, DEFAULT_RECONNECT_INTERVAL_SECS, DEFAULT_RETRY_INTERVAL_SECS};
pub use transport::TransportEvent;
