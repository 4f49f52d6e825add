//! # Switchyard
//!
//! A broker daemon that multiplexes request/response traffic between many
//! concurrent load-test clients and a set of backend messaging
//! integrations. Clients issue JSON requests over a loopback dealer
//! socket; the daemon assigns each client an isolated worker, routes
//! requests through that worker to the right integration and returns JSON
//! responses.
//!
//! This crate is the public surface: the client-side request correlator,
//! the logging/environment bootstrap and the daemon entrypoint behind the
//! `grizzly-async-messaged` binary. The switch itself lives in
//! `switchyard-broker`, the transport kernel in `switchyard-core`.
//!
//! ## Client example
//!
//! ```rust,no_run
//! use switchyard::client::async_message_request;
//! use switchyard::{AsyncMessageRequest, TcpDealer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = TcpDealer::connect("127.0.0.1:5554", "client-1").await?;
//!
//! let mut request = AsyncMessageRequest {
//!     action: "CONN".to_string(),
//!     client: Some("client-1".to_string()),
//!     ..Default::default()
//! };
//! request.context.url = Some("mq://mq.example.com/?QueueManager=QM1&Channel=SRV.CONN".to_string());
//!
//! let response = async_message_request(&socket, request).await?;
//! println!("connected to worker {:?}", response.worker);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod daemon;
pub mod logging;

pub use client::{async_message_request, ClientError};
pub use switchyard_broker::protocol::{AsyncMessageRequest, AsyncMessageResponse, RequestContext};
pub use switchyard_broker::router::{Router, FRONTEND_ENDPOINT};
pub use switchyard_core::shutdown::{self, ShutdownController, ShutdownToken};
pub use switchyard_core::tcp::TcpDealer;
