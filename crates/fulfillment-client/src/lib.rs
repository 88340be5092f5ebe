//! Fulfillment Service Client
//!
//! Talks to the service that actually powers hosts on and off and reports
//! their state.
//!
//! # Example
//!
//! ```no_run
//! use crds::HostPowerState;
//! use fulfillment_client::{FulfillmentClient, FulfillmentClientTrait, HostTarget};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FulfillmentClient::new("http://fulfillment:8000".to_string(), None)?;
//! let host = HostTarget::new("fulfillment", "node-1");
//!
//! client.request_power_state(&host, HostPowerState::On).await?;
//! let observed = client.fetch_state(&host).await?;
//! println!("{} is {}", host, observed.power_state);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod fulfillment_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::FulfillmentClient;
pub use error::{ErrorClass, FulfillmentError};
pub use fulfillment_trait::FulfillmentClientTrait;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{MockFulfillmentClient, MockOperation};
