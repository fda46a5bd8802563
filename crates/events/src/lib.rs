//! Real-time delivery of job and usage updates.
//!
//! - [`hub`]: keyed, bounded, lossy in-process pub/sub
//! - [`fanout`]: the job and usage hubs wired together
//! - [`broadcast`]: relay contract between instances

pub mod broadcast;
pub mod fanout;
pub mod hub;
pub mod update;

pub use broadcast::{
    BroadcastError, BroadcastMessage, BroadcastSubscription, InMemoryBroadcaster, InstanceId,
    UpdateBroadcaster,
};
pub use fanout::{FanOut, FanOutReport, UsageSource};
pub use hub::{DEFAULT_BUFFER, Hub, PublishReport, Subscription, SubscriptionId};
pub use update::{JobTopic, JobUpdate};
