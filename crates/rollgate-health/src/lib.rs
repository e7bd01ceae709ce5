//! rollgate-health: convergence verification for a rollout.
//!
//! Every verifier is built from the same two pieces: a bounded
//! retry-until-converged [`ConvergencePoller`], and a [`fan_out`] join
//! barrier that runs one poll per item concurrently and merges the results
//! only after every item has resolved.
//!
//! # Architecture
//!
//! ```text
//! ReplicaConvergenceVerifier  (changed deployments)
//! ServiceReadinessVerifier    (configured services → pod selector → pods)
//! LoadBalancerResolver        (configured services → ingress address)
//!   └── fan_out(names)
//!         └── per item: ConvergencePoller::poll(check)
//!               └── StageReport { resolved, failure }
//! ```
//!
//! An item that times out or whose query fails is recorded against its own
//! name; siblings keep polling. The stage fails, naming exactly the failed
//! items, once all of them are done.

pub mod endpoints;
pub mod fanout;
pub mod poller;
pub mod readiness;
pub mod replicas;

pub use endpoints::LoadBalancerResolver;
pub use fanout::{ItemOutcome, StageReport, fan_out};
pub use poller::{ConvergencePoller, PollError};
pub use readiness::ServiceReadinessVerifier;
pub use replicas::ReplicaConvergenceVerifier;
