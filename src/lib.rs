//! Scoped Datalog engine for Biscuit authorization tokens
//!
//! A Biscuit token carries a chain of cryptographically signed blocks, each
//! holding Datalog facts, rules and checks. Blocks appended after the first
//! one can attenuate the token but must never amplify it. This crate
//! implements the evaluation side of that model: given already verified
//! blocks and the authorizer's own block and policies, it derives every
//! reachable fact, validates every check and selects the policy verdict.
//!
//! The engine tracks, for each fact, the set of blocks that took part in
//! its derivation (its *origin*), and each rule or query only consumes
//! facts whose whole origin it trusts. This is what keeps facts coming
//! from attenuation blocks from contaminating decisions based on the
//! authority block.
//!
//! Signature verification, token (de)serialization and the textual syntax
//! are handled by their own layers; this crate consumes parsed and
//! authenticated block structures:
//!
//! ```rust
//! use biscuit_datalog::{
//!     authorize, datalog::{fact, pred, query, string, RunLimits},
//!     AuthenticatedBlock, AuthorizerBlock, Block, Policy, PolicyKind,
//! };
//! use std::time::Duration;
//!
//! let authority = AuthenticatedBlock {
//!     block: Block {
//!         facts: vec![fact("resource", &[string("file1")])],
//!         ..Block::default()
//!     },
//!     revocation_id: vec![0],
//!     external_key: None,
//! };
//!
//! let authorizer = AuthorizerBlock {
//!     block: Block::default(),
//!     policies: vec![Policy {
//!         kind: PolicyKind::Allow,
//!         queries: vec![query(&[pred("resource", &[string("file1")])], &[])],
//!     }],
//! };
//!
//! let limits = RunLimits {
//!     max_time: Duration::from_secs(1),
//!     ..RunLimits::default()
//! };
//! let success = authorize(&authority, &[], &authorizer, &limits).unwrap();
//! assert_eq!(success.policy_index, 0);
//! ```
mod authorizer;
pub mod datalog;
pub mod error;

pub use authorizer::{
    authorize, AuthenticatedBlock, AuthorizationSuccess, AuthorizerBlock, Block, MatchedQuery,
    Policy, PolicyKind,
};
pub use datalog::{PublicKey, RunLimits};
