//! Seam definitions for the per-stream log handler: the traits implemented
//! by the replicated log engine and the surrounding services, the append
//! callback handed in by users, the shared data types, and the wire
//! messages exchanged between replicas during reconfiguration.
#![deny(
    // The following are allowed by default lints according to
    // https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html

    absolute_paths_not_starting_with_crate,
    // box_pointers, async trait must use it
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    meta_variable_misuse,
    missing_abi,
    missing_docs,
    // must_not_suspend, unstable
    non_ascii_idents,
    // non_exhaustive_omitted_patterns, unstable
    noop_method_call,
    rust_2021_incompatible_closure_captures,
    rust_2021_incompatible_or_patterns,
    rust_2021_prefixes_incompatible_syntax,
    rust_2021_prelude_collisions,
    unsafe_code,
    unsafe_op_in_unsafe_fn,
    unstable_features,
    // unused_crate_dependencies, the false positive case blocks us
    unused_extern_crates,
    unused_import_braces,
    unused_lifetimes,

    clippy::all,
    clippy::pedantic,
    clippy::cargo,

    // The followings are selected restriction lints for rust 1.57
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::create_dir,
    clippy::dbg_macro,
    clippy::decimal_literal_representation,
    // clippy::default_numeric_fallback, too verbose when dealing with numbers
    clippy::disallowed_script_idents,
    clippy::else_if_without_else,
    clippy::exhaustive_enums,
    clippy::exhaustive_structs,
    clippy::exit,
    clippy::expect_used,
    clippy::filetype_is_file,
    clippy::float_arithmetic,
    clippy::float_cmp_const,
    clippy::get_unwrap,
    clippy::if_then_some_else_none,
    // clippy::implicit_return, it's idiomatic Rust code.
    clippy::indexing_slicing,
    clippy::inline_asm_x86_intel_syntax,
    clippy::integer_arithmetic,
    // clippy::integer_division, required in the project
    clippy::let_underscore_must_use,
    clippy::lossy_float_literal,
    clippy::map_err_ignore,
    clippy::mem_forget,
    clippy::missing_docs_in_private_items,
    clippy::missing_enforced_import_renames,
    clippy::missing_inline_in_public_items,
    // clippy::mod_module_files, mod.rs file is used
    clippy::modulo_arithmetic,
    clippy::multiple_inherent_impl,
    clippy::panic,
    // clippy::panic_in_result_fn, not necessary as panic is banned
    clippy::pattern_type_mismatch,
    clippy::print_stderr,
    clippy::print_stdout,
    clippy::rc_buffer,
    clippy::rc_mutex,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_name_method,
    clippy::self_named_module_files,
    // clippy::shadow_reuse, it’s a common pattern in Rust code
    // clippy::shadow_same, it’s a common pattern in Rust code
    clippy::shadow_unrelated,
    clippy::str_to_string,
    clippy::string_add,
    clippy::string_to_string,
    clippy::todo,
    clippy::unimplemented,
    clippy::unnecessary_self_imports,
    clippy::unneeded_field_pattern,
    // clippy::unreachable, allow unreachable panic, which is out of expectation
    clippy::unwrap_in_result,
    clippy::unwrap_used,
    // clippy::use_debug, debug is allow for debug log
    clippy::verbose_file_reads,
    clippy::wildcard_enum_match_arm
)]
#![allow(
    clippy::multiple_crate_versions, // caused by the dependency, can't be fixed
)]
// mock structs generated by mockall carry no doc comments
#![cfg_attr(any(test, feature = "mock"), allow(missing_docs))]

use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// The user-implemented append completion callback
pub mod append_cb;
/// The apply service seam
pub mod apply;
/// The election blacklist seam
pub mod election;
/// The replicated log engine seam
pub mod engine;
/// Error kinds shared across the handler boundary
pub mod error;
/// The leader locator seam
pub mod location;
/// The replay service seam
pub mod replay;
/// Wire messages and the RPC proxy seam
pub mod rpc;

/// Identifier of one replicated log stream, stable for a handler's lifetime
pub type LogStreamId = u64;

/// Paxos proposal id (term); monotonically non-decreasing while a handler
/// stays initialized
pub type ProposalId = u64;

/// Size of one log block; base LSNs are aligned down to this boundary
pub const LOG_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// The largest Paxos member count a stream may be configured with
pub const MAX_PAXOS_REPLICA_NUM: u64 = 7;

/// Whether `replica_num` is an acceptable Paxos quorum size
#[inline]
#[must_use]
pub fn is_valid_replica_num(replica_num: u64) -> bool {
    (1..=MAX_PAXOS_REPLICA_NUM).contains(&replica_num)
}

/// Log sequence number, totally ordered within one stream
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Lsn(u64);

impl Lsn {
    /// Create an `Lsn` from its raw offset
    #[inline]
    #[must_use]
    pub const fn new(val: u64) -> Self {
        Self(val)
    }

    /// Raw offset of this `Lsn`
    #[inline]
    #[must_use]
    pub const fn val(self) -> u64 {
        self.0
    }

    /// Align this `Lsn` down to the start of its log block
    #[inline]
    #[must_use]
    pub const fn block_floor(self) -> Self {
        Self(self.0 / LOG_BLOCK_SIZE * LOG_BLOCK_SIZE)
    }
}

impl Display for Lsn {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of this replica for one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Role {
    /// The replica currently holding the Paxos leadership
    Leader,
    /// Any replica that is not the leader
    Follower,
}

/// How the log of one stream is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AccessMode {
    /// Normal client appends through the handler
    Append,
    /// Raw physical writes, bypassing client appends
    RawWrite,
    /// Flashback processing; appends are rejected
    Flashback,
}

/// One replica participating in a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Network address of the replica
    address: String,
}

impl Member {
    /// Create a member from its address
    #[inline]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Network address of this member
    #[inline]
    #[must_use]
    pub fn address(&self) -> &str {
        self.address.as_str()
    }

    /// A member is addressable iff its address is non-empty
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.address.is_empty()
    }
}

impl Display for Member {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Ordered collection of distinct voting members plus the Paxos quorum size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberList {
    /// The voting members
    members: Vec<Member>,
    /// Quorum size for Paxos
    replica_num: u64,
}

impl MemberList {
    /// Create a member list
    #[inline]
    #[must_use]
    pub fn new(members: Vec<Member>, replica_num: u64) -> Self {
        Self {
            members,
            replica_num,
        }
    }

    /// The voting members, in order
    #[inline]
    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Quorum size carried by this list
    #[inline]
    #[must_use]
    pub const fn replica_num(&self) -> u64 {
        self.replica_num
    }

    /// Number of members in the list
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the list holds no member
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `address` names a member of this list
    #[inline]
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.members.iter().any(|m| m.address() == address)
    }

    /// A list is valid when it is non-empty, every member is addressable
    /// and no address repeats
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.members.is_empty()
            && self.members.iter().all(Member::is_valid)
            && self.members.iter().map(Member::address).all_unique()
    }
}

/// Replicas receiving the log without voting power
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerList {
    /// The learners
    learners: Vec<Member>,
}

impl LearnerList {
    /// Create a learner list
    #[inline]
    #[must_use]
    pub fn new(learners: Vec<Member>) -> Self {
        Self { learners }
    }

    /// The learners, in order
    #[inline]
    #[must_use]
    pub fn learners(&self) -> &[Member] {
        &self.learners
    }

    /// Number of learners in the list
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.learners.len()
    }

    /// Whether the list holds no learner
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.learners.is_empty()
    }
}

/// The log's truncation floor and the metadata needed to restart from it
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct BaseInfo {
    /// Current truncation floor of the log
    pub base_lsn: Lsn,
    /// Timestamp of the entry right before `base_lsn`
    pub prev_log_ts_ns: i64,
}

impl BaseInfo {
    /// Create a base info
    #[inline]
    #[must_use]
    pub const fn new(base_lsn: Lsn, prev_log_ts_ns: i64) -> Self {
        Self {
            base_lsn,
            prev_log_ts_ns,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lsn_block_floor() {
        assert_eq!(Lsn::new(0).block_floor(), Lsn::new(0));
        assert_eq!(Lsn::new(LOG_BLOCK_SIZE - 1).block_floor(), Lsn::new(0));
        assert_eq!(
            Lsn::new(LOG_BLOCK_SIZE + 1).block_floor(),
            Lsn::new(LOG_BLOCK_SIZE)
        );
        assert_eq!(
            Lsn::new(3 * LOG_BLOCK_SIZE).block_floor(),
            Lsn::new(3 * LOG_BLOCK_SIZE)
        );
    }

    #[test]
    fn test_member_list_validity() {
        let valid = MemberList::new(
            vec![Member::new("127.0.0.1:5001"), Member::new("127.0.0.1:5002")],
            3,
        );
        assert!(valid.is_valid());
        assert!(valid.contains("127.0.0.1:5001"));
        assert!(!valid.contains("127.0.0.1:5003"));

        let empty = MemberList::new(vec![], 3);
        assert!(!empty.is_valid());

        let duplicated = MemberList::new(
            vec![Member::new("127.0.0.1:5001"), Member::new("127.0.0.1:5001")],
            3,
        );
        assert!(!duplicated.is_valid());

        let unaddressable = MemberList::new(vec![Member::new("")], 1);
        assert!(!unaddressable.is_valid());
    }

    #[test]
    fn test_replica_num_range() {
        assert!(!is_valid_replica_num(0));
        assert!(is_valid_replica_num(1));
        assert!(is_valid_replica_num(7));
        assert!(!is_valid_replica_num(8));
    }
}
