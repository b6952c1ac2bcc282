//! `utils`
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

use std::time::{Duration, SystemTime};

use thiserror::Error;

/// configuration
pub mod config;
/// rate gates for periodic actions
pub mod interval;

/// Config Parse Error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseError {
    /// Invalid number when parsing `Duration`
    #[error("Invalid Number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),
    /// Invalid time unit
    #[error("Invalid Unit: {0}")]
    InvalidUnit(String),
    /// Invalid values
    #[error("Invalid Value: {0}")]
    InvalidValue(String),
}

/// Parse `Duration` from string
/// # Errors
/// Return error when parsing the given string to `Duration` failed
#[inline]
pub fn parse_duration(s: &str) -> Result<Duration, ConfigParseError> {
    let s = s.to_lowercase();
    if s.ends_with("us") {
        if let Some(dur) = s.strip_suffix("us") {
            Ok(Duration::from_micros(dur.parse()?))
        } else {
            Err(ConfigParseError::InvalidValue(format!(
                "the value of time should not be empty. ({s})"
            )))
        }
    } else if s.ends_with("ms") {
        if let Some(dur) = s.strip_suffix("ms") {
            Ok(Duration::from_millis(dur.parse()?))
        } else {
            Err(ConfigParseError::InvalidValue(format!(
                "the value of time should not be empty ({s})"
            )))
        }
    } else if s.ends_with('s') {
        if let Some(dur) = s.strip_suffix('s') {
            Ok(Duration::from_secs(dur.parse()?))
        } else {
            Err(ConfigParseError::InvalidValue(format!(
                "the value of time should not be empty ({s})"
            )))
        }
    } else {
        Err(ConfigParseError::InvalidUnit(format!(
            "the unit of time should be one of 'us', 'ms' or 's'({s})"
        )))
    }
}

/// Get the current wall-clock timestamp in nanoseconds.
///
/// Commit timestamps and apply/replay frontiers are all expressed in this
/// unit.
#[inline]
#[must_use]
pub fn current_timestamp_ns() -> i64 {
    let dur = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|e| unreachable!("SystemTime before UNIX EPOCH! {e}"));
    i64::try_from(dur.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod test {
    use super::*;

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("3ms").unwrap(), Duration::from_millis(3));
        assert_eq!(parse_duration("1us").unwrap(), Duration::from_micros(1));
        let results = vec![
            parse_duration("hello world"),
            parse_duration("5x"),
            parse_duration("helloms"),
        ];

        for res in results {
            assert!(res.is_err());
        }
    }

    #[test]
    fn test_current_timestamp_ns_is_monotonic_enough() {
        let first = current_timestamp_ns();
        let second = current_timestamp_ns();
        assert!(first > 0);
        assert!(second >= first);
    }
}
