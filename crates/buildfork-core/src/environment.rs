//! Child environment derivation

use std::collections::BTreeMap;
use tracing::debug;

use buildfork_config::{EnvNames, HeapTuning};

use crate::{CoreError, CoreResult};

const MIB: f64 = (1u64 << 20) as f64;

/// Old-generation heap limit in MiB for the given physical memory
pub fn max_heap_mib(total_memory: u64, fraction: f64) -> u64 {
    (total_memory as f64 * fraction / MIB).floor() as u64
}

/// Flags appended to the tuning variable, including the leading space
pub fn heap_flags(total_memory: u64, heap: &HeapTuning) -> String {
    format!(
        " --max-old-space-size={} --max-semi-space-size={} --stack-trace-limit={}",
        max_heap_mib(total_memory, heap.fraction),
        heap.semi_space_mib,
        heap.stack_trace_limit
    )
}

/// Environment for the forked child.
///
/// The parent's environment is overlaid on an empty tuning variable, so an
/// inherited value is kept and extended. The parent-id variable always
/// carries `parent_pid`.
pub fn derive_environment<I>(
    parent_env: I,
    parent_pid: u32,
    total_memory: u64,
    names: &EnvNames,
    heap: &HeapTuning,
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env = BTreeMap::new();
    env.insert(names.tuning_var.clone(), String::new());
    env.extend(parent_env);
    env.insert(names.parent_pid_var.clone(), parent_pid.to_string());

    let flags = heap_flags(total_memory, heap);
    env.entry(names.tuning_var.clone())
        .or_default()
        .push_str(&flags);

    debug!(
        parent_pid,
        tuning = %env[&names.tuning_var],
        "Derived child environment"
    );
    env
}

/// Check the parent-id variable against the real parent pid
pub fn verify_parent(var: &str, value: Option<&str>, actual_ppid: u32) -> CoreResult<u32> {
    let value = value.ok_or_else(|| CoreError::ParentMissing {
        var: var.to_string(),
    })?;

    let expected: u32 = value.trim().parse().map_err(|_| CoreError::ParentUnparsable {
        var: var.to_string(),
        value: value.to_string(),
    })?;

    if expected != actual_ppid {
        return Err(CoreError::ParentMismatch {
            var: var.to_string(),
            expected,
            actual: actual_ppid,
        });
    }

    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1 << 30;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn heap_limit_from_memory() {
        assert_eq!(max_heap_mib(16 * GIB, 0.75), 12288);
        assert_eq!(max_heap_mib(GIB + 1, 0.5), 512);
        assert_eq!(max_heap_mib(0, 0.75), 0);
    }

    #[test]
    fn sets_tuning_and_parent_pid() {
        let env = derive_environment(
            vars(&[("PATH", "/usr/bin")]),
            4242,
            16 * GIB,
            &EnvNames::default(),
            &HeapTuning::default(),
        );

        assert_eq!(env["PATH"], "/usr/bin");
        assert_eq!(env["PPID"], "4242");
        assert_eq!(
            env["NODE_OPTIONS"],
            " --max-old-space-size=12288 --max-semi-space-size=128 --stack-trace-limit=0"
        );
    }

    #[test]
    fn extends_inherited_tuning_and_overrides_parent_pid() {
        let env = derive_environment(
            vars(&[("NODE_OPTIONS", "--enable-source-maps"), ("PPID", "1")]),
            77,
            8 * GIB,
            &EnvNames::default(),
            &HeapTuning::default(),
        );

        assert_eq!(env["PPID"], "77");
        assert_eq!(
            env["NODE_OPTIONS"],
            "--enable-source-maps --max-old-space-size=6144 --max-semi-space-size=128 --stack-trace-limit=0"
        );
    }

    #[test]
    fn custom_names() {
        let names = EnvNames {
            parent_pid_var: "BUILD_PARENT".into(),
            tuning_var: "JS_FLAGS".into(),
        };
        let env = derive_environment(Vec::new(), 9, 4 * GIB, &names, &HeapTuning::default());
        assert_eq!(env["BUILD_PARENT"], "9");
        assert!(env["JS_FLAGS"].starts_with(" --max-old-space-size=3072"));
        assert!(!env.contains_key("PPID"));
    }

    #[test]
    fn parent_verification() {
        assert_eq!(verify_parent("PPID", Some("10"), 10).unwrap(), 10);
        assert!(matches!(
            verify_parent("PPID", None, 10),
            Err(CoreError::ParentMissing { .. })
        ));
        assert!(matches!(
            verify_parent("PPID", Some("ten"), 10),
            Err(CoreError::ParentUnparsable { .. })
        ));
        assert!(matches!(
            verify_parent("PPID", Some("11"), 10),
            Err(CoreError::ParentMismatch {
                expected: 11,
                actual: 10,
                ..
            })
        ));
    }
}
