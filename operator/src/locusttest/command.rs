//! Assembles the Locust command line of the master and worker containers.
use tracing::info;

use crate::locusttest::{spec::MasterSpec, MASTER_PORT};

/// Flags set by the operator. User extra arguments may repeat them, and since Locust keeps the
/// last occurrence of a flag the user value wins.
const MANAGED_FLAGS: [&str; 10] = [
    "--master",
    "--worker",
    "--master-port",
    "--master-host",
    "--expect-workers",
    "--autostart",
    "--autoquit",
    "--otel",
    "--enable-rebalancing",
    "--only-summary",
];

const DEFAULT_AUTOQUIT_TIMEOUT: i32 = 60;

/// Returns the extra arguments that repeat an operator managed flag, in either the `--flag` or
/// `--flag=value` form.
pub fn detect_flag_conflicts(extra_args: &[String]) -> Vec<&str> {
    extra_args
        .iter()
        .filter(|arg| {
            MANAGED_FLAGS.iter().any(|flag| {
                arg.as_str() == *flag
                    || arg
                        .strip_prefix(flag)
                        .map_or(false, |rest| rest.starts_with('='))
            })
        })
        .map(String::as_str)
        .collect()
}

/// Build the argument list of the master container.
pub fn build_master_command(master: &MasterSpec, worker_replicas: i32, otel: bool) -> Vec<String> {
    let mut args: Vec<String> = master
        .command
        .split_whitespace()
        .map(str::to_owned)
        .collect();
    if otel {
        args.push("--otel".to_owned());
    }
    args.extend([
        "--master".to_owned(),
        format!("--master-port={MASTER_PORT}"),
        format!("--expect-workers={worker_replicas}"),
    ]);
    if master.autostart.unwrap_or(true) {
        args.push("--autostart".to_owned());
    }
    let autoquit = master
        .autoquit
        .as_ref()
        .map_or(true, |autoquit| autoquit.enabled);
    if autoquit {
        let timeout = master
            .autoquit
            .as_ref()
            .and_then(|autoquit| autoquit.timeout)
            .filter(|timeout| *timeout >= 0)
            .unwrap_or(DEFAULT_AUTOQUIT_TIMEOUT);
        args.extend(["--autoquit".to_owned(), timeout.to_string()]);
    }
    args.extend([
        "--enable-rebalancing".to_owned(),
        "--only-summary".to_owned(),
    ]);
    append_extra_args(&mut args, master.extra_args.as_deref(), "master");
    args
}

/// Build the argument list of a worker container.
pub fn build_worker_command(
    command: &str,
    master_host: &str,
    otel: bool,
    extra_args: Option<&[String]>,
) -> Vec<String> {
    let mut args: Vec<String> = command.split_whitespace().map(str::to_owned).collect();
    if otel {
        args.push("--otel".to_owned());
    }
    args.extend([
        "--worker".to_owned(),
        format!("--master-port={MASTER_PORT}"),
        format!("--master-host={master_host}"),
    ]);
    append_extra_args(&mut args, extra_args, "worker");
    args
}

fn append_extra_args(args: &mut Vec<String>, extra_args: Option<&[String]>, mode: &str) {
    let Some(extra_args) = extra_args else {
        return;
    };
    let conflicts = detect_flag_conflicts(extra_args);
    if !conflicts.is_empty() {
        info!(
            mode,
            ?conflicts,
            "user-provided extraArgs override operator-managed flags"
        );
    }
    args.extend(extra_args.iter().cloned());
}
