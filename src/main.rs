//! debug-gate: merge check for debug-enabled configuration.
//!
//! Usage:
//!   debug-gate [check] [--repo <path>]       MergeContext JSON on stdin, decision JSON on stdout
//!   debug-gate settings get <type> [key]     display value for one scope
//!   debug-gate settings set <type> [key]     `{"enabled": ...}` on stdin
//!   debug-gate settings show <repo> <proj>   resolution chain for a repository
//!
//! `check` exits 0 when the merge is accepted and 1 when it is rejected.
//! `settings` exits 2 on a client error and 3 when the store is unavailable.

use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use debug_gate::admin::{AdminResponse, SettingsEndpoint};
use debug_gate::config::Config;
use debug_gate::eval::{Decision, DecisionEngine, MergeContext};
use debug_gate::scan::git::GitRepository;
use debug_gate::scan::ScanMode;
use debug_gate::settings::{FileStore, RepositoryRef, SettingsResolver, SettingsStore};
use debug_gate::Error;

const USAGE: &str = "usage: debug-gate [check [--repo <path>] | settings (get|set) <type> [key] | settings show <repo-id> <project-key>]";

fn read_stdin() -> Result<String, Error> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    Ok(input)
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("debug-gate: could not serialize output: {e}"),
    }
}

fn run_check(config: &Config, store: Arc<dyn SettingsStore>, args: &[String]) -> ExitCode {
    let mut repo_path = ".".to_string();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--repo" => match iter.next() {
                Some(p) => repo_path = p.clone(),
                None => {
                    eprintln!("{USAGE}");
                    return ExitCode::from(2);
                }
            },
            other => {
                eprintln!("debug-gate: unexpected argument '{other}'\n{USAGE}");
                return ExitCode::from(2);
            }
        }
    }

    let git = Arc::new(
        GitRepository::new(repo_path)
            .with_read_limits(config.scan.max_line_bytes, config.scan.max_file_bytes)
            .with_timeout(Duration::from_millis(config.scan.time_budget_ms)),
    );
    let changes = match config.scan.mode {
        ScanMode::ChangedFiles => {
            Some(git.clone() as Arc<dyn debug_gate::scan::ChangesetProvider>)
        }
        ScanMode::FixedList => None,
    };
    let engine = DecisionEngine::from_config(config, store, git, changes);

    let decision = match read_stdin().and_then(|s| Ok(serde_json::from_str::<MergeContext>(&s)?)) {
        Ok(ctx) => engine.evaluate(&ctx),
        Err(e) => {
            let decision = engine.fault_decision(&e);
            debug_gate::logging::log_input_fault(&e, &decision);
            decision
        }
    };
    print_json(&decision);
    exit_for(&decision)
}

fn exit_for(decision: &Decision) -> ExitCode {
    if decision.is_accepted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn respond(resp: AdminResponse) -> ExitCode {
    print_json(&resp.body);
    match resp.status {
        200..=299 => ExitCode::SUCCESS,
        400..=499 => ExitCode::from(2),
        _ => ExitCode::from(3),
    }
}

fn run_settings(config: &Config, store: Arc<dyn SettingsStore>, args: &[String]) -> ExitCode {
    let resolver = SettingsResolver::new(store, config.settings.default_enabled);
    let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or("");
    match arg(0) {
        "get" => respond(SettingsEndpoint::new(resolver).read_settings(arg(1), arg(2))),
        "set" => {
            let body = match read_stdin() {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("debug-gate: {e}");
                    return ExitCode::from(2);
                }
            };
            respond(SettingsEndpoint::new(resolver).save_settings(arg(1), arg(2), &body))
        }
        "show" if args.len() == 3 => {
            let repo = RepositoryRef::new(arg(1), arg(2));
            let mut chain = Vec::new();
            for scope in repo.chain() {
                match resolver.display_value(&scope) {
                    Ok(v) => chain.push(serde_json::json!({ "scope": scope.store_key(), "value": v })),
                    Err(e) => {
                        eprintln!("debug-gate: {e}");
                        return ExitCode::from(3);
                    }
                }
            }
            match resolver.resolve(&repo) {
                Ok(res) => {
                    print_json(&serde_json::json!({
                        "chain": chain,
                        "enabled": res.enabled,
                        "decided_by": res.source.map(|s| s.store_key()).unwrap_or_else(|| "default".into()),
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("debug-gate: {e}");
                    ExitCode::from(3)
                }
            }
        }
        _ => {
            eprintln!("{USAGE}");
            ExitCode::from(2)
        }
    }
}

fn main() -> ExitCode {
    debug_gate::logging::init();
    let config = Config::load();
    let store: Arc<dyn SettingsStore> = Arc::new(FileStore::new(config.settings.store_path()));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => run_check(&config, store, &[]),
        Some("check") => run_check(&config, store, &args[1..]),
        Some("--repo") => run_check(&config, store, &args),
        Some("settings") => run_settings(&config, store, &args[1..]),
        Some("-h" | "--help") => {
            println!("{USAGE}");
            ExitCode::SUCCESS
        }
        Some(other) => {
            eprintln!("debug-gate: unknown command '{other}'\n{USAGE}");
            ExitCode::from(2)
        }
    }
}
