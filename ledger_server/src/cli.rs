use std::{env, env::VarError};

/// The server takes no arguments. Passing any prints the help text and the current configuration.
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET are deliberately absent
    const DISPLAY_ENVS: [&str; 10] = [
        "RUST_LOG",
        "LEDGER_HOST",
        "LEDGER_PORT",
        "LEDGER_DATABASE_URL",
        "LEDGER_RECONCILE_INTERVAL_SECS",
        "LEDGER_STALE_PAYMENT_SECS",
        "LEDGER_RECONCILE_ENABLED",
        "STRIPE_API_BASE",
        "STRIPE_TIMEOUT_SECS",
        "STRIPE_SIGNATURE_TOLERANCE_SECS",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
