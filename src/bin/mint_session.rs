#![forbid(unsafe_code)]

//! Operator tool that mints a signed session token for a user id, standing in
//! for the deployment's real authentication service. The printed token goes
//! into an `Authorization: Bearer` header against the URL-mint endpoint.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use streamgate::config::{RuntimeOverrides, load_runtime_config};
use streamgate::security::{ensure_not_root, ensure_signing_secret};
use streamgate::token::TokenCodec;

const DEFAULT_SESSION_TTL_SECS: i64 = 86_400;

fn main() -> Result<()> {
    ensure_not_root("mint_session")?;

    let mut user: Option<String> = None;
    let mut ttl_secs = DEFAULT_SESSION_TTL_SECS;
    let mut env_path: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let value = match inline {
            Some(value) => value,
            None => args
                .next()
                .ok_or_else(|| anyhow!("{flag} requires a value"))?,
        };
        match flag.as_str() {
            "--user" => user = Some(value),
            "--ttl-secs" => {
                ttl_secs = value
                    .parse()
                    .context("--ttl-secs expects a number of seconds")?
            }
            "--env" => env_path = Some(PathBuf::from(value)),
            other => bail!("unknown argument: {other}\nusage: mint_session --user ID [--ttl-secs N] [--env PATH]"),
        }
    }

    let user = user.ok_or_else(|| anyhow!("--user is required"))?;
    let config = load_runtime_config(RuntimeOverrides {
        env_path,
        ..RuntimeOverrides::default()
    })?;
    ensure_signing_secret(&config.signing_secret)?;

    let codec = TokenCodec::new(&config.signing_secret);
    println!("{}", codec.mint_session(&user, ttl_secs));
    Ok(())
}
