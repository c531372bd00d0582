use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use super::{GlobalArgs, Settings, start};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Code to run verbatim; `-` reads it from stdin
    pub code: String,

    /// Wait at most this many milliseconds instead of TIMEOUT_WORKER
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,
}

pub async fn cmd(global: &GlobalArgs, args: RunArgs) -> Result<()> {
    let code = if args.code == "-" {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("reading code from stdin")?;
        code
    } else {
        args.code
    };

    let settings = Settings::load(global)?;
    let (runtime, _) = start(global, &settings).await?;
    let result = match args.timeout {
        Some(ms) => {
            runtime
                .run_inline_with_timeout(code, Duration::from_millis(ms))
                .await
        }
        None => runtime.run_inline(code).await,
    };
    runtime.shutdown().await;

    print!("{}", result?);
    Ok(())
}
