#![cfg(not(tarpaulin_include))]

use budget_sheet::config::Config;
use budget_sheet::http;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Optional config file as the only argument
    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .with_overrides(|key| env::var(key).ok())?;

    http::run(config).await?;

    Ok(())
}
