use clap::Parser;
use serial_terminal_lib::config::CliArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = CliArgs::parse();
    serial_terminal_lib::run(args).await
}
