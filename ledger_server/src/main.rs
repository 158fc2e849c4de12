use dotenvy::dotenv;
use ledger_server::{cli::handle_command_line_args, config::ServerConfig, server::run_server};
use log::*;
use stripe_tools::StripeConfig;

#[actix_web::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    if handle_command_line_args() {
        return;
    }
    let config = ServerConfig::from_env_or_default();
    let stripe_config = match StripeConfig::try_from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("🚀️ Cannot start without a Stripe configuration. {e}");
            eprintln!("{e}");
            std::process::exit(1);
        },
    };

    info!("🚀️ Starting server on {}:{}", config.host, config.port);
    match run_server(config, stripe_config).await {
        Ok(_) => println!("Bye!"),
        Err(e) => eprintln!("{e}"),
    }
}
